//! Pending Action Store — a process-wide, single-slot-per-tool-call stack
//! for deferrable tool actions that are resolved later by an explicit
//! `resolve` call.

use std::collections::HashMap;
use std::sync::Mutex;

/// A deferred action registered by a tool call. The closures capture
/// whatever state the originating tool needs to finish its work once a
/// decision arrives.
pub struct PendingAction {
    pub label: String,
    apply: Box<dyn FnOnce(&str) + Send>,
    reject: Box<dyn FnOnce(&str) + Send>,
}

impl PendingAction {
    #[must_use]
    pub fn new(
        label: impl Into<String>,
        apply: impl FnOnce(&str) + Send + 'static,
        reject: impl FnOnce(&str) + Send + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            apply: Box::new(apply),
            reject: Box::new(reject),
        }
    }
}

/// Error returned when registering or resolving a pending action
/// conflicts with the store's single-slot-per-key invariant.
#[derive(Debug, PartialEq, Eq)]
pub enum PendingActionError {
    /// A tool instance tried to register a second action while its first
    /// was still unresolved.
    AlreadyPending { key: String },
    /// `resolve` was called for a key with nothing registered.
    NoSuchPending { key: String },
}

impl std::fmt::Display for PendingActionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyPending { key } => {
                write!(f, "tool instance '{key}' already has an unresolved pending action")
            }
            Self::NoSuchPending { key } => write!(f, "no pending action registered for '{key}'"),
        }
    }
}

impl std::error::Error for PendingActionError {}

/// The process-wide store. At most one unresolved action per key
/// (typically a tool-call instance id); resolution consumes the record.
#[derive(Default)]
pub struct PendingActionStore {
    slots: Mutex<HashMap<String, PendingAction>>,
}

impl PendingActionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a deferred action under `key`.
    ///
    /// # Errors
    /// Returns [`PendingActionError::AlreadyPending`] if `key` already has
    /// an unresolved action.
    ///
    /// # Panics
    /// Panics if the internal mutex is poisoned.
    pub fn register(&self, key: impl Into<String>, action: PendingAction) -> Result<(), PendingActionError> {
        let key = key.into();
        let mut slots = self.slots.lock().expect("pending action mutex poisoned");
        if slots.contains_key(&key) {
            return Err(PendingActionError::AlreadyPending { key });
        }
        slots.insert(key, action);
        Ok(())
    }

    /// Resolve the action under `key` by applying it, consuming the slot.
    ///
    /// # Errors
    /// Returns [`PendingActionError::NoSuchPending`] if nothing is
    /// registered under `key`.
    ///
    /// # Panics
    /// Panics if the internal mutex is poisoned.
    pub fn apply(&self, key: &str, reason: &str) -> Result<(), PendingActionError> {
        let action = self.take(key)?;
        (action.apply)(reason);
        Ok(())
    }

    /// Resolve the action under `key` by rejecting it, consuming the slot.
    ///
    /// # Errors
    /// Returns [`PendingActionError::NoSuchPending`] if nothing is
    /// registered under `key`.
    ///
    /// # Panics
    /// Panics if the internal mutex is poisoned.
    pub fn reject(&self, key: &str, reason: &str) -> Result<(), PendingActionError> {
        let action = self.take(key)?;
        (action.reject)(reason);
        Ok(())
    }

    fn take(&self, key: &str) -> Result<PendingAction, PendingActionError> {
        let mut slots = self.slots.lock().expect("pending action mutex poisoned");
        slots
            .remove(key)
            .ok_or_else(|| PendingActionError::NoSuchPending {
                key: key.to_string(),
            })
    }

    /// Whether `key` currently has an unresolved action.
    ///
    /// # Panics
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn is_pending(&self, key: &str) -> bool {
        self.slots.lock().expect("pending action mutex poisoned").contains_key(key)
    }
}
