//! Feature-gated failpoint injection for deterministic fault injection in
//! tests (cancellation races, merge-apply failures).
//!
//! Compile with `--features failpoints` to enable injection. Without the
//! feature, the [`fp!`] macro expands to nothing.

use std::collections::HashMap;
use std::sync::{LazyLock, Mutex};
use std::time::Duration;

/// Actions a failpoint can take when triggered.
#[derive(Clone, Debug)]
pub enum FailpointAction {
    /// No-op (default).
    Off,
    /// Return an error with the given message.
    Error(String),
    /// Panic with the given message.
    Panic(String),
    /// Sleep for the given duration.
    Sleep(Duration),
}

/// Thread-safe global registry of active failpoints.
static REGISTRY: LazyLock<Mutex<HashMap<&'static str, FailpointAction>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Set a failpoint action.
///
/// # Panics
/// Panics if the internal registry mutex is poisoned.
pub fn set(name: &'static str, action: FailpointAction) {
    REGISTRY.lock().unwrap().insert(name, action);
}

/// Clear a specific failpoint.
///
/// # Panics
/// Panics if the internal registry mutex is poisoned.
pub fn clear(name: &'static str) {
    REGISTRY.lock().unwrap().remove(name);
}

/// Clear all failpoints.
///
/// # Panics
/// Panics if the internal registry mutex is poisoned.
pub fn clear_all() {
    REGISTRY.lock().unwrap().clear();
}

/// Check if a failpoint is set and execute its action.
/// Returns `Ok(())` if no failpoint or `Off`, `Err` if `Error` action.
///
/// # Panics
/// Panics if the internal registry mutex is poisoned, or if the failpoint
/// action is `Panic`.
pub fn check(name: &str) -> Result<(), String> {
    let registry = REGISTRY.lock().unwrap();
    match registry.get(name) {
        None | Some(FailpointAction::Off) => Ok(()),
        Some(FailpointAction::Error(msg)) => Err(msg.clone()),
        Some(FailpointAction::Panic(msg)) => panic!("failpoint {name}: {msg}"),
        Some(FailpointAction::Sleep(d)) => {
            let d = *d;
            drop(registry);
            std::thread::sleep(d);
            Ok(())
        }
    }
}

/// Failpoint injection point.
///
/// With the `failpoints` feature: checks the registry and may return `Err`
/// or panic. Without it: compiles to `Ok(())`, zero overhead.
///
/// Usage: `fp!("FP_MERGE_AFTER_APPLY")?;`
#[cfg(feature = "failpoints")]
#[macro_export]
macro_rules! fp {
    ($name:expr) => {
        $crate::failpoints::check($name)
            .map_err(|msg| format!("failpoint {}: {}", $name, msg))
    };
}

#[cfg(not(feature = "failpoints"))]
#[macro_export]
macro_rules! fp {
    ($name:expr) => {
        Ok::<(), String>(())
    };
}
