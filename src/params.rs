//! Provider parameters.
//!
//! Some solvers read credentials from the process environment. A parameter set is written to the
//! environment immediately before the exchange that needs it and restored right after. Because the
//! environment is process-wide, application holds one global lock until the guard drops.

use std::ffi::OsString;

use tokio::sync::{Mutex, MutexGuard};

use crate::config::ProviderParameters;

static ENVIRONMENT: Mutex<()> = Mutex::const_new(());

/// Applied parameter set; restores the previous environment on drop.
#[must_use = "parameters are reset as soon as the guard is dropped"]
pub struct AppliedParameters {
    name: String,
    previous: Vec<(String, Option<OsString>)>,
    _lock: MutexGuard<'static, ()>,
}

/// Waits for exclusive use of the environment, then applies `set`.
pub async fn apply(set: &ProviderParameters) -> AppliedParameters {
    let lock = ENVIRONMENT.lock().await;

    let mut previous = Vec::with_capacity(set.variables.len());

    for variable in &set.variables {
        previous.push((variable.name.clone(), std::env::var_os(&variable.name)));
        std::env::set_var(&variable.name, &variable.value);
    }

    log::debug!(
        "applied provider parameters={} variables={:?}",
        set.name,
        set.variables.iter().map(|v| &v.name).collect::<Vec<_>>()
    );

    AppliedParameters {
        name: set.name.clone(),
        previous,
        _lock: lock,
    }
}

/// Waits for exclusive use of the environment without changing it.
///
/// Taken by solvers that read their configuration from the environment outside of any parameter
/// set, so they never observe another request's variables.
pub async fn unchanged() -> MutexGuard<'static, ()> {
    ENVIRONMENT.lock().await
}

impl Drop for AppliedParameters {
    fn drop(&mut self) {
        // reverse order so a name listed twice ends at its original value
        for (name, value) in self.previous.drain(..).rev() {
            match value {
                Some(value) => std::env::set_var(&name, value),
                None => std::env::remove_var(&name),
            }
        }

        log::debug!("reset provider parameters={}", self.name);
    }
}
