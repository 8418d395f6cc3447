//! Guaranteed teardown of a build environment

use layer_core::{LayerError, Result};
use std::time::Duration;
use tracing::{error, warn};

use crate::environment::{BuildEnvironment, EnvironmentHandle};

/// Owns a provisioned (or provisioning) environment until it is released.
///
/// `release` tears down asynchronously. If the scope is dropped first
/// (panic, or the owning future was dropped), `Drop` tears down blocking.
pub struct EnvironmentScope<'a> {
    env: &'a dyn BuildEnvironment,
    handle: EnvironmentHandle,
    armed: bool,
}

impl<'a> EnvironmentScope<'a> {
    pub fn new(env: &'a dyn BuildEnvironment, handle: EnvironmentHandle) -> Self {
        Self {
            env,
            handle,
            armed: true,
        }
    }

    pub fn handle(&self) -> &EnvironmentHandle {
        &self.handle
    }

    /// Tear down within `limit`. A teardown that overruns is abandoned and
    /// reported as an error; the blocking fallback is skipped for it as it
    /// would wait on the same unresponsive daemon.
    pub async fn release(mut self, limit: Duration) -> Result<()> {
        let result = match tokio::time::timeout(limit, self.env.teardown(&self.handle)).await {
            Ok(result) => result,
            Err(_) => Err(LayerError::BuildFailure(format!(
                "teardown of {} did not finish within {}s",
                self.handle.container,
                limit.as_secs()
            ))),
        };
        // Disarmed only once teardown finished or was abandoned, so a
        // release dropped half way still falls back to Drop.
        self.armed = false;
        result
    }
}

impl Drop for EnvironmentScope<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!(
            "{} environment {} dropped without release, tearing down",
            self.env.name(),
            self.handle.container
        );
        if let Err(e) = self.env.teardown_blocking(&self.handle) {
            error!(
                "Failed to tear down {} environment {}: {}",
                self.env.name(),
                self.handle.container,
                e
            );
        }
    }
}
