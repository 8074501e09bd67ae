//! Service restart commands.

use async_trait::async_trait;
use tokio::process::Command;

use edgewatch_core::{EdgewatchError, Result};

/// Restart-command collaborator. Fire-and-forget from the monitor's
/// viewpoint: failures are logged by the caller and never retried here —
/// the next self-test cycle observes whether the restart took.
#[async_trait]
pub trait ServiceControl: Send + Sync {
    async fn restart(&self, service: &str) -> Result<()>;
}

/// Restarts units through `systemctl`.
pub struct SystemdServiceControl;

#[async_trait]
impl ServiceControl for SystemdServiceControl {
    async fn restart(&self, service: &str) -> Result<()> {
        let status = Command::new("systemctl")
            .args(["restart", service])
            .status()
            .await
            .map_err(|e| {
                EdgewatchError::ServiceControl(format!("spawn systemctl restart {service}: {e}"))
            })?;
        if status.success() {
            Ok(())
        } else {
            Err(EdgewatchError::ServiceControl(format!(
                "systemctl restart {service} exited with {status}"
            )))
        }
    }
}
