//! Machine-level preparation that has to happen outside the cluster.

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum InstallError {
    #[error("failed to run {command}: {message}")]
    Spawn { command: String, message: String },

    #[error("{command} exited with {code:?}: {stderr}")]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
}

/// True when the hardware virtualisation device node is present.
pub fn probe_kvm(device: &Path) -> bool {
    device.exists()
}

#[async_trait]
pub trait HostSetup: Send + Sync {
    async fn install(&self) -> Result<(), InstallError>;
}

/// Runs a fixed list of commands in order, stopping at the first failure.
#[derive(Clone, Debug, Default)]
pub struct CommandHostSetup {
    commands: Vec<Vec<String>>,
}

impl CommandHostSetup {
    pub fn new(commands: Vec<Vec<String>>) -> Self {
        Self { commands }
    }
}

#[async_trait]
impl HostSetup for CommandHostSetup {
    async fn install(&self) -> Result<(), InstallError> {
        for argv in &self.commands {
            let Some((program, args)) = argv.split_first() else {
                continue;
            };
            let command = argv.join(" ");
            info!(%command, "host setup");
            let output = Command::new(program)
                .args(args)
                .output()
                .await
                .map_err(|e| InstallError::Spawn {
                    command: command.clone(),
                    message: e.to_string(),
                })?;
            if !output.status.success() {
                let stderr =
                    String::from_utf8_lossy(&output.stderr).trim().to_string();
                warn!(%command, %stderr, "host setup step failed");
                return Err(InstallError::Failed {
                    command,
                    code: output.status.code(),
                    stderr,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;
    use tracing_test::traced_test;

    fn argv(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn probe_checks_device_node() {
        let dev = NamedTempFile::new().unwrap();
        assert!(probe_kvm(dev.path()));
        assert!(!probe_kvm(Path::new("/nonexistent/kvm")));
    }

    #[tokio::test]
    async fn empty_setup_succeeds() {
        assert_eq!(CommandHostSetup::default().install().await, Ok(()));
    }

    #[tokio::test]
    #[traced_test]
    async fn first_failure_stops_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let setup = CommandHostSetup::new(vec![
            argv("false"),
            vec!["touch".into(), marker.display().to_string()],
        ]);
        let err = setup.install().await.unwrap_err();
        assert!(matches!(
            err,
            InstallError::Failed { ref command, .. } if command == "false"
        ));
        assert!(!marker.exists());
        assert!(logs_contain("host setup step failed"));
    }

    #[tokio::test]
    async fn missing_program_is_spawn_error() {
        let setup = CommandHostSetup::new(vec![argv("no-such-installer --yes")]);
        assert!(matches!(
            setup.install().await,
            Err(InstallError::Spawn { .. })
        ));
    }
}
