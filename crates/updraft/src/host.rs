//! A filesystem-backed reference host: the installed version comes from a
//! manifest file in the live directory, activation state from a JSON list.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::{debug, error, info};
use tokio::process::Command;
use updraft_host::{HostError, PackageHost};

pub struct FsHost {
    live_dir: PathBuf,
    fallback_dir: Option<PathBuf>,
    manifest_file: String,
    package_id: String,
    active_file: PathBuf,
    activation_command: Option<String>,
}

impl FsHost {
    pub fn new(
        live_dir: PathBuf,
        manifest_file: impl Into<String>,
        package_id: impl Into<String>,
        active_file: PathBuf,
    ) -> Self {
        Self {
            live_dir,
            fallback_dir: None,
            manifest_file: manifest_file.into(),
            package_id: package_id.into(),
            active_file,
            activation_command: None,
        }
    }

    /// Read the version from here while the live directory does not exist.
    #[must_use]
    pub fn with_fallback_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.fallback_dir = dir;
        self
    }

    #[must_use]
    pub fn with_activation_command(mut self, command: Option<String>) -> Self {
        self.activation_command = command.filter(|c| !c.trim().is_empty());
        self
    }

    fn package_dir(&self) -> &Path {
        match &self.fallback_dir {
            Some(fallback) if !self.live_dir.exists() => fallback,
            _ => &self.live_dir,
        }
    }

    fn active_packages(&self) -> Vec<String> {
        std::fs::read_to_string(&self.active_file)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default()
    }

    fn mark_active(&self) -> Result<(), HostError> {
        let mut active = self.active_packages();
        if active.contains(&self.package_id) {
            return Ok(());
        }
        active.push(self.package_id.clone());

        if let Some(parent) = self.active_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            serde_json::to_string_pretty(&active).map_err(|e| HostError::store("active list", e))?;
        std::fs::write(&self.active_file, content)?;
        Ok(())
    }

    async fn run_activation_command(&self, command: &str) -> Result<(), HostError> {
        info!("Running activation command: {command}");

        let output = shell(command)
            .current_dir(&self.live_dir)
            .env("UPDRAFT_PACKAGE_DIR", &self.live_dir)
            .output()
            .await
            .map_err(|e| HostError::activation(format!("failed to spawn `{command}`: {e}")))?;

        debug!("Activation command exit status: {:?}", output.status);
        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            error!("Activation command failed: stderr='{stderr}'");
            Err(HostError::CommandFailed { stderr })
        }
    }
}

#[cfg(unix)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

/// A `Version:` header line wins; otherwise the first non-empty line.
pub fn parse_manifest_version(content: &str) -> Option<String> {
    let lines = || content.lines().map(str::trim).filter(|line| !line.is_empty());

    lines()
        .find_map(|line| {
            let (key, value) = line.trim_start_matches(['*', '#', ' ']).split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case("version")
                .then(|| value.trim().to_string())
        })
        .filter(|version| !version.is_empty())
        .or_else(|| lines().next().map(str::to_string))
}

#[async_trait]
impl PackageHost for FsHost {
    fn installed_version(&self) -> String {
        std::fs::read_to_string(self.package_dir().join(&self.manifest_file))
            .ok()
            .and_then(|content| parse_manifest_version(&content))
            .unwrap_or_else(|| "0.0.0".to_string())
    }

    fn is_active(&self) -> bool {
        self.active_packages().contains(&self.package_id)
    }

    async fn activate(&self) -> Result<(), HostError> {
        if let Some(command) = &self.activation_command {
            self.run_activation_command(command).await?;
        }
        self.mark_active()?;
        info!("Activated {}", self.package_id);
        Ok(())
    }
}
