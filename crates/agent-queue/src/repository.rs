// Runbook repository acquisition: clone the default branch into a fresh
// temporary directory.

use crate::error::CloneError;

use agent_common::constants::{REPOSITORY_BRANCH, REPOSITORY_DIR_PREFIX};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;

/// Environment variable the askpass helper reads the key passphrase from.
const PASSPHRASE_ENV: &str = "AGENT_SSH_PASSPHRASE";

/// Performs the actual clone into an existing, empty directory.
#[async_trait]
pub trait Cloner: Send + Sync {
    async fn clone_master(
        &self,
        target_dir: &Path,
        url: &str,
        private_key_filepath: Option<&Path>,
        passphrase: Option<&str>,
    ) -> Result<(), CloneError>;
}

/// Clones runbook repositories through an injected [`Cloner`].
pub struct RepositoryFetcher {
    cloner: Arc<dyn Cloner>,
    base_dir: Option<PathBuf>,
}

impl RepositoryFetcher {
    pub fn new(cloner: Arc<dyn Cloner>) -> Self {
        Self {
            cloner,
            base_dir: None,
        }
    }

    /// Create clone directories under `base_dir` instead of the system temp dir.
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(base_dir.into());
        self
    }

    /// Clone `url` into a new temporary directory and return its path.
    ///
    /// The directory is removed if the clone fails. On success the caller
    /// owns it and must remove it when done.
    pub async fn clone_master(
        &self,
        url: &str,
        private_key_filepath: Option<&Path>,
        passphrase: Option<&str>,
    ) -> Result<PathBuf, CloneError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(REPOSITORY_DIR_PREFIX);
        let dir = match &self.base_dir {
            Some(base) => builder.tempdir_in(base),
            None => builder.tempdir(),
        }
        .map_err(CloneError::TempDir)?;

        self.cloner
            .clone_master(dir.path(), url, private_key_filepath, passphrase)
            .await?;

        Ok(dir.keep())
    }
}

/// Clones with the `git` command line, authenticating over SSH with an
/// optional private key.
#[derive(Debug, Clone)]
pub struct GitCommandCloner {
    git: PathBuf,
}

impl Default for GitCommandCloner {
    fn default() -> Self {
        Self {
            git: PathBuf::from("git"),
        }
    }
}

impl GitCommandCloner {
    pub fn new(git: impl Into<PathBuf>) -> Self {
        Self { git: git.into() }
    }

    fn ssh_command(private_key_filepath: &Path) -> String {
        format!(
            "ssh -i '{}' -o IdentitiesOnly=yes",
            private_key_filepath.display().to_string().replace('\'', r"'\''")
        )
    }
}

#[async_trait]
impl Cloner for GitCommandCloner {
    async fn clone_master(
        &self,
        target_dir: &Path,
        url: &str,
        private_key_filepath: Option<&Path>,
        passphrase: Option<&str>,
    ) -> Result<(), CloneError> {
        let mut cmd = Command::new(&self.git);
        cmd.args(["clone", "--single-branch", "--branch", REPOSITORY_BRANCH])
            .arg("--recurse-submodules")
            .arg(url)
            .arg(target_dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Keeps the askpass helper alive until git exits.
        let mut _askpass_dir = None;

        if let Some(key) = private_key_filepath {
            if !key.is_file() {
                return Err(CloneError::PrivateKey(key.to_path_buf()));
            }
            cmd.env("GIT_SSH_COMMAND", Self::ssh_command(key));

            if let Some(passphrase) = passphrase.filter(|p| !p.is_empty()) {
                let (dir, script) = write_askpass_helper().map_err(CloneError::TempDir)?;
                cmd.envs(askpass_env(&script, passphrase, std::env::var_os("DISPLAY")));
                _askpass_dir = Some(dir);
            }
        }

        let output = cmd.output().await.map_err(CloneError::Spawn)?;
        if !output.status.success() {
            return Err(CloneError::Git {
                url: url.to_string(),
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(())
    }
}

/// Environment that makes ssh read the key passphrase from the askpass helper.
///
/// `SSH_ASKPASS_REQUIRE` needs OpenSSH 8.4+. Older clients only consult
/// `SSH_ASKPASS` when `DISPLAY` is set and no terminal is attached.
fn askpass_env(
    script: &Path,
    passphrase: &str,
    display: Option<OsString>,
) -> Vec<(&'static str, OsString)> {
    vec![
        ("SSH_ASKPASS", script.as_os_str().to_os_string()),
        ("SSH_ASKPASS_REQUIRE", OsString::from("force")),
        ("DISPLAY", display.unwrap_or_else(|| OsString::from("none"))),
        (PASSPHRASE_ENV, OsString::from(passphrase)),
    ]
}

/// Write a helper that prints the passphrase from the environment for ssh.
fn write_askpass_helper() -> std::io::Result<(tempfile::TempDir, PathBuf)> {
    let dir = tempfile::Builder::new().prefix("askpass").tempdir()?;
    let script = dir.path().join("askpass.sh");
    std::fs::write(
        &script,
        format!("#!/bin/sh\nprintf '%s\\n' \"${}\"\n", PASSPHRASE_ENV),
    )?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o700))?;
    }

    Ok((dir, script))
}
