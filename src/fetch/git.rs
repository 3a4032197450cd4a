//! [`RemoteClient`] backed by the `git` command line.

use std::fs::File;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use tracing::debug;

use crate::traits::{FetchError, RemoteClient};

/// Runs the `git` executable found on `PATH` (or the one given).
#[derive(Debug, Clone)]
pub struct GitCli {
    program: String,
}

impl GitCli {
    /// Uses `git` from `PATH` after checking that it runs.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::RemoteUnavailable`] when `git --version` cannot
    /// be executed.
    pub fn detect() -> Result<Self, FetchError> {
        Self::with_program("git")
    }

    pub fn with_program(program: impl Into<String>) -> Result<Self, FetchError> {
        let git = Self {
            program: program.into(),
        };
        let output = Command::new(&git.program)
            .arg("--version")
            .output()
            .map_err(|e| FetchError::RemoteUnavailable {
                location: git.program.clone(),
                reason: format!("git is required for remote add-on locations ({e})"),
            })?;
        if !output.status.success() {
            return Err(FetchError::RemoteUnavailable {
                location: git.program.clone(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        debug!(version = %String::from_utf8_lossy(&output.stdout).trim(), "Found git");
        Ok(git)
    }

    fn command(&self, checkout: Option<&Path>) -> Command {
        let mut command = Command::new(&self.program);
        if let Some(checkout) = checkout {
            command.arg("-C").arg(checkout);
        }
        command.env("GIT_TERMINAL_PROMPT", "0");
        command
    }

    fn run(&self, mut command: Command, description: String) -> Result<Output, FetchError> {
        debug!(command = %description, "Running git");
        let output = command.output().map_err(|e| FetchError::Vcs {
            command: description.clone(),
            stderr: e.to_string(),
        })?;
        if !output.status.success() {
            return Err(FetchError::Vcs {
                command: description,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }
}

impl RemoteClient for GitCli {
    fn clone_repository(&self, repository: &str, destination: &Path) -> Result<(), FetchError> {
        let mut command = self.command(None);
        command
            .args(["clone", "--quiet", "--"])
            .arg(repository)
            .arg(destination)
            .stdin(Stdio::null());
        self.run(command, format!("git clone {repository}"))?;
        Ok(())
    }

    fn checkout(&self, checkout: &Path, branch: &str) -> Result<(), FetchError> {
        let mut command = self.command(Some(checkout));
        command.args(["checkout", "--quiet", branch]).stdin(Stdio::null());
        self.run(command, format!("git checkout {branch}"))?;
        Ok(())
    }

    fn export_zip(
        &self,
        checkout: &Path,
        tree_path: &str,
        prefix: &str,
        output: &Path,
    ) -> Result<(), FetchError> {
        let treeish = if tree_path.is_empty() {
            "HEAD^{tree}".to_string()
        } else {
            format!("HEAD:{tree_path}")
        };
        let file =
            File::create(output).map_err(|e| FetchError::io("Failed to create archive", output, e))?;

        let mut command = self.command(Some(checkout));
        command
            .args(["archive", "--format=zip"])
            .arg(format!("--prefix={prefix}"))
            .arg(&treeish)
            .stdin(Stdio::null())
            .stdout(Stdio::from(file));
        self.run(command, format!("git archive {treeish}"))?;
        Ok(())
    }
}
