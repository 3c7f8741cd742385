//! Remote-host collaborator for the ground-truth pipeline.
//!
//! The engine never talks to a host directly. It asks a [`Transport`] whether a
//! path exists, reads a marker, runs a command, mirrors a directory, or removes
//! a stale marker. Paths handed to a transport are host paths; only `copy`
//! takes a local destination.

use std::{
    fs, io,
    path::{Path, PathBuf},
    process::{Command, Output, Stdio},
};

use thiserror::Error;
use tracing::{debug, trace};
use walkdir::WalkDir;

/// Exit status `ssh` reserves for its own connection failures.
const SSH_CONNECT_FAILURE: i32 = 255;
/// `rsync` status for a broken protocol stream, which is what a dead host looks like.
const RSYNC_PROTOCOL_FAILURE: i32 = 12;

#[derive(Debug, Error)]
pub enum TransportError {
    /// The host could not be reached at all. Nothing is known about the test.
    #[error("host unreachable: {0}")]
    Unreachable(String),
    /// The host answered but the operation itself failed.
    #[error("command failed with exit code {code:?}: {stderr}")]
    CommandFailed { code: Option<i32>, stderr: String },
    #[error("local I/O failure: {0}")]
    Io(#[from] io::Error),
}

/// Captured output of a remote command. A non-zero `code` is not an error at
/// this layer; the caller decides what it means for the test.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    fn from_output(output: Output) -> Self {
        Self {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

pub trait Transport: Send + Sync {
    fn exists(&self, path: &str) -> Result<bool, TransportError>;

    /// Returns the marker text at `path`, or `None` when there is no marker.
    fn read_marker(&self, path: &str) -> Result<Option<String>, TransportError>;

    fn run_remote(&self, command: &str) -> Result<CommandOutput, TransportError>;

    /// Mirrors the host directory `path` into `local_dest`, creating it if needed.
    fn copy(&self, path: &str, local_dest: &Path) -> Result<(), TransportError>;

    /// Removes the file at `path`. Removing a missing file is not an error.
    fn remove(&self, path: &str) -> Result<(), TransportError>;
}

/// Quotes `text` for a POSIX shell.
pub fn shell_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', r"'\''"))
}

// ============================================================================
// SSH TRANSPORT
// ============================================================================

/// Talks to the simulation host through the system `ssh` and `rsync` binaries.
#[derive(Debug, Clone)]
pub struct SshTransport {
    host: String,
    user: Option<String>,
    port: Option<u16>,
    identity: Option<PathBuf>,
    connect_timeout_secs: u64,
}

impl SshTransport {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: None,
            port: None,
            identity: None,
            connect_timeout_secs: 10,
        }
    }

    pub fn with_user(mut self, user: Option<String>) -> Self {
        self.user = user;
        self
    }

    pub fn with_port(mut self, port: Option<u16>) -> Self {
        self.port = port;
        self
    }

    pub fn with_identity(mut self, identity: Option<PathBuf>) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_connect_timeout(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = secs;
        self
    }

    fn target(&self) -> String {
        match &self.user {
            Some(user) => format!("{user}@{}", self.host),
            None => self.host.clone(),
        }
    }

    /// `ssh` options shared by direct commands and the rsync remote shell.
    fn ssh_options(&self) -> Vec<String> {
        let mut options = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
        ];
        if let Some(port) = self.port {
            options.push("-p".to_string());
            options.push(port.to_string());
        }
        if let Some(identity) = &self.identity {
            options.push("-i".to_string());
            options.push(identity.display().to_string());
        }
        options
    }

    fn ssh(&self, command: &str) -> Result<CommandOutput, TransportError> {
        trace!(host = %self.host, command, "ssh");
        let output = Command::new("ssh")
            .args(self.ssh_options())
            .arg(self.target())
            .arg(command)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| TransportError::Unreachable(format!("failed to spawn ssh: {e}")))?;
        reached(CommandOutput::from_output(output))
    }
}

/// Separates `ssh` failing to connect from the remote command failing.
fn reached(output: CommandOutput) -> Result<CommandOutput, TransportError> {
    if output.code == Some(SSH_CONNECT_FAILURE) {
        return Err(TransportError::Unreachable(output.stderr.trim().to_string()));
    }
    Ok(output)
}

impl Transport for SshTransport {
    fn exists(&self, path: &str) -> Result<bool, TransportError> {
        let output = self.ssh(&format!("test -e {}", shell_quote(path)))?;
        Ok(output.success())
    }

    fn read_marker(&self, path: &str) -> Result<Option<String>, TransportError> {
        let quoted = shell_quote(path);
        let output = self.ssh(&format!("test -f {quoted} && cat {quoted}"))?;
        Ok(output.success().then_some(output.stdout))
    }

    fn run_remote(&self, command: &str) -> Result<CommandOutput, TransportError> {
        self.ssh(command)
    }

    fn copy(&self, path: &str, local_dest: &Path) -> Result<(), TransportError> {
        fs::create_dir_all(local_dest)?;
        let remote_shell = std::iter::once("ssh".to_string())
            .chain(self.ssh_options())
            .collect::<Vec<_>>()
            .join(" ");
        let source = format!("{}:{}/", self.target(), path.trim_end_matches('/'));
        let dest = format!("{}/", local_dest.display());
        debug!(host = %self.host, source = %source, dest = %dest, "rsync");
        let output = Command::new("rsync")
            .args(["-az", "-e", &remote_shell, &source, &dest])
            .stdin(Stdio::null())
            .output()
            .map_err(|e| TransportError::Unreachable(format!("failed to spawn rsync: {e}")))?;
        let output = CommandOutput::from_output(output);
        match output.code {
            Some(0) => Ok(()),
            Some(SSH_CONNECT_FAILURE) | Some(RSYNC_PROTOCOL_FAILURE) => {
                Err(TransportError::Unreachable(output.stderr.trim().to_string()))
            }
            code => Err(TransportError::CommandFailed {
                code,
                stderr: output.stderr.trim().to_string(),
            }),
        }
    }

    fn remove(&self, path: &str) -> Result<(), TransportError> {
        let output = self.ssh(&format!("rm -f {}", shell_quote(path)))?;
        if output.success() {
            Ok(())
        } else {
            Err(TransportError::CommandFailed {
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }
}

// ============================================================================
// LOCAL TRANSPORT
// ============================================================================

/// Runs everything on this machine. The "host" filesystem is the local one.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalTransport;

impl Transport for LocalTransport {
    fn exists(&self, path: &str) -> Result<bool, TransportError> {
        Ok(Path::new(path).exists())
    }

    fn read_marker(&self, path: &str) -> Result<Option<String>, TransportError> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn run_remote(&self, command: &str) -> Result<CommandOutput, TransportError> {
        trace!(command, "sh -c");
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .output()?;
        Ok(CommandOutput::from_output(output))
    }

    fn copy(&self, path: &str, local_dest: &Path) -> Result<(), TransportError> {
        let source = Path::new(path);
        if !source.is_dir() {
            return Err(TransportError::CommandFailed {
                code: None,
                stderr: format!("{path} is not a directory"),
            });
        }
        if source == local_dest {
            return Ok(());
        }
        for entry in WalkDir::new(source) {
            let entry = entry.map_err(io::Error::from)?;
            let relative = entry
                .path()
                .strip_prefix(source)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            let target = local_dest.join(relative);
            if entry.file_type().is_dir() {
                fs::create_dir_all(&target)?;
            } else {
                fs::copy(entry.path(), &target)?;
            }
        }
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<(), TransportError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_ssh_options_include_port_and_timeout() {
        let transport = SshTransport::new("sim-host")
            .with_user(Some("regress".into()))
            .with_port(Some(2224))
            .with_connect_timeout(5);
        let options = transport.ssh_options().join(" ");
        assert!(options.contains("ConnectTimeout=5"));
        assert!(options.contains("-p 2224"));
        assert_eq!(transport.target(), "regress@sim-host");
    }

    #[test]
    fn test_ssh_connect_failure_is_unreachable() {
        let refused = CommandOutput {
            code: Some(255),
            stdout: String::new(),
            stderr: "ssh: connect to host sim-host port 22: Connection refused\n".into(),
        };
        match reached(refused) {
            Err(TransportError::Unreachable(reason)) => assert!(reason.ends_with("Connection refused")),
            other => panic!("expected unreachable, got {other:?}"),
        }

        let failed = CommandOutput {
            code: Some(1),
            ..CommandOutput::default()
        };
        assert_eq!(reached(failed).unwrap().code, Some(1));
    }

    #[test]
    fn test_local_transport_copy_and_remove() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        fs::create_dir_all(src.path().join("neo_0")).unwrap();
        fs::write(src.path().join("neo_0").join("thread_0.elf"), b"elf").unwrap();
        fs::write(src.path().join("sim_result.yml"), "res: PASS\ntotal-cycles: 9\n").unwrap();

        let transport = LocalTransport;
        let dest = dst.path().join("mirror");
        transport.copy(&src.path().display().to_string(), &dest).unwrap();
        assert!(dest.join("neo_0").join("thread_0.elf").is_file());

        let marker = dest.join("sim_result.yml").display().to_string();
        assert!(transport.exists(&marker).unwrap());
        assert!(transport.read_marker(&marker).unwrap().is_some());
        transport.remove(&marker).unwrap();
        transport.remove(&marker).unwrap();
        assert_eq!(transport.read_marker(&marker).unwrap(), None);
    }

    #[test]
    fn test_local_run_reports_exit_code() {
        let output = LocalTransport.run_remote("echo hi; exit 3").unwrap();
        assert_eq!(output.code, Some(3));
        assert_eq!(output.stdout.trim(), "hi");
        assert!(!output.success());
    }
}
