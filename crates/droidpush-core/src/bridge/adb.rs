//! Subprocess-backed bridge client.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::parse::{is_unknown_package, parse_device_list};
use super::runner::{CommandRunner, RunError, TokioCommandRunner};
use super::{BridgeClient, BridgeOutput, DeviceEntry};
use crate::device::DeviceAddress;
use crate::error::BridgeError;

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_INSTALL_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_TRANSIENT_ATTEMPTS: u32 = 2;

/// How one bridge invocation is retried and judged.
#[derive(Debug, Clone, Copy)]
struct CallPolicy {
    attempts: u32,
    /// Re-check the executable after the last failed attempt.
    revalidate: bool,
    timeout: Duration,
    /// Treat a non-zero exit as a failure.
    check_exit: bool,
    /// Output the bridge reports as failed despite its exit status.
    rejects: Option<fn(&BridgeOutput) -> bool>,
}

impl CallPolicy {
    fn rejecting(mut self, rejects: fn(&BridgeOutput) -> bool) -> Self {
        self.rejects = Some(rejects);
        self
    }

    fn accepts(&self, output: &BridgeOutput) -> bool {
        (output.success() || !self.check_exit)
            && !self.rejects.is_some_and(|rejects| rejects(output))
    }
}

/// [`BridgeClient`] that shells out to the `adb` executable.
///
/// `devices`, `connect`, `kill-server` and `start-server` get the transient
/// budget (two attempts by default); when the final attempt fails the
/// executable is re-validated so a vanished binary surfaces as
/// [`BridgeError::Unavailable`] rather than a rejected command. `disconnect`
/// is retried without re-validation. Every other call runs once.
#[derive(Debug, Clone)]
pub struct AdbBridge {
    executable: PathBuf,
    runner: Arc<dyn CommandRunner>,
    command_timeout: Duration,
    install_timeout: Duration,
    transient_attempts: u32,
    cancel: CancellationToken,
}

impl AdbBridge {
    /// Create a bridge for `executable`, failing if it cannot be found.
    pub fn new(executable: impl Into<PathBuf>) -> Result<Self, BridgeError> {
        let bridge = Self::with_runner(executable, Arc::new(TokioCommandRunner));
        let resolved = bridge.check_executable()?;
        Ok(Self {
            executable: resolved,
            ..bridge
        })
    }

    /// Create a bridge with a custom runner. The executable is not checked.
    pub fn with_runner(executable: impl Into<PathBuf>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            executable: executable.into(),
            runner,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            install_timeout: DEFAULT_INSTALL_TIMEOUT,
            transient_attempts: DEFAULT_TRANSIENT_ATTEMPTS,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_install_timeout(mut self, timeout: Duration) -> Self {
        self.install_timeout = timeout;
        self
    }

    pub fn with_transient_attempts(mut self, attempts: u32) -> Self {
        self.transient_attempts = attempts.max(1);
        self
    }

    /// Kill in-flight processes and refuse new ones once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Confirm the executable still resolves to a runnable file.
    pub fn check_executable(&self) -> Result<PathBuf, BridgeError> {
        which::which(&self.executable).map_err(|err| BridgeError::Unavailable {
            path: self.executable.clone(),
            reason: err.to_string(),
        })
    }

    fn transient(&self, revalidate: bool) -> CallPolicy {
        CallPolicy {
            attempts: self.transient_attempts,
            revalidate,
            timeout: self.command_timeout,
            check_exit: true,
            rejects: None,
        }
    }

    fn single(&self, timeout: Duration, check_exit: bool) -> CallPolicy {
        CallPolicy {
            attempts: 1,
            revalidate: false,
            timeout,
            check_exit,
            rejects: None,
        }
    }

    async fn execute(
        &self,
        args: Vec<String>,
        policy: CallPolicy,
    ) -> Result<BridgeOutput, BridgeError> {
        let command = render_command(&self.executable, &args);
        let mut last_error = None;

        for attempt in 1..=policy.attempts {
            if self.cancel.is_cancelled() {
                return Err(BridgeError::Cancelled { command });
            }
            debug!(%command, attempt, "running bridge command");

            let error = match self
                .runner
                .run(&self.executable, &args, policy.timeout, &self.cancel)
                .await
            {
                Ok(output) if policy.accepts(&output) => return Ok(output),
                Ok(output) => BridgeError::CommandFailed {
                    command: command.clone(),
                    output,
                },
                Err(RunError::Spawn(err)) => return Err(self.spawn_failure(err)),
                Err(RunError::Cancelled) => return Err(BridgeError::Cancelled { command }),
                Err(RunError::TimedOut) => BridgeError::TimedOut {
                    command: command.clone(),
                    timeout: policy.timeout,
                },
                Err(RunError::Io(source)) => BridgeError::Io {
                    command: command.clone(),
                    source,
                },
            };

            if attempt < policy.attempts {
                warn!(%command, attempt, error = %error, "bridge command failed; retrying");
            }
            last_error = Some(error);
        }

        if policy.revalidate {
            self.check_executable()?;
        }
        Err(last_error.unwrap_or(BridgeError::Cancelled { command }))
    }

    fn spawn_failure(&self, err: io::Error) -> BridgeError {
        BridgeError::Unavailable {
            path: self.executable.clone(),
            reason: err.to_string(),
        }
    }
}

/// `-s <serial>` selection prefix for device-scoped commands.
fn device_args(device: Option<&DeviceAddress>) -> Vec<String> {
    match device {
        Some(address) => vec!["-s".to_string(), address.serial()],
        None => Vec::new(),
    }
}

/// The bridge exits 0 on refused connections and reports them on stdout.
fn refused_connection(output: &BridgeOutput) -> bool {
    let stdout = output.stdout.to_lowercase();
    stdout.contains("failed to connect") || stdout.contains("cannot connect")
}

/// Older bridges print `Failure [...]` on stdout and still exit 0.
fn reports_failure(output: &BridgeOutput) -> bool {
    output
        .stdout
        .lines()
        .any(|line| line.trim_start().starts_with("Failure"))
}

fn render_command(executable: &Path, args: &[String]) -> String {
    let mut rendered = executable.display().to_string();
    for arg in args {
        rendered.push(' ');
        rendered.push_str(arg);
    }
    rendered
}

fn args<const N: usize>(parts: [&str; N]) -> Vec<String> {
    parts.iter().map(|part| part.to_string()).collect()
}

#[async_trait]
impl BridgeClient for AdbBridge {
    async fn list_devices(&self) -> Result<Vec<DeviceEntry>, BridgeError> {
        let output = self.execute(args(["devices"]), self.transient(true)).await?;
        Ok(parse_device_list(&output.stdout))
    }

    async fn connect(&self, address: &DeviceAddress) -> Result<BridgeOutput, BridgeError> {
        let policy = self.transient(true).rejecting(refused_connection);
        self.execute(args(["connect", address.as_str()]), policy)
            .await
    }

    async fn disconnect(
        &self,
        address: Option<&DeviceAddress>,
    ) -> Result<BridgeOutput, BridgeError> {
        let mut command_args = args(["disconnect"]);
        if let Some(address) = address {
            command_args.push(address.as_str().to_string());
        }
        self.execute(command_args, self.transient(false)).await
    }

    async fn kill_server(&self) -> Result<BridgeOutput, BridgeError> {
        self.execute(args(["kill-server"]), self.transient(true)).await
    }

    async fn start_server(&self) -> Result<BridgeOutput, BridgeError> {
        self.execute(args(["start-server"]), self.transient(true)).await
    }

    async fn install(
        &self,
        apk_path: &Path,
        device: Option<&DeviceAddress>,
    ) -> Result<BridgeOutput, BridgeError> {
        let mut command_args = device_args(device);
        command_args.push("install".to_string());
        command_args.push(apk_path.display().to_string());
        let policy = self
            .single(self.install_timeout, true)
            .rejecting(reports_failure);
        self.execute(command_args, policy).await
    }

    async fn uninstall(
        &self,
        package_id: &str,
        device: Option<&DeviceAddress>,
    ) -> Result<bool, BridgeError> {
        let mut command_args = device_args(device);
        command_args.push("uninstall".to_string());
        command_args.push(package_id.to_string());
        let command = render_command(&self.executable, &command_args);

        let output = self
            .execute(command_args, self.single(self.command_timeout, false))
            .await?;
        if is_unknown_package(&output.stderr, package_id)
            || is_unknown_package(&output.stdout, package_id)
        {
            debug!(package_id, "package not installed; nothing to remove");
            return Ok(false);
        }
        if !output.success() || reports_failure(&output) {
            return Err(BridgeError::CommandFailed { command, output });
        }
        Ok(true)
    }

    async fn run_shell(
        &self,
        shell_args: &[String],
        device: Option<&DeviceAddress>,
    ) -> Result<BridgeOutput, BridgeError> {
        let mut command_args = device_args(device);
        command_args.push("shell".to_string());
        command_args.extend(shell_args.iter().cloned());
        self.execute(command_args, self.single(self.command_timeout, true))
            .await
    }
}
