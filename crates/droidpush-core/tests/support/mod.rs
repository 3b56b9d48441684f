//! Scripted fakes shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use droidpush_core::bridge::{BridgeClient, BridgeOutput, CommandRunner, DeviceEntry, RunError};
use droidpush_core::device::DeviceAddress;
use droidpush_core::error::BridgeError;
use tokio_util::sync::CancellationToken;

type Queue<T> = Mutex<VecDeque<Result<T, BridgeError>>>;

/// Pop the next scripted result. A lone remaining success repeats forever;
/// an empty queue yields `default`.
fn next<T: Clone>(queue: &Queue<T>, default: impl FnOnce() -> T) -> Result<T, BridgeError> {
    let mut queue = queue.lock().unwrap();
    if queue.len() == 1
        && let Some(Ok(value)) = queue.front()
    {
        return Ok(value.clone());
    }
    queue.pop_front().unwrap_or_else(|| Ok(default()))
}

pub fn entry(address: &str, token: &str) -> DeviceEntry {
    DeviceEntry::new(address, token)
}

pub fn output(exit_code: i32, stdout: &str, stderr: &str) -> BridgeOutput {
    BridgeOutput {
        exit_code,
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
    }
}

pub fn command_failed(command: &str, exit_code: i32, stderr: &str) -> BridgeError {
    BridgeError::CommandFailed {
        command: command.to_string(),
        output: output(exit_code, "", stderr),
    }
}

/// [`BridgeClient`] fake that replays scripted results and records every call.
#[derive(Default)]
pub struct ScriptedBridge {
    calls: Mutex<Vec<String>>,
    devices: Queue<Vec<DeviceEntry>>,
    connect: Queue<BridgeOutput>,
    kill_server: Queue<BridgeOutput>,
    uninstall: Queue<bool>,
    install: Queue<BridgeOutput>,
    shell: Queue<BridgeOutput>,
}

impl ScriptedBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `devices` listings in order; the last one repeats.
    pub fn with_listings(self, listings: Vec<Vec<DeviceEntry>>) -> Self {
        self.devices
            .lock()
            .unwrap()
            .extend(listings.into_iter().map(Ok));
        self
    }

    pub fn with_devices_error(self, err: BridgeError) -> Self {
        self.devices.lock().unwrap().push_back(Err(err));
        self
    }

    pub fn with_connect(self, result: Result<BridgeOutput, BridgeError>) -> Self {
        self.connect.lock().unwrap().push_back(result);
        self
    }

    pub fn with_kill_server(self, result: Result<BridgeOutput, BridgeError>) -> Self {
        self.kill_server.lock().unwrap().push_back(result);
        self
    }

    pub fn with_uninstall(self, result: Result<bool, BridgeError>) -> Self {
        self.uninstall.lock().unwrap().push_back(result);
        self
    }

    pub fn with_install(self, result: Result<BridgeOutput, BridgeError>) -> Self {
        self.install.lock().unwrap().push_back(result);
        self
    }

    pub fn with_shell(self, result: Result<BridgeOutput, BridgeError>) -> Self {
        self.shell.lock().unwrap().push_back(result);
        self
    }

    /// Queue a `pm list packages` response.
    pub fn with_packages(self, ids: &[&str]) -> Self {
        let stdout: String = ids.iter().map(|id| format!("package:{id}\n")).collect();
        self.shell.lock().unwrap().push_back(Ok(output(0, &stdout, "")));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of recorded calls whose first word is `operation`.
    pub fn count(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.split_whitespace().next() == Some(operation))
            .count()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl BridgeClient for ScriptedBridge {
    async fn list_devices(&self) -> Result<Vec<DeviceEntry>, BridgeError> {
        self.record("devices".to_string());
        next(&self.devices, Vec::new)
    }

    async fn connect(&self, address: &DeviceAddress) -> Result<BridgeOutput, BridgeError> {
        self.record(format!("connect {address}"));
        next(&self.connect, BridgeOutput::default)
    }

    async fn disconnect(
        &self,
        address: Option<&DeviceAddress>,
    ) -> Result<BridgeOutput, BridgeError> {
        match address {
            Some(address) => self.record(format!("disconnect {address}")),
            None => self.record("disconnect".to_string()),
        }
        Ok(BridgeOutput::default())
    }

    async fn kill_server(&self) -> Result<BridgeOutput, BridgeError> {
        self.record("kill-server".to_string());
        next(&self.kill_server, BridgeOutput::default)
    }

    async fn start_server(&self) -> Result<BridgeOutput, BridgeError> {
        self.record("start-server".to_string());
        Ok(BridgeOutput::default())
    }

    async fn install(
        &self,
        apk_path: &Path,
        _device: Option<&DeviceAddress>,
    ) -> Result<BridgeOutput, BridgeError> {
        self.record(format!("install {}", apk_path.display()));
        next(&self.install, || output(0, "Success\n", ""))
    }

    async fn uninstall(
        &self,
        package_id: &str,
        _device: Option<&DeviceAddress>,
    ) -> Result<bool, BridgeError> {
        self.record(format!("uninstall {package_id}"));
        next(&self.uninstall, || true)
    }

    async fn run_shell(
        &self,
        args: &[String],
        _device: Option<&DeviceAddress>,
    ) -> Result<BridgeOutput, BridgeError> {
        self.record(format!("shell {}", args.join(" ")));
        next(&self.shell, BridgeOutput::default)
    }
}

/// A recorded [`CommandRunner`] invocation.
#[derive(Debug, Clone)]
pub struct RunnerCall {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

/// [`CommandRunner`] fake for exercising `AdbBridge` without a real bridge.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    calls: Mutex<Vec<RunnerCall>>,
    results: Mutex<VecDeque<Result<BridgeOutput, RunError>>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, result: Result<BridgeOutput, RunError>) {
        self.results.lock().unwrap().push_back(result);
    }

    pub fn calls(&self) -> Vec<RunnerCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn args(&self) -> Vec<Vec<String>> {
        self.calls().into_iter().map(|call| call.args).collect()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        program: &Path,
        args: &[String],
        timeout: Duration,
        _cancel: &CancellationToken,
    ) -> Result<BridgeOutput, RunError> {
        self.calls.lock().unwrap().push(RunnerCall {
            program: program.display().to_string(),
            args: args.to_vec(),
            timeout,
        });
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(BridgeOutput::default()))
    }
}
