//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, MutexGuard};

use crate::driver::{
    BaseSettings, Driver, DriverConfig, DriverError, OciSettings, VirtualBoxSettings,
};
use crate::exec::{CommandRunner, ExecError, RunResult};
use crate::host::Host;
use crate::provision::{ProvisionError, Provisioner};
use crate::registry::DriverFactory;
use crate::state::State;

#[derive(Clone, Debug)]
enum ScriptedResponse {
    Output {
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    Error(ExecError),
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
/// Clones share the same queue and invocation log.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<Mutex<VecDeque<ScriptedResponse>>>,
    invocations: Arc<Mutex<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, response: ScriptedResponse) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(response);
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the recorded invocations rendered as command strings.
    #[must_use]
    pub fn command_strings(&self) -> Vec<String> {
        self.invocations()
            .iter()
            .map(CommandInvocation::command_string)
            .collect()
    }

    /// Number of queued responses not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Pushes a successful exit status with empty output.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a successful exit status with the given stdout.
    pub fn push_stdout(&self, stdout: impl Into<String>) {
        self.push_output(Some(0), stdout, "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32, stderr: impl Into<String>) {
        self.push_output(Some(code), "", stderr);
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.push(ScriptedResponse::Output {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }

    /// Pushes a response simulating a program missing from `PATH`.
    pub fn push_not_found(&self, program: &str) {
        self.push(ScriptedResponse::Error(ExecError::NotFound {
            program: program.to_owned(),
        }));
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<RunResult, ExecError> {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(CommandInvocation {
                program: program.to_owned(),
                args: args.to_vec(),
            });
        let response = self
            .responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .ok_or_else(|| ExecError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })?;
        match response {
            ScriptedResponse::Output {
                code,
                stdout,
                stderr,
            } => Ok(RunResult::new(program, args.to_vec(), code, stdout, stderr)),
            ScriptedResponse::Error(err) => Err(err),
        }
    }
}

#[derive(Clone, Debug)]
struct GuestReply {
    prefix: String,
    outcome: Result<String, String>,
}

#[derive(Debug, Default)]
struct FakeMachine {
    state: State,
    log: Vec<String>,
    replies: Vec<GuestReply>,
    start_failures: VecDeque<DriverError>,
}

/// In-memory driver for exercising the reconciler and provisioners.
///
/// Clones share the machine state, reply table, and call log, so a test can
/// keep a handle while a factory hands copies to the code under test. Guest
/// commands succeed with empty output unless a reply matching their prefix
/// was registered; the most recent matching reply wins.
#[derive(Clone, Debug)]
pub struct FakeDriver {
    config: DriverConfig,
    container_based: bool,
    iso_based: bool,
    managed: bool,
    machine: Arc<Mutex<FakeMachine>>,
}

fn fake_base(name: &str) -> BaseSettings {
    BaseSettings::new(name, format!("/tmp/minihost/machines/{name}"))
}

impl FakeDriver {
    fn build(config: DriverConfig, container_based: bool, iso_based: bool, managed: bool) -> Self {
        Self {
            config,
            container_based,
            iso_based,
            managed,
            machine: Arc::new(Mutex::new(FakeMachine::default())),
        }
    }

    /// ISO-booted VM named `name`, initially absent.
    #[must_use]
    pub fn vm(name: &str) -> Self {
        let settings = VirtualBoxSettings::new(fake_base(name), "/tmp/minihost/boot.iso");
        Self::build(DriverConfig::VirtualBox(settings), false, true, true)
    }

    /// Container node named `name`, initially absent.
    #[must_use]
    pub fn container(name: &str) -> Self {
        let settings = OciSettings::new(fake_base(name), "kicbase:latest");
        Self::build(DriverConfig::Docker(settings), true, false, true)
    }

    /// Unmanaged bare host named `name`, always running.
    #[must_use]
    pub fn bare(name: &str) -> Self {
        Self::build(DriverConfig::None(fake_base(name)), false, false, false)
            .with_state(State::Running)
    }

    fn machine(&self) -> std::sync::MutexGuard<'_, FakeMachine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, entry: impl Into<String>) {
        self.machine().log.push(entry.into());
    }

    /// Sets the current machine state and returns the driver.
    #[must_use]
    pub fn with_state(self, state: State) -> Self {
        self.set_state(state);
        self
    }

    /// Sets the current machine state.
    pub fn set_state(&self, state: State) {
        self.machine().state = state;
    }

    /// Current machine state.
    #[must_use]
    pub fn state(&self) -> State {
        self.machine().state
    }

    /// Guest commands starting with `prefix` succeed with `stdout`.
    pub fn reply(&self, prefix: &str, stdout: &str) {
        self.machine().replies.push(GuestReply {
            prefix: prefix.to_owned(),
            outcome: Ok(stdout.to_owned()),
        });
    }

    /// Guest commands starting with `prefix` exit 1 with `stderr`.
    pub fn fail(&self, prefix: &str, stderr: &str) {
        self.machine().replies.push(GuestReply {
            prefix: prefix.to_owned(),
            outcome: Err(stderr.to_owned()),
        });
    }

    /// The next call to `start` fails with `err`.
    pub fn fail_next_start(&self, err: DriverError) {
        self.machine().start_failures.push_back(err);
    }

    /// Every driver call recorded so far, such as `start` or
    /// `run: uname`.
    #[must_use]
    pub fn log(&self) -> Vec<String> {
        self.machine().log.clone()
    }

    /// Guest commands recorded so far.
    #[must_use]
    pub fn guest_commands(&self) -> Vec<String> {
        self.log()
            .iter()
            .filter_map(|entry| entry.strip_prefix("run: "))
            .map(str::to_owned)
            .collect()
    }

    /// Driver verbs recorded so far, excluding guest commands.
    #[must_use]
    pub fn verbs(&self) -> Vec<String> {
        self.log()
            .into_iter()
            .filter(|entry| !entry.starts_with("run: "))
            .collect()
    }
}

impl Driver for FakeDriver {
    fn driver_name(&self) -> &str {
        self.config.driver_name()
    }

    fn machine_name(&self) -> &str {
        &self.config.base().machine_name
    }

    fn config(&self) -> DriverConfig {
        self.config.clone()
    }

    fn is_container_based(&self) -> bool {
        self.container_based
    }

    fn is_iso_based(&self) -> bool {
        self.iso_based
    }

    fn is_managed(&self) -> bool {
        self.managed
    }

    fn pre_create_check(&self) -> Result<(), DriverError> {
        self.record("pre_create_check");
        Ok(())
    }

    fn create(&mut self) -> Result<(), DriverError> {
        self.record("create");
        let mut machine = self.machine();
        if machine.state != State::None {
            return Err(DriverError::AlreadyExists {
                machine: self.config.base().machine_name.clone(),
            });
        }
        machine.state = State::Running;
        Ok(())
    }

    fn start(&mut self) -> Result<(), DriverError> {
        self.record("start");
        let mut machine = self.machine();
        if let Some(err) = machine.start_failures.pop_front() {
            return Err(err);
        }
        if machine.state == State::None {
            return Err(DriverError::NotFound {
                machine: self.config.base().machine_name.clone(),
            });
        }
        machine.state = State::Running;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DriverError> {
        self.record("stop");
        let mut machine = self.machine();
        if machine.state != State::None {
            machine.state = State::Stopped;
        }
        Ok(())
    }

    fn kill(&mut self) -> Result<(), DriverError> {
        self.record("kill");
        let mut machine = self.machine();
        if machine.state != State::None {
            machine.state = State::Stopped;
        }
        Ok(())
    }

    fn remove(&mut self) -> Result<(), DriverError> {
        self.record("remove");
        self.machine().state = State::None;
        Ok(())
    }

    fn get_state(&self) -> Result<State, DriverError> {
        Ok(self.state())
    }

    fn get_url(&self) -> Result<String, DriverError> {
        Ok(String::from("tcp://127.0.0.1:2376"))
    }

    fn get_ssh_hostname(&self) -> Result<String, DriverError> {
        Ok(String::from("127.0.0.1"))
    }

    fn get_ip(&self) -> Result<String, DriverError> {
        Ok(String::from("192.168.59.100"))
    }

    fn run_cmd(&self, command: &str) -> Result<RunResult, DriverError> {
        self.record(format!("run: {command}"));
        let reply = self
            .machine()
            .replies
            .iter()
            .rev()
            .find(|reply| command.starts_with(&reply.prefix))
            .map(|reply| reply.outcome.clone());
        let args = vec![OsString::from(command)];
        match reply {
            None => Ok(RunResult::new("fake", args, Some(0), "", "")),
            Some(Ok(stdout)) => Ok(RunResult::new("fake", args, Some(0), stdout, "")),
            Some(Err(stderr)) => {
                let result = RunResult::new("fake", args, Some(1), "", stderr);
                Err(DriverError::guest_command(command, &result))
            }
        }
    }
}

/// Factory that hands out clones of one [`FakeDriver`] bound to the
/// requested configuration.
#[derive(Clone, Debug)]
pub struct FakeFactory {
    driver: FakeDriver,
}

impl FakeFactory {
    /// Factory producing clones of `driver`.
    #[must_use]
    pub const fn new(driver: FakeDriver) -> Self {
        Self { driver }
    }
}

impl DriverFactory for FakeFactory {
    type Driver = FakeDriver;

    fn build(&self, config: &DriverConfig) -> FakeDriver {
        FakeDriver {
            config: config.clone(),
            ..self.driver.clone()
        }
    }
}

#[derive(Debug, Default)]
struct ProvisionerScript {
    log: Vec<String>,
    auth_failures: VecDeque<ProvisionError>,
    provision_failure: Option<ProvisionError>,
}

/// Provisioner that records each step and fails on demand.
///
/// Clones share the same log and failure queue.
#[derive(Clone, Debug, Default)]
pub struct RecordingProvisioner {
    script: Arc<Mutex<ProvisionerScript>>,
}

impl RecordingProvisioner {
    /// Provisioner where every step succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> std::sync::MutexGuard<'_, ProvisionerScript> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The next `configure_auth` call fails with `err`.
    pub fn fail_next_auth(&self, err: ProvisionError) {
        self.script().auth_failures.push_back(err);
    }

    /// Every `provision` call fails with `err`.
    pub fn fail_provision(&self, err: ProvisionError) {
        self.script().provision_failure = Some(err);
    }

    /// Steps recorded so far, as `step:machine`.
    #[must_use]
    pub fn log(&self) -> Vec<String> {
        self.script().log.clone()
    }
}

impl Provisioner for RecordingProvisioner {
    fn provision<D: Driver + Sync + ?Sized>(
        &self,
        _driver: &D,
        host: &Host,
    ) -> Result<(), ProvisionError> {
        let mut script = self.script();
        script.log.push(format!("provision:{}", host.name));
        script.provision_failure.clone().map_or(Ok(()), Err)
    }

    fn post_start_setup<D: Driver + Sync + ?Sized>(
        &self,
        _driver: &D,
        host: &Host,
    ) -> Result<(), ProvisionError> {
        self.script().log.push(format!("post_start_setup:{}", host.name));
        Ok(())
    }

    fn configure_auth<D: Driver + Sync + ?Sized>(
        &self,
        _driver: &D,
        host: &Host,
    ) -> Result<(), ProvisionError> {
        let mut script = self.script();
        script.log.push(format!("configure_auth:{}", host.name));
        script.auth_failures.pop_front().map_or(Ok(()), Err)
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
