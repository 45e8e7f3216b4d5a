//! Local companion service launcher
//!
//! Some deployments run a local helper service next to the client. Its
//! command line carries a `{port}` placeholder. If the process dies during
//! its startup grace window because the port is taken, the launcher retries
//! on the next [`PortCandidate`]; the default list allows exactly one retry,
//! on a port the OS reports as free.

use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

use crate::error::LlmError;

/// Placeholder substituted with the chosen port in args and env values.
pub const PORT_PLACEHOLDER: &str = "{port}";

/// Exit status of a Linux process that failed with `EADDRINUSE`.
pub const ADDRESS_IN_USE_EXIT_CODE: i32 = 98;

pub const DEFAULT_STARTUP_GRACE: Duration = Duration::from_secs(2);

/// Stderr kept for diagnostics, in characters.
const STDERR_CAPTURE_LIMIT: usize = 4096;

/// Time allowed to drain stderr of a process that already exited.
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// How to launch the companion process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanionSpec {
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    /// First port to try.
    pub port: u16,
    /// A process still alive after this long counts as started.
    pub startup_grace: Duration,
}

impl CompanionSpec {
    pub fn new(name: impl Into<String>, program: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            port,
            startup_grace: DEFAULT_STARTUP_GRACE,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub const fn with_startup_grace(mut self, grace: Duration) -> Self {
        self.startup_grace = grace;
        self
    }

    /// Args with `{port}` substituted.
    pub fn render_args(&self, port: u16) -> Vec<String> {
        let port = port.to_string();
        self.args
            .iter()
            .map(|arg| arg.replace(PORT_PLACEHOLDER, &port))
            .collect()
    }

    /// Env with `{port}` substituted in values.
    pub fn render_env(&self, port: u16) -> Vec<(String, String)> {
        let port = port.to_string();
        self.env
            .iter()
            .map(|(k, v)| (k.clone(), v.replace(PORT_PLACEHOLDER, &port)))
            .collect()
    }
}

/// One port to try.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortCandidate {
    Fixed(u16),
    /// A port found free by binding `127.0.0.1:0` right before launch.
    Ephemeral,
}

/// Ordered, finite list of ports to try.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateList {
    candidates: Vec<PortCandidate>,
}

impl CandidateList {
    /// The configured port, then one OS-chosen port.
    pub fn with_single_retry(port: u16) -> Self {
        Self {
            candidates: vec![PortCandidate::Fixed(port), PortCandidate::Ephemeral],
        }
    }

    pub fn new(candidates: Vec<PortCandidate>) -> Self {
        Self { candidates }
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = PortCandidate> + '_ {
        self.candidates.iter().copied()
    }
}

/// Result of watching a freshly spawned process for its grace period.
#[derive(Debug)]
pub enum LaunchOutcome {
    /// Still alive after the grace period. `None` for launchers that do not
    /// own a child process.
    Running(Option<Child>),
    Exited { code: Option<i32>, stderr: String },
}

/// Spawns a process and watches it through its startup grace window.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn launch(
        &self,
        program: &str,
        args: &[String],
        env: &[(String, String)],
        grace: Duration,
    ) -> Result<LaunchOutcome, LlmError>;
}

/// `tokio::process` launcher. Children are killed when their handle drops.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioProcessLauncher;

#[async_trait]
impl ProcessLauncher for TokioProcessLauncher {
    async fn launch(
        &self,
        program: &str,
        args: &[String],
        env: &[(String, String)],
        grace: Duration,
    ) -> Result<LaunchOutcome, LlmError> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| LlmError::ProcessError(format!("failed to spawn {program}: {e}")))?;

        let stderr_reader = child.stderr.take().map(|stderr| {
            let program = program.to_string();
            tokio::spawn(async move {
                let mut captured = String::new();
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "hkgai_llm::companion", program = %program, "{line}");
                    if captured.chars().count() < STDERR_CAPTURE_LIMIT {
                        captured.push_str(&line);
                        captured.push('\n');
                    }
                }
                captured
            })
        });

        let waited = tokio::time::timeout(grace, child.wait()).await;
        match waited {
            Ok(status) => {
                let status = status?;
                let stderr = match stderr_reader {
                    Some(reader) => tokio::time::timeout(STDERR_DRAIN_TIMEOUT, reader)
                        .await
                        .ok()
                        .and_then(Result::ok)
                        .unwrap_or_default(),
                    None => String::new(),
                };
                Ok(LaunchOutcome::Exited {
                    code: status.code(),
                    stderr,
                })
            }
            Err(_) => Ok(LaunchOutcome::Running(Some(child))),
        }
    }
}

/// Whether an early exit was caused by the port being taken.
pub fn is_address_in_use(code: Option<i32>, stderr: &str) -> bool {
    if code == Some(ADDRESS_IN_USE_EXIT_CODE) {
        return true;
    }
    let stderr = stderr.to_ascii_lowercase();
    stderr.contains("address already in use")
        || stderr.contains("eaddrinuse")
        || stderr.contains("only one usage of each socket address")
}

/// Ask the OS for a currently free local port.
pub async fn free_local_port() -> Result<u16, LlmError> {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await?;
    Ok(listener.local_addr()?.port())
}

/// A started companion process.
#[derive(Debug)]
pub struct CompanionHandle {
    name: String,
    port: u16,
    child: Option<Child>,
}

impl CompanionHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Port the process was finally started on.
    pub const fn port(&self) -> u16 {
        self.port
    }

    pub fn local_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Kill the process and wait for it to exit.
    pub async fn shutdown(mut self) -> Result<(), LlmError> {
        if let Some(mut child) = self.child.take() {
            tracing::info!(target: "hkgai_llm::companion", name = %self.name, "stopping companion");
            child.kill().await?;
        }
        Ok(())
    }
}

/// Starts companion processes, retrying on taken ports.
#[derive(Clone)]
pub struct CompanionLauncher {
    launcher: Arc<dyn ProcessLauncher>,
}

impl Default for CompanionLauncher {
    fn default() -> Self {
        Self::new(Arc::new(TokioProcessLauncher))
    }
}

impl CompanionLauncher {
    pub fn new(launcher: Arc<dyn ProcessLauncher>) -> Self {
        Self { launcher }
    }

    /// Start `spec` on its port with one retry on a free port.
    pub async fn start(&self, spec: &CompanionSpec) -> Result<CompanionHandle, LlmError> {
        self.start_with_candidates(spec, &CandidateList::with_single_retry(spec.port))
            .await
    }

    /// Start `spec`, trying `candidates` in order.
    ///
    /// Only "address in use" exits move on to the next candidate; any other
    /// early exit fails immediately with `ProcessError`.
    pub async fn start_with_candidates(
        &self,
        spec: &CompanionSpec,
        candidates: &CandidateList,
    ) -> Result<CompanionHandle, LlmError> {
        let mut tried: Vec<u16> = Vec::with_capacity(candidates.len());

        for candidate in candidates.iter() {
            let port = match candidate {
                PortCandidate::Fixed(port) => port,
                PortCandidate::Ephemeral => free_local_port().await?,
            };
            tried.push(port);
            tracing::info!(
                target: "hkgai_llm::companion",
                name = %spec.name,
                port,
                attempt = tried.len(),
                "starting companion"
            );

            let outcome = self
                .launcher
                .launch(
                    &spec.program,
                    &spec.render_args(port),
                    &spec.render_env(port),
                    spec.startup_grace,
                )
                .await?;

            match outcome {
                LaunchOutcome::Running(child) => {
                    return Ok(CompanionHandle {
                        name: spec.name.clone(),
                        port,
                        child,
                    });
                }
                LaunchOutcome::Exited { code, stderr } if is_address_in_use(code, &stderr) => {
                    tracing::warn!(
                        target: "hkgai_llm::companion",
                        name = %spec.name,
                        port,
                        "port already in use"
                    );
                }
                LaunchOutcome::Exited { code, stderr } => {
                    return Err(LlmError::ProcessError(format!(
                        "{} exited during startup with status {}: {}",
                        spec.name,
                        code.map_or_else(|| "unknown".to_string(), |c| c.to_string()),
                        stderr.trim()
                    )));
                }
            }
        }

        Err(LlmError::ProcessError(format!(
            "{} could not start, ports in use: {:?}",
            spec.name, tried
        )))
    }
}
