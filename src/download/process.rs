//! Supervision of the yt-dlp child process.
//!
//! Spawns the downloader with stdout and stderr merged into one line stream,
//! records its pid, and tears it down either gracefully (terminate, wait,
//! escalate) or immediately (pid tree kill, name sweep, handle kill, verify).
//! The OS-specific part is chosen once through [`KillStrategy`].

use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::config;
use crate::core::process::{run_blocking_with_timeout, run_with_timeout};
use crate::download::error::{DownloadError, KillError};

/// How processes are signalled and swept on this platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillStrategy {
    /// SIGTERM / SIGKILL to the process group, `pkill` / `pgrep` by name
    PosixSignal,
    /// `taskkill /T` on the pid tree, `taskkill /IM` / `tasklist` by image name
    ProcessTree,
}

impl KillStrategy {
    pub fn for_platform() -> Self {
        if cfg!(windows) {
            KillStrategy::ProcessTree
        } else {
            KillStrategy::PosixSignal
        }
    }
}

/// Executable plus the arguments that always precede the per-call ones,
/// e.g. `python3 -m yt_dlp`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launcher {
    program: String,
    base_args: Vec<String>,
}

impl Launcher {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            base_args: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.base_args = args;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Async command with the base arguments followed by `args`.
    pub fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.base_args).args(args);
        cmd
    }
}

impl std::fmt::Display for Launcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.base_args.is_empty() {
            f.write_str(&self.program)
        } else {
            write!(f, "{} {}", self.program, self.base_args.join(" "))
        }
    }
}

/// Shared, lockable handle to a running child.
///
/// The worker task owns the read loop; the stop path holds a clone so it can
/// kill the child directly. The lock is never held across an await point.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    child: Arc<Mutex<Child>>,
    pid: Option<u32>,
}

impl ProcessHandle {
    fn new(child: Child) -> Self {
        let pid = child.id();
        Self {
            child: Arc::new(Mutex::new(child)),
            pid,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn lock(&self) -> MutexGuard<'_, Child> {
        self.child.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Non-blocking exit check; reaps the child if it has exited.
    pub fn try_status(&self) -> Result<Option<ExitStatus>, KillError> {
        self.lock().try_wait().map_err(KillError::from_io)
    }

    pub fn has_exited(&self) -> bool {
        matches!(self.try_status(), Ok(Some(_)) | Err(KillError::AlreadyGone))
    }

    /// Sends a forced kill to the child itself (not its descendants).
    pub fn start_kill(&self) -> Result<(), KillError> {
        if self.has_exited() {
            return Err(KillError::AlreadyGone);
        }
        self.lock().start_kill().map_err(KillError::from_io)
    }

    pub async fn wait(&self) -> Result<ExitStatus, KillError> {
        loop {
            if let Some(status) = self.try_status()? {
                return Ok(status);
            }
            tokio::time::sleep(config::process::EXIT_POLL_INTERVAL).await;
        }
    }

    pub async fn wait_timeout(&self, timeout: Duration) -> Option<ExitStatus> {
        tokio::time::timeout(timeout, self.wait()).await.ok().and_then(Result::ok)
    }

    /// Blocking wait used on the stop path, outside the worker runtime.
    pub fn wait_blocking(&self, timeout: Duration) -> Option<ExitStatus> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            match self.try_status() {
                Ok(Some(status)) => return Some(status),
                Ok(None) if std::time::Instant::now() < deadline => {
                    std::thread::sleep(config::process::EXIT_POLL_INTERVAL);
                }
                _ => return None,
            }
        }
    }
}

/// One step of the output read loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineRead {
    Line(String),
    /// No line within the poll interval; the caller re-checks its stop flag.
    Tick,
    /// Both output streams reached end-of-file.
    Closed,
    /// The stop token fired while waiting.
    Cancelled,
}

/// Merged stdout + stderr of a spawned child, one line at a time.
#[derive(Debug)]
pub struct OutputLines {
    rx: mpsc::UnboundedReceiver<String>,
    poll: Duration,
}

impl OutputLines {
    /// Waits for the next line for at most one poll interval.
    pub async fn next_line(&mut self, stop: &CancellationToken) -> LineRead {
        tokio::select! {
            biased;
            _ = stop.cancelled() => LineRead::Cancelled,
            res = tokio::time::timeout(self.poll, self.rx.recv()) => match res {
                Ok(Some(line)) => LineRead::Line(line),
                Ok(None) => LineRead::Closed,
                Err(_) => LineRead::Tick,
            },
        }
    }
}

fn pump_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>, stream: &'static str)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf)
                        .trim_end_matches(['\r', '\n'])
                        .to_string();
                    log::trace!("yt-dlp {}: {}", stream, line);
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    log::debug!("yt-dlp {} read error: {}", stream, e);
                    break;
                }
            }
        }
    });
}

/// Result of the verification step after an immediate stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    Stopped,
    /// Something matching this pid or name is still alive
    StillRunning(String),
}

/// What `terminate_immediately` did and what it found afterwards.
#[derive(Debug)]
pub struct TerminationReport {
    pub pid_killed: bool,
    pub swept: Vec<String>,
    pub handle_killed: bool,
    pub verification: Verification,
}

impl TerminationReport {
    pub fn stopped(&self) -> bool {
        self.verification == Verification::Stopped
    }

    pub fn status_message(&self) -> String {
        match &self.verification {
            Verification::Stopped => "Download stopped successfully".to_string(),
            Verification::StillRunning(what) => {
                format!("Warning: {} may still be running. Press stop again to retry.", what)
            }
        }
    }
}

/// Spawns and terminates downloader processes.
#[derive(Debug, Clone)]
pub struct ProcessController {
    launcher: Launcher,
    strategy: KillStrategy,
    sweep_targets: Vec<String>,
    poll_interval: Duration,
    graceful_timeout: Duration,
    settle_delay: Duration,
}

impl ProcessController {
    /// Controller for `launcher` with the platform kill strategy and a name
    /// sweep covering the downloader plus ffmpeg. An interpreter launch
    /// (`python3 -m yt_dlp`) sweeps the downloader names, never the interpreter.
    pub fn new(launcher: Launcher) -> Self {
        let strategy = KillStrategy::for_platform();
        let mut sweep_targets = if launcher.base_args.is_empty() {
            vec![executable_name(launcher.program())]
        } else {
            config::process::DOWNLOADER_SWEEP_TARGETS
                .iter()
                .map(|name| image_name(name, strategy))
                .collect()
        };
        sweep_targets.extend(
            config::process::SWEEP_EXTRA_TARGETS
                .iter()
                .map(|name| image_name(name, strategy)),
        );
        Self {
            launcher,
            strategy,
            sweep_targets,
            poll_interval: config::process::READ_POLL_INTERVAL,
            graceful_timeout: config::process::GRACEFUL_TERMINATE_TIMEOUT,
            settle_delay: config::process::KILL_SETTLE_DELAY,
        }
    }

    #[must_use]
    pub fn with_sweep_targets(mut self, targets: Vec<String>) -> Self {
        self.sweep_targets = targets;
        self
    }

    /// Disables the by-name sweep (only the tracked pid is ever killed).
    #[must_use]
    pub fn without_sweep(mut self) -> Self {
        self.sweep_targets.clear();
        self
    }

    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn graceful_timeout(mut self, timeout: Duration) -> Self {
        self.graceful_timeout = timeout;
        self
    }

    #[must_use]
    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn launcher(&self) -> &Launcher {
        &self.launcher
    }

    pub fn strategy(&self) -> KillStrategy {
        self.strategy
    }

    pub fn sweep_targets(&self) -> &[String] {
        &self.sweep_targets
    }

    /// Starts the downloader with both output streams merged.
    ///
    /// Must be called from inside a tokio runtime (the stream readers are
    /// spawned as tasks).
    pub fn spawn(&self, args: &[String]) -> Result<(ProcessHandle, OutputLines), DownloadError> {
        let mut cmd = self.launcher.command(args);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group so the whole tree (yt-dlp + ffmpeg) can be signalled at once
        #[cfg(unix)]
        cmd.process_group(0);
        #[cfg(windows)]
        cmd.creation_flags(0x0800_0000);

        log::debug!("Spawning {} {}", self.launcher, args.join(" "));

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DownloadError::Spawn(format!(
                    "Downloader '{}' not found. Install yt-dlp or set YTDL_BIN.",
                    self.launcher.program()
                ))
            } else {
                DownloadError::Spawn(format!("Failed to start downloader '{}': {}", self.launcher, e))
            }
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            pump_lines(stdout, tx.clone(), "stdout");
        }
        if let Some(stderr) = child.stderr.take() {
            pump_lines(stderr, tx, "stderr");
        }

        let handle = ProcessHandle::new(child);
        log::info!("▶️ Started {} (pid {:?})", self.launcher, handle.pid());
        Ok((
            handle,
            OutputLines {
                rx,
                poll: self.poll_interval,
            },
        ))
    }

    /// Asks the process to exit, waits up to the graceful timeout, then forces it.
    pub async fn terminate_gracefully(&self, handle: &ProcessHandle) -> Result<(), KillError> {
        if handle.has_exited() {
            return Ok(());
        }
        let Some(pid) = handle.pid() else {
            return Err(KillError::AlreadyGone);
        };

        log::info!("⏹️ Requesting termination of pid {}", pid);
        if let Err(e) = self.request_termination(pid).await {
            e.log("terminate request");
        }

        if handle.wait_timeout(self.graceful_timeout).await.is_some() {
            log::debug!("pid {} exited after termination request", pid);
            return Ok(());
        }

        log::warn!(
            "pid {} still running after {:?}, killing",
            pid,
            self.graceful_timeout
        );
        if let Err(e) = self.kill_pid(pid) {
            e.log("tree kill");
        }
        if let Err(e) = handle.start_kill() {
            e.log("handle kill");
        }
        match handle.wait_timeout(self.graceful_timeout).await {
            Some(_) => Ok(()),
            None => Err(KillError::Unexpected(format!("pid {} survived a forced kill", pid))),
        }
    }

    async fn request_termination(&self, pid: u32) -> Result<(), KillError> {
        match self.strategy {
            KillStrategy::PosixSignal => posix::terminate_group(pid),
            KillStrategy::ProcessTree => {
                let mut cmd = Command::new("taskkill");
                cmd.args(["/T", "/PID", &pid.to_string()]);
                let output = run_with_timeout(&mut cmd, config::process::KILL_COMMAND_TIMEOUT)
                    .await
                    .map_err(|e| KillError::Unexpected(e.to_string()))?;
                taskkill_result(&output)
            }
        }
    }

    /// Forced kill of the pid and its descendants.
    pub fn kill_pid(&self, pid: u32) -> Result<(), KillError> {
        match self.strategy {
            KillStrategy::PosixSignal => posix::kill_group(pid),
            KillStrategy::ProcessTree => {
                let mut cmd = std::process::Command::new("taskkill");
                cmd.args(["/F", "/T", "/PID", &pid.to_string()]);
                let output = run_blocking_with_timeout(&mut cmd, config::process::KILL_COMMAND_TIMEOUT)
                    .ok_or_else(|| KillError::Unexpected("taskkill did not complete".to_string()))?;
                taskkill_result(&output)
            }
        }
    }

    /// Kills every process matching a sweep target by name. Returns the targets
    /// for which something was actually killed.
    pub fn sweep_by_name(&self) -> Vec<String> {
        let mut swept = Vec::new();
        for target in &self.sweep_targets {
            let mut cmd = match self.strategy {
                KillStrategy::PosixSignal => {
                    let mut cmd = std::process::Command::new("pkill");
                    cmd.args(["-9", "-f", target]);
                    cmd
                }
                KillStrategy::ProcessTree => {
                    let mut cmd = std::process::Command::new("taskkill");
                    cmd.args(["/F", "/IM", target]);
                    cmd
                }
            };
            match run_blocking_with_timeout(&mut cmd, config::process::KILL_COMMAND_TIMEOUT) {
                Some(output) if output.status.success() => {
                    log::info!("🧹 Swept remaining '{}' processes", target);
                    swept.push(target.clone());
                }
                Some(_) => log::debug!("No '{}' processes left to sweep", target),
                None => log::warn!("Name sweep for '{}' could not run", target),
            }
        }
        swept
    }

    /// Stops everything right now: pid tree kill, name sweep, handle kill,
    /// then a settle delay and a verification pass. Blocks the caller for
    /// roughly the settle delay plus the helper command time.
    pub fn terminate_immediately(&self, pid: Option<u32>, handle: Option<&ProcessHandle>) -> TerminationReport {
        let pid = pid.or_else(|| handle.and_then(ProcessHandle::pid));

        let mut pid_killed = false;
        if let Some(pid) = pid {
            match self.kill_pid(pid) {
                Ok(()) => {
                    log::info!("🛑 Killed process tree of pid {}", pid);
                    pid_killed = true;
                }
                Err(e) => e.log("tree kill"),
            }
        }

        let swept = self.sweep_by_name();

        let mut handle_killed = false;
        if let Some(handle) = handle {
            match handle.start_kill() {
                Ok(()) => handle_killed = true,
                Err(e) => e.log("handle kill"),
            }
        }

        let verification = self.verify_stopped(pid, handle);
        match &verification {
            Verification::Stopped => log::info!("✅ Download process stopped"),
            Verification::StillRunning(what) => log::warn!("⚠️ {} still running after stop", what),
        }

        TerminationReport {
            pid_killed,
            swept,
            handle_killed,
            verification,
        }
    }

    /// Waits the settle delay, then checks the pid and the sweep targets.
    pub fn verify_stopped(&self, pid: Option<u32>, handle: Option<&ProcessHandle>) -> Verification {
        match handle {
            // Reaping through the handle also clears the zombie, so the pid check below is accurate
            Some(handle) => {
                handle.wait_blocking(self.settle_delay);
            }
            None => std::thread::sleep(self.settle_delay),
        }

        if let Some(pid) = pid {
            if self.is_alive(pid) {
                return Verification::StillRunning(format!("pid {}", pid));
            }
        }

        for target in &self.sweep_targets {
            if self.is_name_running(target) {
                return Verification::StillRunning(target.clone());
            }
        }
        Verification::Stopped
    }

    pub fn is_alive(&self, pid: u32) -> bool {
        match self.strategy {
            KillStrategy::PosixSignal => posix::is_alive(pid),
            KillStrategy::ProcessTree => {
                let mut cmd = std::process::Command::new("tasklist");
                cmd.args(["/FI", &format!("PID eq {}", pid), "/NH"]);
                run_blocking_with_timeout(&mut cmd, config::process::KILL_COMMAND_TIMEOUT)
                    .map(|out| String::from_utf8_lossy(&out.stdout).contains(&pid.to_string()))
                    .unwrap_or(false)
            }
        }
    }

    fn is_name_running(&self, target: &str) -> bool {
        match self.strategy {
            KillStrategy::PosixSignal => {
                let mut cmd = std::process::Command::new("pgrep");
                cmd.args(["-f", target]);
                run_blocking_with_timeout(&mut cmd, config::process::KILL_COMMAND_TIMEOUT)
                    .map(|out| out.status.success())
                    .unwrap_or(false)
            }
            KillStrategy::ProcessTree => {
                let mut cmd = std::process::Command::new("tasklist");
                cmd.args(["/FI", &format!("IMAGENAME eq {}", target), "/NH"]);
                run_blocking_with_timeout(&mut cmd, config::process::KILL_COMMAND_TIMEOUT)
                    .map(|out| {
                        String::from_utf8_lossy(&out.stdout)
                            .to_lowercase()
                            .contains(&target.to_lowercase())
                    })
                    .unwrap_or(false)
            }
        }
    }
}

/// File name of the executable, used as the sweep target for it.
fn executable_name(program: &str) -> String {
    let name = std::path::Path::new(program)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.to_string());
    image_name(&name, KillStrategy::for_platform())
}

fn image_name(name: &str, strategy: KillStrategy) -> String {
    if strategy == KillStrategy::ProcessTree && !name.to_lowercase().ends_with(".exe") {
        format!("{}.exe", name)
    } else {
        name.to_string()
    }
}

/// taskkill exits with 128 when the process does not exist.
fn taskkill_result(output: &std::process::Output) -> Result<(), KillError> {
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr).to_lowercase();
    match output.status.code() {
        Some(128) => Err(KillError::AlreadyGone),
        _ if stderr.contains("not found") => Err(KillError::AlreadyGone),
        _ if stderr.contains("access is denied") => Err(KillError::Denied(stderr.trim().to_string())),
        _ => Err(KillError::Unexpected(stderr.trim().to_string())),
    }
}

#[cfg(unix)]
#[allow(unsafe_code)]
mod posix {
    use crate::download::error::KillError;

    fn send(target: libc::pid_t, signal: libc::c_int) -> Result<(), KillError> {
        // SAFETY: kill(2) takes plain integers and has no memory-safety preconditions
        let rc = unsafe { libc::kill(target, signal) };
        if rc == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::ESRCH) => Err(KillError::AlreadyGone),
            Some(libc::EPERM) => Err(KillError::Denied(err.to_string())),
            _ => Err(KillError::Unexpected(err.to_string())),
        }
    }

    fn checked_pid(pid: u32) -> Result<libc::pid_t, KillError> {
        // 0 and 1 would address our own group or init
        match libc::pid_t::try_from(pid) {
            Ok(raw) if raw > 1 => Ok(raw),
            _ => Err(KillError::Unexpected(format!("refusing to signal pid {}", pid))),
        }
    }

    /// Signals the group first (covers ffmpeg children), then the pid itself.
    fn signal_tree(pid: u32, signal: libc::c_int) -> Result<(), KillError> {
        let raw = checked_pid(pid)?;
        let group = send(-raw, signal);
        let single = send(raw, signal);
        match (group, single) {
            (Ok(()), _) | (_, Ok(())) => Ok(()),
            (Err(KillError::AlreadyGone), Err(e)) | (Err(e), Err(KillError::AlreadyGone)) => Err(e),
            (Err(e), Err(_)) => Err(e),
        }
    }

    pub fn terminate_group(pid: u32) -> Result<(), KillError> {
        signal_tree(pid, libc::SIGTERM)
    }

    pub fn kill_group(pid: u32) -> Result<(), KillError> {
        signal_tree(pid, libc::SIGKILL)
    }

    pub fn is_alive(pid: u32) -> bool {
        match checked_pid(pid) {
            Ok(raw) => !matches!(send(raw, 0), Err(KillError::AlreadyGone)),
            Err(_) => false,
        }
    }
}

#[cfg(not(unix))]
mod posix {
    use crate::download::error::KillError;

    fn unsupported() -> Result<(), KillError> {
        Err(KillError::Unexpected("POSIX signals are not available on this platform".to_string()))
    }

    pub fn terminate_group(_pid: u32) -> Result<(), KillError> {
        unsupported()
    }

    pub fn kill_group(_pid: u32) -> Result<(), KillError> {
        unsupported()
    }

    pub fn is_alive(_pid: u32) -> bool {
        false
    }
}
