//! Process execution utilities with timeout support
//!
//! Short-lived helper invocations (metadata probe, playlist listing, OS kill
//! and lookup commands) go through here so a hung helper cannot block the
//! download session.

use std::process::Output;
use std::time::Duration;
use tokio::process::Command;

use crate::download::error::DownloadError;

/// Run an async Command with a timeout.
///
/// The child is killed if the timeout elapses. Returns the process Output on
/// success (whatever the exit code), or a DownloadError on timeout/IO failure.
pub async fn run_with_timeout(cmd: &mut Command, timeout: Duration) -> Result<Output, DownloadError> {
    cmd.kill_on_drop(true);
    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(DownloadError::Spawn(format!(
            "Failed to start {:?}: {}",
            cmd.as_std().get_program(),
            e
        ))),
        Err(_) => Err(DownloadError::Timeout(format!(
            "Process timed out after {}s",
            timeout.as_secs()
        ))),
    }
}

/// Blocking variant for callers outside the async runtime (the stop path runs
/// on the caller's thread).
///
/// Returns `None` if the command could not be started or did not finish in time.
pub fn run_blocking_with_timeout(cmd: &mut std::process::Command, timeout: Duration) -> Option<Output> {
    use std::process::Stdio;

    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| log::debug!("Failed to start {:?}: {}", cmd.get_program(), e))
        .ok()?;

    let deadline = std::time::Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return child.wait_with_output().ok(),
            Ok(None) if std::time::Instant::now() >= deadline => {
                log::warn!("{:?} did not finish within {:?}, killing it", cmd.get_program(), timeout);
                let _ = child.kill();
                let _ = child.wait();
                return None;
            }
            Ok(None) => std::thread::sleep(Duration::from_millis(20)),
            Err(e) => {
                log::warn!("Failed to wait for {:?}: {}", cmd.get_program(), e);
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_with_timeout_returns_output() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo hello; exit 3"]);
        let output = run_with_timeout(&mut cmd, Duration::from_secs(5)).await.unwrap();
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "hello");
        assert_eq!(output.status.code(), Some(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_with_timeout_times_out() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let err = run_with_timeout(&mut cmd, Duration::from_millis(100)).await.unwrap_err();
        assert!(matches!(err, DownloadError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_run_with_timeout_missing_binary() {
        let mut cmd = Command::new("definitely-not-a-real-binary-ytgrab");
        let err = run_with_timeout(&mut cmd, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, DownloadError::Spawn(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_run_blocking_with_timeout() {
        let mut cmd = std::process::Command::new("sh");
        cmd.args(["-c", "echo ok"]);
        let output = run_blocking_with_timeout(&mut cmd, Duration::from_secs(5)).unwrap();
        assert!(output.status.success());

        let mut cmd = std::process::Command::new("sleep");
        cmd.arg("5");
        assert!(run_blocking_with_timeout(&mut cmd, Duration::from_millis(100)).is_none());
    }
}
