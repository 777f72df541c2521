//! Pre-flight credential probe.
//!
//! When no cookies are configured, a metadata-only yt-dlp run tells us up
//! front whether the video is members-only or private, so the user gets an
//! actionable message instead of a failed download.

use std::time::Duration;

use crate::core::process::run_with_timeout;
use crate::download::builder::probe_args;
use crate::download::process::Launcher;

/// Probe failure text that means the video needs a signed-in account.
const MEMBER_ONLY_MARKERS: &[&str] = &[
    "members-only",
    "private video",
    "video is private",
    "requires authentication",
    "login required",
    "this video is only available for",
    "membership required",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeVerdict {
    /// Metadata came back fine; no credentials needed
    Proceed,
    /// The probe failed for some other reason; the download still runs
    ProceedWithWarning(String),
    /// The video needs credentials that are not configured
    CredentialRequired(String),
}

/// Returns true when probe output says the video needs a signed-in account.
pub fn is_member_only(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    MEMBER_ONLY_MARKERS.iter().any(|m| lower.contains(m))
}

/// Runs `--dump-json --no-download` against the URL and classifies the result.
pub async fn check_if_cookies_needed(launcher: &Launcher, url: &str, timeout: Duration) -> ProbeVerdict {
    let mut cmd = launcher.command(&probe_args(url));
    log::debug!("Pre-flight probe: {} --dump-json --no-download {}", launcher, url);

    let output = match run_with_timeout(&mut cmd, timeout).await {
        Ok(output) => output,
        Err(e) => {
            log::warn!("Pre-flight probe could not run: {}", e);
            return ProbeVerdict::ProceedWithWarning(format!("Could not check video access: {}", e));
        }
    };

    if output.status.success() {
        return ProbeVerdict::Proceed;
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    if is_member_only(&stderr) {
        log::warn!("🔒 Pre-flight probe: video needs credentials");
        let detail = stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or_default()
            .trim()
            .to_string();
        return ProbeVerdict::CredentialRequired(detail);
    }

    let first_line = stderr.lines().find(|l| !l.trim().is_empty()).unwrap_or("unknown error");
    log::warn!("Pre-flight probe failed with {:?}: {}", output.status.code(), first_line);
    ProbeVerdict::ProceedWithWarning(format!("Could not check video access: {}", first_line.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_only_markers() {
        assert!(is_member_only(
            "ERROR: [youtube] abc: Join this channel to get access to members-only content like this video"
        ));
        assert!(is_member_only("ERROR: [youtube] abc: Private video. Sign in if you've been granted access"));
        assert!(is_member_only("This video is only available for registered users"));
        assert!(!is_member_only("ERROR: [youtube] abc: Video unavailable"));
        assert!(!is_member_only("ERROR: Unable to download webpage: HTTP Error 500"));
    }

    #[cfg(unix)]
    fn fake(body: &str) -> (tempfile::TempDir, Launcher) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.sh");
        std::fs::write(&path, body).unwrap();
        let launcher = Launcher::new("sh").with_args(vec![path.to_string_lossy().into_owned()]);
        (dir, launcher)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_probe_success() {
        let (_dir, launcher) = fake("echo '{\"id\": \"abc\"}'\n");
        let verdict = check_if_cookies_needed(&launcher, "https://youtu.be/abc", Duration::from_secs(5)).await;
        assert_eq!(verdict, ProbeVerdict::Proceed);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_probe_member_only() {
        let (_dir, launcher) = fake("echo 'ERROR: [youtube] abc: Join this channel to get access to members-only content' >&2\nexit 1\n");
        let verdict = check_if_cookies_needed(&launcher, "https://youtu.be/abc", Duration::from_secs(5)).await;
        assert!(matches!(verdict, ProbeVerdict::CredentialRequired(ref line) if line.contains("members-only")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_probe_other_failure_proceeds() {
        let (_dir, launcher) = fake("echo 'ERROR: network is unreachable' >&2\nexit 1\n");
        let verdict = check_if_cookies_needed(&launcher, "https://youtu.be/abc", Duration::from_secs(5)).await;
        assert!(matches!(verdict, ProbeVerdict::ProceedWithWarning(_)));
    }

    #[tokio::test]
    async fn test_probe_missing_binary_proceeds() {
        let launcher = Launcher::new("definitely-not-a-real-binary-ytgrab");
        let verdict = check_if_cookies_needed(&launcher, "https://youtu.be/abc", Duration::from_secs(5)).await;
        assert!(matches!(verdict, ProbeVerdict::ProceedWithWarning(_)));
    }
}
