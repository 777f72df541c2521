//! Download phase tracking from yt-dlp output lines.
//!
//! yt-dlp downloads the video stream, then the audio stream, then merges them
//! with ffmpeg. Each output line is inspected to infer which of those stages is
//! running, to extract progress percentages and to spot credential failures
//! while the process is still alive.

/// Current stage of a download session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Preparing,
    Video,
    Audio,
    Merging,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Preparing => "preparing",
            Phase::Video => "video",
            Phase::Audio => "audio",
            Phase::Merging => "merging",
        }
    }

    /// Human-readable prefix used in progress labels.
    pub fn label(self) -> &'static str {
        match self {
            Phase::Preparing => "Preparing",
            Phase::Video => "Downloading video",
            Phase::Audio => "Downloading audio",
            Phase::Merging => "Merging",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of inspecting one line for phase hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseTransition {
    To(Phase),
    /// The line says nothing about the phase; keep the previous one.
    Unchanged,
}

const MERGE_MARKERS: &[&str] = &["merging", "ffmpeg", "post-processing"];
const AUDIO_EXTENSIONS: &[&str] = &[".m4a", ".aac", ".opus", ".mp3"];
const VIDEO_EXTENSIONS: &[&str] = &[".mp4", ".webm", ".mkv"];
const SIZE_UNITS: &[&str] = &["mib", "kib", "gib"];

const CREDENTIAL_LINE_MARKERS: &[&str] = &[
    "members-only",
    "private video",
    "video is private",
    "requires authentication",
    "login required",
    "this video is only available for",
    "membership required",
    "sign in to confirm your age",
    "access denied",
];

/// Infers the phase a line belongs to.
///
/// Merge markers win over everything else. On `[download]` lines the file
/// extension decides, then explicit "downloading video/audio" phrases, then a
/// bare "audio"/"video" keyword. Size reports ("x% of 10.00MiB") carry no hint.
/// An audio container extension means audio on any line.
pub fn detect_phase(line: &str) -> PhaseTransition {
    let lower = line.to_lowercase();

    if MERGE_MARKERS.iter().any(|m| lower.contains(m)) {
        return PhaseTransition::To(Phase::Merging);
    }

    if AUDIO_EXTENSIONS.iter().any(|ext| lower.contains(ext)) {
        return PhaseTransition::To(Phase::Audio);
    }

    if !lower.contains("[download]") {
        return PhaseTransition::Unchanged;
    }

    if VIDEO_EXTENSIONS.iter().any(|ext| lower.contains(ext)) {
        // Audio-only streams are sometimes muxed into a video container
        if lower.contains("audio") {
            return PhaseTransition::To(Phase::Audio);
        }
        return PhaseTransition::To(Phase::Video);
    }

    if lower.contains("downloading video") {
        return PhaseTransition::To(Phase::Video);
    }
    if lower.contains("downloading audio") {
        return PhaseTransition::To(Phase::Audio);
    }

    if lower.contains(" of ") && SIZE_UNITS.iter().any(|u| lower.contains(u)) {
        return PhaseTransition::Unchanged;
    }

    if lower.contains("audio") {
        PhaseTransition::To(Phase::Audio)
    } else if lower.contains("video") {
        PhaseTransition::To(Phase::Video)
    } else {
        PhaseTransition::Unchanged
    }
}

/// Applies `detect_phase` to a previously known phase.
pub fn next_phase(line: &str, previous: Phase) -> Phase {
    match detect_phase(line) {
        PhaseTransition::To(phase) => phase,
        PhaseTransition::Unchanged => previous,
    }
}

/// Parses progress from a yt-dlp output line.
/// Example: "[download]  45.2% of 10.00MiB at 500.00KiB/s ETA 00:10"
///
/// Returns the percentage exactly as printed (no clamping) and the speed token if present.
pub fn parse_progress(line: &str) -> Option<(f64, Option<String>)> {
    if !line.contains("[download]") || !line.contains('%') {
        return None;
    }

    let parts: Vec<&str> = line.split_whitespace().collect();
    let (idx, percent) = parts.iter().enumerate().find_map(|(i, part)| {
        part.strip_suffix('%')
            .and_then(|p| p.parse::<f64>().ok())
            .map(|p| (i, p))
    })?;

    let is_speed = |token: &str| token.ends_with("/s") && (token.contains("iB") || token.contains("B/s"));
    let speed = parts
        .iter()
        .skip(idx + 1)
        .enumerate()
        .find_map(|(offset, part)| {
            if *part == "at" {
                parts.get(idx + 2 + offset).filter(|next| is_speed(**next))
            } else if offset == 0 && is_speed(*part) {
                Some(part)
            } else {
                None
            }
        })
        .map(|s| s.to_string());

    log::trace!("Progress parsed: {}% (speed: {:?})", percent, speed);
    Some((percent, speed))
}

/// Returns true when a line reports that credentials are required or were rejected.
///
/// "video unavailable" alone is not enough; it needs a private/member or
/// sign-in qualifier on the same line.
pub fn is_credential_error_line(line: &str) -> bool {
    let lower = line.to_lowercase();
    if CREDENTIAL_LINE_MARKERS.iter().any(|m| lower.contains(m)) {
        return true;
    }
    lower.contains("video unavailable")
        && (lower.contains("private") || lower.contains("member") || lower.contains("sign in"))
}

/// Progress extracted from one line, tagged with the phase it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub percent: f64,
    pub speed: Option<String>,
    pub phase: Phase,
}

impl ProgressUpdate {
    /// "Downloading video: 45.2% (1.50MiB/s)"
    pub fn label(&self) -> String {
        match &self.speed {
            Some(speed) => format!("{}: {:.1}% ({})", self.phase.label(), self.percent, speed),
            None => format!("{}: {:.1}%", self.phase.label(), self.percent),
        }
    }
}

/// What a single line means for the session.
#[derive(Debug, Clone, PartialEq)]
pub enum LineEvent {
    Progress(ProgressUpdate),
    Merging,
    CredentialError,
    Other,
}

/// Stateful wrapper around `detect_phase`: remembers the last known phase
/// and classifies each line.
///
/// Once a phase is known the detector never falls back to `Preparing`
/// unless `reset` is called.
#[derive(Debug, Default)]
pub struct PhaseDetector {
    phase: Phase,
}

impl PhaseDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_phase(phase: Phase) -> Self {
        Self { phase }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn reset(&mut self) {
        self.phase = Phase::Preparing;
    }

    pub fn observe(&mut self, line: &str) -> LineEvent {
        let next = next_phase(line, self.phase);
        if next != self.phase {
            log::debug!("Phase {} -> {}", self.phase, next);
            self.phase = next;
        }

        if let Some((percent, speed)) = parse_progress(line) {
            return LineEvent::Progress(ProgressUpdate {
                percent,
                speed,
                phase: self.phase,
            });
        }
        if matches!(detect_phase(line), PhaseTransition::To(Phase::Merging)) {
            return LineEvent::Merging;
        }
        if is_credential_error_line(line) {
            return LineEvent::CredentialError;
        }
        LineEvent::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_merge_markers_override_everything() {
        for previous in [Phase::Preparing, Phase::Video, Phase::Audio] {
            assert_eq!(
                next_phase("[Merger] Merging formats into \"clip.mp4\"", previous),
                Phase::Merging
            );
            assert_eq!(next_phase("[ffmpeg] Adding metadata", previous), Phase::Merging);
            assert_eq!(next_phase("Post-processing audio.m4a", previous), Phase::Merging);
        }
    }

    #[test]
    fn test_audio_extension_wins_regardless_of_previous() {
        for previous in [Phase::Preparing, Phase::Video, Phase::Audio, Phase::Merging] {
            assert_eq!(
                next_phase("[download] Destination: clip.f140.m4a", previous),
                Phase::Audio
            );
            assert_eq!(next_phase("[download] Destination: clip.opus", previous), Phase::Audio);
        }
    }

    #[test]
    fn test_video_extension() {
        assert_eq!(
            detect_phase("[download] Destination: clip.f137.mp4"),
            PhaseTransition::To(Phase::Video)
        );
        assert_eq!(
            detect_phase("[download] Destination: clip.f251.webm audio only"),
            PhaseTransition::To(Phase::Audio)
        );
    }

    #[test]
    fn test_size_report_keeps_phase() {
        let line = "[download]  45.2% of 10.00MiB at 500.00KiB/s ETA 00:10";
        assert_eq!(detect_phase(line), PhaseTransition::Unchanged);
        assert_eq!(next_phase(line, Phase::Audio), Phase::Audio);
        assert_eq!(next_phase(line, Phase::Video), Phase::Video);
    }

    #[test]
    fn test_explicit_phrases_and_keywords() {
        assert_eq!(
            detect_phase("[download] Downloading video 1 of 3"),
            PhaseTransition::To(Phase::Video)
        );
        assert_eq!(
            detect_phase("[download] Downloading audio stream"),
            PhaseTransition::To(Phase::Audio)
        );
        assert_eq!(detect_phase("[youtube] abc: Downloading webpage"), PhaseTransition::Unchanged);
    }

    #[test]
    fn test_parse_progress() {
        let (percent, speed) = parse_progress("[download]  45.2% of 10.00MiB at 1.50MiB/s ETA 00:10").unwrap();
        assert_eq!(percent, 45.2);
        assert_eq!(speed.as_deref(), Some("1.50MiB/s"));

        let (percent, speed) = parse_progress("[download] 100% of 10.00MiB in 00:03").unwrap();
        assert_eq!(percent, 100.0);
        assert_eq!(speed, None);

        let (_, speed) = parse_progress("[download]  12.0% 850.00KiB/s").unwrap();
        assert_eq!(speed.as_deref(), Some("850.00KiB/s"));
    }

    #[test]
    fn test_parse_progress_rejects_non_progress_lines() {
        assert!(parse_progress("[download] Destination: clip.mp4").is_none());
        assert!(parse_progress("[youtube] 50% done").is_none());
        assert!(parse_progress("[download] ??% of ~").is_none());
    }

    #[test]
    fn test_parse_progress_is_unclamped() {
        let (percent, _) = parse_progress("[download] 104.5% of 1.00MiB").unwrap();
        assert_eq!(percent, 104.5);
    }

    #[test]
    fn test_credential_error_lines() {
        assert!(is_credential_error_line("ERROR: [youtube] abc: Join this channel to get access to members-only content"));
        assert!(is_credential_error_line("ERROR: Private video. Sign in if you've been granted access"));
        assert!(is_credential_error_line("ERROR: Sign in to confirm your age"));
        assert!(is_credential_error_line("ERROR: Video unavailable. This video is private"));
        assert!(is_credential_error_line("Video unavailable, sign in to continue"));
        assert!(!is_credential_error_line("ERROR: [youtube] abc: Video unavailable"));
        assert!(!is_credential_error_line("[download] 10.0% of 5.00MiB"));
    }

    #[test]
    fn test_detector_sequence() {
        let mut detector = PhaseDetector::new();
        assert_eq!(detector.phase(), Phase::Preparing);

        assert_eq!(detector.observe("[youtube] abc: Downloading webpage"), LineEvent::Other);
        assert_eq!(detector.phase(), Phase::Preparing);

        detector.observe("[download] Destination: clip.f137.mp4");
        assert_eq!(detector.phase(), Phase::Video);

        let event = detector.observe("[download]  50.0% of 10.00MiB at 2.00MiB/s ETA 00:02");
        assert_eq!(
            event,
            LineEvent::Progress(ProgressUpdate {
                percent: 50.0,
                speed: Some("2.00MiB/s".to_string()),
                phase: Phase::Video,
            })
        );

        detector.observe("[download] Destination: clip.f140.m4a");
        assert_eq!(detector.phase(), Phase::Audio);

        assert_eq!(
            detector.observe("[Merger] Merging formats into \"clip.mp4\""),
            LineEvent::Merging
        );
        assert_eq!(detector.phase(), Phase::Merging);

        detector.reset();
        assert_eq!(detector.phase(), Phase::Preparing);
    }

    #[test]
    fn test_detector_never_returns_to_preparing() {
        let mut detector = PhaseDetector::with_phase(Phase::Audio);
        for line in ["", "[info] something", "[download] 10% of 1.00MiB", "random noise"] {
            detector.observe(line);
            assert_eq!(detector.phase(), Phase::Audio);
        }
    }

    #[test]
    fn test_progress_label() {
        let update = ProgressUpdate {
            percent: 45.24,
            speed: Some("1.50MiB/s".to_string()),
            phase: Phase::Video,
        };
        assert_eq!(update.label(), "Downloading video: 45.2% (1.50MiB/s)");
        let update = ProgressUpdate {
            percent: 3.0,
            speed: None,
            phase: Phase::Audio,
        };
        assert_eq!(update.label(), "Downloading audio: 3.0%");
    }
}
