//! Download orchestration: process control, output parsing, retries and the session manager

pub mod builder;
pub mod cookies;
pub mod error;
pub mod events;
pub mod manager;
pub mod phase;
pub mod playlist;
pub mod preflight;
pub mod process;
pub mod session;
pub mod ytdlp_errors;

// Re-exports for convenience
pub use error::DownloadError;
pub use events::{DownloadEvent, EventReceiver, RefreshReply, SessionEnd};
pub use manager::{DownloadManager, DownloadRequest, ManagerConfig};
pub use phase::{Phase, PhaseDetector};
pub use process::{Launcher, ProcessController};
pub use session::SessionSnapshot;
