//! ytgrab - yt-dlp download orchestration
//!
//! Starts yt-dlp, follows its progress output, stops it on demand and
//! recovers from transient and credential failures.
//!
//! # Module Structure
//!
//! - `core`: Configuration, errors, logging, settings and the retry orchestrator
//! - `download`: Process control, output parsing, playlists and the download manager
//! - `cli`: Command line interface

pub mod cli;
pub mod core;
pub mod download;

// Re-export commonly used types for convenience
pub use crate::core::{config, AppError, AppResult, Settings};
pub use crate::download::{DownloadEvent, DownloadManager, DownloadRequest, ManagerConfig, SessionEnd};
