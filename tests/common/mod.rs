//! Common test utilities
//!
//! This module is shared across all integration tests

pub mod helpers;

#[allow(unused_imports)]
pub use helpers::{collect_until_finished, fake_manager, manager_with, wait_for_pid, FakeDownloader, Refresh, Seen};
