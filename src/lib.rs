//! Per-channel message retention for Discord.
//!
//! Channels carry a time-to-live; a background sweep deletes every unpinned
//! message older than it and keeps a running tally in the channel topic.

pub mod channels;
pub mod cli;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod policy;
pub mod sweep;

pub use config::Config;
pub use error::{Error, Result};
