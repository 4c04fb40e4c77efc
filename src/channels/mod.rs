//! Chat-platform access.
//!
//! The sweeper only needs four primitives from the platform: list a page of
//! history, bulk delete, delete one message, and set the channel label.
//! [`ChannelGateway`] captures those; [`DiscordGateway`] implements them over
//! Discord's REST API and [`MemoryGateway`] in-process.

mod channel;
mod discord;
mod memory;

pub use channel::{
    CandidateMessage, ChannelGateway, DISCORD_EPOCH_MS, snowflake_at, snowflake_timestamp,
};
pub use discord::{BULK_DELETE_MAX_AGE_SECS, DiscordGateway};
pub use memory::{GatewayCalls, MemoryGateway};
