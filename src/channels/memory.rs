//! In-process channel gateway.
//!
//! Holds channels as sorted message lists, enforces a bulk-delete age window
//! against an injected clock, and records every call. Faults can be queued
//! per message or per bulk call.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::TimeDelta;
use tokio::sync::Mutex;

use crate::channels::{CandidateMessage, ChannelGateway};
use crate::clock::Clock;
use crate::error::GatewayError;

/// Every call made against a [`MemoryGateway`].
#[derive(Debug, Default, Clone)]
pub struct GatewayCalls {
    /// `(channel_id, before)` per page fetch.
    pub fetches: Vec<(String, Option<String>)>,
    pub bulk_deletes: Vec<(String, Vec<String>)>,
    pub single_deletes: Vec<(String, String)>,
    pub labels: Vec<(String, String)>,
}

#[derive(Default)]
struct State {
    /// Messages keyed by numeric ID, per channel.
    channels: HashMap<String, BTreeMap<u64, CandidateMessage>>,
    delete_faults: HashMap<(String, String), GatewayError>,
    bulk_faults: HashMap<String, VecDeque<GatewayError>>,
    /// Keyed by the zero-based fetch index within the channel.
    fetch_faults: HashMap<String, BTreeMap<usize, GatewayError>>,
    label_faults: HashSet<String>,
    calls: GatewayCalls,
}

impl State {
    fn fetch_count(&self, channel_id: &str) -> usize {
        self.calls
            .fetches
            .iter()
            .filter(|(c, _)| c == channel_id)
            .count()
    }
}

pub struct MemoryGateway {
    clock: Arc<dyn Clock>,
    bulk_window: TimeDelta,
    state: Mutex<State>,
}

impl MemoryGateway {
    /// A gateway whose bulk-delete window is Discord's 14 days.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_bulk_window(clock, TimeDelta::days(14))
    }

    pub fn with_bulk_window(clock: Arc<dyn Clock>, bulk_window: TimeDelta) -> Self {
        Self {
            clock,
            bulk_window,
            state: Mutex::new(State::default()),
        }
    }

    /// Create (or extend) a channel with the given messages.
    ///
    /// Message IDs must be numeric; they define history order.
    pub async fn seed(&self, channel_id: &str, messages: impl IntoIterator<Item = CandidateMessage>) {
        let mut state = self.state.lock().await;
        let channel = state.channels.entry(channel_id.to_string()).or_default();
        for msg in messages {
            if let Ok(key) = msg.id.parse::<u64>() {
                channel.insert(key, msg);
            }
        }
    }

    /// Remove a message behind the sweeper's back.
    pub async fn remove_silently(&self, channel_id: &str, message_id: &str) {
        let mut state = self.state.lock().await;
        if let (Some(channel), Ok(key)) = (state.channels.get_mut(channel_id), message_id.parse::<u64>()) {
            channel.remove(&key);
        }
    }

    /// Fail the next individual deletion of `message_id` with `error`.
    pub async fn fail_delete(&self, channel_id: &str, message_id: &str, error: GatewayError) {
        self.state
            .lock()
            .await
            .delete_faults
            .insert((channel_id.to_string(), message_id.to_string()), error);
    }

    /// Fail a bulk deletion in `channel_id` with `error`. Faults queue up,
    /// one per call.
    pub async fn fail_bulk(&self, channel_id: &str, error: GatewayError) {
        self.state
            .lock()
            .await
            .bulk_faults
            .entry(channel_id.to_string())
            .or_default()
            .push_back(error);
    }

    /// Fail the next not-yet-failing page fetch in `channel_id` with `error`.
    pub async fn fail_fetch(&self, channel_id: &str, error: GatewayError) {
        let mut state = self.state.lock().await;
        let mut index = state.fetch_count(channel_id);
        let faults = state.fetch_faults.entry(channel_id.to_string()).or_default();
        while faults.contains_key(&index) {
            index += 1;
        }
        faults.insert(index, error);
    }

    /// Fail the `index`th (zero-based) page fetch in `channel_id`.
    pub async fn fail_fetch_at(&self, channel_id: &str, index: usize, error: GatewayError) {
        self.state
            .lock()
            .await
            .fetch_faults
            .entry(channel_id.to_string())
            .or_default()
            .insert(index, error);
    }

    /// Make every label update for `channel_id` fail.
    pub async fn fail_labels(&self, channel_id: &str) {
        self.state
            .lock()
            .await
            .label_faults
            .insert(channel_id.to_string());
    }

    /// IDs still present in a channel, newest first.
    pub async fn remaining(&self, channel_id: &str) -> Vec<String> {
        self.state
            .lock()
            .await
            .channels
            .get(channel_id)
            .map(|c| c.values().rev().map(|m| m.id.clone()).collect())
            .unwrap_or_default()
    }

    pub async fn calls(&self) -> GatewayCalls {
        self.state.lock().await.calls.clone()
    }
}

#[async_trait]
impl ChannelGateway for MemoryGateway {
    async fn fetch_messages_before(
        &self,
        channel_id: &str,
        before: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CandidateMessage>, GatewayError> {
        let mut state = self.state.lock().await;
        let index = state.fetch_count(channel_id);
        state
            .calls
            .fetches
            .push((channel_id.to_string(), before.map(String::from)));

        if let Some(error) = state
            .fetch_faults
            .get_mut(channel_id)
            .and_then(|faults| faults.remove(&index))
        {
            return Err(error);
        }
        let channel = state
            .channels
            .get(channel_id)
            .ok_or(GatewayError::UnknownChannel)?;

        let upper = match before {
            Some(id) => id
                .parse::<u64>()
                .map_err(|_| GatewayError::InvalidResponse(format!("bad cursor {}", id)))?,
            None => u64::MAX,
        };
        Ok(channel
            .range(..upper)
            .rev()
            .take(limit)
            .map(|(_, m)| m.clone())
            .collect())
    }

    async fn bulk_delete(
        &self,
        channel_id: &str,
        message_ids: &[String],
    ) -> Result<(), GatewayError> {
        let cutoff = self.clock.now() - self.bulk_window;
        let mut state = self.state.lock().await;
        state
            .calls
            .bulk_deletes
            .push((channel_id.to_string(), message_ids.to_vec()));

        if let Some(error) = state
            .bulk_faults
            .get_mut(channel_id)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }
        let channel = state
            .channels
            .get_mut(channel_id)
            .ok_or(GatewayError::UnknownChannel)?;

        let keys: Vec<u64> = message_ids.iter().filter_map(|id| id.parse().ok()).collect();
        let too_old = keys
            .iter()
            .filter_map(|k| channel.get(k))
            .any(|m| m.created_at <= cutoff);
        if too_old {
            return Err(GatewayError::AgeWindowExceeded);
        }
        for key in keys {
            channel.remove(&key);
        }
        Ok(())
    }

    async fn delete_message(&self, channel_id: &str, message_id: &str) -> Result<(), GatewayError> {
        let mut state = self.state.lock().await;
        state
            .calls
            .single_deletes
            .push((channel_id.to_string(), message_id.to_string()));

        if let Some(error) = state
            .delete_faults
            .remove(&(channel_id.to_string(), message_id.to_string()))
        {
            return Err(error);
        }
        let channel = state
            .channels
            .get_mut(channel_id)
            .ok_or(GatewayError::UnknownChannel)?;
        let key: u64 = message_id.parse().map_err(|_| GatewayError::NotFound)?;
        channel.remove(&key).map(|_| ()).ok_or(GatewayError::NotFound)
    }

    async fn set_channel_label(&self, channel_id: &str, text: &str) -> Result<(), GatewayError> {
        let mut state = self.state.lock().await;
        if state.label_faults.contains(channel_id) {
            return Err(GatewayError::PermissionDenied);
        }
        if !state.channels.contains_key(channel_id) {
            return Err(GatewayError::UnknownChannel);
        }
        state
            .calls
            .labels
            .push((channel_id.to_string(), text.to_string()));
        Ok(())
    }
}
