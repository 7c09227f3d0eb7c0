//! The guild-to-call map.
//!
//! One mutex guards the whole map; entries are handed out as `Arc<Call>`
//! handles, so a handle that outlives its entry is safe to hold and inert
//! to use.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::call::Call;
use crate::model::id::GuildId;

/// Exclusive owner of all live voice sessions, at most one per guild.
#[derive(Debug, Default)]
pub struct Manager {
    calls: Mutex<HashMap<GuildId, Arc<Call>>>,
}

impl Manager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a call for the guild. A no-op when one is already present:
    /// the first session wins.
    pub fn add(&self, guild_id: GuildId, call: Arc<Call>) {
        let mut calls = self.calls.lock();

        if calls.contains_key(&guild_id) {
            debug!(%guild_id, "voice session already present; add skipped");
            return;
        }

        calls.insert(guild_id, call);
    }

    /// Hands out a handle to the guild's call, if one is live.
    pub fn get(&self, guild_id: GuildId) -> Option<Arc<Call>> {
        self.calls
            .lock()
            .get(&guild_id)
            .cloned()
    }

    /// Cancels and drops the guild's call. A no-op when absent.
    pub fn remove(&self, guild_id: GuildId) {
        let removed = self
            .calls
            .lock()
            .remove(&guild_id);

        if let Some(call) = removed {
            call.cancel();
            debug!(%guild_id, "voice session removed");
        }
    }

    pub fn contains(&self, guild_id: GuildId) -> bool {
        self.calls
            .lock()
            .contains_key(&guild_id)
    }

    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
