//! Chat channel registry.
//!
//! [`ChannelRegistry`] owns every live [`ChatChannel`] and the ID space they
//! draw from. Public channels are restored from and saved to the store via
//! [`restore`](ChannelRegistry::restore) and
//! [`persistent_snapshot`](ChannelRegistry::persistent_snapshot); private and
//! guild channels only ever exist in memory.

use crate::state::channel::{ChannelId, ChannelKind, ChannelRecord, ChatChannel};
use crate::state::channel_id::ChannelIdAllocator;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Result of [`ChannelRegistry::join_channel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    AlreadyJoined,
    NoSuchChannel,
    NotJoinable,
    WrongPassword,
}

#[derive(Debug, Default)]
struct Channels {
    live: BTreeMap<ChannelId, ChatChannel>,
    ids: ChannelIdAllocator,
}

impl Channels {
    fn insert(&mut self, build: impl FnOnce(ChannelId) -> ChatChannel) -> Option<ChannelId> {
        let live = &self.live;
        let id = self.ids.next_usable(|id| live.contains_key(&id))?;
        self.live.insert(id, build(id));
        Some(id)
    }

    fn remove(&mut self, id: ChannelId) -> Option<ChatChannel> {
        let channel = self.live.remove(&id)?;
        self.ids.release(id);
        Some(channel)
    }

    fn find(&self, name: &str) -> Option<&ChatChannel> {
        self.live.values().find(|c| c.name() == name)
    }

    /// Drop `user` from channel `id`, destroying an emptied private channel.
    fn leave(&mut self, id: ChannelId, user: &str) -> bool {
        let Some(channel) = self.live.get_mut(&id) else {
            return false;
        };
        if !channel.remove_user(user) {
            return false;
        }
        if channel.kind() == ChannelKind::Private && channel.users().is_empty() {
            self.remove(id);
            debug!(channel_id = id, "Empty private channel destroyed");
        }
        true
    }
}

/// Live chat channels and their ID allocator.
///
/// All state sits behind one short-lived lock; lookups hand out clones so no
/// caller holds the lock while using a channel.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    inner: Mutex<Channels>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register channels loaded from the store, keeping their IDs.
    ///
    /// Must run before any channel is created so the allocator never hands
    /// out a restored ID. Returns how many channels were restored.
    pub fn restore(&self, records: BTreeMap<ChannelId, ChannelRecord>) -> usize {
        let mut inner = self.inner.lock();
        let mut restored = 0;
        for (id, record) in records {
            if id == 0 || inner.live.contains_key(&id) {
                warn!(channel_id = id, name = %record.name, "Skipping unusable stored channel");
                continue;
            }
            inner.ids.reserve(id);
            inner.live.insert(id, ChatChannel::from_record(record));
            restored += 1;
        }
        info!(restored, "Public channels restored");
        restored
    }

    /// Create a private channel. It is never persisted and is destroyed when
    /// its last user leaves. Returns `None` once the ID space is exhausted.
    pub fn create_new_channel(
        &self,
        name: &str,
        announcement: &str,
        password: Option<&str>,
        joinable: bool,
    ) -> Option<ChannelId> {
        let id = self.inner.lock().insert(|id| {
            ChatChannel::new(
                id,
                name,
                announcement,
                password.map(str::to_string),
                joinable,
                ChannelKind::Private,
            )
        });
        match id {
            Some(id) => debug!(channel_id = id, name = %name, "Channel created"),
            None => warn!(name = %name, "Channel IDs exhausted"),
        }
        id
    }

    /// Create the dedicated channel of a guild.
    pub fn create_guild_channel(&self, name: &str) -> Option<ChannelId> {
        let id = self.inner.lock().insert(|id| {
            ChatChannel::new(id, name, "", None, true, ChannelKind::Guild)
        });
        if let Some(id) = id {
            debug!(channel_id = id, name = %name, "Guild channel created");
        }
        id
    }

    /// Create a persisted public channel unless a channel named `name`
    /// already exists.
    pub fn try_new_public_channel(&self, name: &str) -> bool {
        let mut inner = self.inner.lock();
        if inner.find(name).is_some() {
            return false;
        }
        let id = inner.insert(|id| ChatChannel::new(id, name, "", None, true, ChannelKind::Public));
        if let Some(id) = id {
            info!(channel_id = id, name = %name, "Public channel created");
        }
        id.is_some()
    }

    /// Remove a channel and return its ID to the reuse queue.
    pub fn remove_channel(&self, id: ChannelId) -> bool {
        let removed = self.inner.lock().remove(id).is_some();
        if removed {
            debug!(channel_id = id, "Channel removed");
        }
        removed
    }

    pub fn get_channel(&self, id: ChannelId) -> Option<ChatChannel> {
        self.inner.lock().live.get(&id).cloned()
    }

    pub fn get_channel_by_name(&self, name: &str) -> Option<ChatChannel> {
        self.inner.lock().find(name).cloned()
    }

    pub fn get_channel_id(&self, name: &str) -> Option<ChannelId> {
        self.inner.lock().find(name).map(ChatChannel::id)
    }

    pub fn channel_exists(&self, id: ChannelId) -> bool {
        self.inner.lock().live.contains_key(&id)
    }

    pub fn channel_name_exists(&self, name: &str) -> bool {
        self.inner.lock().find(name).is_some()
    }

    /// Joinable channels for directory listings, in ID order. Guild
    /// channels are left out.
    pub fn get_public_channels(&self) -> Vec<ChatChannel> {
        self.inner
            .lock()
            .live
            .values()
            .filter(|c| c.joinable && c.kind() != ChannelKind::Guild)
            .cloned()
            .collect()
    }

    pub fn set_channel_topic(&self, id: ChannelId, topic: &str) -> bool {
        match self.inner.lock().live.get_mut(&id) {
            Some(channel) => {
                channel.announcement = topic.to_string();
                true
            }
            None => false,
        }
    }

    pub fn join_channel(&self, id: ChannelId, user: &str, password: Option<&str>) -> JoinOutcome {
        let mut inner = self.inner.lock();
        let Some(channel) = inner.live.get_mut(&id) else {
            return JoinOutcome::NoSuchChannel;
        };
        if channel.has_user(user) {
            return JoinOutcome::AlreadyJoined;
        }
        if !channel.joinable {
            return JoinOutcome::NotJoinable;
        }
        if !channel.check_password(password.unwrap_or("")) {
            return JoinOutcome::WrongPassword;
        }
        channel.add_user(user);
        JoinOutcome::Joined
    }

    /// Returns false if `user` was not in the channel.
    pub fn leave_channel(&self, id: ChannelId, user: &str) -> bool {
        self.inner.lock().leave(id, user)
    }

    /// Drop a disconnecting user from every channel; returns the channels
    /// they were in.
    pub fn remove_user_from_all_channels(&self, user: &str) -> Vec<ChannelId> {
        let mut inner = self.inner.lock();
        let joined: Vec<ChannelId> = inner
            .live
            .values()
            .filter(|c| c.has_user(user))
            .map(ChatChannel::id)
            .collect();
        for id in &joined {
            inner.leave(*id, user);
        }
        joined
    }

    /// Records of the channels that belong in the store.
    pub fn persistent_snapshot(&self) -> BTreeMap<ChannelId, ChannelRecord> {
        self.inner
            .lock()
            .live
            .values()
            .filter(|c| c.is_public())
            .map(|c| (c.id(), c.record()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().live.is_empty()
    }
}
