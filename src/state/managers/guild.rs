//! Guild directory.
//!
//! Owns the live guilds, enforces member rights and keeps each guild's
//! dedicated chat channel alive for exactly as long as the guild. Every
//! change is written through to [`Storage`] before it is applied in memory.

use crate::db::Storage;
use crate::error::{GuildError, StorageError};
use crate::state::dashmap_ext::DashMapExt;
use crate::state::guild::{Guild, GuildRights};
use crate::state::managers::channel::ChannelRegistry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

type GuildRef = Arc<Mutex<Guild>>;

pub struct GuildDirectory {
    storage: Arc<Storage>,
    channels: Arc<ChannelRegistry>,
    guilds: DashMap<i64, GuildRef>,
    names: DashMap<String, i64>,
    /// Serializes guild creation so the name check and insert are atomic.
    create_lock: Mutex<()>,
}

impl GuildDirectory {
    pub fn new(storage: Arc<Storage>, channels: Arc<ChannelRegistry>) -> Self {
        Self {
            storage,
            channels,
            guilds: DashMap::new(),
            names: DashMap::new(),
            create_lock: Mutex::new(()),
        }
    }

    /// Load every stored guild and open its channel. Guilds stored without
    /// members are deleted. Returns the number of guilds loaded.
    pub async fn load(&self) -> Result<usize, GuildError> {
        let mut loaded = 0;
        for mut guild in self.storage.get_guild_list().await? {
            let Some(id) = guild.id() else { continue };
            if guild.is_empty() {
                warn!(guild_id = id, name = %guild.name(), "Dropping stored guild without members");
                self.storage.remove_guild(&guild).await?;
                continue;
            }

            let channel_id = self
                .channels
                .create_guild_channel(guild.name())
                .ok_or(GuildError::ChannelExhausted)?;
            guild.set_channel_id(channel_id);
            self.names.insert(guild.name().to_string(), id);
            self.guilds.insert(id, Arc::new(Mutex::new(guild)));
            loaded += 1;
        }
        info!(loaded, "Guilds loaded");
        Ok(loaded)
    }

    /// Create a guild owned by `owner`, along with its channel.
    pub async fn create_guild(&self, name: &str, owner: &str) -> Result<Guild, GuildError> {
        let _creating = self.create_lock.lock().await;
        if self.names.contains_key(name) {
            return Err(StorageError::GuildNameTaken(name.to_string()).into());
        }

        let channel_id = self
            .channels
            .create_guild_channel(name)
            .ok_or(GuildError::ChannelExhausted)?;

        let mut guild = Guild::new(name);
        guild.add_member(owner, GuildRights::OWNER);
        guild.set_channel_id(channel_id);
        let id = match self.storage.add_guild(&mut guild).await {
            Ok(id) => id,
            Err(e) => {
                self.channels.remove_channel(channel_id);
                return Err(e.into());
            }
        };

        self.names.insert(name.to_string(), id);
        self.guilds.insert(id, Arc::new(Mutex::new(guild.clone())));
        info!(guild_id = id, name = %name, owner = %owner, channel_id, "Guild founded");
        Ok(guild)
    }

    /// Add `member` with no rights. `inviter` needs the invite right.
    pub async fn add_member(
        &self,
        guild_id: i64,
        inviter: &str,
        member: &str,
    ) -> Result<(), GuildError> {
        let handle = self.handle(guild_id)?;
        let mut guild = handle.lock().await;
        // disbanded while we waited for the lock
        if guild.is_empty() {
            return Err(GuildError::NoSuchGuild(guild_id));
        }

        require(&guild, inviter, GuildRights::INVITE)?;
        if guild.has_member(member) {
            return Err(GuildError::AlreadyMember(member.to_string()));
        }

        self.storage
            .add_guild_member(guild_id, member, GuildRights::NONE)
            .await?;
        guild.add_member(member, GuildRights::NONE);
        info!(guild_id, member = %member, inviter = %inviter, "Guild member added");
        Ok(())
    }

    /// Remove `target` from a guild. Members may always remove themselves;
    /// removing someone else needs the kick right, and only an owner can
    /// remove an owner.
    ///
    /// When the last member goes the guild is deleted together with its
    /// channel; the return value says whether that happened.
    pub async fn remove_member(
        &self,
        guild_id: i64,
        actor: &str,
        target: &str,
    ) -> Result<bool, GuildError> {
        let handle = self.handle(guild_id)?;
        let mut guild = handle.lock().await;
        if guild.is_empty() {
            return Err(GuildError::NoSuchGuild(guild_id));
        }

        let target_rights = guild
            .rights_of(target)
            .ok_or_else(|| GuildError::NotAMember(target.to_string()))?;
        if actor != target {
            let actor_rights = require(&guild, actor, GuildRights::KICK)?;
            if target_rights.is_owner() && !actor_rights.is_owner() {
                return Err(GuildError::InsufficientRights);
            }
        }

        if guild.member_count() > 1 {
            self.storage.remove_guild_member(guild_id, target).await?;
            guild.remove_member(target);
            info!(guild_id, member = %target, actor = %actor, "Guild member removed");
            return Ok(false);
        }

        self.storage.remove_guild(&guild).await?;
        guild.remove_member(target);
        if let Some(channel_id) = guild.channel_id() {
            self.channels.remove_channel(channel_id);
        }
        self.guilds.remove(&guild_id);
        self.names.remove(guild.name());
        info!(guild_id, name = %guild.name(), "Guild disbanded");
        Ok(true)
    }

    /// Change a member's rights. Only an owner may do this, and the last
    /// owner cannot give up ownership.
    pub async fn set_rights(
        &self,
        guild_id: i64,
        actor: &str,
        target: &str,
        rights: GuildRights,
    ) -> Result<(), GuildError> {
        let handle = self.handle(guild_id)?;
        let mut guild = handle.lock().await;
        if guild.is_empty() {
            return Err(GuildError::NoSuchGuild(guild_id));
        }

        require(&guild, actor, GuildRights::OWNER)?;
        let current = guild
            .rights_of(target)
            .ok_or_else(|| GuildError::NotAMember(target.to_string()))?;
        let owners = guild.members().iter().filter(|m| m.rights.is_owner()).count();
        if current.is_owner() && !rights.is_owner() && owners == 1 {
            return Err(GuildError::LastOwner);
        }

        self.storage
            .set_member_rights(guild_id, target, rights)
            .await?;
        guild.set_rights(target, rights);
        info!(guild_id, member = %target, rights = rights.bits(), "Guild rights changed");
        Ok(())
    }

    /// Snapshot of a guild.
    pub async fn get_guild(&self, guild_id: i64) -> Option<Guild> {
        let handle = self.guilds.get_cloned(&guild_id)?;
        let guild = handle.lock().await;
        (!guild.is_empty()).then(|| guild.clone())
    }

    pub async fn find_guild(&self, name: &str) -> Option<Guild> {
        let id = self.names.get_cloned(name)?;
        self.get_guild(id).await
    }

    /// Snapshots of every guild `member` belongs to, in ID order.
    pub async fn guilds_of(&self, member: &str) -> Vec<Guild> {
        let mut ids = self.guilds.keys_cloned();
        ids.sort_unstable();

        let mut found = Vec::new();
        for id in ids {
            if let Some(guild) = self.get_guild(id).await
                && guild.has_member(member)
            {
                found.push(guild);
            }
        }
        found
    }

    pub fn len(&self) -> usize {
        self.guilds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guilds.is_empty()
    }

    fn handle(&self, guild_id: i64) -> Result<GuildRef, GuildError> {
        self.guilds
            .get_cloned(&guild_id)
            .ok_or(GuildError::NoSuchGuild(guild_id))
    }
}

/// Rights of `name`, provided they include `right`.
fn require(guild: &Guild, name: &str, right: GuildRights) -> Result<GuildRights, GuildError> {
    let rights = guild
        .rights_of(name)
        .ok_or_else(|| GuildError::NotAMember(name.to_string()))?;
    if rights.allows(right) {
        Ok(rights)
    } else {
        Err(GuildError::InsufficientRights)
    }
}
