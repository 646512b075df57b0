//! Guild persistence.
//!
//! Guilds are not part of the identity cache; the in-memory directory lives
//! in `state::managers::guild` and writes through these operations.

use super::executor::params;
use super::reconcile::{SyncReport, reconcile};
use super::{DynExecutor, Storage, finish};
use crate::error::{QueryError, StorageError};
use crate::state::{Guild, GuildMember, GuildRights};
use std::collections::BTreeMap;
use tracing::{debug, info};

impl Storage {
    /// Insert a guild and its current members; assigns the guild its ID.
    pub async fn add_guild(&self, guild: &mut Guild) -> Result<i64, StorageError> {
        let mut exec = self.executor().await?;
        if guild_name_exists(&mut **exec, guild.name()).await? {
            return Err(StorageError::GuildNameTaken(guild.name().to_string()));
        }

        exec.begin().await?;
        let result = insert_guild_rows(&mut **exec, guild).await;
        let id = finish(&mut **exec, result).await?;
        drop(exec);

        guild.set_id(id);
        info!(guild_id = id, name = %guild.name(), "Guild created");
        Ok(id)
    }

    /// Delete a guild and its membership rows. A guild that was never
    /// stored is not an error; returns whether a row was removed.
    pub async fn remove_guild(&self, guild: &Guild) -> Result<bool, StorageError> {
        let Some(id) = guild.id() else {
            debug!(name = %guild.name(), "Removing a guild that was never stored");
            return Ok(false);
        };

        let mut exec = self.executor().await?;
        exec.begin().await?;
        let result = delete_guild_rows(&mut **exec, id).await;
        let removed = finish(&mut **exec, result).await?;
        if removed {
            info!(guild_id = id, "Guild removed");
        }
        Ok(removed)
    }

    pub async fn add_guild_member(
        &self,
        guild_id: i64,
        member_name: &str,
        rights: GuildRights,
    ) -> Result<(), StorageError> {
        let mut exec = self.executor().await?;
        exec.execute(
            "INSERT INTO guild_members (guild_id, member_name, rights) VALUES (?, ?, ?)",
            params![guild_id, member_name, rights.bits()],
        )
        .await?;
        debug!(guild_id, member = %member_name, "Guild member stored");
        Ok(())
    }

    /// Returns whether the member was stored.
    pub async fn remove_guild_member(
        &self,
        guild_id: i64,
        member_name: &str,
    ) -> Result<bool, StorageError> {
        let mut exec = self.executor().await?;
        let affected = exec
            .execute(
                "DELETE FROM guild_members WHERE guild_id = ? AND member_name = ?",
                params![guild_id, member_name],
            )
            .await?;
        Ok(affected > 0)
    }

    /// Returns whether the member was stored.
    pub async fn set_member_rights(
        &self,
        guild_id: i64,
        member_name: &str,
        rights: GuildRights,
    ) -> Result<bool, StorageError> {
        let mut exec = self.executor().await?;
        let affected = exec
            .execute(
                "UPDATE guild_members SET rights = ? WHERE guild_id = ? AND member_name = ?",
                params![rights.bits(), guild_id, member_name],
            )
            .await?;
        Ok(affected > 0)
    }

    /// Every stored guild with its members in join order.
    pub async fn get_guild_list(&self) -> Result<Vec<Guild>, StorageError> {
        let mut exec = self.executor().await?;
        let guilds = exec
            .fetch("SELECT id, name FROM guilds ORDER BY id", &[])
            .await?;
        let members = exec
            .fetch(
                "SELECT guild_id, member_name, rights FROM guild_members ORDER BY guild_id, rowid",
                &[],
            )
            .await?;
        drop(exec);

        let mut by_guild: BTreeMap<i64, Vec<GuildMember>> = BTreeMap::new();
        for row in &members {
            by_guild.entry(row.int(0)?).or_default().push(GuildMember {
                name: row.text(1)?,
                rights: decode_rights(row.int(2)?)?,
            });
        }

        let mut list = Vec::with_capacity(guilds.len());
        for row in &guilds {
            let id: i64 = row.int(0)?;
            let members = by_guild.remove(&id).unwrap_or_default();
            list.push(Guild::restore(id, row.text(1)?, members));
        }
        Ok(list)
    }

    pub async fn does_guild_name_exist(&self, name: &str) -> Result<bool, StorageError> {
        let mut exec = self.executor().await?;
        guild_name_exists(&mut **exec, name).await
    }

    /// Bring the stored membership of `guild` in line with its in-memory
    /// member list.
    pub async fn sync_guild_members(&self, guild: &Guild) -> Result<SyncReport, StorageError> {
        let id = guild.id().ok_or(StorageError::NotPersisted("guild"))?;
        let current: BTreeMap<String, u8> = guild
            .members()
            .iter()
            .map(|m| (m.name.clone(), m.rights.bits()))
            .collect();

        let mut exec = self.executor().await?;
        exec.begin().await?;
        let result = sync_member_rows(&mut **exec, id, &current).await;
        let report = finish(&mut **exec, result).await?;
        if !report.is_noop() {
            debug!(guild_id = id, ?report, "Guild members synchronized");
        }
        Ok(report)
    }
}

fn decode_rights(bits: u8) -> Result<GuildRights, QueryError> {
    GuildRights::from_bits(bits).ok_or(QueryError::Decode {
        column: 2,
        expected: "guild rights",
    })
}

async fn guild_name_exists(exec: &mut DynExecutor, name: &str) -> Result<bool, StorageError> {
    let rows = exec
        .fetch("SELECT 1 FROM guilds WHERE name = ? LIMIT 1", params![name])
        .await?;
    Ok(!rows.is_empty())
}

async fn insert_guild_rows(exec: &mut DynExecutor, guild: &Guild) -> Result<i64, StorageError> {
    let id = exec
        .execute_insert("INSERT INTO guilds (name) VALUES (?)", params![guild.name()])
        .await?;
    for member in guild.members() {
        exec.execute(
            "INSERT INTO guild_members (guild_id, member_name, rights) VALUES (?, ?, ?)",
            params![id, &member.name, member.rights.bits()],
        )
        .await?;
    }
    Ok(id)
}

async fn delete_guild_rows(exec: &mut DynExecutor, id: i64) -> Result<bool, StorageError> {
    exec.execute("DELETE FROM guild_members WHERE guild_id = ?", params![id])
        .await?;
    let affected = exec
        .execute("DELETE FROM guilds WHERE id = ?", params![id])
        .await?;
    Ok(affected > 0)
}

async fn sync_member_rows(
    exec: &mut DynExecutor,
    id: i64,
    current: &BTreeMap<String, u8>,
) -> Result<SyncReport, StorageError> {
    let mut stored = BTreeMap::new();
    for row in exec
        .fetch(
            "SELECT member_name, rights FROM guild_members WHERE guild_id = ?",
            params![id],
        )
        .await?
    {
        stored.insert(row.text(0)?, row.int::<u8>(1)?);
    }

    let diff = reconcile(&stored, current);
    for (name, rights) in &diff.insert {
        exec.execute(
            "INSERT INTO guild_members (guild_id, member_name, rights) VALUES (?, ?, ?)",
            params![id, name, *rights],
        )
        .await?;
    }
    for (name, rights) in &diff.update {
        exec.execute(
            "UPDATE guild_members SET rights = ? WHERE guild_id = ? AND member_name = ?",
            params![*rights, id, name],
        )
        .await?;
    }
    for name in &diff.delete {
        exec.execute(
            "DELETE FROM guild_members WHERE guild_id = ? AND member_name = ?",
            params![id, name],
        )
        .await?;
    }
    Ok(diff.report())
}
