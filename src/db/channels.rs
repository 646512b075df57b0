//! Persisted public chat channels.

use super::executor::params;
use super::reconcile::{SyncReport, reconcile};
use super::{DynExecutor, Storage, finish};
use crate::error::StorageError;
use crate::state::{ChannelId, ChannelRecord};
use std::collections::BTreeMap;
use tracing::debug;

impl Storage {
    /// Every stored channel, keyed by ID.
    pub async fn get_channel_list(
        &self,
    ) -> Result<BTreeMap<ChannelId, ChannelRecord>, StorageError> {
        let mut exec = self.executor().await?;
        load_channels(&mut **exec).await
    }

    /// Make the stored channel table equal `channels`.
    ///
    /// Rows that already match are left alone, so calling this twice with
    /// the same map writes nothing the second time.
    pub async fn update_channels(
        &self,
        channels: &BTreeMap<ChannelId, ChannelRecord>,
    ) -> Result<SyncReport, StorageError> {
        let mut exec = self.executor().await?;
        exec.begin().await?;
        let result = sync_channel_rows(&mut **exec, channels).await;
        let report = finish(&mut **exec, result).await?;
        debug!(
            inserted = report.inserted,
            updated = report.updated,
            deleted = report.deleted,
            "Channel table synchronized"
        );
        Ok(report)
    }
}

async fn load_channels(
    exec: &mut DynExecutor,
) -> Result<BTreeMap<ChannelId, ChannelRecord>, StorageError> {
    let rows = exec
        .fetch(
            "SELECT id, name, announcement, password, joinable FROM channels",
            &[],
        )
        .await?;

    let mut channels = BTreeMap::new();
    for row in &rows {
        let record = ChannelRecord {
            id: row.int(0)?,
            name: row.text(1)?,
            announcement: row.text(2)?,
            password: row.opt_text(3)?,
            joinable: row.flag(4)?,
        };
        channels.insert(record.id, record);
    }
    Ok(channels)
}

async fn sync_channel_rows(
    exec: &mut DynExecutor,
    channels: &BTreeMap<ChannelId, ChannelRecord>,
) -> Result<SyncReport, StorageError> {
    let stored = load_channels(exec).await?;
    let diff = reconcile(&stored, channels);

    for (id, record) in &diff.insert {
        exec.execute(
            "INSERT INTO channels (id, name, announcement, password, joinable) VALUES (?, ?, ?, ?, ?)",
            params![
                *id,
                &record.name,
                &record.announcement,
                record.password.as_deref(),
                record.joinable,
            ],
        )
        .await?;
    }
    for (id, record) in &diff.update {
        exec.execute(
            "UPDATE channels SET name = ?, announcement = ?, password = ?, joinable = ? WHERE id = ?",
            params![
                &record.name,
                &record.announcement,
                record.password.as_deref(),
                record.joinable,
                *id,
            ],
        )
        .await?;
    }
    for id in &diff.delete {
        exec.execute("DELETE FROM channels WHERE id = ?", params![*id])
            .await?;
    }
    Ok(diff.report())
}
