//! Character persistence.
//!
//! Characters are cached independently of their accounts: a game server can
//! resolve and update a character without the owning account being loaded.

use super::executor::params;
use super::reconcile::{SyncReport, reconcile};
use super::{DynExecutor, Row, Storage, finish};
use crate::error::{QueryError, StorageError};
use crate::state::{AccountRef, Attribute, Character, CharacterRef, Gender, InventoryItem};
use crate::state::dashmap_ext::DashMapExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

macro_rules! select_characters {
    ($filter:literal) => {
        concat!(
            "SELECT id, account_id, name, slot, gender, hair_style, hair_color, level, ",
            "character_points, correction_points, money, map_id, x, y ",
            "FROM characters ",
            $filter
        )
    };
}

pub(super) use select_characters;

impl Storage {
    /// Look up a character by ID, loading it if it is not cached.
    pub async fn get_character(&self, id: i64) -> Result<Option<CharacterRef>, StorageError> {
        if let Some(character) = self.characters.get_cloned(&id) {
            return Ok(Some(character));
        }

        let mut exec = self.executor().await?;
        if let Some(character) = self.characters.get_cloned(&id) {
            return Ok(Some(character));
        }
        let rows = exec
            .fetch(select_characters!("WHERE id = ?"), params![id])
            .await?;
        Ok(self
            .resolve_characters(&mut **exec, rows)
            .await?
            .into_iter()
            .next())
    }

    /// Look up a character by name, loading it if it is not cached.
    pub async fn get_character_by_name(
        &self,
        name: &str,
    ) -> Result<Option<CharacterRef>, StorageError> {
        if let Some(character) = self.cached_character_by_name(name) {
            return Ok(Some(character));
        }

        let mut exec = self.executor().await?;
        if let Some(character) = self.cached_character_by_name(name) {
            return Ok(Some(character));
        }
        let rows = exec
            .fetch(select_characters!("WHERE name = ?"), params![name])
            .await?;
        Ok(self
            .resolve_characters(&mut **exec, rows)
            .await?
            .into_iter()
            .next())
    }

    /// Whether any stored or cached character uses `name`.
    pub async fn does_character_name_exist(&self, name: &str) -> Result<bool, StorageError> {
        if self.character_names.contains_key(name) {
            return Ok(true);
        }
        let mut exec = self.executor().await?;
        character_name_exists(&mut **exec, name).await
    }

    /// Write a character's gameplay state: stats, money, position, attributes
    /// and inventory. Name, slot and owning account are left untouched.
    ///
    /// Best effort: a failure is logged and reported as `false`. The cached
    /// character stays authoritative and is marked for retry by
    /// [`flush_all`](Storage::flush_all).
    pub async fn update_character(&self, character: &CharacterRef) -> bool {
        // held across the write so the pending flag matches what was stored
        let mut current = character.write().await;
        let Some(id) = current.id() else {
            warn!(name = %current.name(), "Cannot update a character that was never stored");
            return false;
        };

        match self.write_character(id, &current).await {
            Ok(true) => {
                current.set_sync_pending(false);
                true
            }
            Ok(false) => {
                warn!(character_id = id, "Character no longer exists in the store");
                false
            }
            Err(e) => {
                warn!(character_id = id, error = %e, "Character update failed, keeping cached state");
                current.set_sync_pending(true);
                false
            }
        }
    }

    async fn write_character(&self, id: i64, snapshot: &Character) -> Result<bool, StorageError> {
        let mut exec = self.executor().await?;
        exec.begin().await?;
        let result = update_character_rows(
            &mut **exec,
            id,
            snapshot,
            self.limits.max_inventory_slots,
        )
        .await;
        finish(&mut **exec, result).await
    }

    /// Create a character in the next free slot of `account`.
    ///
    /// The name is checked against the store and the cache before anything
    /// is written.
    pub async fn add_character(
        &self,
        account: &AccountRef,
        character: Character,
    ) -> Result<CharacterRef, StorageError> {
        let mut owner = account.write().await;
        let account_id = owner.id().ok_or(StorageError::NotPersisted("account"))?;

        let limit = self.limits.max_characters_per_account;
        if owner.characters().len() >= limit {
            return Err(StorageError::TooManyCharacters { limit });
        }
        let slot = owner.characters().len();

        let mut exec = self.executor().await?;
        if self.character_names.contains_key(character.name())
            || character_name_exists(&mut **exec, character.name()).await?
        {
            return Err(StorageError::CharacterNameTaken(
                character.name().to_string(),
            ));
        }

        exec.begin().await?;
        let result = insert_character_rows(
            &mut **exec,
            account_id,
            slot,
            &character,
            self.limits.max_inventory_slots,
        )
        .await;
        let id = finish(&mut **exec, result).await?;

        let mut character = character;
        character.bind(id, account_id);
        let name = character.name().to_string();
        let handle = Arc::new(RwLock::new(character));
        self.register_character(id, name.clone(), handle.clone());
        drop(exec);
        owner.push_character(handle.clone());

        info!(account_id, character_id = id, name = %name, slot, "Character created");
        Ok(handle)
    }

    /// Delete the character in `slot` of `account`. Returns false if the
    /// slot is empty.
    pub async fn delete_character(
        &self,
        account: &AccountRef,
        slot: usize,
    ) -> Result<bool, StorageError> {
        let mut owner = account.write().await;
        let Some(handle) = owner.character(slot).cloned() else {
            return Ok(false);
        };
        let id = handle.read().await.id();

        if let Some(id) = id {
            let mut exec = self.executor().await?;
            exec.begin().await?;
            let result = delete_character_rows(&mut **exec, id).await;
            finish(&mut **exec, result).await?;
            drop(exec);
            self.evict_character(id);
            info!(character_id = id, slot, "Character deleted");
        }

        owner.take_character(slot);
        Ok(true)
    }

    fn cached_character_by_name(&self, name: &str) -> Option<CharacterRef> {
        let id = self.character_names.get_cloned(name)?;
        self.characters.get_cloned(&id)
    }

    pub(super) fn register_character(&self, id: i64, name: String, handle: CharacterRef) {
        self.characters.insert(id, handle);
        self.character_names.insert(name, id);
    }

    pub(super) fn evict_character(&self, id: i64) {
        if self.characters.remove(&id).is_some() {
            self.character_names.retain(|_, cached| *cached != id);
        }
    }

    /// Map character rows to cached handles, loading attributes and
    /// inventory for the ones not cached yet. The caller holds the executor.
    pub(super) async fn resolve_characters(
        &self,
        exec: &mut DynExecutor,
        rows: Vec<Row>,
    ) -> Result<Vec<CharacterRef>, StorageError> {
        let mut handles = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.int(0)?;
            if let Some(cached) = self.characters.get_cloned(&id) {
                handles.push(cached);
                continue;
            }

            let mut character = decode_character(&row)?;
            load_character_details(exec, id, &mut character).await?;

            let name = character.name().to_string();
            let handle = Arc::new(RwLock::new(character));
            self.register_character(id, name, handle.clone());
            debug!(character_id = id, "Character loaded");
            handles.push(handle);
        }
        Ok(handles)
    }
}

fn decode_character(row: &Row) -> Result<Character, QueryError> {
    let mut character = Character::restore(row.int(0)?, row.int(1)?, row.text(2)?);
    character.gender = Gender::from_u8(row.int(4)?).unwrap_or_default();
    character.hair_style = row.int(5)?;
    character.hair_color = row.int(6)?;
    character.level = row.int(7)?;
    character.character_points = row.int(8)?;
    character.correction_points = row.int(9)?;
    character.money = row.int(10)?;
    character.position.map_id = row.int(11)?;
    character.position.x = row.int(12)?;
    character.position.y = row.int(13)?;
    Ok(character)
}

async fn load_character_details(
    exec: &mut DynExecutor,
    id: i64,
    character: &mut Character,
) -> Result<(), StorageError> {
    let attributes = exec
        .fetch(
            "SELECT attribute, value FROM character_attributes WHERE character_id = ?",
            params![id],
        )
        .await?;
    for row in attributes {
        if let Some(attribute) = Attribute::from_index(row.int(0)?) {
            character.set_attribute(attribute, row.int(1)?);
        }
    }

    let inventory = load_inventory(exec, id).await?;
    character.set_inventory(inventory);
    Ok(())
}

async fn load_inventory(
    exec: &mut DynExecutor,
    id: i64,
) -> Result<BTreeMap<u8, InventoryItem>, StorageError> {
    let rows = exec
        .fetch(
            "SELECT slot, item_id, amount FROM inventories WHERE character_id = ?",
            params![id],
        )
        .await?;
    let mut inventory = BTreeMap::new();
    for row in &rows {
        let item = InventoryItem {
            item_id: row.int(1)?,
            amount: row.int(2)?,
        };
        inventory.insert(row.int::<u8>(0)?, item);
    }
    Ok(inventory)
}

pub(super) async fn character_name_exists(
    exec: &mut DynExecutor,
    name: &str,
) -> Result<bool, StorageError> {
    let rows = exec
        .fetch("SELECT 1 FROM characters WHERE name = ? LIMIT 1", params![name])
        .await?;
    Ok(!rows.is_empty())
}

/// Insert a character with its attributes and inventory; returns its ID.
pub(super) async fn insert_character_rows(
    exec: &mut DynExecutor,
    account_id: i64,
    slot: usize,
    character: &Character,
    max_inventory_slots: u8,
) -> Result<i64, StorageError> {
    let id = exec
        .execute_insert(
            r#"
            INSERT INTO characters
            (account_id, name, slot, gender, hair_style, hair_color, level,
             character_points, correction_points, money, map_id, x, y)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                account_id,
                character.name(),
                slot as i64,
                character.gender as u8,
                character.hair_style,
                character.hair_color,
                character.level,
                character.character_points,
                character.correction_points,
                character.money,
                character.position.map_id,
                character.position.x,
                character.position.y,
            ],
        )
        .await?;

    write_attributes(exec, id, character).await?;
    sync_inventory(exec, id, character, max_inventory_slots).await?;
    Ok(id)
}

/// Update the gameplay columns of a stored character. Returns false if the
/// row no longer exists.
pub(super) async fn update_character_rows(
    exec: &mut DynExecutor,
    id: i64,
    character: &Character,
    max_inventory_slots: u8,
) -> Result<bool, StorageError> {
    let affected = exec
        .execute(
            r#"
            UPDATE characters
            SET gender = ?, hair_style = ?, hair_color = ?, level = ?,
                character_points = ?, correction_points = ?, money = ?,
                map_id = ?, x = ?, y = ?
            WHERE id = ?
            "#,
            params![
                character.gender as u8,
                character.hair_style,
                character.hair_color,
                character.level,
                character.character_points,
                character.correction_points,
                character.money,
                character.position.map_id,
                character.position.x,
                character.position.y,
                id,
            ],
        )
        .await?;
    if affected == 0 {
        return Ok(false);
    }

    write_attributes(exec, id, character).await?;
    sync_inventory(exec, id, character, max_inventory_slots).await?;
    Ok(true)
}

async fn write_attributes(
    exec: &mut DynExecutor,
    id: i64,
    character: &Character,
) -> Result<(), StorageError> {
    for (index, value) in character.attributes().iter().enumerate() {
        exec.execute(
            r#"
            INSERT INTO character_attributes (character_id, attribute, value)
            VALUES (?, ?, ?)
            ON CONFLICT (character_id, attribute) DO UPDATE SET value = excluded.value
            "#,
            params![id, index as i64, *value],
        )
        .await?;
    }
    Ok(())
}

/// Bring the stored inventory in line with the character's slots.
async fn sync_inventory(
    exec: &mut DynExecutor,
    id: i64,
    character: &Character,
    max_inventory_slots: u8,
) -> Result<SyncReport, StorageError> {
    let stored = load_inventory(exec, id).await?;
    let current: BTreeMap<u8, InventoryItem> = character
        .inventory()
        .range(..max_inventory_slots)
        .map(|(slot, item)| (*slot, *item))
        .collect();

    let diff = reconcile(&stored, &current);
    for (slot, item) in &diff.insert {
        exec.execute(
            "INSERT INTO inventories (character_id, slot, item_id, amount) VALUES (?, ?, ?, ?)",
            params![id, *slot, item.item_id, item.amount],
        )
        .await?;
    }
    for (slot, item) in &diff.update {
        exec.execute(
            "UPDATE inventories SET item_id = ?, amount = ? WHERE character_id = ? AND slot = ?",
            params![item.item_id, item.amount, id, *slot],
        )
        .await?;
    }
    for slot in &diff.delete {
        exec.execute(
            "DELETE FROM inventories WHERE character_id = ? AND slot = ?",
            params![id, *slot],
        )
        .await?;
    }
    Ok(diff.report())
}

pub(super) async fn delete_character_rows(
    exec: &mut DynExecutor,
    id: i64,
) -> Result<(), StorageError> {
    exec.execute(
        "DELETE FROM character_attributes WHERE character_id = ?",
        params![id],
    )
    .await?;
    exec.execute("DELETE FROM inventories WHERE character_id = ?", params![id])
        .await?;
    exec.execute("DELETE FROM characters WHERE id = ?", params![id])
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::config::StorageLimits;
    use crate::db::Storage;
    use crate::db::executor::testing::FlakyExecutor;
    use crate::error::StorageError;
    use crate::state::{Account, Attribute, Character, Gender, InventoryItem};
    use std::sync::Arc;
    use std::sync::atomic::Ordering;

    async fn storage() -> Storage {
        Storage::open_sqlite(":memory:", StorageLimits::default())
            .await
            .unwrap()
    }

    async fn storage_with_account(name: &str) -> (Storage, crate::state::AccountRef) {
        let storage = storage().await;
        let account = Account::new(name, "pw", format!("{name}@example.com")).unwrap();
        let account = storage.add_account(account).await.unwrap();
        (storage, account)
    }

    #[tokio::test]
    async fn character_names_are_unique_across_accounts() {
        let (storage, alice) = storage_with_account("alice").await;
        let bob = storage
            .add_account(Account::new("bob", "pw", "bob@example.com").unwrap())
            .await
            .unwrap();

        storage
            .add_character(&alice, Character::new("Aliceling", Gender::Female, 1, 1))
            .await
            .unwrap();
        assert!(storage.does_character_name_exist("Aliceling").await.unwrap());

        let err = storage
            .add_character(&bob, Character::new("Aliceling", Gender::Male, 1, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::CharacterNameTaken(ref n) if n == "Aliceling"));
        assert!(bob.read().await.characters().is_empty());
    }

    #[tokio::test]
    async fn character_capacity_is_enforced() {
        let (storage, alice) = storage_with_account("alice").await;
        for i in 0..3 {
            storage
                .add_character(&alice, Character::new(format!("Alice{i}"), Gender::Female, 0, 0))
                .await
                .unwrap();
        }
        let err = storage
            .add_character(&alice, Character::new("Alice3", Gender::Female, 0, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::TooManyCharacters { limit: 3 }));
    }

    #[tokio::test]
    async fn character_lookup_returns_the_cached_instance() {
        let (storage, alice) = storage_with_account("alice").await;
        let created = storage
            .add_character(&alice, Character::new("Aliceling", Gender::Female, 0, 0))
            .await
            .unwrap();
        let id = created.read().await.id().unwrap();

        let by_id = storage.get_character(id).await.unwrap().unwrap();
        let by_name = storage
            .get_character_by_name("Aliceling")
            .await
            .unwrap()
            .unwrap();
        assert!(Arc::ptr_eq(&created, &by_id));
        assert!(Arc::ptr_eq(&by_id, &by_name));
        assert!(storage.get_character(id + 100).await.unwrap().is_none());
        assert!(storage.get_character_by_name("Nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_character_persists_gameplay_state() {
        let (storage, alice) = storage_with_account("alice").await;
        let character = storage
            .add_character(&alice, Character::new("Aliceling", Gender::Female, 0, 0))
            .await
            .unwrap();

        {
            let mut c = character.write().await;
            c.level = 7;
            c.money = 1_250;
            c.position.map_id = 3;
            c.position.x = 40;
            c.position.y = 12;
            c.set_attribute(Attribute::Strength, 9);
            c.set_item(0, InventoryItem { item_id: 501, amount: 5 });
            c.set_item(2, InventoryItem { item_id: 502, amount: 1 });
        }
        assert!(storage.update_character(&character).await);

        character.write().await.clear_slot(0);
        character.write().await.set_item(2, InventoryItem { item_id: 502, amount: 4 });
        assert!(storage.update_character(&character).await);

        // Drop the cached copy and reload from the store.
        storage.unload_account(&alice).await.unwrap();
        let reloaded = storage
            .get_character_by_name("Aliceling")
            .await
            .unwrap()
            .unwrap();
        assert!(!Arc::ptr_eq(&character, &reloaded));

        let c = reloaded.read().await;
        assert_eq!(c.level, 7);
        assert_eq!(c.money, 1_250);
        assert_eq!((c.position.map_id, c.position.x, c.position.y), (3, 40, 12));
        assert_eq!(c.attribute(Attribute::Strength), 9);
        assert_eq!(c.inventory().len(), 1);
        assert_eq!(c.inventory()[&2], InventoryItem { item_id: 502, amount: 4 });
    }

    #[tokio::test]
    async fn update_of_unstored_character_fails_softly() {
        let storage = storage().await;
        let transient = Arc::new(tokio::sync::RwLock::new(Character::new(
            "Ghost",
            Gender::Male,
            0,
            0,
        )));
        assert!(!storage.update_character(&transient).await);
    }

    #[tokio::test]
    async fn failed_update_marks_character_for_retry() {
        let (storage, alice) = storage_with_account("alice").await;
        let character = storage
            .add_character(&alice, Character::new("Aliceling", Gender::Female, 0, 0))
            .await
            .unwrap();

        storage.close().await.unwrap();
        assert!(!storage.update_character(&character).await);
        assert!(character.read().await.is_sync_pending());
    }

    #[tokio::test]
    async fn flush_all_retries_pending_characters_without_their_account() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        let path = path.to_str().unwrap();

        let (exec, failing) = FlakyExecutor::connect(path).await;
        let storage = Storage::open(exec, StorageLimits::default()).await.unwrap();
        let alice = Account::new("alice", "pw", "alice@example.com")
            .unwrap()
            .with_character(Character::new("Aliceling", Gender::Female, 0, 0));
        let alice = storage.add_account(alice).await.unwrap();
        storage.unload_account(&alice).await.unwrap();

        let character = storage
            .get_character_by_name("Aliceling")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(storage.cached_accounts(), 0);
        character.write().await.money = 900;

        failing.store(true, Ordering::SeqCst);
        assert!(!storage.update_character(&character).await);
        assert!(character.read().await.is_sync_pending());

        failing.store(false, Ordering::SeqCst);
        assert_eq!(storage.flush_all().await.unwrap(), 1);
        assert!(!character.read().await.is_sync_pending());
        assert_eq!(storage.flush_all().await.unwrap(), 0);
        storage.close().await.unwrap();

        let storage = Storage::open_sqlite(path, StorageLimits::default())
            .await
            .unwrap();
        let reloaded = storage
            .get_character_by_name("Aliceling")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.read().await.money, 900);
    }

    #[tokio::test]
    async fn delete_character_frees_the_name_and_shifts_slots() {
        let (storage, alice) = storage_with_account("alice").await;
        for name in ["First", "Second"] {
            storage
                .add_character(&alice, Character::new(name, Gender::Male, 0, 0))
                .await
                .unwrap();
        }

        assert!(storage.delete_character(&alice, 0).await.unwrap());
        assert!(!storage.delete_character(&alice, 5).await.unwrap());
        assert!(!storage.does_character_name_exist("First").await.unwrap());

        let account = alice.read().await;
        assert_eq!(account.characters().len(), 1);
        assert_eq!(account.character(0).unwrap().read().await.name(), "Second");
    }
}
