//! Account persistence and the account half of the identity cache.

use super::characters::{
    character_name_exists, delete_character_rows, insert_character_rows, select_characters,
    update_character_rows,
};
use super::executor::params;
use super::reconcile::reconcile;
use super::{DynExecutor, Row, SqlValue, Storage, finish};
use crate::error::StorageError;
use crate::state::dashmap_ext::DashMapExt;
use crate::state::{Account, AccountLevel, AccountRef, Character, CharacterRef};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

macro_rules! select_accounts {
    ($filter:literal) => {
        concat!(
            "SELECT id, username, password, email, level, registered_at, last_login ",
            "FROM accounts ",
            $filter
        )
    };
}

/// Account columns written back by a flush.
struct AccountRow {
    password_hash: String,
    email: String,
    level: AccountLevel,
    last_login: Option<i64>,
}

impl Storage {
    /// Look up an account by username, loading it with its characters if it
    /// is not cached.
    ///
    /// Every caller asking for the same account gets the same handle for as
    /// long as it stays cached.
    pub async fn get_account(&self, username: &str) -> Result<Option<AccountRef>, StorageError> {
        if let Some(account) = self.cached_account_by_name(username) {
            return Ok(Some(account));
        }

        let mut exec = self.executor().await?;
        if let Some(account) = self.cached_account_by_name(username) {
            return Ok(Some(account));
        }
        let rows = exec
            .fetch(select_accounts!("WHERE username = ?"), params![username])
            .await?;
        self.resolve_account(&mut **exec, rows).await
    }

    /// Look up an account by ID. Same caching rules as [`get_account`](Self::get_account).
    pub async fn get_account_by_id(&self, id: i64) -> Result<Option<AccountRef>, StorageError> {
        if let Some(account) = self.accounts.get_cloned(&id) {
            return Ok(Some(account));
        }

        let mut exec = self.executor().await?;
        if let Some(account) = self.accounts.get_cloned(&id) {
            return Ok(Some(account));
        }
        let rows = exec
            .fetch(select_accounts!("WHERE id = ?"), params![id])
            .await?;
        self.resolve_account(&mut **exec, rows).await
    }

    /// Register a new account together with any characters it already has.
    ///
    /// Username, email and character names are checked first; nothing is
    /// written or cached when one of them is taken. On success the account
    /// and its characters carry their new IDs and the returned handle is the
    /// cached instance.
    pub async fn add_account(&self, mut account: Account) -> Result<AccountRef, StorageError> {
        let limit = self.limits.max_characters_per_account;
        if account.characters().len() > limit {
            return Err(StorageError::TooManyCharacters { limit });
        }

        // Character locks come before the executor; they stay held until the
        // new IDs are bound and cached.
        let handles = account.characters().to_vec();
        let mut guards = Vec::with_capacity(handles.len());
        for handle in &handles {
            guards.push(handle.write().await);
        }
        let characters: Vec<Character> = guards.iter().map(|c| (**c).clone()).collect();

        let mut exec = self.executor().await?;
        if self.account_names.contains_key(account.username())
            || row_exists(
                &mut **exec,
                "SELECT 1 FROM accounts WHERE username = ? LIMIT 1",
                params![account.username()],
            )
            .await?
        {
            return Err(StorageError::UsernameTaken(account.username().to_string()));
        }
        if email_exists(&mut **exec, account.email()).await? {
            return Err(StorageError::EmailTaken(account.email().to_string()));
        }
        let mut seen = HashSet::with_capacity(characters.len());
        for character in &characters {
            if !seen.insert(character.name())
                || self.character_names.contains_key(character.name())
                || character_name_exists(&mut **exec, character.name()).await?
            {
                return Err(StorageError::CharacterNameTaken(
                    character.name().to_string(),
                ));
            }
        }

        exec.begin().await?;
        let result = insert_account_rows(
            &mut **exec,
            &account,
            &characters,
            self.limits.max_inventory_slots,
        )
        .await;
        let (id, character_ids) = finish(&mut **exec, result).await?;

        // Cache before releasing the executor so a concurrent load finds
        // these instances instead of building its own.
        account.set_id(id);
        account.mark_flushed();
        for ((guard, handle), character_id) in guards.iter_mut().zip(&handles).zip(character_ids) {
            guard.bind(character_id, id);
            guard.set_sync_pending(false);
            self.register_character(character_id, guard.name().to_string(), handle.clone());
        }
        let username = account.username().to_string();
        let handle = Arc::new(RwLock::new(account));
        self.register_account(id, username.clone(), handle.clone());
        drop(exec);
        drop(guards);

        info!(account_id = id, username = %username, "Account registered");
        Ok(handle)
    }

    /// Delete an account and everything it owns, then drop it from the cache.
    pub async fn del_account(&self, account: &AccountRef) -> Result<(), StorageError> {
        let (id, characters) = {
            let owner = account.read().await;
            let id = owner.id().ok_or(StorageError::NotPersisted("account"))?;
            (id, owner.characters().to_vec())
        };

        let mut exec = self.executor().await?;
        exec.begin().await?;
        let result = delete_account_rows(&mut **exec, id).await;
        finish(&mut **exec, result).await?;
        drop(exec);

        self.evict_account(id, &characters).await;
        info!(account_id = id, "Account deleted");
        Ok(())
    }

    /// Flush an account, then drop it and its characters from the cache.
    ///
    /// Handles held elsewhere keep working, but the next lookup loads a
    /// fresh instance.
    pub async fn unload_account(&self, account: &AccountRef) -> Result<(), StorageError> {
        self.flush(account).await?;
        let (id, characters) = {
            let owner = account.read().await;
            let id = owner.id().ok_or(StorageError::NotPersisted("account"))?;
            (id, owner.characters().to_vec())
        };
        self.evict_account(id, &characters).await;
        debug!(account_id = id, "Account unloaded");
        Ok(())
    }

    /// Write an account and its character list to the store in one
    /// transaction.
    ///
    /// Characters removed from the list are deleted, new ones inserted and
    /// assigned IDs, existing ones updated along with their slot. The account
    /// and its characters stay locked until the write lands, so nothing
    /// changed in the meantime is marked clean without being stored.
    pub async fn flush(&self, account: &AccountRef) -> Result<(), StorageError> {
        let mut owner = account.write().await;
        let id = owner.id().ok_or(StorageError::NotPersisted("account"))?;
        let row = AccountRow {
            password_hash: owner.password_hash().to_string(),
            email: owner.email().to_string(),
            level: owner.level(),
            last_login: owner.last_login(),
        };
        let handles = owner.characters().to_vec();

        let mut guards = Vec::with_capacity(handles.len());
        for handle in &handles {
            guards.push(handle.write().await);
        }
        let snapshots: Vec<Character> = guards.iter().map(|c| (**c).clone()).collect();

        let mut exec = self.executor().await?;
        exec.begin().await?;
        let result = flush_account_rows(
            &mut **exec,
            id,
            &row,
            &snapshots,
            self.limits.max_inventory_slots,
        )
        .await;
        let (inserted, deleted) = finish(&mut **exec, result).await?;

        for character_id in deleted {
            self.evict_character(character_id);
        }
        for (slot, character_id) in inserted {
            guards[slot].bind(character_id, id);
            self.register_character(
                character_id,
                guards[slot].name().to_string(),
                handles[slot].clone(),
            );
        }
        drop(exec);

        for guard in &mut guards {
            guard.set_sync_pending(false);
        }
        owner.mark_flushed();

        debug!(account_id = id, characters = handles.len(), "Account flushed");
        Ok(())
    }

    /// Flush every cached account that has unsaved changes, and retry
    /// character updates that failed earlier.
    ///
    /// Keeps going past failures; returns how many entities were written,
    /// or the first error encountered.
    pub async fn flush_all(&self) -> Result<usize, StorageError> {
        let mut flushed = 0;
        let mut first_error = None;

        for id in self.accounts.keys_cloned() {
            // evicted since the snapshot
            let Some(handle) = self.accounts.get_cloned(&id) else {
                continue;
            };
            if !needs_flush(&handle).await {
                continue;
            }
            match self.flush(&handle).await {
                Ok(()) => flushed += 1,
                Err(e) => {
                    warn!(account_id = id, error = %e, "Account flush failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        // Characters whose account is not cached only get written here.
        for handle in self.characters.values_cloned() {
            let (pending, account_id) = {
                let character = handle.read().await;
                (character.is_sync_pending(), character.account_id())
            };
            let orphaned = account_id.is_none_or(|id| !self.accounts.contains_key(&id));
            if pending && orphaned && self.update_character(&handle).await {
                flushed += 1;
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                if flushed > 0 {
                    info!(flushed, "Flushed cached entities");
                }
                Ok(flushed)
            }
        }
    }

    /// Every stored email address.
    pub async fn get_email_list(&self) -> Result<Vec<String>, StorageError> {
        let mut exec = self.executor().await?;
        let rows = exec
            .fetch("SELECT email FROM accounts ORDER BY id", &[])
            .await?;
        Ok(rows
            .iter()
            .map(|row| row.text(0))
            .collect::<Result<_, _>>()?)
    }

    pub async fn does_email_address_exist(&self, email: &str) -> Result<bool, StorageError> {
        let mut exec = self.executor().await?;
        email_exists(&mut **exec, email).await
    }

    /// Change an account's email after checking no other account uses it.
    /// The new address is written immediately.
    pub async fn change_email(&self, account: &AccountRef, email: &str) -> Result<(), StorageError> {
        let mut owner = account.write().await;
        let id = owner.id().ok_or(StorageError::NotPersisted("account"))?;
        if owner.email() == email {
            return Ok(());
        }

        let mut exec = self.executor().await?;
        if email_exists(&mut **exec, email).await? {
            return Err(StorageError::EmailTaken(email.to_string()));
        }
        exec.execute(
            "UPDATE accounts SET email = ? WHERE id = ?",
            params![email, id],
        )
        .await?;
        drop(exec);

        owner.set_email(email);
        info!(account_id = id, "Account email changed");
        Ok(())
    }

    /// Resolve `username` and check `password` against it, recording the
    /// login on success. Unknown users and wrong passwords both yield `None`.
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<AccountRef>, StorageError> {
        let Some(account) = self.get_account(username).await? else {
            debug!(username = %username, "Login for unknown account");
            return Ok(None);
        };

        let mut owner = account.write().await;
        if !owner.verify_password(password) {
            warn!(username = %username, "Login with wrong password");
            return Ok(None);
        }
        owner.record_login();
        drop(owner);

        Ok(Some(account))
    }

    fn cached_account_by_name(&self, username: &str) -> Option<AccountRef> {
        let id = self.account_names.get_cloned(username)?;
        self.accounts.get_cloned(&id)
    }

    fn register_account(&self, id: i64, username: String, handle: AccountRef) {
        self.accounts.insert(id, handle);
        self.account_names.insert(username, id);
    }

    async fn evict_account(&self, id: i64, characters: &[CharacterRef]) {
        if self.accounts.remove(&id).is_some() {
            self.account_names.retain(|_, cached| *cached != id);
        }
        for handle in characters {
            if let Some(character_id) = handle.read().await.id() {
                self.evict_character(character_id);
            }
        }
    }

    /// Build and cache an account from its row, reusing cached characters.
    /// The caller holds the executor.
    async fn resolve_account(
        &self,
        exec: &mut DynExecutor,
        rows: Vec<Row>,
    ) -> Result<Option<AccountRef>, StorageError> {
        let Some(row) = rows.into_iter().next() else {
            return Ok(None);
        };
        let id: i64 = row.int(0)?;
        if let Some(cached) = self.accounts.get_cloned(&id) {
            return Ok(Some(cached));
        }

        let character_rows = exec
            .fetch(
                select_characters!("WHERE account_id = ? ORDER BY slot"),
                params![id],
            )
            .await?;
        let characters = self.resolve_characters(exec, character_rows).await?;

        let account = Account::restore(
            id,
            row.text(1)?,
            row.text(2)?,
            row.text(3)?,
            AccountLevel::from_bits(row.int(4)?),
            row.int(5)?,
            row.opt_int(6)?,
            characters,
        );
        let username = account.username().to_string();
        let handle = Arc::new(RwLock::new(account));
        self.register_account(id, username, handle.clone());
        debug!(account_id = id, "Account loaded");
        Ok(Some(handle))
    }
}

async fn needs_flush(account: &AccountRef) -> bool {
    let owner = account.read().await;
    if owner.is_modified() {
        return true;
    }
    for character in owner.characters() {
        if character.read().await.is_sync_pending() {
            return true;
        }
    }
    false
}

async fn row_exists(
    exec: &mut DynExecutor,
    sql: &str,
    params: &[SqlValue],
) -> Result<bool, StorageError> {
    Ok(!exec.fetch(sql, params).await?.is_empty())
}

async fn email_exists(exec: &mut DynExecutor, email: &str) -> Result<bool, StorageError> {
    row_exists(
        exec,
        "SELECT 1 FROM accounts WHERE email = ? LIMIT 1",
        params![email],
    )
    .await
}

async fn insert_account_rows(
    exec: &mut DynExecutor,
    account: &Account,
    characters: &[Character],
    max_inventory_slots: u8,
) -> Result<(i64, Vec<i64>), StorageError> {
    let id = exec
        .execute_insert(
            r#"
            INSERT INTO accounts (username, password, email, level, registered_at, last_login)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
            params![
                account.username(),
                account.password_hash(),
                account.email(),
                account.level().bits(),
                account.registered_at(),
                account.last_login(),
            ],
        )
        .await?;

    let mut character_ids = Vec::with_capacity(characters.len());
    for (slot, character) in characters.iter().enumerate() {
        character_ids
            .push(insert_character_rows(exec, id, slot, character, max_inventory_slots).await?);
    }
    Ok((id, character_ids))
}

/// Returns the `(slot, id)` of inserted characters and the IDs of deleted ones.
async fn flush_account_rows(
    exec: &mut DynExecutor,
    id: i64,
    row: &AccountRow,
    characters: &[Character],
    max_inventory_slots: u8,
) -> Result<(Vec<(usize, i64)>, Vec<i64>), StorageError> {
    exec.execute(
        "UPDATE accounts SET password = ?, email = ?, level = ?, last_login = ? WHERE id = ?",
        params![
            &row.password_hash,
            &row.email,
            row.level.bits(),
            row.last_login,
            id,
        ],
    )
    .await?;

    let stored: BTreeMap<i64, ()> = exec
        .fetch("SELECT id FROM characters WHERE account_id = ?", params![id])
        .await?
        .iter()
        .map(|r| r.int(0).map(|character_id| (character_id, ())))
        .collect::<Result<_, _>>()?;
    let current: BTreeMap<i64, ()> = characters
        .iter()
        .filter_map(|c| c.id().map(|character_id| (character_id, ())))
        .collect();

    let diff = reconcile(&stored, &current);
    for character_id in &diff.delete {
        delete_character_rows(exec, *character_id).await?;
    }

    let mut inserted = Vec::new();
    for (slot, character) in characters.iter().enumerate() {
        match character.id() {
            Some(character_id) => {
                exec.execute(
                    "UPDATE characters SET slot = ? WHERE id = ?",
                    params![slot as i64, character_id],
                )
                .await?;
                update_character_rows(exec, character_id, character, max_inventory_slots).await?;
            }
            None => {
                let character_id =
                    insert_character_rows(exec, id, slot, character, max_inventory_slots).await?;
                inserted.push((slot, character_id));
            }
        }
    }
    Ok((inserted, diff.delete))
}

async fn delete_account_rows(exec: &mut DynExecutor, id: i64) -> Result<(), StorageError> {
    let characters = exec
        .fetch("SELECT id FROM characters WHERE account_id = ?", params![id])
        .await?;
    for row in &characters {
        delete_character_rows(exec, row.int(0)?).await?;
    }
    exec.execute("DELETE FROM accounts WHERE id = ?", params![id])
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::config::StorageLimits;
    use crate::db::Storage;
    use crate::db::executor::params;
    use crate::error::{ErrorKind, StorageError};
    use crate::state::{Account, AccountLevel, Character, Gender};
    use std::sync::Arc;

    async fn storage() -> Storage {
        Storage::open_sqlite(":memory:", StorageLimits::default())
            .await
            .unwrap()
    }

    fn account(name: &str) -> Account {
        Account::new(name, "secret", format!("{name}@example.com")).unwrap()
    }

    #[tokio::test]
    async fn repeated_lookups_share_one_instance() {
        let storage = storage().await;
        let registered = storage.add_account(account("alice")).await.unwrap();
        let id = registered.read().await.id().unwrap();

        let a = storage.get_account("alice").await.unwrap().unwrap();
        let b = storage.get_account_by_id(id).await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&registered, &a));
        assert!(Arc::ptr_eq(&a, &b));
        assert!(storage.get_account("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_loads_resolve_to_the_same_instance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        let path = path.to_str().unwrap();

        let storage = Storage::open_sqlite(path, StorageLimits::default())
            .await
            .unwrap();
        storage.add_account(account("alice")).await.unwrap();
        storage.close().await.unwrap();

        let storage = Arc::new(
            Storage::open_sqlite(path, StorageLimits::default())
                .await
                .unwrap(),
        );
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let storage = storage.clone();
                tokio::spawn(async move { storage.get_account("alice").await.unwrap().unwrap() })
            })
            .collect();

        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap());
        }
        assert!(handles.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(storage.cached_accounts(), 1);
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected_without_consuming_an_id() {
        let storage = storage().await;
        storage
            .add_account(Account::new("alice", "pw", "a@example.com").unwrap())
            .await
            .unwrap();

        let err = storage
            .add_account(Account::new("bob", "pw", "a@example.com").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::EmailTaken(_)));
        assert!(storage.get_account("bob").await.unwrap().is_none());

        let carol = storage
            .add_account(Account::new("carol", "pw", "c@example.com").unwrap())
            .await
            .unwrap();
        assert_eq!(carol.read().await.id(), Some(2));
    }

    #[tokio::test]
    async fn lookups_queued_behind_registration_get_the_registered_instance() {
        let storage = Arc::new(storage().await);
        let held = storage.executor.lock().await;

        let alice = account("alice").with_character(Character::new("Alicia", Gender::Female, 0, 0));
        let add = tokio::spawn({
            let storage = storage.clone();
            async move { storage.add_account(alice).await.unwrap() }
        });
        tokio::task::yield_now().await;

        let by_name = tokio::spawn({
            let storage = storage.clone();
            async move { storage.get_account("alice").await.unwrap() }
        });
        let by_character = tokio::spawn({
            let storage = storage.clone();
            async move { storage.get_character_by_name("Alicia").await.unwrap() }
        });
        tokio::task::yield_now().await;
        drop(held);

        let registered = add.await.unwrap();
        let found = by_name.await.unwrap().unwrap();
        let character = by_character.await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&registered, &found));
        assert!(Arc::ptr_eq(
            registered.read().await.character(0).unwrap(),
            &character
        ));
        assert_eq!(storage.cached_accounts(), 1);
        assert_eq!(storage.cached_characters(), 1);
    }

    #[tokio::test]
    async fn duplicate_names_within_one_account_are_a_conflict() {
        let storage = storage().await;
        let twins = account("alice")
            .with_character(Character::new("Twin", Gender::Female, 0, 0))
            .with_character(Character::new("Twin", Gender::Male, 0, 0));

        let err = storage.add_account(twins).await.unwrap_err();
        assert!(matches!(err, StorageError::CharacterNameTaken(ref n) if n == "Twin"));
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(storage.get_account("alice").await.unwrap().is_none());
        assert!(!storage.does_character_name_exist("Twin").await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_username_is_rejected() {
        let storage = storage().await;
        storage.add_account(account("alice")).await.unwrap();
        let err = storage
            .add_account(Account::new("alice", "pw", "other@example.com").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::UsernameTaken(ref n) if n == "alice"));
    }

    #[tokio::test]
    async fn account_registered_with_characters() {
        let storage = storage().await;
        let alice = account("alice").with_character(Character::new("Alicia", Gender::Female, 2, 3));
        let alice = storage.add_account(alice).await.unwrap();

        let bob = account("bob").with_character(Character::new("Alicia", Gender::Male, 0, 0));
        let err = storage.add_account(bob).await.unwrap_err();
        assert!(matches!(err, StorageError::CharacterNameTaken(ref n) if n == "Alicia"));
        assert!(storage.get_account("bob").await.unwrap().is_none());

        let owner = alice.read().await;
        let character = owner.character(0).unwrap().read().await;
        assert!(character.id().is_some());
        assert_eq!(character.account_id(), owner.id());
        assert_eq!(character.hair_color, 3);
        assert!(Arc::ptr_eq(
            owner.character(0).unwrap(),
            &storage.get_character_by_name("Alicia").await.unwrap().unwrap()
        ));
    }

    #[tokio::test]
    async fn email_list_and_lookup() {
        let storage = storage().await;
        storage.add_account(account("alice")).await.unwrap();
        storage.add_account(account("bob")).await.unwrap();

        assert_eq!(
            storage.get_email_list().await.unwrap(),
            vec!["alice@example.com", "bob@example.com"]
        );
        assert!(storage.does_email_address_exist("bob@example.com").await.unwrap());
        assert!(!storage.does_email_address_exist("carol@example.com").await.unwrap());
    }

    #[tokio::test]
    async fn change_email_checks_uniqueness() {
        let storage = storage().await;
        let alice = storage.add_account(account("alice")).await.unwrap();
        storage.add_account(account("bob")).await.unwrap();

        let err = storage
            .change_email(&alice, "bob@example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::EmailTaken(_)));

        storage.change_email(&alice, "alice@example.org").await.unwrap();
        assert!(storage.does_email_address_exist("alice@example.org").await.unwrap());
        assert!(!storage.does_email_address_exist("alice@example.com").await.unwrap());
        assert_eq!(alice.read().await.email(), "alice@example.org");
    }

    #[tokio::test]
    async fn authenticate_checks_the_password() {
        let storage = storage().await;
        storage.add_account(account("alice")).await.unwrap();

        assert!(storage.authenticate("alice", "wrong").await.unwrap().is_none());
        assert!(storage.authenticate("nobody", "secret").await.unwrap().is_none());

        let alice = storage.authenticate("alice", "secret").await.unwrap().unwrap();
        let owner = alice.read().await;
        assert!(owner.last_login().is_some());
        assert!(owner.is_modified());
    }

    #[tokio::test]
    async fn flush_all_writes_modified_accounts() {
        let storage = storage().await;
        let alice = storage.add_account(account("alice")).await.unwrap();
        storage.add_account(account("bob")).await.unwrap();

        assert_eq!(storage.flush_all().await.unwrap(), 0);

        alice.write().await.set_level(AccountLevel::PLAYER | AccountLevel::GM);
        assert_eq!(storage.flush_all().await.unwrap(), 1);
        assert!(!alice.read().await.is_modified());

        storage.unload_account(&alice).await.unwrap();
        let reloaded = storage.get_account("alice").await.unwrap().unwrap();
        assert!(!Arc::ptr_eq(&alice, &reloaded));
        assert!(reloaded.read().await.level().contains(AccountLevel::GM));
    }

    #[tokio::test]
    async fn changes_made_during_a_flush_stay_pending() {
        let storage = Arc::new(storage().await);
        let alice = storage
            .add_account(account("alice").with_character(Character::new("Alicia", Gender::Female, 0, 0)))
            .await
            .unwrap();
        let id = alice.read().await.id().unwrap();

        // flush stalls on the character after taking the account
        let character = alice.read().await.character(0).unwrap().clone();
        let held = character.write().await;
        let flush = tokio::spawn({
            let storage = storage.clone();
            let alice = alice.clone();
            async move { storage.flush(&alice).await }
        });
        tokio::task::yield_now().await;
        assert!(alice.try_read().is_err());

        let promote = tokio::spawn({
            let alice = alice.clone();
            async move {
                alice
                    .write()
                    .await
                    .set_level(AccountLevel::PLAYER | AccountLevel::GM)
            }
        });
        tokio::task::yield_now().await;
        drop(held);
        flush.await.unwrap().unwrap();
        promote.await.unwrap();

        assert!(alice.read().await.is_modified());
        assert_eq!(storage.flush_all().await.unwrap(), 1);
        assert!(!alice.read().await.is_modified());

        let mut exec = storage.executor().await.unwrap();
        let rows = exec
            .fetch("SELECT level FROM accounts WHERE id = ?", params![id])
            .await
            .unwrap();
        let level = AccountLevel::from_bits(rows[0].int(0).unwrap());
        assert!(level.contains(AccountLevel::GM));
    }

    #[tokio::test]
    async fn flush_persists_slot_changes() {
        let storage = storage().await;
        let alice = storage.add_account(account("alice")).await.unwrap();
        for name in ["First", "Second", "Third"] {
            storage
                .add_character(&alice, Character::new(name, Gender::Male, 0, 0))
                .await
                .unwrap();
        }
        storage.delete_character(&alice, 0).await.unwrap();
        storage.unload_account(&alice).await.unwrap();

        let reloaded = storage.get_account("alice").await.unwrap().unwrap();
        let owner = reloaded.read().await;
        let mut names = Vec::new();
        for character in owner.characters() {
            names.push(character.read().await.name().to_string());
        }
        assert_eq!(names, vec!["Second", "Third"]);
    }

    #[tokio::test]
    async fn del_account_removes_everything() {
        let storage = storage().await;
        let alice = storage.add_account(account("alice")).await.unwrap();
        storage
            .add_character(&alice, Character::new("Alicia", Gender::Female, 0, 0))
            .await
            .unwrap();

        storage.del_account(&alice).await.unwrap();
        assert!(storage.get_account("alice").await.unwrap().is_none());
        assert!(!storage.does_character_name_exist("Alicia").await.unwrap());
        assert!(!storage.does_email_address_exist("alice@example.com").await.unwrap());
        assert_eq!(storage.cached_accounts(), 0);
        assert_eq!(storage.cached_characters(), 0);
    }

    #[tokio::test]
    async fn unpersisted_account_cannot_be_flushed() {
        let storage = storage().await;
        let transient = Arc::new(tokio::sync::RwLock::new(account("ghost")));
        assert!(matches!(
            storage.flush(&transient).await,
            Err(StorageError::NotPersisted("account"))
        ));
    }
}
