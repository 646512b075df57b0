//! Account records.

use crate::error::StorageError;
use crate::security::password::{hash_password, verify_password};
use crate::state::character::{Character, CharacterRef};
use std::ops::BitOr;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared handle to the canonical in-memory account.
pub type AccountRef = Arc<RwLock<Account>>;

/// Account permission bitmask.
///
/// A tester is `PLAYER | TESTER`, a developer `PLAYER | TESTER | DEV`,
/// a game master `PLAYER | TESTER | GM`. Zero means banned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountLevel(u8);

impl AccountLevel {
    pub const BANNED: Self = Self(0);
    pub const PLAYER: Self = Self(1);
    pub const TESTER: Self = Self(2);
    pub const DEV: Self = Self(4);
    pub const GM: Self = Self(8);
    pub const ADMIN: Self = Self(128);

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_banned(self) -> bool {
        self.0 == 0
    }
}

impl Default for AccountLevel {
    fn default() -> Self {
        Self::PLAYER
    }
}

impl BitOr for AccountLevel {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// A registered account and its characters.
///
/// Identity fields are read-only; the mutators mark the record modified so
/// `Storage::flush_all` knows to write it.
#[derive(Debug)]
pub struct Account {
    id: Option<i64>,
    username: String,
    password_hash: String,
    email: String,
    level: AccountLevel,
    registered_at: i64,
    last_login: Option<i64>,
    characters: Vec<CharacterRef>,
    modified: bool,
}

impl Account {
    /// Create an account for registration, hashing `password`.
    pub fn new(
        username: impl Into<String>,
        password: &str,
        email: impl Into<String>,
    ) -> Result<Self, StorageError> {
        Ok(Self {
            id: None,
            username: username.into(),
            password_hash: hash_password(password)?,
            email: email.into(),
            level: AccountLevel::default(),
            registered_at: chrono::Utc::now().timestamp(),
            last_login: None,
            characters: Vec::new(),
            modified: false,
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn restore(
        id: i64,
        username: String,
        password_hash: String,
        email: String,
        level: AccountLevel,
        registered_at: i64,
        last_login: Option<i64>,
        characters: Vec<CharacterRef>,
    ) -> Self {
        Self {
            id: Some(id),
            username,
            password_hash,
            email,
            level,
            registered_at,
            last_login,
            characters,
            modified: false,
        }
    }

    /// Attach a new character before the account is registered; it is
    /// stored in the next slot by `Storage::add_account`.
    pub fn with_character(mut self, character: Character) -> Self {
        self.characters.push(Arc::new(RwLock::new(character)));
        self
    }

    /// Store-assigned ID, `None` until the account is added.
    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn level(&self) -> AccountLevel {
        self.level
    }

    pub fn registered_at(&self) -> i64 {
        self.registered_at
    }

    pub fn last_login(&self) -> Option<i64> {
        self.last_login
    }

    pub(crate) fn password_hash(&self) -> &str {
        &self.password_hash
    }

    pub fn verify_password(&self, password: &str) -> bool {
        verify_password(password, &self.password_hash)
    }

    /// Characters in slot order.
    pub fn characters(&self) -> &[CharacterRef] {
        &self.characters
    }

    pub fn character(&self, slot: usize) -> Option<&CharacterRef> {
        self.characters.get(slot)
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Emails are unique across accounts, so changes go through
    /// `Storage::change_email`, which checks and writes through.
    pub(crate) fn set_email(&mut self, email: impl Into<String>) {
        self.email = email.into();
        self.modified = true;
    }

    pub fn set_password(&mut self, password: &str) -> Result<(), StorageError> {
        self.password_hash = hash_password(password)?;
        self.modified = true;
        Ok(())
    }

    pub fn set_level(&mut self, level: AccountLevel) {
        self.level = level;
        self.modified = true;
    }

    pub fn record_login(&mut self) {
        self.last_login = Some(chrono::Utc::now().timestamp());
        self.modified = true;
    }

    pub(crate) fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    pub(crate) fn mark_flushed(&mut self) {
        self.modified = false;
    }

    pub(crate) fn push_character(&mut self, character: CharacterRef) {
        self.characters.push(character);
    }

    /// Remove the character in `slot`; later characters move down one slot.
    pub(crate) fn take_character(&mut self, slot: usize) -> Option<CharacterRef> {
        (slot < self.characters.len()).then(|| {
            self.modified = true;
            self.characters.remove(slot)
        })
    }
}
