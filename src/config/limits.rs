//! Storage capacity limits.

use serde::Deserialize;

/// Capacity limits enforced by the storage engine.
///
/// Character slots are indexed from zero, so an account holds at most
/// `max_characters_per_account` characters in slots `0..max`.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageLimits {
    /// Maximum characters per account (default: 3).
    #[serde(default = "default_max_characters_per_account")]
    pub max_characters_per_account: usize,
    /// Maximum inventory slots per character (default: 50).
    /// Items in slots at or beyond this index are not persisted.
    #[serde(default = "default_max_inventory_slots")]
    pub max_inventory_slots: u8,
}

impl Default for StorageLimits {
    fn default() -> Self {
        Self {
            max_characters_per_account: default_max_characters_per_account(),
            max_inventory_slots: default_max_inventory_slots(),
        }
    }
}

fn default_max_characters_per_account() -> usize {
    3
}

fn default_max_inventory_slots() -> u8 {
    50
}
