//! Character records.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared handle to the canonical in-memory character.
pub type CharacterRef = Arc<RwLock<Character>>;

/// Number of entries in a character's attribute vector.
pub const NB_ATTRIBUTES: usize = 22;

/// Attribute vector layout: combat attributes, elemental resistances, then
/// the character stats the combat attributes are derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Attribute {
    PhysicalAttackMin = 0,
    PhysicalAttackDelta,
    MagicalAttack,
    PhysicalResistance,
    MagicalResistance,
    Evade,
    Hit,
    Hp,
    HpRegen,
    ElementNeutral,
    ElementFire,
    ElementWater,
    ElementEarth,
    ElementAir,
    ElementSacred,
    ElementDeath,
    Strength,
    Agility,
    Dexterity,
    Vitality,
    Intelligence,
    Willpower,
}

impl Attribute {
    pub const ALL: [Attribute; NB_ATTRIBUTES] = [
        Attribute::PhysicalAttackMin,
        Attribute::PhysicalAttackDelta,
        Attribute::MagicalAttack,
        Attribute::PhysicalResistance,
        Attribute::MagicalResistance,
        Attribute::Evade,
        Attribute::Hit,
        Attribute::Hp,
        Attribute::HpRegen,
        Attribute::ElementNeutral,
        Attribute::ElementFire,
        Attribute::ElementWater,
        Attribute::ElementEarth,
        Attribute::ElementAir,
        Attribute::ElementSacred,
        Attribute::ElementDeath,
        Attribute::Strength,
        Attribute::Agility,
        Attribute::Dexterity,
        Attribute::Vitality,
        Attribute::Intelligence,
        Attribute::Willpower,
    ];

    /// The six stats chosen at character creation.
    pub const STATS: [Attribute; 6] = [
        Attribute::Strength,
        Attribute::Agility,
        Attribute::Dexterity,
        Attribute::Vitality,
        Attribute::Intelligence,
        Attribute::Willpower,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Gender {
    #[default]
    Male = 0,
    Female = 1,
}

impl Gender {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Gender::Male),
            1 => Some(Gender::Female),
            _ => None,
        }
    }
}

/// Map and tile coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub map_id: u16,
    pub x: u16,
    pub y: u16,
}

/// Contents of one inventory slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InventoryItem {
    pub item_id: u16,
    pub amount: u8,
}

/// A playable character.
///
/// Name and owning account are fixed once the character is stored; the
/// gameplay fields are public because game servers overwrite them wholesale
/// on every sync.
#[derive(Debug, Clone)]
pub struct Character {
    id: Option<i64>,
    account_id: Option<i64>,
    name: String,
    pub gender: Gender,
    pub hair_style: u8,
    pub hair_color: u8,
    pub level: u16,
    pub character_points: u16,
    pub correction_points: u16,
    pub money: u32,
    pub position: Position,
    attributes: [i32; NB_ATTRIBUTES],
    inventory: BTreeMap<u8, InventoryItem>,
    /// Set when a best-effort sync failed; cleared by the next successful write.
    sync_pending: bool,
}

impl Character {
    /// Create a level-1 character that has not been stored yet.
    pub fn new(name: impl Into<String>, gender: Gender, hair_style: u8, hair_color: u8) -> Self {
        Self {
            id: None,
            account_id: None,
            name: name.into(),
            gender,
            hair_style,
            hair_color,
            level: 1,
            character_points: 0,
            correction_points: 0,
            money: 0,
            position: Position::default(),
            attributes: [0; NB_ATTRIBUTES],
            inventory: BTreeMap::new(),
            sync_pending: false,
        }
    }

    pub(crate) fn restore(id: i64, account_id: i64, name: String) -> Self {
        let mut character = Self::new(name, Gender::default(), 0, 0);
        character.id = Some(id);
        character.account_id = Some(account_id);
        character
    }

    /// Store-assigned ID, `None` until the character is inserted.
    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn account_id(&self) -> Option<i64> {
        self.account_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attribute(&self, attribute: Attribute) -> i32 {
        self.attributes[attribute.index()]
    }

    pub fn set_attribute(&mut self, attribute: Attribute, value: i32) {
        self.attributes[attribute.index()] = value;
    }

    pub fn attributes(&self) -> &[i32; NB_ATTRIBUTES] {
        &self.attributes
    }

    pub fn inventory(&self) -> &BTreeMap<u8, InventoryItem> {
        &self.inventory
    }

    pub fn set_item(&mut self, slot: u8, item: InventoryItem) {
        self.inventory.insert(slot, item);
    }

    pub fn clear_slot(&mut self, slot: u8) -> Option<InventoryItem> {
        self.inventory.remove(&slot)
    }

    pub fn is_sync_pending(&self) -> bool {
        self.sync_pending
    }

    pub(crate) fn set_sync_pending(&mut self, pending: bool) {
        self.sync_pending = pending;
    }

    pub(crate) fn bind(&mut self, id: i64, account_id: i64) {
        self.id = Some(id);
        self.account_id = Some(account_id);
    }

    pub(crate) fn set_inventory(&mut self, inventory: BTreeMap<u8, InventoryItem>) {
        self.inventory = inventory;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_indices_are_dense() {
        for (i, attribute) in Attribute::ALL.iter().enumerate() {
            assert_eq!(attribute.index(), i);
            assert_eq!(Attribute::from_index(i), Some(*attribute));
        }
        assert_eq!(Attribute::from_index(NB_ATTRIBUTES), None);
        assert_eq!(Attribute::Strength.index(), 16);
    }

    #[test]
    fn new_character_is_transient() {
        let mut c = Character::new("Aliceling", Gender::Female, 2, 3);
        assert_eq!(c.id(), None);
        assert_eq!(c.account_id(), None);
        assert_eq!(c.level, 1);

        c.set_attribute(Attribute::Vitality, 12);
        c.set_item(4, InventoryItem { item_id: 501, amount: 3 });
        assert_eq!(c.attribute(Attribute::Vitality), 12);
        assert_eq!(c.clear_slot(4).map(|i| i.item_id), Some(501));
        assert!(c.inventory().is_empty());
    }
}
