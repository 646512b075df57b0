//! In-memory entities and the managers that own them.
//!
//! Accounts and characters are cached by [`Storage`](crate::db::Storage);
//! chat channels and guilds are owned by the registries in [`managers`].

mod account;
mod channel;
mod channel_id;
mod character;
pub mod dashmap_ext;
mod guild;
pub mod managers;

pub use account::{Account, AccountLevel, AccountRef};
pub use channel::{ChannelId, ChannelKind, ChannelRecord, ChatChannel};
pub use channel_id::ChannelIdAllocator;
pub use character::{
    Attribute, Character, CharacterRef, Gender, InventoryItem, NB_ATTRIBUTES, Position,
};
pub use guild::{Guild, GuildMember, GuildRights};
pub use managers::channel::{ChannelRegistry, JoinOutcome};
pub use managers::guild::GuildDirectory;
