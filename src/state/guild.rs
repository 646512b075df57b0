//! Guild records and member rights.

use crate::state::channel::ChannelId;

/// Guild member rights bitmask.
///
/// `OWNER` has every bit set, so it implies all other rights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GuildRights(u8);

impl GuildRights {
    pub const NONE: Self = Self(0);
    pub const TOPIC_CHANGE: Self = Self(1);
    pub const INVITE: Self = Self(2);
    pub const KICK: Self = Self(4);
    pub const OWNER: Self = Self(255);

    const GRANTABLE: u8 = 1 | 2 | 4;

    /// Accepts any combination of topic-change, invite and kick, or owner.
    pub fn from_bits(bits: u8) -> Option<Self> {
        (bits == Self::OWNER.0 || bits & !Self::GRANTABLE == 0).then_some(Self(bits))
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub fn allows(self, right: Self) -> bool {
        self.0 & right.0 == right.0
    }

    pub fn is_owner(self) -> bool {
        self == Self::OWNER
    }
}

impl std::ops::BitOr for GuildRights {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuildMember {
    pub name: String,
    pub rights: GuildRights,
}

/// A guild and its members, in join order.
///
/// The ID is `None` between construction and insertion; code that refers to
/// guilds by ID must handle that state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guild {
    id: Option<i64>,
    name: String,
    channel_id: Option<ChannelId>,
    members: Vec<GuildMember>,
}

impl Guild {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            channel_id: None,
            members: Vec::new(),
        }
    }

    pub(crate) fn restore(id: i64, name: String, members: Vec<GuildMember>) -> Self {
        Self {
            id: Some(id),
            name,
            channel_id: None,
            members,
        }
    }

    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The guild's dedicated chat channel, once registered.
    pub fn channel_id(&self) -> Option<ChannelId> {
        self.channel_id
    }

    pub fn members(&self) -> &[GuildMember] {
        &self.members
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn has_member(&self, name: &str) -> bool {
        self.rights_of(name).is_some()
    }

    pub fn rights_of(&self, name: &str) -> Option<GuildRights> {
        self.members.iter().find(|m| m.name == name).map(|m| m.rights)
    }

    /// Returns false if `name` is already a member.
    pub fn add_member(&mut self, name: impl Into<String>, rights: GuildRights) -> bool {
        let name = name.into();
        if self.has_member(&name) {
            return false;
        }
        self.members.push(GuildMember { name, rights });
        true
    }

    pub fn remove_member(&mut self, name: &str) -> bool {
        let before = self.members.len();
        self.members.retain(|m| m.name != name);
        self.members.len() != before
    }

    pub fn set_rights(&mut self, name: &str, rights: GuildRights) -> bool {
        match self.members.iter_mut().find(|m| m.name == name) {
            Some(member) => {
                member.rights = rights;
                true
            }
            None => false,
        }
    }

    pub(crate) fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    pub(crate) fn set_channel_id(&mut self, channel_id: ChannelId) {
        self.channel_id = Some(channel_id);
    }
}
