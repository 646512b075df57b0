//! Chat channel types.

/// Channel identifier. Valid IDs are `1..=65535`; 0 is never assigned.
pub type ChannelId = u16;

/// How a channel is owned and whether it outlives its users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// Joinable, listed and persisted across restarts.
    Public,
    /// Ephemeral; destroyed when its last user leaves.
    Private,
    /// Ephemeral; lives exactly as long as its guild.
    Guild,
}

/// A live chat channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatChannel {
    id: ChannelId,
    name: String,
    pub announcement: String,
    pub password: Option<String>,
    pub joinable: bool,
    kind: ChannelKind,
    users: Vec<String>,
}

impl ChatChannel {
    pub(crate) fn new(
        id: ChannelId,
        name: impl Into<String>,
        announcement: impl Into<String>,
        password: Option<String>,
        joinable: bool,
        kind: ChannelKind,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            announcement: announcement.into(),
            password: password.filter(|p| !p.is_empty()),
            joinable,
            kind,
            users: Vec::new(),
        }
    }

    pub(crate) fn from_record(record: ChannelRecord) -> Self {
        Self::new(
            record.id,
            record.name,
            record.announcement,
            record.password,
            record.joinable,
            ChannelKind::Public,
        )
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn is_public(&self) -> bool {
        self.kind == ChannelKind::Public
    }

    pub fn users(&self) -> &[String] {
        &self.users
    }

    pub fn has_user(&self, user: &str) -> bool {
        self.users.iter().any(|u| u == user)
    }

    pub fn check_password(&self, password: &str) -> bool {
        self.password.as_deref().is_none_or(|p| p == password)
    }

    pub(crate) fn add_user(&mut self, user: &str) -> bool {
        if self.has_user(user) {
            return false;
        }
        self.users.push(user.to_string());
        true
    }

    pub(crate) fn remove_user(&mut self, user: &str) -> bool {
        let before = self.users.len();
        self.users.retain(|u| u != user);
        self.users.len() != before
    }

    /// Persisted form of this channel.
    pub fn record(&self) -> ChannelRecord {
        ChannelRecord {
            id: self.id,
            name: self.name.clone(),
            announcement: self.announcement.clone(),
            password: self.password.clone(),
            joinable: self.joinable,
        }
    }
}

/// A row of the persisted public channel table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRecord {
    pub id: ChannelId,
    pub name: String,
    pub announcement: String,
    pub password: Option<String>,
    pub joinable: bool,
}
