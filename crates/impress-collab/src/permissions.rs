//! Role-based access control for session participants.
//!
//! Each participant carries a [`Role`]; roles map onto bitflag
//! [`Permissions`] that the relay consults before accepting mutations.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Bitflag-based permissions for session actions.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Permissions: u32 {
        /// Receive session events and snapshots
        const VIEW = 0b00000001;
        /// Comment on session content
        const COMMENT = 0b00000010;
        /// Mutate the whiteboard and shared documents
        const EDIT = 0b00000100;
        /// Invite other participants
        const SHARE = 0b00001000;
        /// Moderate the session
        const ADMIN = 0b00010000;
    }
}

impl Serialize for Permissions {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.bits().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Permissions {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bits = u32::deserialize(deserializer)?;
        Permissions::from_bits(bits).ok_or_else(|| {
            serde::de::Error::custom(format!("invalid permission bits: {}", bits))
        })
    }
}

impl Permissions {
    pub const VIEWER: Permissions = Permissions::VIEW;
    pub const REVIEWER: Permissions = Permissions::VIEW.union(Permissions::COMMENT);
    pub const EDITOR: Permissions = Permissions::REVIEWER.union(Permissions::EDIT);
    pub const OWNER: Permissions = Permissions::EDITOR
        .union(Permissions::SHARE)
        .union(Permissions::ADMIN);

    #[inline]
    pub fn can_view(&self) -> bool {
        self.contains(Permissions::VIEW)
    }

    #[inline]
    pub fn can_edit(&self) -> bool {
        self.contains(Permissions::EDIT)
    }

    #[inline]
    pub fn is_admin(&self) -> bool {
        self.contains(Permissions::ADMIN)
    }
}

impl Default for Permissions {
    fn default() -> Self {
        Permissions::VIEWER
    }
}

/// Role a participant plays in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    #[default]
    Editor,
    Reviewer,
    Viewer,
}

impl Role {
    /// Permission set granted to this role
    pub fn permissions(&self) -> Permissions {
        match self {
            Role::Owner => Permissions::OWNER,
            Role::Editor => Permissions::EDITOR,
            Role::Reviewer => Permissions::REVIEWER,
            Role::Viewer => Permissions::VIEWER,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Owner => write!(f, "owner"),
            Role::Editor => write!(f, "editor"),
            Role::Reviewer => write!(f, "reviewer"),
            Role::Viewer => write!(f, "viewer"),
        }
    }
}
