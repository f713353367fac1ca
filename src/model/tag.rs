use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::note::NoteId;

/// Separator between levels of a tag's external name
pub const HIERARCHY_SEPARATOR: char = '~';

/// Opaque tag identifier, generated once and preserved across renames and moves
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagId(pub uuid::Uuid);

impl TagId {
    pub fn generate() -> Self {
        TagId(uuid::Uuid::new_v4())
    }
}

impl fmt::Display for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// The four fixed nodes every tag graph contains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservedTag {
    /// Root of all groups
    Groups,
    /// Pseudo-group meaning "no filter"
    All,
    /// Pseudo-group holding ungrouped notes
    NotGrouped,
    /// Root of archived group mirrors
    Archive,
}

impl ReservedTag {
    pub const ALL: [ReservedTag; 4] = [
        ReservedTag::Groups,
        ReservedTag::All,
        ReservedTag::NotGrouped,
        ReservedTag::Archive,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ReservedTag::Groups => "Groups",
            ReservedTag::All => "All",
            ReservedTag::NotGrouped => "NotGrouped",
            ReservedTag::Archive => "Archive",
        }
    }

    pub fn from_name(name: &str) -> Option<ReservedTag> {
        ReservedTag::ALL.into_iter().find(|r| r.name() == name)
    }

    pub(crate) fn index(self) -> usize {
        match self {
            ReservedTag::Groups => 0,
            ReservedTag::All => 1,
            ReservedTag::NotGrouped => 2,
            ReservedTag::Archive => 3,
        }
    }

    /// Fixed flags: (is_group, is_archived, level)
    pub fn fixed_flags(self) -> (bool, bool, usize) {
        match self {
            ReservedTag::Groups => (true, false, 0),
            ReservedTag::All | ReservedTag::NotGrouped => (true, false, 1),
            ReservedTag::Archive => (true, true, 1),
        }
    }

    /// Pseudo-groups never hold child tags
    pub fn accepts_children(self) -> bool {
        matches!(self, ReservedTag::Groups | ReservedTag::Archive)
    }
}

impl fmt::Display for ReservedTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A node of the tag/group tree. Owned by the `TagGraph` arena; `parent`,
/// `level`, `is_group` and `is_archived` are derived and recomputed after
/// every structural change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagNode {
    pub id: TagId,
    pub name: String,
    pub is_group: bool,
    pub is_archived: bool,
    pub level: usize,
    pub parent: Option<TagId>,
    pub children: Vec<TagId>,
    pub linked_notes: BTreeSet<NoteId>,
    pub reserved: Option<ReservedTag>,
}

impl TagNode {
    pub(crate) fn new(name: &str, reserved: Option<ReservedTag>) -> Self {
        let (is_group, is_archived, level) = reserved
            .map(ReservedTag::fixed_flags)
            .unwrap_or((false, false, 0));
        TagNode {
            id: TagId::generate(),
            name: name.to_string(),
            is_group,
            is_archived,
            level,
            parent: None,
            children: Vec::new(),
            linked_notes: BTreeSet::new(),
            reserved,
        }
    }

    pub fn is_reserved(&self) -> bool {
        self.reserved.is_some()
    }
}

/// Why a tag name is unusable in a given context
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TagError {
    #[error("tag name is empty")]
    EmptyName,
    #[error("tag name {0:?} contains a reserved character")]
    InvalidCharacter(String),
    #[error("tag name {0:?} is reserved")]
    ReservedName(String),
    #[error("a sibling group named {0:?} already exists")]
    DuplicateSibling(String),
    #[error("a tag named {0:?} already exists")]
    DuplicateTag(String),
    #[error("tag not found: {0}")]
    NotFound(TagId),
    #[error("reserved tag {0} cannot be changed")]
    Reserved(ReservedTag),
    #[error("{0} does not accept child tags")]
    NoChildren(String),
    #[error("cannot move a tag below itself")]
    Cycle,
    #[error("cannot mix groups and free tags: {0}")]
    KindMismatch(String),
}

/// Check a name for characters and values that can never be a tag name
pub fn validate_tag_name(name: &str) -> Result<&str, TagError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(TagError::EmptyName);
    }
    if name.contains([HIERARCHY_SEPARATOR, '[', ']', '/', '\\']) {
        return Err(TagError::InvalidCharacter(name.to_string()));
    }
    if ReservedTag::from_name(name).is_some() {
        return Err(TagError::ReservedName(name.to_string()));
    }
    Ok(name)
}
