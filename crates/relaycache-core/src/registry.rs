//! Partition Registry
//!
//! Static table mapping every record category to exactly one partition, and
//! every partition back to exactly one category. A single partition carries
//! no category: it holds append-only rows for kinds the registry does not know.
//!
//! The table is built once on first access and never mutated.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt;

/// Name of the partition holding records of unregistered kinds.
pub const UNCATEGORIZED_PARTITION: &str = "misc_records";

/// Conflict semantics of a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Semantics {
    /// One live version per owner
    Replaceable,
    /// One live version per owner and discriminator
    Parameterized,
    /// Immutable rows addressed by record id, never replaced
    AppendOnly,
}

impl Semantics {
    /// Whether rows of this semantics are resolved by last-write-wins.
    pub fn is_versioned(self) -> bool {
        !matches!(self, Self::AppendOnly)
    }
}

/// Kind of domain entity a row represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordCategory {
    Profile,
    Note,
    Contacts,
    Reaction,
    MuteList,
    PinList,
    RelayList,
    BookmarkList,
    CommunityList,
    PublicChatList,
    BlockedRelayList,
    SearchRelayList,
    InterestList,
    EmojiList,
    DmRelayList,
    FollowSet,
    BookmarkSet,
    BadgeDefinition,
    LongFormArticle,
    LongFormDraft,
    AppData,
    CommunityDefinition,
}

impl RecordCategory {
    /// Every category, in registry order.
    pub const ALL: [RecordCategory; 22] = [
        Self::Profile,
        Self::Note,
        Self::Contacts,
        Self::Reaction,
        Self::MuteList,
        Self::PinList,
        Self::RelayList,
        Self::BookmarkList,
        Self::CommunityList,
        Self::PublicChatList,
        Self::BlockedRelayList,
        Self::SearchRelayList,
        Self::InterestList,
        Self::EmojiList,
        Self::DmRelayList,
        Self::FollowSet,
        Self::BookmarkSet,
        Self::BadgeDefinition,
        Self::LongFormArticle,
        Self::LongFormDraft,
        Self::AppData,
        Self::CommunityDefinition,
    ];

    /// Protocol kind number for this category.
    pub fn kind(self) -> u32 {
        match self {
            Self::Profile => 0,
            Self::Note => 1,
            Self::Contacts => 3,
            Self::Reaction => 7,
            Self::MuteList => 10000,
            Self::PinList => 10001,
            Self::RelayList => 10002,
            Self::BookmarkList => 10003,
            Self::CommunityList => 10004,
            Self::PublicChatList => 10005,
            Self::BlockedRelayList => 10006,
            Self::SearchRelayList => 10007,
            Self::InterestList => 10015,
            Self::EmojiList => 10030,
            Self::DmRelayList => 10050,
            Self::FollowSet => 30000,
            Self::BookmarkSet => 30003,
            Self::BadgeDefinition => 30009,
            Self::LongFormArticle => 30023,
            Self::LongFormDraft => 30024,
            Self::AppData => 30078,
            Self::CommunityDefinition => 34550,
        }
    }

    /// Conflict semantics, derived from the protocol's kind ranges.
    pub fn semantics(self) -> Semantics {
        match self.kind() {
            0 | 3 | 10000..=19999 => Semantics::Replaceable,
            30000..=39999 => Semantics::Parameterized,
            _ => Semantics::AppendOnly,
        }
    }

    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Profile => "profile",
            Self::Note => "note",
            Self::Contacts => "contacts",
            Self::Reaction => "reaction",
            Self::MuteList => "mute-list",
            Self::PinList => "pin-list",
            Self::RelayList => "relay-list",
            Self::BookmarkList => "bookmark-list",
            Self::CommunityList => "community-list",
            Self::PublicChatList => "public-chat-list",
            Self::BlockedRelayList => "blocked-relay-list",
            Self::SearchRelayList => "search-relay-list",
            Self::InterestList => "interest-list",
            Self::EmojiList => "emoji-list",
            Self::DmRelayList => "dm-relay-list",
            Self::FollowSet => "follow-set",
            Self::BookmarkSet => "bookmark-set",
            Self::BadgeDefinition => "badge-definition",
            Self::LongFormArticle => "long-form-article",
            Self::LongFormDraft => "long-form-draft",
            Self::AppData => "app-data",
            Self::CommunityDefinition => "community-definition",
        }
    }

    /// Look up the category registered for a protocol kind.
    pub fn from_kind(kind: u32) -> Option<Self> {
        REGISTRY.by_kind.get(&kind).copied()
    }

    /// The partition holding this category.
    pub fn partition(self) -> &'static PartitionSpec {
        let idx = REGISTRY.by_category[&self];
        &REGISTRY.partitions[idx]
    }
}

impl fmt::Display for RecordCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RecordCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_lowercase().replace('_', "-");
        if let Ok(kind) = needle.parse::<u32>() {
            return Self::from_kind(kind).ok_or_else(|| format!("no category for kind {}", kind));
        }
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == needle)
            .ok_or_else(|| format!("unknown record category: '{}'", s))
    }
}

/// Declaration of one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSpec {
    /// Table name on disk
    pub name: &'static str,
    /// Category stored here, `None` for the uncategorized append-only partition
    pub category: Option<RecordCategory>,
    /// Conflict semantics of rows in this partition
    pub semantics: Semantics,
    /// First schema version that declares this partition
    pub since_version: u32,
}

impl PartitionSpec {
    fn categorized(name: &'static str, category: RecordCategory, since_version: u32) -> Self {
        Self {
            name,
            category: Some(category),
            semantics: category.semantics(),
            since_version,
        }
    }
}

/// The built registry with its lookup indexes.
pub struct Registry {
    partitions: Vec<PartitionSpec>,
    by_name: HashMap<&'static str, usize>,
    by_category: HashMap<RecordCategory, usize>,
    by_kind: HashMap<u32, RecordCategory>,
}

static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    use RecordCategory::*;

    let partitions = vec![
        // v1: the original layout
        PartitionSpec::categorized("profiles", Profile, 1),
        PartitionSpec::categorized("notes", Note, 1),
        PartitionSpec::categorized("contact_lists", Contacts, 1),
        PartitionSpec::categorized("reactions", Reaction, 1),
        PartitionSpec::categorized("mute_lists", MuteList, 1),
        PartitionSpec::categorized("relay_lists", RelayList, 1),
        PartitionSpec::categorized("bookmark_lists", BookmarkList, 1),
        PartitionSpec::categorized("follow_sets", FollowSet, 1),
        PartitionSpec::categorized("long_form_articles", LongFormArticle, 1),
        PartitionSpec {
            name: UNCATEGORIZED_PARTITION,
            category: None,
            semantics: Semantics::AppendOnly,
            since_version: 1,
        },
        // v2: user lists
        PartitionSpec::categorized("pin_lists", PinList, 2),
        PartitionSpec::categorized("community_lists", CommunityList, 2),
        PartitionSpec::categorized("public_chat_lists", PublicChatList, 2),
        PartitionSpec::categorized("blocked_relay_lists", BlockedRelayList, 2),
        PartitionSpec::categorized("search_relay_lists", SearchRelayList, 2),
        PartitionSpec::categorized("interest_lists", InterestList, 2),
        PartitionSpec::categorized("emoji_lists", EmojiList, 2),
        PartitionSpec::categorized("bookmark_sets", BookmarkSet, 2),
        // v3: aggregates and drafts
        PartitionSpec::categorized("dm_relay_lists", DmRelayList, 3),
        PartitionSpec::categorized("badge_definitions", BadgeDefinition, 3),
        PartitionSpec::categorized("long_form_drafts", LongFormDraft, 3),
        PartitionSpec::categorized("app_data", AppData, 3),
        PartitionSpec::categorized("community_definitions", CommunityDefinition, 3),
    ];

    let mut by_name = HashMap::with_capacity(partitions.len());
    let mut by_category = HashMap::with_capacity(partitions.len());
    let mut by_kind = HashMap::with_capacity(partitions.len());
    for (idx, spec) in partitions.iter().enumerate() {
        by_name.insert(spec.name, idx);
        if let Some(category) = spec.category {
            by_category.insert(category, idx);
            by_kind.insert(category.kind(), category);
        }
    }

    Registry {
        partitions,
        by_name,
        by_category,
        by_kind,
    }
});

/// All declared partitions, in declaration order.
pub fn partitions() -> &'static [PartitionSpec] {
    &REGISTRY.partitions
}

/// Partitions declared at or before `version`.
pub fn partitions_at(version: u32) -> impl Iterator<Item = &'static PartitionSpec> {
    REGISTRY
        .partitions
        .iter()
        .filter(move |p| p.since_version <= version)
}

/// Look up a partition by table name.
pub fn partition_by_name(name: &str) -> Option<&'static PartitionSpec> {
    REGISTRY.by_name.get(name).map(|&idx| &REGISTRY.partitions[idx])
}

/// Partition a record of `kind` is stored in.
///
/// Unregistered kinds land in the uncategorized append-only partition.
pub fn partition_for_kind(kind: u32) -> &'static PartitionSpec {
    match RecordCategory::from_kind(kind) {
        Some(category) => category.partition(),
        None => uncategorized(),
    }
}

/// The uncategorized append-only partition.
pub fn uncategorized() -> &'static PartitionSpec {
    let idx = REGISTRY.by_name[UNCATEGORIZED_PARTITION];
    &REGISTRY.partitions[idx]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_every_category_has_exactly_one_partition() {
        for category in RecordCategory::ALL {
            let owners: Vec<_> = partitions()
                .iter()
                .filter(|p| p.category == Some(category))
                .collect();
            assert_eq!(owners.len(), 1, "category {} partitions", category);
            assert_eq!(category.partition().category, Some(category));
        }
    }

    #[test]
    fn test_every_partition_maps_back() {
        let mut uncategorized_count = 0;
        for spec in partitions() {
            assert_eq!(partition_by_name(spec.name), Some(spec));
            match spec.category {
                Some(category) => {
                    assert_eq!(category.partition().name, spec.name);
                    assert_eq!(spec.semantics, category.semantics());
                }
                None => {
                    assert_eq!(spec.semantics, Semantics::AppendOnly);
                    uncategorized_count += 1;
                }
            }
        }
        assert_eq!(uncategorized_count, 1);
        assert_eq!(partitions().len(), RecordCategory::ALL.len() + 1);
    }

    #[test]
    fn test_names_and_kinds_unique() {
        let names: HashSet<_> = partitions().iter().map(|p| p.name).collect();
        assert_eq!(names.len(), partitions().len());

        let kinds: HashSet<_> = RecordCategory::ALL.iter().map(|c| c.kind()).collect();
        assert_eq!(kinds.len(), RecordCategory::ALL.len());
    }

    #[test]
    fn test_semantics_by_kind_range() {
        assert_eq!(RecordCategory::Profile.semantics(), Semantics::Replaceable);
        assert_eq!(RecordCategory::Contacts.semantics(), Semantics::Replaceable);
        assert_eq!(RecordCategory::RelayList.semantics(), Semantics::Replaceable);
        assert_eq!(
            RecordCategory::LongFormArticle.semantics(),
            Semantics::Parameterized
        );
        assert_eq!(RecordCategory::Note.semantics(), Semantics::AppendOnly);
        assert_eq!(RecordCategory::Reaction.semantics(), Semantics::AppendOnly);
    }

    #[test]
    fn test_unknown_kind_falls_back() {
        assert_eq!(RecordCategory::from_kind(4242), None);
        assert_eq!(partition_for_kind(4242).name, UNCATEGORIZED_PARTITION);
        assert_eq!(partition_for_kind(0).name, "profiles");
    }

    #[test]
    fn test_partitions_at_version() {
        let v1: Vec<_> = partitions_at(1).map(|p| p.name).collect();
        assert!(v1.contains(&"profiles"));
        assert!(!v1.contains(&"emoji_lists"));

        let v3 = partitions_at(3).count();
        assert_eq!(v3, partitions().len());
    }

    #[test]
    fn test_category_from_str() {
        assert_eq!(
            "profile".parse::<RecordCategory>().unwrap(),
            RecordCategory::Profile
        );
        assert_eq!(
            "long_form_article".parse::<RecordCategory>().unwrap(),
            RecordCategory::LongFormArticle
        );
        assert_eq!(
            "30023".parse::<RecordCategory>().unwrap(),
            RecordCategory::LongFormArticle
        );
        assert!("nope".parse::<RecordCategory>().is_err());
        assert!("4242".parse::<RecordCategory>().is_err());
    }
}
