//! Memory types for the Lorekeeper system
//!
//! Defines the memory record stored in every category, the consolidation
//! tiers a record can live in, and the fixed category taxonomy.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MemoryError;

/// Consolidation level of a memory record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// A single learned fact, straight from the extractor
    Raw,
    /// Synthesis of a handful of raw records
    Short,
    /// Synthesis of several short summaries
    Mid,
    /// Rolling category-wide summary, at most one active per category
    Long,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Raw => "raw",
            Tier::Short => "short",
            Tier::Mid => "mid",
            Tier::Long => "long",
        }
    }

    /// The tier a consolidation of this tier produces
    pub fn next(&self) -> Option<Tier> {
        match self {
            Tier::Raw => Some(Tier::Short),
            Tier::Short => Some(Tier::Mid),
            Tier::Mid => Some(Tier::Long),
            Tier::Long => None,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "raw" => Ok(Tier::Raw),
            "short" => Ok(Tier::Short),
            "mid" => Ok(Tier::Mid),
            "long" => Ok(Tier::Long),
            other => Err(MemoryError::Serialization(format!("Unknown tier: {other}"))),
        }
    }
}

/// Fixed taxonomy partitioning memories by subject or owner
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// General facts about the world
    WorldKnowledge,
    /// Facts about the crypto ecosystem (protocols, tokens, upgrades)
    CryptoEcosystem,
    /// The persona's reflections on its own behavior
    SelfReflection,
    /// Facts about one specific user
    UserSpecific(String),
    /// Content of the persona's own primary posts
    PrimaryPost,
    /// Prompts used to generate media
    MediaPrompts,
}

impl Category {
    /// Every category that is not parameterized by a user id
    pub const SHARED: [Category; 5] = [
        Category::WorldKnowledge,
        Category::CryptoEcosystem,
        Category::SelfReflection,
        Category::PrimaryPost,
        Category::MediaPrompts,
    ];

    /// Stable string key used in storage and prompts
    pub fn key(&self) -> String {
        match self {
            Category::WorldKnowledge => "world_knowledge".to_string(),
            Category::CryptoEcosystem => "crypto_ecosystem".to_string(),
            Category::SelfReflection => "self_reflection".to_string(),
            Category::UserSpecific(user_id) => format!("user:{user_id}"),
            Category::PrimaryPost => "primary_post".to_string(),
            Category::MediaPrompts => "media_prompts".to_string(),
        }
    }

    /// Parse a storage key produced by [`Category::key`]
    pub fn from_key(key: &str) -> Option<Category> {
        match key {
            "world_knowledge" => Some(Category::WorldKnowledge),
            "crypto_ecosystem" => Some(Category::CryptoEcosystem),
            "self_reflection" => Some(Category::SelfReflection),
            "primary_post" => Some(Category::PrimaryPost),
            "media_prompts" => Some(Category::MediaPrompts),
            other => other
                .strip_prefix("user:")
                .filter(|id| !id.trim().is_empty())
                .map(|id| Category::UserSpecific(id.to_string())),
        }
    }

    /// Resolve a category from the name used in LLM output.
    ///
    /// `user_specific` needs a non-empty user id, otherwise the candidate has
    /// no complete category.
    pub fn from_label(label: &str, user_id: Option<&str>) -> Option<Category> {
        match label.trim().to_lowercase().as_str() {
            "user_specific" => user_id
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(|id| Category::UserSpecific(id.to_string())),
            "world_knowledge" => Some(Category::WorldKnowledge),
            "crypto_ecosystem" => Some(Category::CryptoEcosystem),
            "self_reflection" => Some(Category::SelfReflection),
            "primary_post" => Some(Category::PrimaryPost),
            "media_prompts" => Some(Category::MediaPrompts),
            _ => None,
        }
    }

    /// Human readable label used in prompts
    pub fn label(&self) -> &'static str {
        match self {
            Category::WorldKnowledge => "world knowledge",
            Category::CryptoEcosystem => "crypto-ecosystem knowledge",
            Category::SelfReflection => "self-reflection",
            Category::UserSpecific(_) => "user-specific",
            Category::PrimaryPost => "primary-post content",
            Category::MediaPrompts => "generated-media prompts",
        }
    }

    pub fn is_user_specific(&self) -> bool {
        matches!(self, Category::UserSpecific(_))
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// A single memory unit stored in a category.
///
/// Records are immutable once written except for `active`, which is cleared
/// when a newer summary supersedes the record, and `consumed_by`, which is set
/// exactly once when a higher-tier summary absorbs the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Unique identifier for this record
    pub id: Uuid,
    /// Which taxonomy bucket this record belongs to
    pub category: Category,
    /// Consolidation level
    pub tier: Tier,
    /// The remembered text
    pub text: String,
    /// Records this summary was synthesized from (no duplicates)
    pub consolidated_from: Vec<Uuid>,
    /// When this record was created
    pub created_at: DateTime<Utc>,
    /// Whether this record is visible to retrieval
    pub active: bool,
    /// The summary that consumed this record, if any
    pub consumed_by: Option<Uuid>,
    /// Session the underlying activity came from (raw records only)
    pub session_id: Option<String>,
    /// Last log sequence number of the batch this record was learned from
    #[serde(default)]
    pub source_seq: Option<u64>,
}

impl MemoryRecord {
    /// Create a new raw record
    pub fn raw(category: Category, text: impl Into<String>, session_id: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            category,
            tier: Tier::Raw,
            text: text.into(),
            consolidated_from: Vec::new(),
            created_at: Utc::now(),
            active: true,
            consumed_by: None,
            session_id,
            source_seq: None,
        }
    }

    /// Tag a raw record with the log position it was learned from
    pub fn learned_at(mut self, seq: u64) -> Self {
        self.source_seq = Some(seq);
        self
    }

    /// Create a new summary record consolidating `inputs`
    pub fn summary(
        category: Category,
        tier: Tier,
        text: impl Into<String>,
        inputs: impl IntoIterator<Item = Uuid>,
    ) -> Self {
        let mut consolidated_from = Vec::new();
        for id in inputs {
            if !consolidated_from.contains(&id) {
                consolidated_from.push(id);
            }
        }

        Self {
            id: Uuid::new_v4(),
            category,
            tier,
            text: text.into(),
            consolidated_from,
            created_at: Utc::now(),
            active: true,
            consumed_by: None,
            session_id: None,
            source_seq: None,
        }
    }

    /// Whether a higher-tier summary has already absorbed this record
    pub fn is_consumed(&self) -> bool {
        self.consumed_by.is_some()
    }
}
