//! Filter types for category store reads and similarity searches
//!
//! Narrows queries by category, tier, liveness, consumption state and
//! session. The in-process store evaluates filters with [`RecordFilter::matches`];
//! the LanceDB store pushes them down with [`RecordFilter::to_sql_clause`].

use crate::memory::types::{Category, MemoryRecord, Tier};

/// Filter criteria for record reads and searches.
///
/// Unset fields do not filter. Multiple filters are combined with AND logic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    /// Restrict to these categories (OR logic within this filter)
    pub categories: Option<Vec<Category>>,
    /// Restrict to these tiers (OR logic within this filter)
    pub tiers: Option<Vec<Tier>>,
    /// Only records with `active = true`
    pub active_only: bool,
    /// Only records no summary has consumed yet
    pub unconsumed_only: bool,
    /// Only records learned from this session
    pub session_id: Option<String>,
}

impl RecordFilter {
    /// Create a new empty filter (no filtering applied)
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter to a single category
    pub fn for_category(category: Category) -> Self {
        Self::new().with_categories(vec![category])
    }

    pub fn with_categories(mut self, categories: Vec<Category>) -> Self {
        self.categories = Some(categories);
        self
    }

    pub fn with_tiers(mut self, tiers: Vec<Tier>) -> Self {
        self.tiers = Some(tiers);
        self
    }

    pub fn with_tier(self, tier: Tier) -> Self {
        self.with_tiers(vec![tier])
    }

    pub fn active_only(mut self) -> Self {
        self.active_only = true;
        self
    }

    pub fn unconsumed_only(mut self) -> Self {
        self.unconsumed_only = true;
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Evaluate the filter against a record
    pub fn matches(&self, record: &MemoryRecord) -> bool {
        if let Some(ref categories) = self.categories {
            if !categories.contains(&record.category) {
                return false;
            }
        }
        if let Some(ref tiers) = self.tiers {
            if !tiers.contains(&record.tier) {
                return false;
            }
        }
        if self.active_only && !record.active {
            return false;
        }
        if self.unconsumed_only && record.is_consumed() {
            return false;
        }
        if let Some(ref session_id) = self.session_id {
            if record.session_id.as_deref() != Some(session_id.as_str()) {
                return false;
            }
        }
        true
    }

    /// Build a SQL WHERE clause from this filter.
    /// Returns `None` if no filters are set.
    pub fn to_sql_clause(&self) -> Option<String> {
        let mut conditions = Vec::new();

        if let Some(ref categories) = self.categories {
            let keys: Vec<String> = categories.iter().map(|c| quote(&c.key())).collect();
            match keys.len() {
                0 => conditions.push("FALSE".to_string()),
                1 => conditions.push(format!("category = {}", keys[0])),
                _ => conditions.push(format!("category IN ({})", keys.join(", "))),
            }
        }

        if let Some(ref tiers) = self.tiers {
            let names: Vec<String> = tiers.iter().map(|t| quote(t.as_str())).collect();
            match names.len() {
                0 => conditions.push("FALSE".to_string()),
                1 => conditions.push(format!("tier = {}", names[0])),
                _ => conditions.push(format!("tier IN ({})", names.join(", "))),
            }
        }

        if self.active_only {
            conditions.push("active = true".to_string());
        }

        if self.unconsumed_only {
            conditions.push("consumed_by IS NULL".to_string());
        }

        if let Some(ref session_id) = self.session_id {
            conditions.push(format!("session_id = {}", quote(session_id)));
        }

        if conditions.is_empty() {
            None
        } else {
            Some(conditions.join(" AND "))
        }
    }

    /// Check if this filter is empty (no conditions set)
    pub fn is_empty(&self) -> bool {
        self.categories.is_none()
            && self.tiers.is_none()
            && !self.active_only
            && !self.unconsumed_only
            && self.session_id.is_none()
    }
}

/// Single-quote a SQL string literal
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
