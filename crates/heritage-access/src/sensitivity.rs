//! Sensitivity flags: markers that an object holds personal information
//! protected under POPIA.
//!
//! Unresolved flags of severity `high` or above escalate the trust level a
//! viewer needs to see the object. Resolving a flag is terminal.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};
use heritage_config::ListingConfig;
use heritage_types::{Clock, FlagId, ObjectId, Page, Paged, UserId};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{AccessError, Result, StoreResult};
use crate::store::SensitivityStore;

// ============================================================================
// Types
// ============================================================================

/// Category of protected information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagType {
    PersonalInfo,
    Sensitive,
    Children,
    Health,
    Biometric,
    Criminal,
    Financial,
    Political,
    Religious,
    Sexual,
}

impl FlagType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PersonalInfo => "personal_info",
            Self::Sensitive => "sensitive",
            Self::Children => "children",
            Self::Health => "health",
            Self::Biometric => "biometric",
            Self::Criminal => "criminal",
            Self::Financial => "financial",
            Self::Political => "political",
            Self::Religious => "religious",
            Self::Sexual => "sexual",
        }
    }
}

/// Ordered `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Severities that restrict access to elevated trust levels.
    pub fn escalates(&self) -> bool {
        *self >= Self::High
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectedBy {
    Manual,
    Automated,
}

/// A descriptive field of the record that carries the flagged information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffectedField {
    pub name: String,
    pub note: Option<String>,
}

impl AffectedField {
    const MAX_NAME_LEN: usize = 64;

    /// Field names are identifiers: a leading ASCII letter followed by
    /// letters, digits, `_`, `.` or `-`.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let mut chars = name.chars();

        let leading_ok = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
        let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));

        if !leading_ok || !rest_ok || name.len() > Self::MAX_NAME_LEN {
            return Err(AccessError::validation(format!(
                "invalid affected field name '{name}'"
            )));
        }

        Ok(Self { name, note: None })
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    fn validate(&self) -> Result<()> {
        Self::new(self.name.clone()).map(|_| ())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensitivityFlag {
    pub id: FlagId,
    pub object_id: ObjectId,
    pub flag_type: FlagType,
    pub severity: Severity,
    pub description: Option<String>,
    pub affected_fields: Vec<AffectedField>,
    pub detected_by: DetectedBy,
    pub is_resolved: bool,
    pub resolved_by: Option<UserId>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_notes: Option<String>,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSensitivityFlag {
    pub flag_type: FlagType,
    pub severity: Severity,
    pub description: Option<String>,
    pub affected_fields: Vec<AffectedField>,
    pub detected_by: DetectedBy,
    pub created_by: Option<UserId>,
}

impl NewSensitivityFlag {
    pub fn new(flag_type: FlagType, severity: Severity) -> Self {
        Self {
            flag_type,
            severity,
            description: None,
            affected_fields: Vec::new(),
            detected_by: DetectedBy::Manual,
            created_by: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_field(mut self, field: AffectedField) -> Self {
        self.affected_fields.push(field);
        self
    }

    pub fn automated(mut self) -> Self {
        self.detected_by = DetectedBy::Automated;
        self
    }

    pub fn created_by(mut self, user_id: UserId) -> Self {
        self.created_by = Some(user_id);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FlagUpdate {
    pub flag_type: Option<FlagType>,
    pub severity: Option<Severity>,
    pub description: Option<String>,
    pub affected_fields: Option<Vec<AffectedField>>,
}

/// Narrows [`SensitivityFlagService::all_unresolved`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FlagFilter {
    pub flag_type: Option<FlagType>,
    pub min_severity: Option<Severity>,
}

impl FlagFilter {
    fn matches(&self, flag: &SensitivityFlag) -> bool {
        self.flag_type.is_none_or(|t| flag.flag_type == t)
            && self.min_severity.is_none_or(|s| flag.severity >= s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SensitivityStats {
    pub unresolved: usize,
    pub critical: usize,
    pub high: usize,
    pub by_type: BTreeMap<FlagType, usize>,
    pub resolved_this_month: usize,
}

// ============================================================================
// Service
// ============================================================================

#[derive(Debug, Clone)]
pub struct SensitivityFlagService {
    store: Arc<dyn SensitivityStore>,
    clock: Arc<dyn Clock>,
    listing: ListingConfig,
}

impl SensitivityFlagService {
    pub fn new(store: Arc<dyn SensitivityStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            listing: ListingConfig::default(),
        }
    }

    /// Sets the page size used when a listing is called without a page.
    pub fn with_listing(mut self, listing: ListingConfig) -> Self {
        self.listing = listing;
        self
    }

    /// True iff an unresolved flag of severity `high` or `critical` exists.
    pub fn has_critical_popia_flags(&self, object_id: ObjectId) -> StoreResult<bool> {
        Ok(self
            .store
            .flags_for_object(object_id)?
            .iter()
            .any(|f| !f.is_resolved && f.severity.escalates()))
    }

    /// True iff the object carries any unresolved flag.
    pub fn has_flags(&self, object_id: ObjectId) -> StoreResult<bool> {
        Ok(self
            .store
            .flags_for_object(object_id)?
            .iter()
            .any(|f| !f.is_resolved))
    }

    pub fn highest_severity(&self, object_id: ObjectId) -> StoreResult<Option<Severity>> {
        Ok(self
            .store
            .flags_for_object(object_id)?
            .iter()
            .filter(|f| !f.is_resolved)
            .map(|f| f.severity)
            .max())
    }

    pub fn flag(&self, id: FlagId) -> StoreResult<Option<SensitivityFlag>> {
        self.store.flag(id)
    }

    /// Every flag on the object, resolved or not, most severe first.
    pub fn object_flags(&self, object_id: ObjectId) -> StoreResult<Vec<SensitivityFlag>> {
        let mut flags = self.store.flags_for_object(object_id)?;
        sort_for_review(&mut flags);
        Ok(flags)
    }

    pub fn unresolved_flags(&self, object_id: ObjectId) -> StoreResult<Vec<SensitivityFlag>> {
        let mut flags = self.store.flags_for_object(object_id)?;
        flags.retain(|f| !f.is_resolved);
        sort_for_review(&mut flags);
        Ok(flags)
    }

    /// Unresolved flags across all objects, most severe then newest first.
    pub fn all_unresolved(
        &self,
        filter: FlagFilter,
        page: Option<Page>,
    ) -> StoreResult<Paged<SensitivityFlag>> {
        let page = page.unwrap_or_else(|| Page::first(self.listing.page_size));
        let mut flags: Vec<SensitivityFlag> = self
            .store
            .all_flags()?
            .into_iter()
            .filter(|f| !f.is_resolved && filter.matches(f))
            .collect();

        sort_for_review(&mut flags);
        Ok(Paged::from_sorted(flags, page))
    }

    pub fn create_flag(
        &self,
        object_id: ObjectId,
        new: NewSensitivityFlag,
    ) -> Result<SensitivityFlag> {
        for field in &new.affected_fields {
            field.validate()?;
        }

        let now = self.clock.now();
        let flag = self.store.insert_flag(SensitivityFlag {
            id: FlagId::new(0),
            object_id,
            flag_type: new.flag_type,
            severity: new.severity,
            description: new.description,
            affected_fields: new.affected_fields,
            detected_by: new.detected_by,
            is_resolved: false,
            resolved_by: None,
            resolved_at: None,
            resolution_notes: None,
            created_by: new.created_by,
            created_at: now,
            updated_at: now,
        })?;

        info!(
            id = %flag.id,
            object_id = %object_id,
            flag_type = flag.flag_type.as_str(),
            severity = ?flag.severity,
            "created sensitivity flag"
        );
        Ok(flag)
    }

    /// Edits an unresolved flag. Resolved flags are frozen.
    ///
    /// The resolved check and the write happen in one store call, so an edit
    /// racing [`resolve_flag`](Self::resolve_flag) either lands before the
    /// resolution or is refused.
    pub fn update_flag(&self, id: FlagId, update: FlagUpdate) -> Result<SensitivityFlag> {
        if let Some(fields) = &update.affected_fields {
            for field in fields {
                field.validate()?;
            }
        }

        let now = self.clock.now();
        let mut frozen = false;
        let updated = self.store.modify_flag(id, &mut |flag| {
            if flag.is_resolved {
                frozen = true;
                return false;
            }
            if let Some(flag_type) = update.flag_type {
                flag.flag_type = flag_type;
            }
            if let Some(severity) = update.severity {
                flag.severity = severity;
            }
            if let Some(description) = &update.description {
                flag.description = Some(description.clone());
            }
            if let Some(fields) = &update.affected_fields {
                flag.affected_fields.clone_from(fields);
            }
            flag.updated_at = now;
            true
        })?;

        match updated {
            Some(flag) => {
                info!(id = %id, "updated sensitivity flag");
                Ok(flag)
            }
            None if frozen => {
                warn!(id = %id, "refused edit of resolved sensitivity flag");
                Err(AccessError::validation(format!(
                    "sensitivity flag {id} is resolved and cannot be edited"
                )))
            }
            None => Err(AccessError::NotFound {
                kind: "sensitivity flag",
                id: id.as_u64(),
            }),
        }
    }

    pub fn delete_flag(&self, id: FlagId) -> Result<bool> {
        let deleted = self.store.delete_flag(id)?;
        if deleted {
            info!(id = %id, "deleted sensitivity flag");
        }
        Ok(deleted)
    }

    /// Marks a flag resolved. Returns false if unknown or already resolved.
    pub fn resolve_flag(
        &self,
        id: FlagId,
        resolved_by: UserId,
        notes: Option<String>,
    ) -> Result<bool> {
        let now = self.clock.now();
        let resolved = self.store.modify_flag(id, &mut |flag| {
            if flag.is_resolved {
                return false;
            }
            flag.is_resolved = true;
            flag.resolved_by = Some(resolved_by);
            flag.resolved_at = Some(now);
            flag.resolution_notes.clone_from(&notes);
            flag.updated_at = now;
            true
        })?;

        match resolved {
            Some(flag) => {
                info!(id = %id, object_id = %flag.object_id, resolved_by = %resolved_by, "resolved sensitivity flag");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn stats(&self) -> StoreResult<SensitivityStats> {
        let today = self.clock.today();
        let mut stats = SensitivityStats::default();

        for flag in self.store.all_flags()? {
            if flag.is_resolved {
                let this_month = flag.resolved_at.is_some_and(|at| {
                    at.year() == today.year() && at.month() == today.month()
                });
                if this_month {
                    stats.resolved_this_month += 1;
                }
                continue;
            }

            stats.unresolved += 1;
            match flag.severity {
                Severity::Critical => stats.critical += 1,
                Severity::High => stats.high += 1,
                Severity::Medium | Severity::Low => {}
            }
            *stats.by_type.entry(flag.flag_type).or_insert(0) += 1;
        }

        Ok(stats)
    }
}

fn sort_for_review(flags: &mut [SensitivityFlag]) {
    flags.sort_by_key(|f| (Reverse(f.severity), Reverse(f.created_at), Reverse(f.id)));
}
