//! Embargoes: time-bounded full or partial restrictions on an object.
//!
//! An embargo is active on `today` when `start_date <= today` and its
//! `end_date` is either absent (perpetual) or not yet passed. When several
//! embargoes are active on one object the configured [`EmbargoTieBreak`]
//! picks the one that governs the decision.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Days, NaiveDate, Utc};
use heritage_config::{EmbargoConfig, EmbargoTieBreak, ListingConfig};
use heritage_types::{Clock, EmbargoId, ObjectId, Page, Paged, UserId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{AccessError, Result, StoreResult};
use crate::store::EmbargoStore;

// ============================================================================
// Types
// ============================================================================

/// What an embargo withholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbargoType {
    /// Nothing about the object may be shown.
    Full,
    /// Only the catalogue description may be shown.
    MetadataOnly,
    /// The description may be shown; digital content may not be delivered.
    DigitalOnly,
    /// Institution-specific terms; does not block by itself.
    Custom,
}

impl EmbargoType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::MetadataOnly => "metadata_only",
            Self::DigitalOnly => "digital_only",
            Self::Custom => "custom",
        }
    }

    /// Higher is stricter.
    pub fn restrictiveness(&self) -> u8 {
        match self {
            Self::Full => 3,
            Self::MetadataOnly => 2,
            Self::DigitalOnly => 1,
            Self::Custom => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Embargo {
    pub id: EmbargoId,
    pub object_id: ObjectId,
    pub embargo_type: EmbargoType,
    pub reason: Option<String>,
    pub legal_basis: Option<String>,
    pub start_date: NaiveDate,
    /// `None` is perpetual.
    pub end_date: Option<NaiveDate>,
    /// Lifted by [`EmbargoService::process_expired_embargoes`] once ended.
    pub auto_release: bool,
    pub notify_on_release: bool,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Embargo {
    pub fn is_active_on(&self, today: NaiveDate) -> bool {
        self.start_date <= today && self.end_date.is_none_or(|end| end >= today)
    }

    pub fn is_perpetual(&self) -> bool {
        self.end_date.is_none()
    }
}

/// Input for a new embargo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEmbargo {
    pub embargo_type: EmbargoType,
    pub reason: Option<String>,
    pub legal_basis: Option<String>,
    /// Defaults to today.
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub auto_release: bool,
    pub notify_on_release: bool,
    pub created_by: Option<UserId>,
}

impl NewEmbargo {
    pub fn new(embargo_type: EmbargoType) -> Self {
        Self {
            embargo_type,
            reason: None,
            legal_basis: None,
            start_date: None,
            end_date: None,
            auto_release: true,
            notify_on_release: true,
            created_by: None,
        }
    }

    pub fn starting(mut self, start_date: NaiveDate) -> Self {
        self.start_date = Some(start_date);
        self
    }

    pub fn ending(mut self, end_date: NaiveDate) -> Self {
        self.end_date = Some(end_date);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_legal_basis(mut self, legal_basis: impl Into<String>) -> Self {
        self.legal_basis = Some(legal_basis.into());
        self
    }

    pub fn created_by(mut self, user_id: UserId) -> Self {
        self.created_by = Some(user_id);
        self
    }

    pub fn manual_release(mut self) -> Self {
        self.auto_release = false;
        self
    }
}

/// Partial update of an embargo. `end_date: Some(None)` makes it perpetual.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EmbargoUpdate {
    pub embargo_type: Option<EmbargoType>,
    pub reason: Option<String>,
    pub legal_basis: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<Option<NaiveDate>>,
    pub auto_release: Option<bool>,
    pub notify_on_release: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EmbargoStats {
    pub active: usize,
    pub expiring_soon: usize,
    pub by_type: BTreeMap<EmbargoType, usize>,
}

/// Picks the governing embargo among the active ones.
pub fn governing<'a>(
    active: impl IntoIterator<Item = &'a Embargo>,
    tie_break: EmbargoTieBreak,
) -> Option<&'a Embargo> {
    match tie_break {
        EmbargoTieBreak::MostRestrictive => active.into_iter().max_by_key(|e| {
            (e.embargo_type.restrictiveness(), e.created_at, e.id)
        }),
        EmbargoTieBreak::MostRecent => active.into_iter().max_by_key(|e| (e.created_at, e.id)),
    }
}

// ============================================================================
// Service
// ============================================================================

#[derive(Debug, Clone)]
pub struct EmbargoService {
    store: Arc<dyn EmbargoStore>,
    clock: Arc<dyn Clock>,
    config: EmbargoConfig,
    listing: ListingConfig,
}

impl EmbargoService {
    pub fn new(store: Arc<dyn EmbargoStore>, clock: Arc<dyn Clock>, config: EmbargoConfig) -> Self {
        Self {
            store,
            clock,
            config,
            listing: ListingConfig::default(),
        }
    }

    /// Sets the page size used when a listing is called without a page.
    pub fn with_listing(mut self, listing: ListingConfig) -> Self {
        self.listing = listing;
        self
    }

    pub fn is_embargoed(&self, object_id: ObjectId) -> StoreResult<bool> {
        Ok(self.embargo(object_id)?.is_some())
    }

    /// The active embargo that governs `object_id`, if any.
    pub fn embargo(&self, object_id: ObjectId) -> StoreResult<Option<Embargo>> {
        let today = self.clock.today();
        let rows = self.store.embargoes_for_object(object_id)?;
        let active: Vec<&Embargo> = rows.iter().filter(|e| e.is_active_on(today)).collect();

        if active.len() > 1 {
            debug!(object_id = %object_id, count = active.len(), "multiple active embargoes");
        }

        Ok(governing(active, self.config.tie_break).cloned())
    }

    pub fn embargo_by_id(&self, id: EmbargoId) -> StoreResult<Option<Embargo>> {
        self.store.embargo(id)
    }

    /// Every embargo row recorded for the object, newest first.
    pub fn object_embargoes(&self, object_id: ObjectId) -> StoreResult<Vec<Embargo>> {
        let mut rows = self.store.embargoes_for_object(object_id)?;
        rows.sort_by_key(|e| Reverse((e.created_at, e.id)));
        Ok(rows)
    }

    pub fn create(&self, object_id: ObjectId, new: NewEmbargo) -> Result<Embargo> {
        let embargo = self.build(object_id, new)?;
        let embargo = self.store.insert_embargo(embargo)?;

        info!(
            id = %embargo.id,
            object_id = %object_id,
            embargo_type = embargo.embargo_type.as_str(),
            "created embargo"
        );
        Ok(embargo)
    }

    /// Removes every embargo on the object and inserts `new` in one write.
    pub fn replace_embargo(&self, object_id: ObjectId, new: NewEmbargo) -> Result<Embargo> {
        let embargo = self.build(object_id, new)?;
        let (removed, embargo) = self.store.replace_embargoes(embargo)?;

        info!(
            id = %embargo.id,
            object_id = %object_id,
            removed,
            "replaced embargo"
        );
        Ok(embargo)
    }

    pub fn update(&self, id: EmbargoId, update: EmbargoUpdate) -> Result<Embargo> {
        let now = self.clock.now();
        let mut rejected = None;
        let updated = self.store.modify_embargo(id, &mut |embargo| {
            if let Some(embargo_type) = update.embargo_type {
                embargo.embargo_type = embargo_type;
            }
            if let Some(reason) = &update.reason {
                embargo.reason = Some(reason.clone());
            }
            if let Some(legal_basis) = &update.legal_basis {
                embargo.legal_basis = Some(legal_basis.clone());
            }
            if let Some(start_date) = update.start_date {
                embargo.start_date = start_date;
            }
            if let Some(end_date) = update.end_date {
                embargo.end_date = end_date;
            }
            if let Some(flag) = update.auto_release {
                embargo.auto_release = flag;
            }
            if let Some(flag) = update.notify_on_release {
                embargo.notify_on_release = flag;
            }
            if let Err(e) = check_window(embargo.start_date, embargo.end_date) {
                rejected = Some(e);
                return false;
            }
            embargo.updated_at = now;
            true
        })?;

        if let Some(e) = rejected {
            return Err(e);
        }
        let embargo = updated.ok_or(AccessError::NotFound {
            kind: "embargo",
            id: id.as_u64(),
        })?;

        info!(id = %id, object_id = %embargo.object_id, "updated embargo");
        Ok(embargo)
    }

    pub fn remove(&self, id: EmbargoId) -> Result<bool> {
        let removed = self.store.delete_embargo(id)?;
        if removed {
            info!(id = %id, "removed embargo");
        }
        Ok(removed)
    }

    /// Deletes auto-releasing embargoes whose end date has passed.
    ///
    /// Invoked by an external scheduler. Returns the number released.
    pub fn process_expired_embargoes(&self) -> Result<usize> {
        let today = self.clock.today();
        let released = self
            .store
            .delete_embargoes_where(&|e: &Embargo| {
                e.auto_release && e.end_date.is_some_and(|end| end < today)
            })?;

        if released > 0 {
            info!(released, %today, "released expired embargoes");
        }
        Ok(released)
    }

    // ------------------------------------------------------------------------
    // Listings
    // ------------------------------------------------------------------------

    /// Active embargoes ordered by end date; perpetual embargoes come last.
    /// `None` is the first page at the configured size.
    pub fn active_embargoes(&self, page: Option<Page>) -> StoreResult<Paged<Embargo>> {
        let page = page.unwrap_or_else(|| Page::first(self.listing.page_size));
        let today = self.clock.today();
        let mut active: Vec<Embargo> = self
            .store
            .all_embargoes()?
            .into_iter()
            .filter(|e| e.is_active_on(today))
            .collect();

        active.sort_by_key(|e| (e.end_date.is_none(), e.end_date, e.id));
        Ok(Paged::from_sorted(active, page))
    }

    /// Active embargoes that end within the next `days` days, soonest first.
    pub fn expiring_embargoes(&self, days: u32) -> StoreResult<Vec<Embargo>> {
        let today = self.clock.today();
        let horizon = today
            .checked_add_days(Days::new(u64::from(days)))
            .unwrap_or(NaiveDate::MAX);

        let mut expiring: Vec<Embargo> = self
            .store
            .all_embargoes()?
            .into_iter()
            .filter(|e| e.is_active_on(today) && e.end_date.is_some_and(|end| end <= horizon))
            .collect();

        expiring.sort_by_key(|e| (e.end_date, e.id));
        Ok(expiring)
    }

    pub fn stats(&self) -> StoreResult<EmbargoStats> {
        let today = self.clock.today();
        let active: Vec<Embargo> = self
            .store
            .all_embargoes()?
            .into_iter()
            .filter(|e| e.is_active_on(today))
            .collect();

        let mut by_type = BTreeMap::new();
        for embargo in &active {
            *by_type.entry(embargo.embargo_type).or_insert(0) += 1;
        }

        Ok(EmbargoStats {
            active: active.len(),
            expiring_soon: self.expiring_embargoes(self.config.expiring_window_days)?.len(),
            by_type,
        })
    }

    fn build(&self, object_id: ObjectId, new: NewEmbargo) -> Result<Embargo> {
        let now = self.clock.now();
        let start_date = new.start_date.unwrap_or_else(|| self.clock.today());
        check_window(start_date, new.end_date)?;

        Ok(Embargo {
            id: EmbargoId::new(0),
            object_id,
            embargo_type: new.embargo_type,
            reason: new.reason,
            legal_basis: new.legal_basis,
            start_date,
            end_date: new.end_date,
            auto_release: new.auto_release,
            notify_on_release: new.notify_on_release,
            created_by: new.created_by,
            created_at: now,
            updated_at: now,
        })
    }
}

fn check_window(start_date: NaiveDate, end_date: Option<NaiveDate>) -> Result<()> {
    match end_date {
        Some(end) if end < start_date => Err(AccessError::validation(format!(
            "embargo end date {end} precedes start date {start_date}"
        ))),
        _ => Ok(()),
    }
}
