//! Access requests: the workflow through which a viewer obtains a
//! time-bounded exception to a `require_approval` rule.
//!
//! ```text
//!            ┌──► Approved  (administrator)
//! Pending ───┼──► Denied    (administrator)
//!            └──► Withdrawn (original requester)
//! ```
//!
//! Every transition leaves `Pending` and nothing leaves a terminal state.
//! Transitions are compare-and-set on the row's `version`, so of two
//! concurrent decisions on one request exactly one takes effect.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Days, NaiveDate, Utc};
use heritage_config::{ListingConfig, RequestConfig};
use heritage_types::{Action, Clock, ObjectId, Page, Paged, RequestId, UserId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{AccessError, Result, StoreError, StoreResult};
use crate::store::RequestStore;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Denied,
    Withdrawn,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRequest {
    pub id: RequestId,
    pub user_id: UserId,
    pub object_id: ObjectId,
    pub purpose: String,
    pub justification: Option<String>,
    pub research_description: Option<String>,
    pub institution_affiliation: Option<String>,
    pub status: RequestStatus,
    /// Set on approval.
    pub valid_from: Option<NaiveDate>,
    /// Set on approval; `None` never expires.
    pub valid_until: Option<NaiveDate>,
    pub access_granted: Vec<Action>,
    pub decided_by: Option<UserId>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decision_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency counter, bumped by every write.
    pub version: u64,
}

impl AccessRequest {
    /// Approved and within its validity window on `today`.
    pub fn grants_access_on(&self, today: NaiveDate) -> bool {
        self.status == RequestStatus::Approved
            && self.valid_from.is_none_or(|from| from <= today)
            && self.valid_until.is_none_or(|until| until >= today)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAccessRequest {
    pub user_id: UserId,
    pub object_id: ObjectId,
    pub purpose: String,
    pub justification: Option<String>,
    pub research_description: Option<String>,
    pub institution_affiliation: Option<String>,
}

impl NewAccessRequest {
    pub fn new(user_id: UserId, object_id: ObjectId, purpose: impl Into<String>) -> Self {
        Self {
            user_id,
            object_id,
            purpose: purpose.into(),
            justification: None,
            research_description: None,
            institution_affiliation: None,
        }
    }

    pub fn with_justification(mut self, justification: impl Into<String>) -> Self {
        self.justification = Some(justification.into());
        self
    }

    pub fn with_affiliation(mut self, affiliation: impl Into<String>) -> Self {
        self.institution_affiliation = Some(affiliation.into());
        self
    }
}

/// Terms of an approval. Unset fields take the configured defaults.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ApprovalOptions {
    pub valid_until: Option<NaiveDate>,
    pub access_granted: Option<Vec<Action>>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RequestStats {
    pub pending: usize,
    pub this_month: usize,
    /// Percentage of decided requests that were approved, one decimal.
    pub approval_rate: f64,
    pub by_purpose: BTreeMap<String, usize>,
}

// ============================================================================
// Service
// ============================================================================

#[derive(Debug, Clone)]
pub struct AccessRequestService {
    store: Arc<dyn RequestStore>,
    clock: Arc<dyn Clock>,
    config: RequestConfig,
    listing: ListingConfig,
}

impl AccessRequestService {
    pub fn new(store: Arc<dyn RequestStore>, clock: Arc<dyn Clock>, config: RequestConfig) -> Self {
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

    /// Files a pending request.
    pub fn create(&self, new: NewAccessRequest) -> Result<AccessRequest> {
        let purpose = new.purpose.trim();
        if purpose.is_empty() {
            return Err(AccessError::validation("access request purpose is required"));
        }

        let now = self.clock.now();
        let request = self.store.insert_request(AccessRequest {
            id: RequestId::new(0),
            user_id: new.user_id,
            object_id: new.object_id,
            purpose: purpose.to_string(),
            justification: new.justification,
            research_description: new.research_description,
            institution_affiliation: new.institution_affiliation,
            status: RequestStatus::Pending,
            valid_from: None,
            valid_until: None,
            access_granted: Vec::new(),
            decided_by: None,
            decided_at: None,
            decision_notes: None,
            created_at: now,
            updated_at: now,
            version: 0,
        })?;

        info!(
            id = %request.id,
            user_id = %request.user_id,
            object_id = %request.object_id,
            "created access request"
        );
        Ok(request)
    }

    /// Approves a pending request.
    ///
    /// Validity starts today and ends at `options.valid_until`, or after the
    /// configured default window. Returns false when the request is unknown,
    /// no longer pending, or was decided concurrently.
    ///
    /// # Errors
    ///
    /// [`AccessError::Validation`] for an end date in the past or an empty
    /// action set.
    pub fn approve(&self, id: RequestId, decided_by: UserId, options: ApprovalOptions) -> Result<bool> {
        let today = self.clock.today();

        if let Some(until) = options.valid_until
            && until < today
        {
            return Err(AccessError::validation(format!(
                "approval end date {until} is in the past"
            )));
        }
        if options.access_granted.as_ref().is_some_and(Vec::is_empty) {
            return Err(AccessError::validation("approval must grant at least one action"));
        }

        let Some(mut request) = self.pending(id)? else {
            return Ok(false);
        };

        let valid_until = options.valid_until.unwrap_or_else(|| {
            today
                .checked_add_days(Days::new(u64::from(self.config.default_validity_days)))
                .unwrap_or(NaiveDate::MAX)
        });

        request.status = RequestStatus::Approved;
        request.valid_from = Some(today);
        request.valid_until = Some(valid_until);
        request.access_granted = options
            .access_granted
            .unwrap_or_else(|| self.config.default_granted_actions.clone());
        request.decision_notes = options.notes;

        self.transition(request, decided_by)
    }

    /// Denies a pending request. Returns false when it is not pending.
    pub fn deny(&self, id: RequestId, decided_by: UserId, reason: Option<String>) -> Result<bool> {
        let Some(mut request) = self.pending(id)? else {
            return Ok(false);
        };

        request.status = RequestStatus::Denied;
        request.decision_notes = reason;

        self.transition(request, decided_by)
    }

    /// Withdraws a pending request on behalf of its requester.
    ///
    /// Returns false when the request is not pending or `user_id` is not the
    /// original requester.
    pub fn withdraw(&self, id: RequestId, user_id: UserId) -> Result<bool> {
        let Some(mut request) = self.pending(id)? else {
            return Ok(false);
        };
        if request.user_id != user_id {
            warn!(id = %id, user_id = %user_id, "refused withdrawal by non-requester");
            return Ok(false);
        }

        request.status = RequestStatus::Withdrawn;
        self.transition(request, user_id)
    }

    /// True iff an approved request for the pair is valid today.
    pub fn has_approved_access(&self, user_id: UserId, object_id: ObjectId) -> StoreResult<bool> {
        Ok(self.approved_request(user_id, object_id)?.is_some())
    }

    /// The approved request currently granting the pair access, latest
    /// expiry first.
    pub fn approved_request(
        &self,
        user_id: UserId,
        object_id: ObjectId,
    ) -> StoreResult<Option<AccessRequest>> {
        let today = self.clock.today();
        Ok(self
            .store
            .requests_for(user_id, object_id)?
            .into_iter()
            .filter(|r| r.grants_access_on(today))
            .max_by_key(|r| (r.valid_until.is_none(), r.valid_until, r.id)))
    }

    pub fn request(&self, id: RequestId) -> StoreResult<Option<AccessRequest>> {
        self.store.request(id)
    }

    /// Pending requests, newest first. `None` is the first page at the
    /// configured size.
    pub fn pending_requests(&self, page: Option<Page>) -> StoreResult<Paged<AccessRequest>> {
        let page = self.page_or_first(page);
        let mut pending: Vec<AccessRequest> = self
            .store
            .all_requests()?
            .into_iter()
            .filter(|r| r.status == RequestStatus::Pending)
            .collect();

        newest_first(&mut pending);
        Ok(Paged::from_sorted(pending, page))
    }

    pub fn user_requests(
        &self,
        user_id: UserId,
        status: Option<RequestStatus>,
        page: Option<Page>,
    ) -> StoreResult<Paged<AccessRequest>> {
        let page = self.page_or_first(page);
        let mut requests = self.store.requests_for_user(user_id)?;
        if let Some(status) = status {
            requests.retain(|r| r.status == status);
        }

        newest_first(&mut requests);
        Ok(Paged::from_sorted(requests, page))
    }

    pub fn stats(&self) -> StoreResult<RequestStats> {
        let today = self.clock.today();
        let mut stats = RequestStats::default();
        let (mut approved, mut decided) = (0_u32, 0_u32);

        for request in self.store.all_requests()? {
            match request.status {
                RequestStatus::Pending => stats.pending += 1,
                RequestStatus::Approved => {
                    approved += 1;
                    decided += 1;
                }
                RequestStatus::Denied => decided += 1,
                RequestStatus::Withdrawn => {}
            }

            let created = request.created_at.date_naive();
            if created.year() == today.year() && created.month() == today.month() {
                stats.this_month += 1;
            }

            *stats.by_purpose.entry(request.purpose).or_insert(0) += 1;
        }

        if decided > 0 {
            let rate = f64::from(approved) / f64::from(decided) * 100.0;
            stats.approval_rate = (rate * 10.0).round() / 10.0;
        }

        Ok(stats)
    }

    fn page_or_first(&self, page: Option<Page>) -> Page {
        page.unwrap_or_else(|| Page::first(self.listing.page_size))
    }

    fn pending(&self, id: RequestId) -> StoreResult<Option<AccessRequest>> {
        match self.store.request(id)? {
            Some(request) if request.status == RequestStatus::Pending => Ok(Some(request)),
            Some(request) => {
                debug!(id = %id, status = ?request.status, "request is not pending");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn transition(&self, mut request: AccessRequest, actor: UserId) -> Result<bool> {
        let now = self.clock.now();
        let expected = request.version;
        if request.status != RequestStatus::Withdrawn {
            request.decided_by = Some(actor);
            request.decided_at = Some(now);
        }
        request.updated_at = now;

        match self.store.compare_and_swap_request(&request, expected) {
            Ok(stored) => {
                info!(id = %stored.id, status = ?stored.status, actor = %actor, "access request transitioned");
                Ok(true)
            }
            Err(StoreError::Conflict { .. }) => {
                warn!(id = %request.id, status = ?request.status, "lost race on access request");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn newest_first(requests: &mut [AccessRequest]) {
    requests.sort_by_key(|r| Reverse((r.created_at, r.id)));
}
