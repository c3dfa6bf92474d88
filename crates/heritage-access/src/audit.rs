//! Access audit trail.
//!
//! Every access attempt a caller chooses to log becomes one immutable
//! [`AuditRecord`]. The trail is append-only: the API offers no update or
//! delete, and [`AuditSink`] has no method for either.
//!
//! ```text
//! AuditTrail = {
//!     sink: Arc<dyn AuditSink>,   // append + query only
//!     record(event) -> Option<AuditRecord>,
//!     query(filter) -> Vec<AuditRecord>,
//! }
//! ```

use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use heritage_config::AuditConfig;
use heritage_types::{Action, AuditRecordId, Clock, ObjectId, UserId};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::decision::DenialReason;
use crate::error::StoreResult;
use crate::store::AuditSink;

/// One logged access attempt. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: AuditRecordId,
    /// `None` for anonymous viewers.
    pub user_id: Option<UserId>,
    pub object_id: ObjectId,
    pub action: Action,
    pub allowed: bool,
    pub reason: Option<DenialReason>,
    pub ip_address: Option<IpAddr>,
    pub recorded_at: DateTime<Utc>,
}

/// An access attempt to be logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessEvent {
    pub object_id: ObjectId,
    pub user_id: Option<UserId>,
    pub action: Action,
    pub allowed: bool,
    pub reason: Option<DenialReason>,
    pub ip_address: Option<IpAddr>,
}

/// Query filter for the audit trail.
///
/// All fields are optional and combine with AND. Results come back oldest
/// first.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AuditQuery {
    pub user_id: Option<UserId>,
    pub object_id: Option<ObjectId>,
    pub allowed: Option<bool>,
    pub time_from: Option<DateTime<Utc>>,
    pub time_to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl AuditQuery {
    pub fn with_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_object(mut self, object_id: ObjectId) -> Self {
        self.object_id = Some(object_id);
        self
    }

    /// Only granted (`true`) or only refused (`false`) attempts.
    pub fn with_outcome(mut self, allowed: bool) -> Self {
        self.allowed = Some(allowed);
        self
    }

    /// Inclusive on both ends.
    pub fn with_time_range(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.time_from = Some(from);
        self.time_to = Some(to);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, record: &AuditRecord) -> bool {
        self.user_id.is_none_or(|u| record.user_id == Some(u))
            && self.object_id.is_none_or(|o| record.object_id == o)
            && self.allowed.is_none_or(|a| record.allowed == a)
            && self.time_from.is_none_or(|from| record.recorded_at >= from)
            && self.time_to.is_none_or(|to| record.recorded_at <= to)
    }
}

#[derive(Debug, Clone)]
pub struct AuditTrail {
    sink: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    config: AuditConfig,
}

impl AuditTrail {
    pub fn new(sink: Arc<dyn AuditSink>, clock: Arc<dyn Clock>, config: AuditConfig) -> Self {
        Self {
            sink,
            clock,
            config,
        }
    }

    /// Appends one record. Returns `None` when auditing is switched off.
    pub fn record(&self, event: AccessEvent) -> StoreResult<Option<AuditRecord>> {
        if !self.config.enabled {
            return Ok(None);
        }

        let ip_address = event.ip_address.filter(|_| self.config.record_ip_address);
        let record = self.sink.append(AuditRecord {
            id: AuditRecordId::new(0),
            user_id: event.user_id,
            object_id: event.object_id,
            action: event.action,
            allowed: event.allowed,
            reason: event.reason,
            ip_address,
            recorded_at: self.clock.now(),
        })?;

        debug!(id = %record.id, object_id = %record.object_id, allowed = record.allowed, "audited access");
        Ok(Some(record))
    }

    pub fn query(&self, query: &AuditQuery) -> StoreResult<Vec<AuditRecord>> {
        self.sink.query(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use chrono::{Duration, NaiveDate};
    use heritage_types::FixedClock;

    fn event(user: Option<u64>, allowed: bool) -> AccessEvent {
        AccessEvent {
            object_id: ObjectId::new(42),
            user_id: user.map(UserId::new),
            action: Action::View,
            allowed,
            reason: (!allowed).then_some(DenialReason::Embargoed),
            ip_address: Some(IpAddr::from([192, 0, 2, 10])),
        }
    }

    fn trail(config: AuditConfig) -> (AuditTrail, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::on(NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()));
        (AuditTrail::new(Arc::new(MemoryStore::new()), clock.clone(), config), clock)
    }

    #[test]
    fn records_are_appended_and_queryable() {
        let (trail, clock) = trail(AuditConfig::default());
        let start = clock.now();

        trail.record(event(None, false)).unwrap();
        clock.advance(Duration::hours(1));
        trail.record(event(Some(7), true)).unwrap();
        clock.advance(Duration::hours(1));
        trail.record(event(Some(7), false)).unwrap();

        let all = trail.query(&AuditQuery::default()).unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].id < w[1].id));

        let denied_for_user = trail
            .query(&AuditQuery::default().with_user(UserId::new(7)).with_outcome(false))
            .unwrap();
        assert_eq!(denied_for_user.len(), 1);
        assert_eq!(denied_for_user[0].reason, Some(DenialReason::Embargoed));

        let first_hour = trail
            .query(&AuditQuery::default().with_time_range(start, start + Duration::minutes(59)))
            .unwrap();
        assert_eq!(first_hour.len(), 1);
        assert!(first_hour[0].user_id.is_none());

        let limited = trail.query(&AuditQuery::default().with_limit(2)).unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[test]
    fn disabled_audit_is_a_no_op() {
        let (trail, _) = trail(AuditConfig {
            enabled: false,
            record_ip_address: true,
        });

        assert!(trail.record(event(Some(1), true)).unwrap().is_none());
        assert!(trail.query(&AuditQuery::default()).unwrap().is_empty());
    }

    #[test]
    fn ip_address_is_dropped_when_not_retained() {
        let (trail, _) = trail(AuditConfig {
            enabled: true,
            record_ip_address: false,
        });

        let record = trail.record(event(Some(1), true)).unwrap().unwrap();
        assert!(record.ip_address.is_none());
    }
}
