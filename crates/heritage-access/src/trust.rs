//! Trust levels: the ordered capability tiers granted to viewers.
//!
//! A viewer's effective tier is resolved from their trust grants:
//!
//! ```text
//! grants(user) ─► active && unexpired ─► institution-scoped? ─► TrustLevel
//!                                        └─ else global grant ─┘
//! ```
//!
//! A viewer without an effective grant sits at level 0 with no capabilities.
//! System-seeded levels are immutable.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use heritage_types::{Clock, GrantId, InstitutionId, TrustLevelId, UserId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{AccessError, Result, StoreResult};
use crate::store::TrustStore;

// ============================================================================
// Types
// ============================================================================

/// A capability tier. Levels are totally ordered by `level`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustLevel {
    pub id: TrustLevelId,
    /// Stable machine name, unique across levels.
    pub code: String,
    pub name: String,
    /// 0 is the anonymous/public tier.
    pub level: u8,
    pub can_view_restricted: bool,
    pub can_download: bool,
    pub can_bulk_download: bool,
    /// Seeded by the system; never updated or deleted.
    pub is_system: bool,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Input for a custom (non-system) trust level.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NewTrustLevel {
    pub code: String,
    pub name: String,
    pub level: u8,
    pub can_view_restricted: bool,
    pub can_download: bool,
    pub can_bulk_download: bool,
    pub description: Option<String>,
}

impl NewTrustLevel {
    pub fn new(code: impl Into<String>, name: impl Into<String>, level: u8) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            level,
            ..Default::default()
        }
    }

    pub fn with_capabilities(mut self, view_restricted: bool, download: bool, bulk: bool) -> Self {
        self.can_view_restricted = view_restricted;
        self.can_download = download;
        self.can_bulk_download = bulk;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Partial update of a custom trust level. `code` and `is_system` are fixed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TrustLevelUpdate {
    pub name: Option<String>,
    pub level: Option<u8>,
    pub can_view_restricted: Option<bool>,
    pub can_download: Option<bool>,
    pub can_bulk_download: Option<bool>,
    pub description: Option<String>,
}

/// Links a user to a trust level, globally or for one institution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTrustGrant {
    pub id: GrantId,
    pub user_id: UserId,
    pub trust_level_id: TrustLevelId,
    /// `None` is a global grant.
    pub institution_id: Option<InstitutionId>,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub granted_by: Option<UserId>,
    pub granted_at: DateTime<Utc>,
    pub notes: Option<String>,
}

impl UserTrustGrant {
    /// Active and not yet expired at `now`.
    pub fn is_effective_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.is_none_or(|expires| expires > now)
    }
}

/// Input for assigning a trust level to a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantAssignment {
    pub user_id: UserId,
    pub trust_level_id: TrustLevelId,
    pub institution_id: Option<InstitutionId>,
    pub granted_by: Option<UserId>,
    pub expires_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

impl GrantAssignment {
    pub fn new(user_id: UserId, trust_level_id: TrustLevelId) -> Self {
        Self {
            user_id,
            trust_level_id,
            institution_id: None,
            granted_by: None,
            expires_at: None,
            notes: None,
        }
    }

    pub fn for_institution(mut self, institution_id: InstitutionId) -> Self {
        self.institution_id = Some(institution_id);
        self
    }

    pub fn granted_by(mut self, user_id: UserId) -> Self {
        self.granted_by = Some(user_id);
        self
    }

    pub fn expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

/// The tiers every installation is seeded with.
///
/// Capabilities never decrease as the level rises.
pub fn system_levels() -> Vec<NewTrustLevel> {
    vec![
        NewTrustLevel::new("public", "Public", 0)
            .with_description("Anonymous and unverified visitors"),
        NewTrustLevel::new("registered", "Registered User", 1)
            .with_description("Signed-in users with a verified email address"),
        NewTrustLevel::new("contributor", "Contributor", 2)
            .with_capabilities(false, true, false)
            .with_description("Community contributors with download access"),
        NewTrustLevel::new("researcher", "Verified Researcher", 3)
            .with_capabilities(true, true, false)
            .with_description("Researchers whose affiliation has been verified"),
        NewTrustLevel::new("custodian", "Custodian", 4)
            .with_capabilities(true, true, true)
            .with_description("Institutional staff responsible for the holdings"),
        NewTrustLevel::new("administrator", "Administrator", 5)
            .with_capabilities(true, true, true)
            .with_description("Platform administrators"),
    ]
}

// ============================================================================
// Service
// ============================================================================

/// Resolves and administers trust levels.
#[derive(Debug, Clone)]
pub struct TrustLevelService {
    store: Arc<dyn TrustStore>,
    clock: Arc<dyn Clock>,
}

impl TrustLevelService {
    pub fn new(store: Arc<dyn TrustStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Effective trust level of a user.
    ///
    /// Among active, unexpired grants a grant scoped to `institution_id` is
    /// preferred over a global one. Without an institution only global
    /// grants are considered. Returns `None` when nothing applies.
    pub fn user_trust_level(
        &self,
        user_id: UserId,
        institution_id: Option<InstitutionId>,
    ) -> StoreResult<Option<TrustLevel>> {
        let now = self.clock.now();
        let grants = self.store.grants_for_user(user_id)?;

        let pick = |scope: Option<InstitutionId>| {
            grants
                .iter()
                .filter(|g| g.institution_id == scope && g.is_effective_at(now))
                .max_by_key(|g| (g.granted_at, g.id))
        };

        let grant = match institution_id {
            Some(institution) => pick(Some(institution)).or_else(|| pick(None)),
            None => pick(None),
        };

        let Some(grant) = grant else {
            debug!(user_id = %user_id, "no effective trust grant");
            return Ok(None);
        };

        // A grant pointing at a deleted level resolves to nothing.
        self.store.trust_level(grant.trust_level_id)
    }

    /// Numeric level of the user's effective tier, 0 when none applies.
    pub fn user_level(
        &self,
        user_id: UserId,
        institution_id: Option<InstitutionId>,
    ) -> StoreResult<u8> {
        Ok(self
            .user_trust_level(user_id, institution_id)?
            .map_or(0, |t| t.level))
    }

    pub fn has_min_level(
        &self,
        user_id: UserId,
        min_level: u8,
        institution_id: Option<InstitutionId>,
    ) -> StoreResult<bool> {
        Ok(self.user_level(user_id, institution_id)? >= min_level)
    }

    pub fn can_view_restricted(
        &self,
        user_id: UserId,
        institution_id: Option<InstitutionId>,
    ) -> StoreResult<bool> {
        Ok(self
            .user_trust_level(user_id, institution_id)?
            .is_some_and(|t| t.can_view_restricted))
    }

    pub fn can_download(
        &self,
        user_id: UserId,
        institution_id: Option<InstitutionId>,
    ) -> StoreResult<bool> {
        Ok(self
            .user_trust_level(user_id, institution_id)?
            .is_some_and(|t| t.can_download))
    }

    // ------------------------------------------------------------------------
    // Level administration
    // ------------------------------------------------------------------------

    /// All levels ordered from lowest to highest.
    pub fn all_levels(&self) -> StoreResult<Vec<TrustLevel>> {
        let mut levels = self.store.trust_levels()?;
        levels.sort_by_key(|l| (l.level, l.id));
        Ok(levels)
    }

    pub fn level_by_id(&self, id: TrustLevelId) -> StoreResult<Option<TrustLevel>> {
        self.store.trust_level(id)
    }

    pub fn level_by_code(&self, code: &str) -> StoreResult<Option<TrustLevel>> {
        self.store.trust_level_by_code(code)
    }

    /// Inserts any missing system level. Idempotent.
    pub fn seed_system_levels(&self) -> Result<usize> {
        let mut inserted = 0;
        for seed in system_levels() {
            if self.store.trust_level_by_code(&seed.code)?.is_none() {
                self.insert(seed, true)?;
                inserted += 1;
            }
        }

        if inserted > 0 {
            info!(inserted, "seeded system trust levels");
        }
        Ok(inserted)
    }

    /// Creates a custom level. Custom levels are never system levels.
    pub fn create_level(&self, new: NewTrustLevel) -> Result<TrustLevel> {
        if new.code.trim().is_empty() || new.name.trim().is_empty() {
            return Err(AccessError::validation("trust level code and name are required"));
        }
        if self.store.trust_level_by_code(&new.code)?.is_some() {
            return Err(AccessError::validation(format!(
                "trust level code '{}' already exists",
                new.code
            )));
        }

        let level = self.insert(new, false)?;
        info!(id = %level.id, code = %level.code, level = level.level, "created trust level");
        Ok(level)
    }

    /// Applies `update` to a custom level.
    ///
    /// # Errors
    ///
    /// [`AccessError::ImmutableResource`] for a system level (nothing is
    /// written), [`AccessError::NotFound`] for an unknown id.
    pub fn update_level(&self, id: TrustLevelId, update: TrustLevelUpdate) -> Result<TrustLevel> {
        self.mutable_level(id)?;

        let level = self
            .store
            .modify_trust_level(id, &mut |level| {
                if let Some(name) = &update.name {
                    level.name.clone_from(name);
                }
                if let Some(value) = update.level {
                    level.level = value;
                }
                if let Some(flag) = update.can_view_restricted {
                    level.can_view_restricted = flag;
                }
                if let Some(flag) = update.can_download {
                    level.can_download = flag;
                }
                if let Some(flag) = update.can_bulk_download {
                    level.can_bulk_download = flag;
                }
                if let Some(description) = &update.description {
                    level.description = Some(description.clone());
                }
                true
            })?
            .ok_or(AccessError::NotFound {
                kind: "trust level",
                id: id.as_u64(),
            })?;

        info!(id = %id, "updated trust level");
        Ok(level)
    }

    /// Deletes a custom level.
    ///
    /// # Errors
    ///
    /// Same as [`update_level`](Self::update_level).
    pub fn delete_level(&self, id: TrustLevelId) -> Result<()> {
        self.mutable_level(id)?;

        if !self.store.delete_trust_level(id)? {
            return Err(AccessError::NotFound {
                kind: "trust level",
                id: id.as_u64(),
            });
        }

        info!(id = %id, "deleted trust level");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Grants
    // ------------------------------------------------------------------------

    /// Assigns a level to a user, replacing any grant for the same
    /// `(user, institution)` pair. The new grant is active.
    pub fn assign_trust_level(&self, assignment: GrantAssignment) -> Result<UserTrustGrant> {
        if self.store.trust_level(assignment.trust_level_id)?.is_none() {
            return Err(AccessError::NotFound {
                kind: "trust level",
                id: assignment.trust_level_id.as_u64(),
            });
        }

        let grant = self.store.upsert_grant(UserTrustGrant {
            id: GrantId::new(0),
            user_id: assignment.user_id,
            trust_level_id: assignment.trust_level_id,
            institution_id: assignment.institution_id,
            is_active: true,
            expires_at: assignment.expires_at,
            granted_by: assignment.granted_by,
            granted_at: self.clock.now(),
            notes: assignment.notes,
        })?;

        info!(
            user_id = %grant.user_id,
            trust_level_id = %grant.trust_level_id,
            institution_id = ?grant.institution_id,
            "assigned trust level"
        );
        Ok(grant)
    }

    /// Removes the grant for `(user, institution)`. Returns false if none.
    pub fn remove_trust_level(
        &self,
        user_id: UserId,
        institution_id: Option<InstitutionId>,
    ) -> Result<bool> {
        let removed = self.store.delete_grant(user_id, institution_id)?;
        if removed {
            info!(user_id = %user_id, institution_id = ?institution_id, "removed trust grant");
        }
        Ok(removed)
    }

    fn mutable_level(&self, id: TrustLevelId) -> Result<TrustLevel> {
        let level = self.store.trust_level(id)?.ok_or(AccessError::NotFound {
            kind: "trust level",
            id: id.as_u64(),
        })?;

        if level.is_system {
            warn!(id = %id, code = %level.code, "refused modification of system trust level");
            return Err(AccessError::ImmutableResource {
                kind: "trust level",
                id: id.as_u64(),
            });
        }

        Ok(level)
    }

    fn insert(&self, new: NewTrustLevel, is_system: bool) -> Result<TrustLevel> {
        Ok(self.store.insert_trust_level(TrustLevel {
            id: TrustLevelId::new(0),
            code: new.code,
            name: new.name,
            level: new.level,
            can_view_restricted: new.can_view_restricted,
            can_download: new.can_download,
            can_bulk_download: new.can_bulk_download,
            is_system,
            description: new.description,
            created_at: self.clock.now(),
        })?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use chrono::{Duration, NaiveDate};
    use heritage_types::FixedClock;
    use proptest::prelude::*;

    fn setup() -> (TrustLevelService, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::on(NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()));
        let service = TrustLevelService::new(Arc::new(MemoryStore::new()), clock.clone());
        service.seed_system_levels().unwrap();
        (service, clock)
    }

    fn level_id(service: &TrustLevelService, code: &str) -> TrustLevelId {
        service.level_by_code(code).unwrap().unwrap().id
    }

    #[test]
    fn seeding_is_idempotent() {
        let (service, _) = setup();
        assert_eq!(service.seed_system_levels().unwrap(), 0);

        let levels = service.all_levels().unwrap();
        assert_eq!(levels.len(), system_levels().len());
        assert!(levels.windows(2).all(|w| w[0].level <= w[1].level));
        assert!(levels.iter().all(|l| l.is_system));
    }

    #[test]
    fn user_without_grant_has_level_zero() {
        let (service, _) = setup();
        let user = UserId::new(1);

        assert!(service.user_trust_level(user, None).unwrap().is_none());
        assert_eq!(service.user_level(user, None).unwrap(), 0);
        assert!(!service.can_download(user, None).unwrap());
        assert!(!service.can_view_restricted(user, None).unwrap());
    }

    #[test]
    fn institution_grant_takes_precedence_over_global() {
        let (service, _) = setup();
        let user = UserId::new(7);
        let institution = InstitutionId::new(3);

        service
            .assign_trust_level(GrantAssignment::new(user, level_id(&service, "registered")))
            .unwrap();
        service
            .assign_trust_level(
                GrantAssignment::new(user, level_id(&service, "researcher"))
                    .for_institution(institution),
            )
            .unwrap();

        assert_eq!(service.user_level(user, Some(institution)).unwrap(), 3);
        // Other institutions fall back to the global grant.
        assert_eq!(
            service.user_level(user, Some(InstitutionId::new(4))).unwrap(),
            1
        );
        // Without an institution only the global grant counts.
        assert_eq!(service.user_level(user, None).unwrap(), 1);
    }

    #[test]
    fn expired_grant_is_not_effective() {
        let (service, clock) = setup();
        let user = UserId::new(9);

        service
            .assign_trust_level(
                GrantAssignment::new(user, level_id(&service, "contributor"))
                    .expires_at(clock.now() + Duration::hours(1)),
            )
            .unwrap();
        assert!(service.can_download(user, None).unwrap());

        clock.advance(Duration::hours(2));
        assert!(!service.can_download(user, None).unwrap());
        assert_eq!(service.user_level(user, None).unwrap(), 0);
    }

    #[test]
    fn reassignment_replaces_grant_for_same_scope() {
        let (service, _) = setup();
        let user = UserId::new(2);

        service
            .assign_trust_level(GrantAssignment::new(user, level_id(&service, "custodian")))
            .unwrap();
        service
            .assign_trust_level(GrantAssignment::new(user, level_id(&service, "registered")))
            .unwrap();
        assert_eq!(service.user_level(user, None).unwrap(), 1);

        assert!(service.remove_trust_level(user, None).unwrap());
        assert!(!service.remove_trust_level(user, None).unwrap());
        assert_eq!(service.user_level(user, None).unwrap(), 0);
    }

    #[test]
    fn system_levels_are_immutable() {
        let (service, _) = setup();
        let id = level_id(&service, "researcher");
        let before = service.level_by_id(id).unwrap().unwrap();

        let result = service.update_level(
            id,
            TrustLevelUpdate {
                can_download: Some(false),
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(AccessError::ImmutableResource { .. })));
        assert!(matches!(
            service.delete_level(id),
            Err(AccessError::ImmutableResource { .. })
        ));

        // No side effects.
        assert_eq!(service.level_by_id(id).unwrap().unwrap(), before);
    }

    #[test]
    fn custom_levels_can_be_updated_and_deleted() {
        let (service, _) = setup();
        let custom = service
            .create_level(NewTrustLevel::new("visiting", "Visiting Scholar", 2))
            .unwrap();
        assert!(!custom.is_system);

        let updated = service
            .update_level(
                custom.id,
                TrustLevelUpdate {
                    can_download: Some(true),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(updated.can_download);

        service.delete_level(custom.id).unwrap();
        assert!(service.level_by_id(custom.id).unwrap().is_none());
        assert!(matches!(
            service.delete_level(custom.id),
            Err(AccessError::NotFound { .. })
        ));
    }

    #[test]
    fn duplicate_codes_are_rejected() {
        let (service, _) = setup();
        let result = service.create_level(NewTrustLevel::new("public", "Another", 0));
        assert!(matches!(result, Err(AccessError::Validation(_))));
    }

    #[test]
    fn grant_for_unknown_level_is_rejected() {
        let (service, _) = setup();
        let result = service
            .assign_trust_level(GrantAssignment::new(UserId::new(1), TrustLevelId::new(999)));
        assert!(matches!(result, Err(AccessError::NotFound { .. })));
    }

    proptest! {
        /// Property: has_min_level(u, n) holds exactly when user_level(u) >= n,
        /// whatever mix of global and institutional grants the user holds.
        #[test]
        fn prop_min_level_is_monotonic(
            global in proptest::option::of(0usize..6),
            scoped in proptest::option::of(0usize..6),
            query_institution in any::<bool>(),
            threshold in 0u8..8,
        ) {
            let (service, _) = setup();
            let levels = service.all_levels().unwrap();
            let user = UserId::new(11);
            let institution = InstitutionId::new(5);

            if let Some(idx) = global {
                service.assign_trust_level(GrantAssignment::new(user, levels[idx].id)).unwrap();
            }
            if let Some(idx) = scoped {
                service
                    .assign_trust_level(
                        GrantAssignment::new(user, levels[idx].id).for_institution(institution),
                    )
                    .unwrap();
            }

            let scope = query_institution.then_some(institution);
            let level = service.user_level(user, scope).unwrap();
            prop_assert_eq!(
                service.has_min_level(user, threshold, scope).unwrap(),
                level >= threshold
            );
        }
    }
}
