//! Persistence seams of the access core.
//!
//! Each service receives its table as an `Arc<dyn ...Store>`. Stores fetch
//! and write rows; active windows, expiry, scope filtering and tie-breaks
//! are applied by the services.
//!
//! Insert methods ignore the `id` of the row they are given and return the
//! stored row with its assigned identifier.
//!
//! Edits go through `modify_*` methods, which hand the current row to a
//! closure and write the result under the same lock or transaction as the
//! read. A state check made inside the closure therefore cannot be
//! invalidated by a concurrent writer. The closure returns `false` to leave
//! the row untouched; the method then returns `None`, as it does for an
//! unknown id.

use std::fmt::Debug;

use heritage_types::{
    EmbargoId, FlagId, InstitutionId, ObjectId, RequestId, RuleId, TrustLevelId, UserId,
};

use crate::audit::{AuditQuery, AuditRecord};
use crate::embargo::Embargo;
use crate::error::StoreResult;
use crate::requests::AccessRequest;
use crate::rules::{AccessRule, ObjectPlacement, RuleScope};
use crate::sensitivity::SensitivityFlag;
use crate::trust::{TrustLevel, UserTrustGrant};

/// Trust levels and the grants that link users to them.
pub trait TrustStore: Send + Sync + Debug {
    fn trust_level(&self, id: TrustLevelId) -> StoreResult<Option<TrustLevel>>;

    fn trust_level_by_code(&self, code: &str) -> StoreResult<Option<TrustLevel>>;

    /// All levels, in no particular order.
    fn trust_levels(&self) -> StoreResult<Vec<TrustLevel>>;

    fn insert_trust_level(&self, level: TrustLevel) -> StoreResult<TrustLevel>;

    fn modify_trust_level(
        &self,
        id: TrustLevelId,
        edit: &mut dyn FnMut(&mut TrustLevel) -> bool,
    ) -> StoreResult<Option<TrustLevel>>;

    fn delete_trust_level(&self, id: TrustLevelId) -> StoreResult<bool>;

    /// Every grant recorded for the user, active or not.
    fn grants_for_user(&self, user_id: UserId) -> StoreResult<Vec<UserTrustGrant>>;

    /// Inserts or replaces the single grant keyed by `(user_id, institution_id)`.
    fn upsert_grant(&self, grant: UserTrustGrant) -> StoreResult<UserTrustGrant>;

    fn delete_grant(
        &self,
        user_id: UserId,
        institution_id: Option<InstitutionId>,
    ) -> StoreResult<bool>;
}

/// Time-bounded restrictions on objects.
pub trait EmbargoStore: Send + Sync + Debug {
    fn embargo(&self, id: EmbargoId) -> StoreResult<Option<Embargo>>;

    /// Every embargo row for the object, regardless of its window.
    fn embargoes_for_object(&self, object_id: ObjectId) -> StoreResult<Vec<Embargo>>;

    fn all_embargoes(&self) -> StoreResult<Vec<Embargo>>;

    fn insert_embargo(&self, embargo: Embargo) -> StoreResult<Embargo>;

    fn modify_embargo(
        &self,
        id: EmbargoId,
        edit: &mut dyn FnMut(&mut Embargo) -> bool,
    ) -> StoreResult<Option<Embargo>>;

    fn delete_embargo(&self, id: EmbargoId) -> StoreResult<bool>;

    /// Atomically removes every embargo on `embargo.object_id` and inserts
    /// `embargo`. Returns the number of rows removed and the new row.
    fn replace_embargoes(&self, embargo: Embargo) -> StoreResult<(usize, Embargo)>;

    /// Deletes every row matching `predicate` in one write. Returns the count.
    fn delete_embargoes_where(&self, predicate: &dyn Fn(&Embargo) -> bool) -> StoreResult<usize>;
}

/// Administrator-configured access rules.
pub trait RuleStore: Send + Sync + Debug {
    fn rule(&self, id: RuleId) -> StoreResult<Option<AccessRule>>;

    /// Every rule, enabled or not, whose scope is one of `scopes`.
    fn rules_in_scopes(&self, scopes: &[RuleScope]) -> StoreResult<Vec<AccessRule>>;

    fn insert_rule(&self, rule: AccessRule) -> StoreResult<AccessRule>;

    fn modify_rule(
        &self,
        id: RuleId,
        edit: &mut dyn FnMut(&mut AccessRule) -> bool,
    ) -> StoreResult<Option<AccessRule>>;

    fn delete_rule(&self, id: RuleId) -> StoreResult<bool>;
}

/// Personal-data sensitivity flags.
pub trait SensitivityStore: Send + Sync + Debug {
    fn flag(&self, id: FlagId) -> StoreResult<Option<SensitivityFlag>>;

    fn flags_for_object(&self, object_id: ObjectId) -> StoreResult<Vec<SensitivityFlag>>;

    fn all_flags(&self) -> StoreResult<Vec<SensitivityFlag>>;

    fn insert_flag(&self, flag: SensitivityFlag) -> StoreResult<SensitivityFlag>;

    fn modify_flag(
        &self,
        id: FlagId,
        edit: &mut dyn FnMut(&mut SensitivityFlag) -> bool,
    ) -> StoreResult<Option<SensitivityFlag>>;

    fn delete_flag(&self, id: FlagId) -> StoreResult<bool>;
}

/// Access request workflow rows.
pub trait RequestStore: Send + Sync + Debug {
    fn request(&self, id: RequestId) -> StoreResult<Option<AccessRequest>>;

    fn requests_for_user(&self, user_id: UserId) -> StoreResult<Vec<AccessRequest>>;

    fn requests_for(&self, user_id: UserId, object_id: ObjectId)
    -> StoreResult<Vec<AccessRequest>>;

    fn all_requests(&self) -> StoreResult<Vec<AccessRequest>>;

    fn insert_request(&self, request: AccessRequest) -> StoreResult<AccessRequest>;

    /// Writes `request` only if the stored row still carries
    /// `expected_version`; the stored version is then incremented.
    ///
    /// # Errors
    ///
    /// [`StoreError::Conflict`](crate::StoreError::Conflict) when the row has
    /// moved on since it was read.
    fn compare_and_swap_request(
        &self,
        request: &AccessRequest,
        expected_version: u64,
    ) -> StoreResult<AccessRequest>;
}

/// Append-only access audit trail. There is no update or delete.
pub trait AuditSink: Send + Sync + Debug {
    fn append(&self, record: AuditRecord) -> StoreResult<AuditRecord>;

    fn query(&self, query: &AuditQuery) -> StoreResult<Vec<AuditRecord>>;
}

/// Read-only view of the external catalog hierarchy.
pub trait CatalogHierarchy: Send + Sync + Debug {
    /// Parent collection and owning repository of an object, if catalogued.
    fn placement(&self, object_id: ObjectId) -> StoreResult<Option<ObjectPlacement>>;
}
