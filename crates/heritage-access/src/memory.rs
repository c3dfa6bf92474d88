//! In-memory store implementing every persistence seam.
//!
//! All tables live behind one `RwLock`, so each trait method, including the
//! multi-row ones like [`EmbargoStore::replace_embargoes`], runs under a
//! single guard and is atomic with respect to every other call.
//!
//! Tables can be failed individually with [`MemoryStore::fail`]; every call
//! touching a failed table returns [`StoreError::Unavailable`] until
//! [`MemoryStore::heal`] is called.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use heritage_types::{
    AuditRecordId, EmbargoId, FlagId, GrantId, InstitutionId, ObjectId, RequestId, RuleId,
    TrustLevelId, UserId,
};

use crate::audit::{AuditQuery, AuditRecord};
use crate::embargo::Embargo;
use crate::error::{StoreError, StoreResult, Table};
use crate::requests::AccessRequest;
use crate::rules::{AccessRule, ObjectPlacement, RuleScope};
use crate::sensitivity::SensitivityFlag;
use crate::store::{
    AuditSink, CatalogHierarchy, EmbargoStore, RequestStore, RuleStore, SensitivityStore,
    TrustStore,
};
use crate::trust::{TrustLevel, UserTrustGrant};

#[derive(Debug, Default)]
struct Tables {
    next_id: u64,
    trust_levels: BTreeMap<TrustLevelId, TrustLevel>,
    grants: BTreeMap<GrantId, UserTrustGrant>,
    embargoes: BTreeMap<EmbargoId, Embargo>,
    rules: BTreeMap<RuleId, AccessRule>,
    flags: BTreeMap<FlagId, SensitivityFlag>,
    requests: BTreeMap<RequestId, AccessRequest>,
    audit: Vec<AuditRecord>,
    placements: HashMap<ObjectId, ObjectPlacement>,
}

impl Tables {
    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    failed: RwLock<HashSet<Table>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records where an object sits in the catalog.
    pub fn place_object(&self, object_id: ObjectId, placement: ObjectPlacement) {
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        tables.placements.insert(object_id, placement);
    }

    /// Makes every call touching `table` fail until healed.
    pub fn fail(&self, table: Table) {
        let mut failed = self.failed.write().unwrap_or_else(|e| e.into_inner());
        failed.insert(table);
    }

    pub fn heal(&self, table: Table) {
        let mut failed = self.failed.write().unwrap_or_else(|e| e.into_inner());
        failed.remove(&table);
    }

    pub fn heal_all(&self) {
        let mut failed = self.failed.write().unwrap_or_else(|e| e.into_inner());
        failed.clear();
    }

    fn check(&self, table: Table) -> StoreResult<()> {
        let failed = self
            .failed
            .read()
            .map_err(|_| StoreError::unavailable(table, "fault registry poisoned"))?;

        if failed.contains(&table) {
            return Err(StoreError::unavailable(table, "injected fault"));
        }
        Ok(())
    }

    fn read(&self, table: Table) -> StoreResult<RwLockReadGuard<'_, Tables>> {
        self.check(table)?;
        self.tables
            .read()
            .map_err(|_| StoreError::unavailable(table, "lock poisoned"))
    }

    fn write(&self, table: Table) -> StoreResult<RwLockWriteGuard<'_, Tables>> {
        self.check(table)?;
        self.tables
            .write()
            .map_err(|_| StoreError::unavailable(table, "lock poisoned"))
    }
}

/// Commits the edited copy only if `edit` accepts it.
fn modify_row<T: Clone>(
    row: Option<&mut T>,
    edit: &mut dyn FnMut(&mut T) -> bool,
) -> Option<T> {
    let row = row?;
    let mut draft = row.clone();
    if !edit(&mut draft) {
        return None;
    }
    *row = draft.clone();
    Some(draft)
}

// ============================================================================
// Trust
// ============================================================================

impl TrustStore for MemoryStore {
    fn trust_level(&self, id: TrustLevelId) -> StoreResult<Option<TrustLevel>> {
        Ok(self.read(Table::TrustLevel)?.trust_levels.get(&id).cloned())
    }

    fn trust_level_by_code(&self, code: &str) -> StoreResult<Option<TrustLevel>> {
        Ok(self
            .read(Table::TrustLevel)?
            .trust_levels
            .values()
            .find(|l| l.code == code)
            .cloned())
    }

    fn trust_levels(&self) -> StoreResult<Vec<TrustLevel>> {
        Ok(self
            .read(Table::TrustLevel)?
            .trust_levels
            .values()
            .cloned()
            .collect())
    }

    fn insert_trust_level(&self, mut level: TrustLevel) -> StoreResult<TrustLevel> {
        let mut tables = self.write(Table::TrustLevel)?;
        if tables.trust_levels.values().any(|l| l.code == level.code) {
            return Err(StoreError::Constraint(format!(
                "duplicate trust level code '{}'",
                level.code
            )));
        }

        level.id = TrustLevelId::new(tables.allocate());
        tables.trust_levels.insert(level.id, level.clone());
        Ok(level)
    }

    fn modify_trust_level(
        &self,
        id: TrustLevelId,
        edit: &mut dyn FnMut(&mut TrustLevel) -> bool,
    ) -> StoreResult<Option<TrustLevel>> {
        let mut tables = self.write(Table::TrustLevel)?;
        Ok(modify_row(tables.trust_levels.get_mut(&id), edit))
    }

    fn delete_trust_level(&self, id: TrustLevelId) -> StoreResult<bool> {
        Ok(self
            .write(Table::TrustLevel)?
            .trust_levels
            .remove(&id)
            .is_some())
    }

    fn grants_for_user(&self, user_id: UserId) -> StoreResult<Vec<UserTrustGrant>> {
        Ok(self
            .read(Table::UserTrustGrant)?
            .grants
            .values()
            .filter(|g| g.user_id == user_id)
            .cloned()
            .collect())
    }

    fn upsert_grant(&self, mut grant: UserTrustGrant) -> StoreResult<UserTrustGrant> {
        let mut tables = self.write(Table::UserTrustGrant)?;
        let existing = tables
            .grants
            .values()
            .find(|g| g.user_id == grant.user_id && g.institution_id == grant.institution_id)
            .map(|g| g.id);

        grant.id = match existing {
            Some(id) => id,
            None => GrantId::new(tables.allocate()),
        };
        tables.grants.insert(grant.id, grant.clone());
        Ok(grant)
    }

    fn delete_grant(
        &self,
        user_id: UserId,
        institution_id: Option<InstitutionId>,
    ) -> StoreResult<bool> {
        let mut tables = self.write(Table::UserTrustGrant)?;
        let before = tables.grants.len();
        tables
            .grants
            .retain(|_, g| !(g.user_id == user_id && g.institution_id == institution_id));
        Ok(tables.grants.len() < before)
    }
}

// ============================================================================
// Embargoes
// ============================================================================

impl EmbargoStore for MemoryStore {
    fn embargo(&self, id: EmbargoId) -> StoreResult<Option<Embargo>> {
        Ok(self.read(Table::Embargo)?.embargoes.get(&id).cloned())
    }

    fn embargoes_for_object(&self, object_id: ObjectId) -> StoreResult<Vec<Embargo>> {
        Ok(self
            .read(Table::Embargo)?
            .embargoes
            .values()
            .filter(|e| e.object_id == object_id)
            .cloned()
            .collect())
    }

    fn all_embargoes(&self) -> StoreResult<Vec<Embargo>> {
        Ok(self.read(Table::Embargo)?.embargoes.values().cloned().collect())
    }

    fn insert_embargo(&self, mut embargo: Embargo) -> StoreResult<Embargo> {
        let mut tables = self.write(Table::Embargo)?;
        embargo.id = EmbargoId::new(tables.allocate());
        tables.embargoes.insert(embargo.id, embargo.clone());
        Ok(embargo)
    }

    fn modify_embargo(
        &self,
        id: EmbargoId,
        edit: &mut dyn FnMut(&mut Embargo) -> bool,
    ) -> StoreResult<Option<Embargo>> {
        let mut tables = self.write(Table::Embargo)?;
        Ok(modify_row(tables.embargoes.get_mut(&id), edit))
    }

    fn delete_embargo(&self, id: EmbargoId) -> StoreResult<bool> {
        Ok(self.write(Table::Embargo)?.embargoes.remove(&id).is_some())
    }

    fn replace_embargoes(&self, mut embargo: Embargo) -> StoreResult<(usize, Embargo)> {
        let mut tables = self.write(Table::Embargo)?;
        let before = tables.embargoes.len();
        tables
            .embargoes
            .retain(|_, e| e.object_id != embargo.object_id);
        let removed = before - tables.embargoes.len();

        embargo.id = EmbargoId::new(tables.allocate());
        tables.embargoes.insert(embargo.id, embargo.clone());
        Ok((removed, embargo))
    }

    fn delete_embargoes_where(&self, predicate: &dyn Fn(&Embargo) -> bool) -> StoreResult<usize> {
        let mut tables = self.write(Table::Embargo)?;
        let before = tables.embargoes.len();
        tables.embargoes.retain(|_, e| !predicate(e));
        Ok(before - tables.embargoes.len())
    }
}

// ============================================================================
// Rules
// ============================================================================

impl RuleStore for MemoryStore {
    fn rule(&self, id: RuleId) -> StoreResult<Option<AccessRule>> {
        Ok(self.read(Table::AccessRule)?.rules.get(&id).cloned())
    }

    fn rules_in_scopes(&self, scopes: &[RuleScope]) -> StoreResult<Vec<AccessRule>> {
        Ok(self
            .read(Table::AccessRule)?
            .rules
            .values()
            .filter(|r| scopes.contains(&r.scope))
            .cloned()
            .collect())
    }

    fn insert_rule(&self, mut rule: AccessRule) -> StoreResult<AccessRule> {
        let mut tables = self.write(Table::AccessRule)?;
        rule.id = RuleId::new(tables.allocate());
        tables.rules.insert(rule.id, rule.clone());
        Ok(rule)
    }

    fn modify_rule(
        &self,
        id: RuleId,
        edit: &mut dyn FnMut(&mut AccessRule) -> bool,
    ) -> StoreResult<Option<AccessRule>> {
        let mut tables = self.write(Table::AccessRule)?;
        Ok(modify_row(tables.rules.get_mut(&id), edit))
    }

    fn delete_rule(&self, id: RuleId) -> StoreResult<bool> {
        Ok(self.write(Table::AccessRule)?.rules.remove(&id).is_some())
    }
}

// ============================================================================
// Sensitivity flags
// ============================================================================

impl SensitivityStore for MemoryStore {
    fn flag(&self, id: FlagId) -> StoreResult<Option<SensitivityFlag>> {
        Ok(self.read(Table::SensitivityFlag)?.flags.get(&id).cloned())
    }

    fn flags_for_object(&self, object_id: ObjectId) -> StoreResult<Vec<SensitivityFlag>> {
        Ok(self
            .read(Table::SensitivityFlag)?
            .flags
            .values()
            .filter(|f| f.object_id == object_id)
            .cloned()
            .collect())
    }

    fn all_flags(&self) -> StoreResult<Vec<SensitivityFlag>> {
        Ok(self
            .read(Table::SensitivityFlag)?
            .flags
            .values()
            .cloned()
            .collect())
    }

    fn insert_flag(&self, mut flag: SensitivityFlag) -> StoreResult<SensitivityFlag> {
        let mut tables = self.write(Table::SensitivityFlag)?;
        flag.id = FlagId::new(tables.allocate());
        tables.flags.insert(flag.id, flag.clone());
        Ok(flag)
    }

    fn modify_flag(
        &self,
        id: FlagId,
        edit: &mut dyn FnMut(&mut SensitivityFlag) -> bool,
    ) -> StoreResult<Option<SensitivityFlag>> {
        let mut tables = self.write(Table::SensitivityFlag)?;
        Ok(modify_row(tables.flags.get_mut(&id), edit))
    }

    fn delete_flag(&self, id: FlagId) -> StoreResult<bool> {
        Ok(self.write(Table::SensitivityFlag)?.flags.remove(&id).is_some())
    }
}

// ============================================================================
// Access requests
// ============================================================================

impl RequestStore for MemoryStore {
    fn request(&self, id: RequestId) -> StoreResult<Option<AccessRequest>> {
        Ok(self.read(Table::AccessRequest)?.requests.get(&id).cloned())
    }

    fn requests_for_user(&self, user_id: UserId) -> StoreResult<Vec<AccessRequest>> {
        Ok(self
            .read(Table::AccessRequest)?
            .requests
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect())
    }

    fn requests_for(
        &self,
        user_id: UserId,
        object_id: ObjectId,
    ) -> StoreResult<Vec<AccessRequest>> {
        Ok(self
            .read(Table::AccessRequest)?
            .requests
            .values()
            .filter(|r| r.user_id == user_id && r.object_id == object_id)
            .cloned()
            .collect())
    }

    fn all_requests(&self) -> StoreResult<Vec<AccessRequest>> {
        Ok(self
            .read(Table::AccessRequest)?
            .requests
            .values()
            .cloned()
            .collect())
    }

    fn insert_request(&self, mut request: AccessRequest) -> StoreResult<AccessRequest> {
        let mut tables = self.write(Table::AccessRequest)?;
        request.id = RequestId::new(tables.allocate());
        request.version = 0;
        tables.requests.insert(request.id, request.clone());
        Ok(request)
    }

    fn compare_and_swap_request(
        &self,
        request: &AccessRequest,
        expected_version: u64,
    ) -> StoreResult<AccessRequest> {
        let mut tables = self.write(Table::AccessRequest)?;
        let conflict = StoreError::Conflict {
            table: Table::AccessRequest,
            id: request.id.as_u64(),
        };

        let row = tables.requests.get_mut(&request.id).ok_or(conflict.clone())?;
        if row.version != expected_version {
            return Err(conflict);
        }

        *row = request.clone();
        row.version = expected_version + 1;
        Ok(row.clone())
    }
}

// ============================================================================
// Audit
// ============================================================================

impl AuditSink for MemoryStore {
    fn append(&self, mut record: AuditRecord) -> StoreResult<AuditRecord> {
        let mut tables = self.write(Table::AuditLog)?;
        record.id = AuditRecordId::new(tables.allocate());
        tables.audit.push(record.clone());
        Ok(record)
    }

    fn query(&self, query: &AuditQuery) -> StoreResult<Vec<AuditRecord>> {
        let tables = self.read(Table::AuditLog)?;
        let matching = tables.audit.iter().filter(|r| query.matches(r)).cloned();

        Ok(match query.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }
}

impl CatalogHierarchy for MemoryStore {
    fn placement(&self, object_id: ObjectId) -> StoreResult<Option<ObjectPlacement>> {
        Ok(self.read(Table::Catalog)?.placements.get(&object_id).copied())
    }
}
