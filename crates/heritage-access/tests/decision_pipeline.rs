//! End-to-end decision scenarios against the in-memory store.

use std::net::IpAddr;
use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use heritage_access::{
    AccessCore, AccessLevel, AppliesTo, ApprovalOptions, AuditQuery, DenialReason, EmbargoType,
    FlagType, GrantAssignment, MemoryStore, NewAccessRequest, NewAccessRule, NewEmbargo,
    NewSensitivityFlag, NewTrustLevel, ObjectPlacement, RequestStatus, RuleScope, RuleType,
    Severity, Stores, Table,
};
use heritage_config::AccessConfig;
use heritage_types::{Action, CollectionId, FixedClock, ObjectId, RepositoryId, UserId};
use proptest::prelude::*;
use test_case::test_case;

const COLLECTION: CollectionId = CollectionId::new(500);
const REPOSITORY: RepositoryId = RepositoryId::new(900);
const ADMIN: UserId = UserId::new(1);

struct World {
    store: Arc<MemoryStore>,
    clock: Arc<FixedClock>,
    core: AccessCore,
}

impl World {
    fn new() -> Self {
        Self::with_config(AccessConfig::default())
    }

    fn with_config(config: AccessConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedClock::on(
            NaiveDate::from_ymd_opt(2025, 6, 15).expect("valid date"),
        ));
        let core = AccessCore::new(Stores::in_memory(store.clone()), clock.clone(), &config);
        core.trust.seed_system_levels().expect("seed levels");

        Self { store, clock, core }
    }

    fn today(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 15).expect("valid date")
    }

    /// An object filed in the shared collection and repository.
    fn object(&self, id: u64) -> ObjectId {
        let object = ObjectId::new(id);
        self.store.place_object(
            object,
            ObjectPlacement {
                collection_id: Some(COLLECTION),
                repository_id: Some(REPOSITORY),
            },
        );
        object
    }

    /// A user holding the named system level globally.
    fn user_at(&self, id: u64, code: &str) -> UserId {
        let user = UserId::new(id);
        let level = self
            .core
            .trust
            .level_by_code(code)
            .expect("store")
            .expect("seeded level");
        self.core
            .trust
            .assign_trust_level(GrantAssignment::new(user, level.id).granted_by(ADMIN))
            .expect("assign");
        user
    }

    fn rule(&self, new: NewAccessRule) {
        self.core.rules.create_rule(new).expect("create rule");
    }
}

// ============================================================================
// Embargo
// ============================================================================

#[test]
fn full_embargo_on_object_42_denies_anonymous_view() {
    let world = World::new();
    let object = world.object(42);
    world
        .core
        .embargoes
        .create(
            object,
            NewEmbargo::new(EmbargoType::Full).starting(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()),
        )
        .unwrap();

    let decision = world.core.decisions.check_access(object, None, Action::View, None);

    assert!(!decision.allowed);
    assert_eq!(decision.level, AccessLevel::None);
    assert_eq!(decision.reason, Some(DenialReason::Embargoed));
    assert!(decision.embargo.is_some());
}

#[test_case(Action::View, None ; "anonymous view")]
#[test_case(Action::Download, Some("administrator") ; "administrator download")]
#[test_case(Action::DownloadMaster, Some("custodian") ; "custodian master")]
#[test_case(Action::View, Some("researcher") ; "researcher view")]
fn full_embargo_denies_every_viewer(action: Action, level: Option<&str>) {
    let world = World::new();
    let object = world.object(1);
    let user = level.map(|code| world.user_at(2, code));
    world
        .core
        .embargoes
        .create(object, NewEmbargo::new(EmbargoType::Full))
        .unwrap();

    let decision = world.core.decisions.check_access(object, user, action, None);
    assert!(!decision.allowed);
    assert_eq!(decision.level, AccessLevel::None);
}

#[test_case(EmbargoType::DigitalOnly ; "digital only")]
#[test_case(EmbargoType::MetadataOnly ; "metadata only")]
fn partial_embargo_blocks_downloads_only(embargo_type: EmbargoType) {
    let world = World::new();
    let object = world.object(3);
    let user = world.user_at(2, "researcher");
    world
        .core
        .embargoes
        .create(object, NewEmbargo::new(embargo_type))
        .unwrap();

    let view = world.core.decisions.check_access(object, Some(user), Action::View, None);
    assert!(view.allowed);

    let download = world
        .core
        .decisions
        .check_access(object, Some(user), Action::Download, None);
    assert!(!download.allowed);
    assert_eq!(download.level, AccessLevel::MetadataOnly);
    assert_eq!(download.reason, Some(DenialReason::DigitalContentEmbargoed));
}

#[test]
fn lapsed_embargo_no_longer_applies() {
    let world = World::new();
    let object = world.object(4);
    world
        .core
        .embargoes
        .create(
            object,
            NewEmbargo::new(EmbargoType::Full).ending(world.today() + Duration::days(1)),
        )
        .unwrap();

    assert!(!world.core.decisions.check_access(object, None, Action::View, None).allowed);
    world.clock.advance(Duration::days(2));
    assert!(world.core.decisions.check_access(object, None, Action::View, None).allowed);
}

// ============================================================================
// Rules
// ============================================================================

#[test]
fn deny_rule_overrides_trust_and_capabilities() {
    let world = World::new();
    let object = world.object(5);
    let admin = world.user_at(2, "administrator");
    world.rule(
        NewAccessRule::new(RuleScope::Object(object), RuleType::Deny)
            .with_notes("Withdrawn at the request of the depositor"),
    );

    let decision = world
        .core
        .decisions
        .check_access(object, Some(admin), Action::View, None);

    assert!(!decision.allowed);
    assert_eq!(decision.level, AccessLevel::None);
    assert_eq!(decision.reason, Some(DenialReason::DeniedByRule));
    assert_eq!(
        decision.message.as_deref(),
        Some("Withdrawn at the request of the depositor")
    );
    assert!(decision.rule_id.is_some());
}

#[test]
fn object_allow_rule_shields_from_repository_deny() {
    let world = World::new();
    let object = world.object(6);
    let user = world.user_at(2, "registered");
    world.rule(NewAccessRule::new(RuleScope::Repository(REPOSITORY), RuleType::Deny).with_priority(0));
    world.rule(NewAccessRule::new(RuleScope::Object(object), RuleType::Allow).with_priority(50));

    let decision = world.core.decisions.check_access(object, Some(user), Action::View, None);
    assert!(decision.allowed);

    // A sibling without the exception stays blocked.
    let sibling = world.object(60);
    let blocked = world.core.decisions.check_access(sibling, Some(user), Action::View, None);
    assert_eq!(blocked.reason, Some(DenialReason::DeniedByRule));
}

#[test]
fn require_approval_without_request_offers_a_request() {
    let world = World::new();
    let object = world.object(8);
    let user = world.user_at(2, "researcher");
    world.rule(NewAccessRule::new(RuleScope::Collection(COLLECTION), RuleType::RequireApproval));

    let decision = world.core.decisions.check_access(object, Some(user), Action::View, None);
    assert!(!decision.allowed);
    assert_eq!(decision.level, AccessLevel::RequestRequired);
    assert_eq!(decision.can_request, Some(true));

    let anonymous = world.core.decisions.check_access(object, None, Action::View, None);
    assert_eq!(anonymous.level, AccessLevel::RequestRequired);
    assert_eq!(anonymous.can_request, Some(false));
}

#[test]
fn require_approval_with_approved_request_allows_until_expiry() {
    let world = World::new();
    let object = world.object(9);
    let user = world.user_at(2, "registered");
    world.rule(NewAccessRule::new(RuleScope::Object(object), RuleType::RequireApproval));

    let request = world
        .core
        .requests
        .create(NewAccessRequest::new(user, object, "Thesis research"))
        .unwrap();
    let options = ApprovalOptions {
        valid_until: Some(world.today() + Duration::days(10)),
        ..Default::default()
    };
    assert!(world.core.requests.approve(request.id, ADMIN, options).unwrap());

    let decision = world.core.decisions.check_access(object, Some(user), Action::View, None);
    assert!(decision.allowed);
    assert_eq!(decision.level, AccessLevel::Full);

    world.clock.advance(Duration::days(11));
    let expired = world.core.decisions.check_access(object, Some(user), Action::View, None);
    assert!(!expired.allowed);
    assert_eq!(expired.level, AccessLevel::RequestRequired);
}

#[test]
fn anonymous_deny_rule_requires_login() {
    let world = World::new();
    let object = world.object(10);
    world.rule(
        NewAccessRule::new(RuleScope::Object(object), RuleType::Deny)
            .applies_to(AppliesTo::Anonymous),
    );

    let anonymous = world.core.decisions.check_access(object, None, Action::View, None);
    assert!(!anonymous.allowed);
    assert_eq!(anonymous.level, AccessLevel::LoginRequired);
    assert_eq!(anonymous.reason, Some(DenialReason::LoginRequired));

    let user = world.user_at(2, "registered");
    let signed_in = world.core.decisions.check_access(object, Some(user), Action::View, None);
    assert!(signed_in.allowed);
}

#[test]
fn anonymous_gate_applies_beneath_an_allow_rule() {
    let world = World::new();
    let object = world.object(11);
    world.rule(NewAccessRule::new(RuleScope::Object(object), RuleType::Allow).with_priority(1));
    world.rule(
        NewAccessRule::new(RuleScope::Collection(COLLECTION), RuleType::Deny)
            .applies_to(AppliesTo::Anonymous),
    );

    let decision = world.core.decisions.check_access(object, None, Action::View, None);
    assert_eq!(decision.level, AccessLevel::LoginRequired);
}

// ============================================================================
// Trust and sensitivity
// ============================================================================

#[test_case("contributor", false ; "level two is restricted")]
#[test_case("researcher", true ; "level three is admitted")]
fn critical_flag_requires_elevated_trust(code: &str, allowed: bool) {
    let world = World::new();
    let object = world.object(12);
    let user = world.user_at(2, code);
    world
        .core
        .sensitivity
        .create_flag(object, NewSensitivityFlag::new(FlagType::Health, Severity::Critical))
        .unwrap();

    let decision = world.core.decisions.check_access(object, Some(user), Action::View, None);
    assert_eq!(decision.allowed, allowed);
    if !allowed {
        assert_eq!(decision.level, AccessLevel::Restricted);
        assert_eq!(decision.reason, Some(DenialReason::SensitiveData));
    }
}

#[test]
fn sensitivity_threshold_follows_configuration() {
    let mut config = AccessConfig::default();
    config.decision.sensitive_min_trust_level = 4;
    let world = World::with_config(config);
    let object = world.object(13);
    let user = world.user_at(2, "researcher");
    world
        .core
        .sensitivity
        .create_flag(object, NewSensitivityFlag::new(FlagType::Criminal, Severity::High))
        .unwrap();

    let decision = world.core.decisions.check_access(object, Some(user), Action::View, None);
    assert_eq!(decision.level, AccessLevel::Restricted);
}

#[test]
fn object_7_download_without_capability_is_view_only() {
    let world = World::new();
    let object = world.object(7);
    let level = world
        .core
        .trust
        .create_level(NewTrustLevel::new("reading_room", "Reading Room", 2))
        .unwrap();
    let user = UserId::new(20);
    world
        .core
        .trust
        .assign_trust_level(GrantAssignment::new(user, level.id))
        .unwrap();

    let decision = world
        .core
        .decisions
        .check_access(object, Some(user), Action::Download, None);
    assert!(!decision.allowed);
    assert_eq!(decision.level, AccessLevel::ViewOnly);
    assert_eq!(decision.reason, Some(DenialReason::DownloadNotPermitted));

    let view = world.core.decisions.check_access(object, Some(user), Action::View, None);
    assert!(view.allowed);
}

#[test]
fn signed_in_user_without_grant_cannot_download() {
    let world = World::new();
    let object = world.object(14);

    let decision = world
        .core
        .decisions
        .check_access(object, Some(UserId::new(77)), Action::Download, None);
    assert_eq!(decision.level, AccessLevel::ViewOnly);
}

#[test]
fn unrestricted_object_is_fully_accessible() {
    let world = World::new();
    let object = world.object(15);

    let decision = world.core.decisions.check_access(object, None, Action::View, None);
    assert!(decision.allowed);
    assert_eq!(decision.level, AccessLevel::Full);
    assert!(decision.reason.is_none());
}

// ============================================================================
// Request workflow
// ============================================================================

#[test]
fn default_approval_window_then_withdraw_is_refused() {
    let world = World::new();
    let object = world.object(16);
    let requester = world.user_at(2, "registered");
    let request = world
        .core
        .requests
        .create(NewAccessRequest::new(requester, object, "Provenance research"))
        .unwrap();

    assert!(world
        .core
        .requests
        .approve(request.id, ADMIN, ApprovalOptions::default())
        .unwrap());
    let approved = world.core.requests.request(request.id).unwrap().unwrap();
    assert_eq!(approved.valid_until, Some(world.today() + Duration::days(90)));

    assert!(!world.core.requests.withdraw(request.id, requester).unwrap());
    assert_eq!(
        world.core.requests.request(request.id).unwrap().unwrap().status,
        RequestStatus::Approved
    );
}

// ============================================================================
// Fail closed
// ============================================================================

#[test_case(Table::Embargo ; "embargo")]
#[test_case(Table::AccessRule ; "access rule")]
#[test_case(Table::Catalog ; "catalog")]
#[test_case(Table::UserTrustGrant ; "trust grant")]
#[test_case(Table::TrustLevel ; "trust level")]
#[test_case(Table::SensitivityFlag ; "sensitivity flag")]
fn store_failure_denies(table: Table) {
    let world = World::new();
    let object = world.object(17);
    let user = world.user_at(2, "registered");
    assert!(world.core.decisions.check_access(object, Some(user), Action::View, None).allowed);

    world.store.fail(table);
    let decision = world.core.decisions.check_access(object, Some(user), Action::View, None);

    assert!(!decision.allowed);
    assert_eq!(decision.level, AccessLevel::None);
    assert_eq!(decision.reason, Some(DenialReason::EvaluationUnavailable));
    assert!(world.core.decisions.evaluate(object, Some(user), Action::View, None).is_err());
}

#[test]
fn request_store_failure_denies_approval_gated_object() {
    let world = World::new();
    let object = world.object(18);
    let user = world.user_at(2, "registered");
    world.rule(NewAccessRule::new(RuleScope::Object(object), RuleType::RequireApproval));

    world.store.fail(Table::AccessRequest);
    let decision = world.core.decisions.check_access(object, Some(user), Action::View, None);
    assert_eq!(decision.reason, Some(DenialReason::EvaluationUnavailable));

    world.store.heal_all();
    let decision = world.core.decisions.check_access(object, Some(user), Action::View, None);
    assert_eq!(decision.reason, Some(DenialReason::ApprovalRequired));
}

// ============================================================================
// Audit
// ============================================================================

#[test]
fn check_and_log_records_the_outcome() {
    let world = World::new();
    let object = world.object(19);
    world
        .core
        .embargoes
        .create(object, NewEmbargo::new(EmbargoType::Full))
        .unwrap();
    let ip = IpAddr::from([198, 51, 100, 7]);

    let decision = world
        .core
        .decisions
        .check_and_log(object, None, Action::View, None, Some(ip));
    assert!(!decision.allowed);

    let records = world
        .core
        .audit
        .query(&AuditQuery::default().with_object(object))
        .unwrap();
    assert_eq!(records.len(), 1);
    assert!(!records[0].allowed);
    assert_eq!(records[0].reason, Some(DenialReason::Embargoed));
    assert_eq!(records[0].ip_address, Some(ip));
}

#[test]
fn audit_failure_does_not_change_the_decision() {
    let world = World::new();
    let object = world.object(21);
    world.store.fail(Table::AuditLog);

    let decision = world
        .core
        .decisions
        .check_and_log(object, None, Action::View, None, None);
    assert!(decision.allowed);
    assert!(world
        .core
        .decisions
        .log_access(object, None, Action::View, true, None, None)
        .is_err());
}

// ============================================================================
// Properties
// ============================================================================

fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![
        Just(Action::View),
        Just(Action::Download),
        Just(Action::DownloadMaster),
        Just(Action::All),
    ]
}

proptest! {
    /// Property: an active full embargo denies every action for every viewer,
    /// whatever rules, flags and approvals exist alongside it.
    #[test]
    fn prop_full_embargo_always_denies(
        action in action_strategy(),
        level in proptest::option::of(0usize..6),
        allow_rule in any::<bool>(),
        approved in any::<bool>(),
    ) {
        let world = World::new();
        let object = world.object(100);
        let levels = world.core.trust.all_levels().unwrap();

        let user = level.map(|idx| {
            let user = UserId::new(2);
            world
                .core
                .trust
                .assign_trust_level(GrantAssignment::new(user, levels[idx].id))
                .unwrap();
            user
        });

        if allow_rule {
            world.rule(NewAccessRule::new(RuleScope::Object(object), RuleType::Allow));
        }
        if let (Some(user), true) = (user, approved) {
            let request = world
                .core
                .requests
                .create(NewAccessRequest::new(user, object, "Research"))
                .unwrap();
            world.core.requests.approve(request.id, ADMIN, ApprovalOptions::default()).unwrap();
        }
        world
            .core
            .embargoes
            .create(object, NewEmbargo::new(EmbargoType::Full))
            .unwrap();

        let decision = world.core.decisions.check_access(object, user, action, None);
        prop_assert!(!decision.allowed);
        prop_assert_eq!(decision.level, AccessLevel::None);
    }

    /// Property: a deny rule wins over any trust level for every action.
    #[test]
    fn prop_deny_rule_beats_trust(
        action in action_strategy(),
        level in 0usize..6,
        priority in -100i32..100,
    ) {
        let world = World::new();
        let object = world.object(101);
        let levels = world.core.trust.all_levels().unwrap();
        let user = UserId::new(3);
        world
            .core
            .trust
            .assign_trust_level(GrantAssignment::new(user, levels[level].id))
            .unwrap();
        world.rule(
            NewAccessRule::new(RuleScope::Repository(REPOSITORY), RuleType::Deny)
                .with_priority(priority),
        );

        let decision = world.core.decisions.check_access(object, Some(user), action, None);
        prop_assert!(!decision.allowed);
        prop_assert_eq!(decision.reason, Some(DenialReason::DeniedByRule));
    }
}
