//! # heritage-access: Access decisions for heritage records
//!
//! Decides, for an `(object, viewer, action)` triple, whether access is
//! permitted and why.
//!
//! # Architecture
//!
//! ```text
//!                     ┌──────────────────────────┐
//!   caller ─────────► │  AccessDecisionService   │ ──► AuditTrail ──► AuditSink
//!                     └──────────────────────────┘
//!                       │      │       │      │
//!          ┌────────────┘      │       │      └──────────────┐
//!          ▼                   ▼       ▼                     ▼
//!   EmbargoService  AccessRuleEvaluator  SensitivityFlagService  AccessRequestService
//!          │            │        │             │                     │
//!          ▼            ▼        ▼             ▼                     ▼
//!    EmbargoStore   RuleStore  TrustLevelService  SensitivityStore  RequestStore
//!                   CatalogHierarchy   │
//!                                      ▼
//!                                 TrustStore
//! ```
//!
//! Every collaborator is injected as a trait object, so the pipeline can run
//! against [`MemoryStore`] in tests and against a database in production.
//! Decisions only read; they never write.
//!
//! # Failure model
//!
//! "No embargo", "no rule" and "no grant" are ordinary outcomes. A store that
//! cannot answer is a [`StoreError`], and [`AccessDecisionService::check_access`]
//! turns any such failure into a denial with
//! [`DenialReason::EvaluationUnavailable`] rather than continuing as if
//! nothing applied.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use heritage_access::{AccessCore, AccessLevel, EmbargoType, MemoryStore, NewEmbargo, Stores};
//! use heritage_config::AccessConfig;
//! use heritage_types::{Action, ObjectId};
//!
//! let store = Arc::new(MemoryStore::new());
//! let core = AccessCore::with_system_clock(Stores::in_memory(store), &AccessConfig::default());
//!
//! let object = ObjectId::new(42);
//! core.embargoes
//!     .create(object, NewEmbargo::new(EmbargoType::Full))
//!     .unwrap();
//!
//! let decision = core.decisions.check_access(object, None, Action::View, None);
//! assert!(!decision.allowed);
//! assert_eq!(decision.level, AccessLevel::None);
//! ```

pub mod audit;
pub mod decision;
pub mod embargo;
pub mod engine;
pub mod error;
pub mod memory;
pub mod requests;
pub mod rules;
pub mod sensitivity;
pub mod store;
pub mod trust;

pub use audit::{AccessEvent, AuditQuery, AuditRecord, AuditTrail};
pub use decision::{AccessDecisionService, AccessLevel, Decision, DenialReason};
pub use embargo::{Embargo, EmbargoService, EmbargoStats, EmbargoType, EmbargoUpdate, NewEmbargo};
pub use engine::{AccessCore, Stores};
pub use error::{AccessError, Result, StoreError, StoreResult, Table};
pub use memory::MemoryStore;
pub use requests::{
    AccessRequest, AccessRequestService, ApprovalOptions, NewAccessRequest, RequestStats,
    RequestStatus,
};
pub use rules::{
    AccessRule, AccessRuleEvaluator, AppliesTo, NewAccessRule, ObjectPlacement, RuleScope,
    RuleType, RuleUpdate, Viewer,
};
pub use sensitivity::{
    AffectedField, DetectedBy, FlagFilter, FlagType, FlagUpdate, NewSensitivityFlag,
    SensitivityFlag, SensitivityFlagService, SensitivityStats, Severity,
};
pub use store::{
    AuditSink, CatalogHierarchy, EmbargoStore, RequestStore, RuleStore, SensitivityStore,
    TrustStore,
};
pub use trust::{
    GrantAssignment, NewTrustLevel, TrustLevel, TrustLevelService, TrustLevelUpdate,
    UserTrustGrant,
};
