//! Wiring of the services over a set of stores.

use std::sync::Arc;

use heritage_config::AccessConfig;
use heritage_types::{Clock, SystemClock};

use crate::audit::AuditTrail;
use crate::decision::AccessDecisionService;
use crate::embargo::EmbargoService;
use crate::memory::MemoryStore;
use crate::requests::AccessRequestService;
use crate::rules::AccessRuleEvaluator;
use crate::sensitivity::SensitivityFlagService;
use crate::store::{
    AuditSink, CatalogHierarchy, EmbargoStore, RequestStore, RuleStore, SensitivityStore,
    TrustStore,
};
use crate::trust::TrustLevelService;

/// The backends the access core runs on.
#[derive(Debug, Clone)]
pub struct Stores {
    pub trust: Arc<dyn TrustStore>,
    pub embargoes: Arc<dyn EmbargoStore>,
    pub rules: Arc<dyn RuleStore>,
    pub sensitivity: Arc<dyn SensitivityStore>,
    pub requests: Arc<dyn RequestStore>,
    pub audit: Arc<dyn AuditSink>,
    pub catalog: Arc<dyn CatalogHierarchy>,
}

impl Stores {
    /// Every table backed by the same in-memory store.
    pub fn in_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            trust: store.clone(),
            embargoes: store.clone(),
            rules: store.clone(),
            sensitivity: store.clone(),
            requests: store.clone(),
            audit: store.clone(),
            catalog: store,
        }
    }
}

/// Every service of the access core, sharing one clock and configuration.
#[derive(Debug, Clone)]
pub struct AccessCore {
    pub trust: TrustLevelService,
    pub embargoes: EmbargoService,
    pub rules: AccessRuleEvaluator,
    pub sensitivity: SensitivityFlagService,
    pub requests: AccessRequestService,
    pub audit: AuditTrail,
    pub decisions: AccessDecisionService,
}

impl AccessCore {
    pub fn new(stores: Stores, clock: Arc<dyn Clock>, config: &AccessConfig) -> Self {
        let trust = TrustLevelService::new(stores.trust, clock.clone());
        let embargoes =
            EmbargoService::new(stores.embargoes, clock.clone(), config.embargo.clone())
                .with_listing(config.listing.clone());
        let rules = AccessRuleEvaluator::new(
            stores.rules,
            stores.catalog,
            trust.clone(),
            clock.clone(),
        );
        let sensitivity = SensitivityFlagService::new(stores.sensitivity, clock.clone())
            .with_listing(config.listing.clone());
        let requests =
            AccessRequestService::new(stores.requests, clock.clone(), config.requests.clone())
                .with_listing(config.listing.clone());
        let audit = AuditTrail::new(stores.audit, clock, config.audit.clone());

        let decisions = AccessDecisionService::new(
            trust.clone(),
            embargoes.clone(),
            rules.clone(),
            sensitivity.clone(),
            requests.clone(),
            audit.clone(),
            config.decision.clone(),
        );

        Self {
            trust,
            embargoes,
            rules,
            sensitivity,
            requests,
            audit,
            decisions,
        }
    }

    /// Wall-clock core over the given stores.
    pub fn with_system_clock(stores: Stores, config: &AccessConfig) -> Self {
        Self::new(stores, Arc::new(SystemClock), config)
    }
}
