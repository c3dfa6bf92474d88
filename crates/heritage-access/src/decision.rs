//! The access decision pipeline.
//!
//! # Evaluation order
//!
//! ```text
//! embargo ─► access rule ─► sensitivity ─► download capability ─► anonymous gate ─► allow
//!   │            │              │                 │                     │
//!   └────────────┴──────────────┴─── first decisive step wins ──────────┘
//! ```
//!
//! 1. An active `full` embargo denies everything (`none`); a `digital_only`
//!    or `metadata_only` embargo denies downloads (`metadata_only`).
//! 2. The governing rule: `deny` blocks (`none`, or `login_required` when
//!    it targets anonymous viewers and the viewer is anonymous);
//!    `require_approval` allows only with an approved request
//!    (`request_required` otherwise). `allow` rules are not decisive.
//! 3. Authenticated viewers below the configured trust level are kept from
//!    objects with unresolved high or critical sensitivity flags
//!    (`restricted`).
//! 4. Authenticated viewers whose trust level lacks `can_download` may not
//!    download (`view_only`).
//! 5. Anonymous viewers are refused when any anonymous `deny` rule matches
//!    (`login_required`).
//! 6. Otherwise access is granted (`full`).
//!
//! Any store failure on the way closes the pipeline: [`check_access`]
//! denies with [`DenialReason::EvaluationUnavailable`].
//!
//! [`check_access`]: AccessDecisionService::check_access

use std::net::IpAddr;

use heritage_config::DecisionConfig;
use heritage_types::{Action, AuditRecordId, InstitutionId, ObjectId, RuleId, UserId};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::audit::{AccessEvent, AuditTrail};
use crate::embargo::{Embargo, EmbargoService, EmbargoType};
use crate::error::StoreResult;
use crate::requests::AccessRequestService;
use crate::rules::{AccessRule, AccessRuleEvaluator, AppliesTo, RuleType, Viewer};
use crate::sensitivity::SensitivityFlagService;
use crate::trust::TrustLevelService;

// ============================================================================
// Decision
// ============================================================================

/// How much of the object the viewer may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    None,
    MetadataOnly,
    RequestRequired,
    Restricted,
    ViewOnly,
    LoginRequired,
    Full,
}

/// Why access was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    Embargoed,
    DigitalContentEmbargoed,
    DeniedByRule,
    ApprovalRequired,
    SensitiveData,
    DownloadNotPermitted,
    LoginRequired,
    /// A store failed; the decision could not be determined.
    EvaluationUnavailable,
}

impl DenialReason {
    pub fn default_message(&self) -> &'static str {
        match self {
            Self::Embargoed => "This item is currently under embargo",
            Self::DigitalContentEmbargoed => "Digital content is embargoed",
            Self::DeniedByRule => "Access denied by policy",
            Self::ApprovalRequired => "Access requires approval",
            Self::SensitiveData => {
                "Access to sensitive personal data requires elevated trust level"
            }
            Self::DownloadNotPermitted => "Download permission not granted for your account",
            Self::LoginRequired => "Login required to access this content",
            Self::EvaluationUnavailable => {
                "Access cannot be determined at the moment, please try again later"
            }
        }
    }
}

/// Outcome of an access check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    pub reason: Option<DenialReason>,
    /// Human-readable explanation of a refusal.
    pub message: Option<String>,
    pub level: AccessLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embargo: Option<Embargo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<RuleId>,
    /// Whether the viewer could file an access request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_request: Option<bool>,
}

impl Decision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            message: None,
            level: AccessLevel::Full,
            embargo: None,
            rule_id: None,
            can_request: None,
        }
    }

    pub fn deny(level: AccessLevel, reason: DenialReason) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            message: Some(reason.default_message().to_string()),
            level,
            embargo: None,
            rule_id: None,
            can_request: None,
        }
    }

    fn with_embargo(mut self, embargo: Embargo) -> Self {
        self.embargo = Some(embargo);
        self
    }

    fn with_rule(mut self, rule: &AccessRule) -> Self {
        self.rule_id = Some(rule.id);
        self
    }

    fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    fn with_can_request(mut self, can_request: bool) -> Self {
        self.can_request = Some(can_request);
        self
    }
}

// ============================================================================
// Service
// ============================================================================

/// Orchestrates the collaborator services into one decision.
#[derive(Debug, Clone)]
pub struct AccessDecisionService {
    trust: TrustLevelService,
    embargoes: EmbargoService,
    rules: AccessRuleEvaluator,
    sensitivity: SensitivityFlagService,
    requests: AccessRequestService,
    audit: AuditTrail,
    config: DecisionConfig,
}

impl AccessDecisionService {
    pub fn new(
        trust: TrustLevelService,
        embargoes: EmbargoService,
        rules: AccessRuleEvaluator,
        sensitivity: SensitivityFlagService,
        requests: AccessRequestService,
        audit: AuditTrail,
        config: DecisionConfig,
    ) -> Self {
        Self {
            trust,
            embargoes,
            rules,
            sensitivity,
            requests,
            audit,
            config,
        }
    }

    /// Decides whether the viewer may perform `action` on the object.
    ///
    /// Never fails: a store failure yields a closed denial with
    /// [`DenialReason::EvaluationUnavailable`].
    pub fn check_access(
        &self,
        object_id: ObjectId,
        user_id: Option<UserId>,
        action: Action,
        institution_id: Option<InstitutionId>,
    ) -> Decision {
        match self.evaluate(object_id, user_id, action, institution_id) {
            Ok(decision) => {
                if decision.allowed {
                    info!(
                        object_id = %object_id,
                        user_id = ?user_id,
                        action = action.as_str(),
                        "access granted"
                    );
                } else {
                    warn!(
                        object_id = %object_id,
                        user_id = ?user_id,
                        action = action.as_str(),
                        level = ?decision.level,
                        reason = ?decision.reason,
                        "access denied"
                    );
                }
                decision
            }
            Err(e) => {
                error!(
                    object_id = %object_id,
                    user_id = ?user_id,
                    action = action.as_str(),
                    error = %e,
                    "access evaluation failed; denying"
                );
                Decision::deny(AccessLevel::None, DenialReason::EvaluationUnavailable)
            }
        }
    }

    /// Runs the pipeline, surfacing store failures instead of closing.
    pub fn evaluate(
        &self,
        object_id: ObjectId,
        user_id: Option<UserId>,
        action: Action,
        institution_id: Option<InstitutionId>,
    ) -> StoreResult<Decision> {
        // 1. Embargo
        if let Some(embargo) = self.embargoes.embargo(object_id)? {
            match embargo.embargo_type {
                EmbargoType::Full => {
                    return Ok(Decision::deny(AccessLevel::None, DenialReason::Embargoed)
                        .with_embargo(embargo));
                }
                EmbargoType::DigitalOnly | EmbargoType::MetadataOnly if action.is_download() => {
                    return Ok(Decision::deny(
                        AccessLevel::MetadataOnly,
                        DenialReason::DigitalContentEmbargoed,
                    )
                    .with_embargo(embargo));
                }
                EmbargoType::DigitalOnly | EmbargoType::MetadataOnly | EmbargoType::Custom => {}
            }
        }

        // 2. Access rule
        let trust = match user_id {
            Some(user) => self.trust.user_trust_level(user, institution_id)?,
            None => None,
        };
        let viewer = Viewer { user_id, trust };
        let candidates = self.rules.candidates(object_id, &viewer, action)?;

        if let Some(rule) = candidates.first() {
            match rule.rule_type {
                RuleType::Deny if is_anonymous_deny(rule) && viewer.is_anonymous() => {
                    return Ok(
                        Decision::deny(AccessLevel::LoginRequired, DenialReason::LoginRequired)
                            .with_rule(rule),
                    );
                }
                RuleType::Deny => {
                    let mut decision =
                        Decision::deny(AccessLevel::None, DenialReason::DeniedByRule)
                            .with_rule(rule);
                    if let Some(notes) = rule.notes.as_deref().filter(|n| !n.trim().is_empty()) {
                        decision = decision.with_message(notes);
                    }
                    return Ok(decision);
                }
                RuleType::RequireApproval => {
                    if let Some(user) = user_id
                        && self.requests.has_approved_access(user, object_id)?
                    {
                        let mut decision = Decision::allow();
                        decision.rule_id = Some(rule.id);
                        return Ok(decision);
                    }

                    return Ok(Decision::deny(
                        AccessLevel::RequestRequired,
                        DenialReason::ApprovalRequired,
                    )
                    .with_rule(rule)
                    .with_can_request(user_id.is_some()));
                }
                RuleType::Allow => {}
            }
        }

        if let Some(level) = viewer.level() {
            // 3. Sensitivity escalation
            if level < self.config.sensitive_min_trust_level
                && self.sensitivity.has_critical_popia_flags(object_id)?
            {
                return Ok(Decision::deny(AccessLevel::Restricted, DenialReason::SensitiveData));
            }

            // 4. Download capability
            if action.is_download() && !viewer.can_download() {
                return Ok(Decision::deny(
                    AccessLevel::ViewOnly,
                    DenialReason::DownloadNotPermitted,
                ));
            }
        } else if let Some(rule) = candidates.iter().find(|r| is_anonymous_deny(r)) {
            // 5. Anonymous gate
            return Ok(
                Decision::deny(AccessLevel::LoginRequired, DenialReason::LoginRequired)
                    .with_rule(rule),
            );
        }

        // 6. Default
        Ok(Decision::allow())
    }

    /// Appends an audit record for an access attempt.
    ///
    /// Independent of the decision itself. Returns `None` when auditing is
    /// disabled.
    pub fn log_access(
        &self,
        object_id: ObjectId,
        user_id: Option<UserId>,
        action: Action,
        allowed: bool,
        reason: Option<DenialReason>,
        ip_address: Option<IpAddr>,
    ) -> StoreResult<Option<AuditRecordId>> {
        let record = self.audit.record(AccessEvent {
            object_id,
            user_id,
            action,
            allowed,
            reason,
            ip_address,
        })?;
        Ok(record.map(|r| r.id))
    }

    /// Decides and audits in one call. A failed audit write is logged and
    /// does not change the decision.
    pub fn check_and_log(
        &self,
        object_id: ObjectId,
        user_id: Option<UserId>,
        action: Action,
        institution_id: Option<InstitutionId>,
        ip_address: Option<IpAddr>,
    ) -> Decision {
        let decision = self.check_access(object_id, user_id, action, institution_id);

        if let Err(e) = self.log_access(
            object_id,
            user_id,
            action,
            decision.allowed,
            decision.reason,
            ip_address,
        ) {
            error!(object_id = %object_id, error = %e, "failed to write access audit record");
        }

        decision
    }
}

fn is_anonymous_deny(rule: &AccessRule) -> bool {
    rule.rule_type == RuleType::Deny && rule.applies_to == AppliesTo::Anonymous
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_serializes_with_optional_fields_omitted() {
        let json = serde_json::to_value(Decision::allow()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "allowed": true,
                "reason": null,
                "message": null,
                "level": "full",
            })
        );
    }

    #[test]
    fn denial_carries_code_and_message() {
        let decision = Decision::deny(AccessLevel::RequestRequired, DenialReason::ApprovalRequired)
            .with_can_request(true);
        let json = serde_json::to_value(&decision).unwrap();

        assert_eq!(json["allowed"], false);
        assert_eq!(json["reason"], "approval_required");
        assert_eq!(json["message"], "Access requires approval");
        assert_eq!(json["level"], "request_required");
        assert_eq!(json["can_request"], true);
    }

    #[test]
    fn every_denial_reason_has_a_message() {
        let reasons = [
            DenialReason::Embargoed,
            DenialReason::DigitalContentEmbargoed,
            DenialReason::DeniedByRule,
            DenialReason::ApprovalRequired,
            DenialReason::SensitiveData,
            DenialReason::DownloadNotPermitted,
            DenialReason::LoginRequired,
            DenialReason::EvaluationUnavailable,
        ];
        assert!(reasons.iter().all(|r| !r.default_message().is_empty()));
    }
}
