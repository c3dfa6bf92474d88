//! Access rules: administrator-configured policies on objects, collections
//! and repositories.
//!
//! Candidate rules for a request are collected from the three scopes of the
//! object's placement in the catalog, filtered by action and by the viewer
//! population they target, and ordered by
//! `(scope specificity, priority, id)`. The first candidate governs.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use heritage_types::{
    Action, Clock, CollectionId, InstitutionId, ObjectId, RepositoryId, RuleId, UserId,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{AccessError, Result, StoreResult};
use crate::store::{CatalogHierarchy, RuleStore};
use crate::trust::{TrustLevel, TrustLevelService};

// ============================================================================
// Types
// ============================================================================

/// The catalog node a rule is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "id", rename_all = "snake_case")]
pub enum RuleScope {
    Object(ObjectId),
    Collection(CollectionId),
    Repository(RepositoryId),
}

impl RuleScope {
    /// Lower is narrower. Object rules outrank collection rules, which
    /// outrank repository rules.
    pub fn specificity(&self) -> u8 {
        match self {
            Self::Object(_) => 0,
            Self::Collection(_) => 1,
            Self::Repository(_) => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    /// Explicit exception; stops broader rules from applying but does not
    /// by itself grant access.
    Allow,
    Deny,
    /// Access only with an approved access request.
    RequireApproval,
}

/// The viewer population a rule targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AppliesTo {
    All,
    Authenticated,
    Anonymous,
    /// Authenticated viewers at or above `minimum`.
    TrustLevel { minimum: Option<u8> },
}

impl AppliesTo {
    /// `viewer_level` is `None` for an anonymous viewer.
    pub fn admits(&self, viewer_level: Option<u8>) -> bool {
        match (self, viewer_level) {
            (Self::All, _) => true,
            (Self::Authenticated, level) => level.is_some(),
            (Self::Anonymous, level) => level.is_none(),
            (Self::TrustLevel { .. }, None) => false,
            (Self::TrustLevel { minimum }, Some(level)) => minimum.is_none_or(|min| level >= min),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRule {
    pub id: RuleId,
    pub scope: RuleScope,
    pub action: Action,
    pub rule_type: RuleType,
    pub applies_to: AppliesTo,
    /// Lower is evaluated first within a scope.
    pub priority: i32,
    pub is_enabled: bool,
    /// Shown to the viewer when the rule denies access.
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AccessRule {
    fn sort_key(&self) -> (u8, i32, RuleId) {
        (self.scope.specificity(), self.priority, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAccessRule {
    pub scope: RuleScope,
    pub action: Action,
    pub rule_type: RuleType,
    pub applies_to: AppliesTo,
    pub priority: i32,
    pub notes: Option<String>,
}

impl NewAccessRule {
    pub fn new(scope: RuleScope, rule_type: RuleType) -> Self {
        Self {
            scope,
            action: Action::All,
            rule_type,
            applies_to: AppliesTo::All,
            priority: 100,
            notes: None,
        }
    }

    pub fn for_action(mut self, action: Action) -> Self {
        self.action = action;
        self
    }

    pub fn applies_to(mut self, applies_to: AppliesTo) -> Self {
        self.applies_to = applies_to;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RuleUpdate {
    pub scope: Option<RuleScope>,
    pub action: Option<Action>,
    pub rule_type: Option<RuleType>,
    pub applies_to: Option<AppliesTo>,
    pub priority: Option<i32>,
    pub notes: Option<String>,
}

/// Where an object sits in the catalog hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ObjectPlacement {
    pub collection_id: Option<CollectionId>,
    pub repository_id: Option<RepositoryId>,
}

/// The party a decision is made for.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Viewer {
    pub user_id: Option<UserId>,
    /// Effective trust level; `None` for anonymous viewers and for
    /// authenticated viewers without an effective grant.
    pub trust: Option<TrustLevel>,
}

impl Viewer {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is_anonymous(&self) -> bool {
        self.user_id.is_none()
    }

    /// Numeric level, `None` when anonymous. Authenticated viewers without a
    /// grant sit at 0.
    pub fn level(&self) -> Option<u8> {
        self.user_id
            .map(|_| self.trust.as_ref().map_or(0, |t| t.level))
    }

    pub fn can_download(&self) -> bool {
        self.trust.as_ref().is_some_and(|t| t.can_download)
    }
}

// ============================================================================
// Evaluator
// ============================================================================

#[derive(Debug, Clone)]
pub struct AccessRuleEvaluator {
    rules: Arc<dyn RuleStore>,
    catalog: Arc<dyn CatalogHierarchy>,
    trust: TrustLevelService,
    clock: Arc<dyn Clock>,
}

impl AccessRuleEvaluator {
    pub fn new(
        rules: Arc<dyn RuleStore>,
        catalog: Arc<dyn CatalogHierarchy>,
        trust: TrustLevelService,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            rules,
            catalog,
            trust,
            clock,
        }
    }

    /// The rule that governs `action` on `object_id` for the given viewer,
    /// or `None` when the rule layer has nothing to say.
    pub fn applicable_rule(
        &self,
        object_id: ObjectId,
        user_id: Option<UserId>,
        action: Action,
        institution_id: Option<InstitutionId>,
    ) -> StoreResult<Option<AccessRule>> {
        let trust = match user_id {
            Some(user) => self.trust.user_trust_level(user, institution_id)?,
            None => None,
        };
        let viewer = Viewer { user_id, trust };

        Ok(self.candidates(object_id, &viewer, action)?.into_iter().next())
    }

    /// Enabled rules matching the object, action and viewer, governing rule
    /// first.
    pub fn candidates(
        &self,
        object_id: ObjectId,
        viewer: &Viewer,
        action: Action,
    ) -> StoreResult<Vec<AccessRule>> {
        let level = viewer.level();
        let mut candidates: Vec<AccessRule> = self
            .scoped_rules(object_id)?
            .into_iter()
            .filter(|r| r.is_enabled && r.action.covers(action) && r.applies_to.admits(level))
            .collect();

        candidates.sort_by_key(AccessRule::sort_key);
        debug!(
            object_id = %object_id,
            action = action.as_str(),
            candidates = candidates.len(),
            "collected access rule candidates"
        );
        Ok(candidates)
    }

    // ------------------------------------------------------------------------
    // Administration
    // ------------------------------------------------------------------------

    pub fn rule(&self, id: RuleId) -> StoreResult<Option<AccessRule>> {
        self.rules.rule(id)
    }

    /// Every rule reaching the object, enabled or not, in evaluation order.
    pub fn rules_for_object(&self, object_id: ObjectId) -> StoreResult<Vec<AccessRule>> {
        let mut rules = self.scoped_rules(object_id)?;
        rules.sort_by_key(AccessRule::sort_key);
        Ok(rules)
    }

    pub fn create_rule(&self, new: NewAccessRule) -> Result<AccessRule> {
        let rule = self.rules.insert_rule(AccessRule {
            id: RuleId::new(0),
            scope: new.scope,
            action: new.action,
            rule_type: new.rule_type,
            applies_to: new.applies_to,
            priority: new.priority,
            is_enabled: true,
            notes: new.notes,
            created_at: self.clock.now(),
        })?;

        info!(id = %rule.id, scope = ?rule.scope, rule_type = ?rule.rule_type, "created access rule");
        Ok(rule)
    }

    pub fn update_rule(&self, id: RuleId, update: RuleUpdate) -> Result<AccessRule> {
        let rule = self
            .rules
            .modify_rule(id, &mut |rule| {
                if let Some(scope) = update.scope {
                    rule.scope = scope;
                }
                if let Some(action) = update.action {
                    rule.action = action;
                }
                if let Some(rule_type) = update.rule_type {
                    rule.rule_type = rule_type;
                }
                if let Some(applies_to) = update.applies_to {
                    rule.applies_to = applies_to;
                }
                if let Some(priority) = update.priority {
                    rule.priority = priority;
                }
                if let Some(notes) = &update.notes {
                    rule.notes = Some(notes.clone());
                }
                true
            })?
            .ok_or(AccessError::NotFound {
                kind: "access rule",
                id: id.as_u64(),
            })?;

        info!(id = %id, "updated access rule");
        Ok(rule)
    }

    /// Enables or disables a rule. Returns false for an unknown rule.
    pub fn set_enabled(&self, id: RuleId, enabled: bool) -> Result<bool> {
        let toggled = self
            .rules
            .modify_rule(id, &mut |rule| {
                rule.is_enabled = enabled;
                true
            })?
            .is_some();

        if toggled {
            info!(id = %id, enabled, "toggled access rule");
        }
        Ok(toggled)
    }

    pub fn delete_rule(&self, id: RuleId) -> Result<bool> {
        let deleted = self.rules.delete_rule(id)?;
        if deleted {
            info!(id = %id, "deleted access rule");
        }
        Ok(deleted)
    }

    fn scoped_rules(&self, object_id: ObjectId) -> StoreResult<Vec<AccessRule>> {
        let placement = self.catalog.placement(object_id)?.unwrap_or_default();

        let mut scopes = vec![RuleScope::Object(object_id)];
        scopes.extend(placement.collection_id.map(RuleScope::Collection));
        scopes.extend(placement.repository_id.map(RuleScope::Repository));

        self.rules.rules_in_scopes(&scopes)
    }
}
