//! The caller-facing operation surface over the four pipeline stages.
//!
//! [`IntentService`] owns the parser, compiler, router, and feedback
//! controller and keeps an in-memory record of submitted intents. Transport
//! layers (REST, CLI) consume this surface; nothing here knows about HTTP.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::enforce::{EnforcementResult, EnforcementRouter};
use crate::errors::{FeedbackError, ValidationFailure};
use crate::feedback::{recommendation_for, AdjustmentAction, FeedbackController, Satisfaction};
use crate::intent::parser::IntentParser;
use crate::intent::{ParsedIntent, RawIntent};
use crate::policy::compiler::PolicyCompiler;
use crate::policy::{Policy, PolicyIdSeq, PolicyKind};

/// A recorded intent submission: the parse result plus the policies it
/// compiled into. Kept in memory for the lifetime of the process.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubmittedIntent {
    pub id: String,
    pub submitted_at: DateTime<Utc>,
    pub parsed: ParsedIntent,
    pub policies: Vec<Policy>,
}

pub struct IntentService {
    parser: IntentParser,
    compiler: PolicyCompiler,
    router: EnforcementRouter,
    feedback: Arc<FeedbackController>,
    ids: Arc<PolicyIdSeq>,
    intents: Mutex<Vec<SubmittedIntent>>,
    intent_seq: AtomicU64,
}

impl IntentService {
    pub fn new(router: EnforcementRouter, feedback: Arc<FeedbackController>) -> Self {
        let ids = Arc::new(PolicyIdSeq::new());
        Self {
            parser: IntentParser::new(),
            compiler: PolicyCompiler::new(ids.clone()),
            router,
            feedback,
            ids,
            intents: Mutex::new(Vec::new()),
            intent_seq: AtomicU64::new(0),
        }
    }

    pub fn feedback(&self) -> &FeedbackController {
        &self.feedback
    }

    /// Parses, validates, and compiles one intent, recording the result.
    /// Compilation yielding zero policies is not an error; only an
    /// unclassifiable or parameterless intent is rejected.
    pub fn submit(&self, raw: &RawIntent) -> Result<SubmittedIntent, ValidationFailure> {
        let parsed = self.parser.parse_raw(raw);
        parsed.validate()?;

        let policies = self.compiler.compile(&parsed);
        let submitted = SubmittedIntent {
            id: self.next_intent_id(),
            submitted_at: Utc::now(),
            parsed,
            policies,
        };

        info!(
            intent_id = %submitted.id,
            kind = ?submitted.parsed.kind,
            policy_count = submitted.policies.len(),
            "intent submitted"
        );

        self.lock_intents().push(submitted.clone());
        Ok(submitted)
    }

    pub fn compile(&self, parsed: &ParsedIntent) -> Vec<Policy> {
        self.compiler.compile(parsed)
    }

    /// Dispatches each policy in order, collecting per-policy outcomes.
    /// A failed dispatch never aborts the batch.
    pub async fn dispatch(&self, policies: &[Policy]) -> Vec<EnforcementResult> {
        let mut results = Vec::with_capacity(policies.len());
        for policy in policies {
            results.push(self.router.apply(policy).await);
        }
        results
    }

    /// Submit followed by dispatch of everything the intent compiled into.
    pub async fn execute(
        &self,
        raw: &RawIntent,
    ) -> Result<(SubmittedIntent, Vec<EnforcementResult>), ValidationFailure> {
        let submitted = self.submit(raw)?;
        let results = self.dispatch(&submitted.policies).await;
        Ok((submitted, results))
    }

    pub fn register_goal(
        &self,
        intent_id: &str,
        target: Option<String>,
        goals: std::collections::BTreeMap<String, f64>,
    ) {
        self.feedback.register_goal(intent_id, target, goals);
    }

    pub fn deregister_goal(&self, intent_id: &str) -> bool {
        self.feedback.deregister_goal(intent_id)
    }

    pub async fn check_satisfaction(&self, intent_id: &str) -> Result<Satisfaction, FeedbackError> {
        self.feedback.check_intent_satisfaction(intent_id).await
    }

    pub async fn recommend(
        &self,
        intent_id: &str,
    ) -> Result<Vec<crate::feedback::Recommendation>, FeedbackError> {
        self.feedback.recommend_adjustments(intent_id).await
    }

    /// Opt-in loop closure: re-checks satisfaction and dispatches one
    /// corrective policy per violation. Bandwidth values come from the
    /// violated goal's threshold, not from the live observation, so a
    /// flapping metric cannot ratchet the rules.
    pub async fn apply_recommendations(
        &self,
        intent_id: &str,
    ) -> Result<Vec<EnforcementResult>, FeedbackError> {
        let goal = self
            .feedback
            .goal_for(intent_id)
            .ok_or_else(|| FeedbackError::UnknownIntent(intent_id.to_string()))?;
        let satisfaction = self.feedback.check_intent_satisfaction(intent_id).await?;

        let target = goal.target.as_deref().unwrap_or("all");
        let mut policies = Vec::new();
        for violation in &satisfaction.violations {
            let recommendation = recommendation_for(violation);
            info!(
                intent_id = %intent_id,
                action = ?recommendation.action,
                reason = %recommendation.reason,
                "applying corrective adjustment"
            );
            policies.extend(self.adjustment_policies(
                recommendation.action,
                target,
                violation.threshold,
            ));
        }

        Ok(self.dispatch(&policies).await)
    }

    fn adjustment_policies(
        &self,
        action: AdjustmentAction,
        target: &str,
        threshold: f64,
    ) -> Vec<Policy> {
        match action {
            AdjustmentAction::IncreasePriority => vec![
                Policy::new(
                    self.ids.next_id(),
                    PolicyKind::TrafficShaping,
                    target,
                    object(json!({
                        "class": "high_priority",
                        "rate": "100mbit",
                        "ceil": "200mbit",
                        "burst": "32k",
                    })),
                    9,
                ),
                Policy::new(
                    self.ids.next_id(),
                    PolicyKind::RoutingPriority,
                    target,
                    object(json!({ "tos": "0x10", "priority": "high" })),
                    8,
                ),
            ],
            // Grant 20% headroom above the violated floor.
            AdjustmentAction::IncreaseBandwidth => {
                let rate = format!("{}mbit", (threshold * 1.2).ceil().max(1.0) as u64);
                vec![Policy::new(
                    self.ids.next_id(),
                    PolicyKind::BandwidthLimit,
                    target,
                    object(json!({ "rate": &rate, "ceil": &rate, "burst": "15k" })),
                    8,
                )]
            }
            // Cap at the violated ceiling.
            AdjustmentAction::ThrottleBandwidth => {
                let rate = format!("{}mbit", threshold.floor().max(1.0) as u64);
                vec![Policy::new(
                    self.ids.next_id(),
                    PolicyKind::BandwidthLimit,
                    target,
                    object(json!({ "rate": &rate, "ceil": &rate, "burst": "15k" })),
                    8,
                )]
            }
        }
    }

    /// Snapshot of every recorded submission, oldest first.
    pub fn submitted_intents(&self) -> Vec<SubmittedIntent> {
        self.lock_intents().clone()
    }

    pub fn submitted_intent(&self, intent_id: &str) -> Option<SubmittedIntent> {
        self.lock_intents().iter().find(|intent| intent.id == intent_id).cloned()
    }

    fn next_intent_id(&self) -> String {
        let sequence = self.intent_seq.fetch_add(1, Ordering::Relaxed) + 1;
        format!("intent-{sequence}-{}", Utc::now().timestamp())
    }

    fn lock_intents(&self) -> std::sync::MutexGuard<'_, Vec<SubmittedIntent>> {
        match self.intents.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn object(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    match value {
        serde_json::Value::Object(map) => map,
        _ => serde_json::Map::new(),
    }
}
