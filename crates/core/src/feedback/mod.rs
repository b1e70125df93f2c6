//! Goal-satisfaction feedback.
//!
//! Goals are registered explicitly per intent, never derived automatically
//! from submission. On every check the controller pulls a fresh metric
//! snapshot from the metrics collaborator and re-derives satisfaction; no
//! satisfaction state is kept between ticks. The controller never dispatches
//! adjustments itself. Closing the loop is the orchestrating caller's
//! opt-in, performed on its own timer.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::{FeedbackError, MetricsError};

/// Pull-style metrics collaborator. Returns the single current value for a
/// metric, `None` when the series has no current sample.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn current_value(
        &self,
        metric: &str,
        target: Option<&str>,
    ) -> Result<Option<f64>, MetricsError>;
}

/// Metric/threshold pairs an intent is expected to maintain. In-memory
/// lifetime only; gone on deregistration or restart.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntentGoal {
    pub intent_id: String,
    pub target: Option<String>,
    pub goals: BTreeMap<String, f64>,
    pub registered_at: DateTime<Utc>,
}

/// One observed metric breaching its registered threshold.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub metric: String,
    pub threshold: f64,
    pub observed: f64,
}

/// Freshly derived satisfaction verdict for one intent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Satisfaction {
    pub intent_id: String,
    pub satisfied: bool,
    pub violations: Vec<Violation>,
}

/// Advisory corrective action. The core never assumes auto-apply.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentAction {
    IncreasePriority,
    IncreaseBandwidth,
    ThrottleBandwidth,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub action: AdjustmentAction,
    pub reason: String,
    /// Absolute gap between observed value and threshold, when meaningful.
    pub magnitude: Option<f64>,
}

/// Which side of the threshold counts as satisfied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GoalDirection {
    AtMost,
    AtLeast,
}

impl GoalDirection {
    fn satisfied(self, observed: f64, threshold: f64) -> bool {
        match self {
            GoalDirection::AtMost => observed <= threshold,
            GoalDirection::AtLeast => observed >= threshold,
        }
    }
}

/// Fragment-based direction fallback, consulted after the `max_`/`min_`
/// prefixes. Kept table-driven so new metric families are one row, not a
/// new call site.
const DIRECTION_FRAGMENTS: &[(&str, GoalDirection)] = &[
    ("latency", GoalDirection::AtMost),
    ("throughput", GoalDirection::AtLeast),
    ("bandwidth", GoalDirection::AtLeast),
];

/// Fixed metric-fragment + direction to corrective-action table. Evaluated
/// in order; first matching row wins.
const METRIC_RULES: &[(&str, GoalDirection, AdjustmentAction)] = &[
    ("latency", GoalDirection::AtMost, AdjustmentAction::IncreasePriority),
    ("throughput", GoalDirection::AtLeast, AdjustmentAction::IncreaseBandwidth),
    ("throughput", GoalDirection::AtMost, AdjustmentAction::ThrottleBandwidth),
    ("bandwidth", GoalDirection::AtLeast, AdjustmentAction::IncreaseBandwidth),
    ("bandwidth", GoalDirection::AtMost, AdjustmentAction::ThrottleBandwidth),
];

/// Comparison direction for a metric name. `max_`/`min_` prefixes are
/// authoritative; otherwise the name's fragment decides, defaulting to
/// an upper bound.
pub fn direction_for(metric: &str) -> GoalDirection {
    if metric.starts_with("max_") {
        return GoalDirection::AtMost;
    }
    if metric.starts_with("min_") {
        return GoalDirection::AtLeast;
    }
    for (fragment, direction) in DIRECTION_FRAGMENTS {
        if metric.contains(fragment) {
            return *direction;
        }
    }
    GoalDirection::AtMost
}

fn action_for(metric: &str, direction: GoalDirection) -> AdjustmentAction {
    for (fragment, rule_direction, action) in METRIC_RULES {
        if metric.contains(fragment) && *rule_direction == direction {
            return *action;
        }
    }
    AdjustmentAction::IncreasePriority
}

/// The corrective action for one violation, from the fixed metric table.
pub fn recommendation_for(violation: &Violation) -> Recommendation {
    let direction = direction_for(&violation.metric);
    Recommendation {
        action: action_for(&violation.metric, direction),
        reason: format!(
            "{} observed {} against threshold {}",
            violation.metric, violation.observed, violation.threshold
        ),
        magnitude: Some((violation.observed - violation.threshold).abs()),
    }
}

/// Registry of per-intent goals plus the satisfaction/recommendation
/// derivations over them.
pub struct FeedbackController {
    metrics: Arc<dyn MetricsSource>,
    goals: Mutex<BTreeMap<String, IntentGoal>>,
}

impl FeedbackController {
    pub fn new(metrics: Arc<dyn MetricsSource>) -> Self {
        Self { metrics, goals: Mutex::new(BTreeMap::new()) }
    }

    /// Registers (or replaces) the goals tracked for an intent.
    pub fn register_goal(
        &self,
        intent_id: impl Into<String>,
        target: Option<String>,
        goals: BTreeMap<String, f64>,
    ) {
        let intent_id = intent_id.into();
        info!(intent_id = %intent_id, goal_count = goals.len(), "intent goals registered");
        let goal = IntentGoal { intent_id: intent_id.clone(), target, goals, registered_at: Utc::now() };
        self.lock_goals().insert(intent_id, goal);
    }

    /// Removes an intent from feedback tracking. Returns whether it was
    /// registered.
    pub fn deregister_goal(&self, intent_id: &str) -> bool {
        let removed = self.lock_goals().remove(intent_id).is_some();
        if removed {
            info!(intent_id = %intent_id, "intent goals deregistered");
        }
        removed
    }

    /// Intent ids currently under feedback tracking, snapshot at call time.
    pub fn registered_intents(&self) -> Vec<String> {
        self.lock_goals().keys().cloned().collect()
    }

    pub fn goal_for(&self, intent_id: &str) -> Option<IntentGoal> {
        self.lock_goals().get(intent_id).cloned()
    }

    /// Re-derives satisfaction for one intent from a fresh metric snapshot.
    /// A metric with no current sample, or whose fetch fails, is skipped;
    /// the remaining goals are still evaluated.
    pub async fn check_intent_satisfaction(
        &self,
        intent_id: &str,
    ) -> Result<Satisfaction, FeedbackError> {
        let goal = self
            .goal_for(intent_id)
            .ok_or_else(|| FeedbackError::UnknownIntent(intent_id.to_string()))?;

        let mut violations = Vec::new();
        for (metric, threshold) in &goal.goals {
            let observed = match self.metrics.current_value(metric, goal.target.as_deref()).await {
                Ok(Some(value)) => value,
                Ok(None) => {
                    debug!(intent_id = %intent_id, metric = %metric, "no current sample; goal skipped");
                    continue;
                }
                Err(error) => {
                    warn!(
                        intent_id = %intent_id,
                        metric = %metric,
                        error = %error,
                        "metric fetch failed; goal skipped"
                    );
                    continue;
                }
            };

            if !direction_for(metric).satisfied(observed, *threshold) {
                violations.push(Violation {
                    metric: metric.clone(),
                    threshold: *threshold,
                    observed,
                });
            }
        }

        Ok(Satisfaction {
            intent_id: intent_id.to_string(),
            satisfied: violations.is_empty(),
            violations,
        })
    }

    /// One recommendation per violation, in table order. Duplicate actions
    /// across simultaneously violated metrics are kept as-is.
    pub async fn recommend_adjustments(
        &self,
        intent_id: &str,
    ) -> Result<Vec<Recommendation>, FeedbackError> {
        let satisfaction = self.check_intent_satisfaction(intent_id).await?;
        Ok(satisfaction.violations.iter().map(recommendation_for).collect())
    }

    fn lock_goals(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, IntentGoal>> {
        match self.goals.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::{
        direction_for, AdjustmentAction, FeedbackController, GoalDirection, MetricsSource,
    };
    use crate::errors::{FeedbackError, MetricsError};

    #[derive(Default)]
    struct ScriptedMetrics {
        values: BTreeMap<String, Option<f64>>,
        failing: Vec<String>,
    }

    impl ScriptedMetrics {
        fn with(mut self, metric: &str, value: f64) -> Self {
            self.values.insert(metric.to_string(), Some(value));
            self
        }

        fn absent(mut self, metric: &str) -> Self {
            self.values.insert(metric.to_string(), None);
            self
        }

        fn failing(mut self, metric: &str) -> Self {
            self.failing.push(metric.to_string());
            self
        }
    }

    #[async_trait]
    impl MetricsSource for ScriptedMetrics {
        async fn current_value(
            &self,
            metric: &str,
            _target: Option<&str>,
        ) -> Result<Option<f64>, MetricsError> {
            if self.failing.iter().any(|name| name == metric) {
                return Err(MetricsError::Unreachable("connection refused".to_string()));
            }
            Ok(self.values.get(metric).copied().flatten())
        }
    }

    fn controller(metrics: ScriptedMetrics) -> FeedbackController {
        FeedbackController::new(Arc::new(metrics))
    }

    fn goals(entries: &[(&str, f64)]) -> BTreeMap<String, f64> {
        entries.iter().map(|(metric, threshold)| ((*metric).to_string(), *threshold)).collect()
    }

    #[tokio::test]
    async fn latency_above_threshold_is_a_violation() {
        let controller = controller(ScriptedMetrics::default().with("max_latency", 150.0));
        controller.register_goal("intent-1", Some("node-3".to_string()), goals(&[("max_latency", 50.0)]));

        let satisfaction = controller.check_intent_satisfaction("intent-1").await.unwrap();

        assert!(!satisfaction.satisfied);
        assert_eq!(satisfaction.violations.len(), 1);
        assert_eq!(satisfaction.violations[0].metric, "max_latency");
        assert_eq!(satisfaction.violations[0].threshold, 50.0);
        assert_eq!(satisfaction.violations[0].observed, 150.0);
    }

    #[tokio::test]
    async fn goals_within_threshold_are_satisfied() {
        let metrics = ScriptedMetrics::default()
            .with("max_latency", 30.0)
            .with("min_throughput", 120.0);
        let controller = controller(metrics);
        controller.register_goal(
            "intent-1",
            None,
            goals(&[("max_latency", 50.0), ("min_throughput", 100.0)]),
        );

        let satisfaction = controller.check_intent_satisfaction("intent-1").await.unwrap();
        assert!(satisfaction.satisfied);
        assert!(satisfaction.violations.is_empty());
    }

    #[tokio::test]
    async fn throughput_shortfall_recommends_more_bandwidth() {
        let controller = controller(ScriptedMetrics::default().with("min_throughput", 40.0));
        controller.register_goal("intent-1", None, goals(&[("min_throughput", 100.0)]));

        let recommendations = controller.recommend_adjustments("intent-1").await.unwrap();

        assert_eq!(recommendations.len(), 1);
        assert_eq!(recommendations[0].action, AdjustmentAction::IncreaseBandwidth);
        assert_eq!(recommendations[0].magnitude, Some(60.0));
    }

    #[tokio::test]
    async fn throughput_ceiling_breach_recommends_throttling() {
        let controller = controller(ScriptedMetrics::default().with("max_throughput", 250.0));
        controller.register_goal("intent-1", None, goals(&[("max_throughput", 200.0)]));

        let recommendations = controller.recommend_adjustments("intent-1").await.unwrap();
        assert_eq!(recommendations[0].action, AdjustmentAction::ThrottleBandwidth);
    }

    #[tokio::test]
    async fn duplicate_actions_across_violations_are_preserved() {
        let metrics = ScriptedMetrics::default()
            .with("max_latency", 150.0)
            .with("p99_latency", 400.0);
        let controller = controller(metrics);
        controller.register_goal(
            "intent-1",
            None,
            goals(&[("max_latency", 50.0), ("p99_latency", 200.0)]),
        );

        let recommendations = controller.recommend_adjustments("intent-1").await.unwrap();

        assert_eq!(recommendations.len(), 2);
        assert!(recommendations
            .iter()
            .all(|rec| rec.action == AdjustmentAction::IncreasePriority));
    }

    #[tokio::test]
    async fn absent_and_failing_metrics_are_skipped_not_fatal() {
        let metrics = ScriptedMetrics::default()
            .absent("max_latency")
            .failing("min_throughput")
            .with("max_jitter", 90.0);
        let controller = controller(metrics);
        controller.register_goal(
            "intent-1",
            None,
            goals(&[("max_latency", 50.0), ("min_throughput", 100.0), ("max_jitter", 20.0)]),
        );

        let satisfaction = controller.check_intent_satisfaction("intent-1").await.unwrap();

        assert_eq!(satisfaction.violations.len(), 1);
        assert_eq!(satisfaction.violations[0].metric, "max_jitter");
    }

    #[tokio::test]
    async fn unknown_intent_is_an_error() {
        let controller = controller(ScriptedMetrics::default());
        let result = controller.check_intent_satisfaction("intent-missing").await;
        assert!(matches!(result, Err(FeedbackError::UnknownIntent(id)) if id == "intent-missing"));
    }

    #[tokio::test]
    async fn deregistered_intents_stop_being_tracked() {
        let controller = controller(ScriptedMetrics::default());
        controller.register_goal("intent-1", None, goals(&[("max_latency", 50.0)]));

        assert_eq!(controller.registered_intents(), vec!["intent-1".to_string()]);
        assert!(controller.deregister_goal("intent-1"));
        assert!(!controller.deregister_goal("intent-1"));
        assert!(controller.registered_intents().is_empty());
    }

    #[test]
    fn direction_prefixes_override_fragment_rules() {
        assert_eq!(direction_for("max_throughput"), GoalDirection::AtMost);
        assert_eq!(direction_for("min_latency"), GoalDirection::AtLeast);
        assert_eq!(direction_for("throughput_bytes"), GoalDirection::AtLeast);
        assert_eq!(direction_for("queue_depth"), GoalDirection::AtMost);
    }
}
