//! The timer that closes the control loop.
//!
//! Each tick checks every registered intent against live telemetry. Ticks
//! never overlap: a check that runs long delays the next tick, and missed
//! ticks are skipped rather than replayed. One intent's failure never stops
//! the sweep. Shutdown is cooperative: the stop signal is only observed
//! between ticks, so a tick that has started runs to completion within the
//! drain window.

use std::sync::Arc;
use std::time::Duration;

use intentd_core::config::FeedbackConfig;
use intentd_core::IntentService;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Handle to the running loop, held by the orchestrator for shutdown.
pub struct FeedbackLoopHandle {
    task: JoinHandle<()>,
    stop: watch::Sender<bool>,
}

impl FeedbackLoopHandle {
    /// Signals the loop to stop and waits up to `drain` for the in-flight
    /// tick to finish. The task is aborted only once the window expires.
    pub async fn shutdown(mut self, drain: Duration) {
        let _ = self.stop.send(true);
        if tokio::time::timeout(drain, &mut self.task).await.is_err() {
            warn!(
                event_name = "system.feedback.drain_timeout",
                correlation_id = "shutdown",
                "feedback tick did not finish within the drain window"
            );
            self.task.abort();
        }
    }
}

pub fn spawn(service: Arc<IntentService>, config: FeedbackConfig) -> FeedbackLoopHandle {
    info!(
        event_name = "system.feedback.start",
        correlation_id = "bootstrap",
        interval_secs = config.interval_secs,
        auto_apply = config.auto_apply,
        "feedback loop started"
    );

    let (stop, mut stopped) = watch::channel(false);
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(config.interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            // The stop signal races the timer, never a running tick.
            tokio::select! {
                _ = stopped.changed() => break,
                _ = ticker.tick() => run_tick(&service, config.auto_apply).await,
            }
        }

        info!(
            event_name = "system.feedback.stopped",
            correlation_id = "shutdown",
            "feedback loop stopped"
        );
    });

    FeedbackLoopHandle { task, stop }
}

pub(crate) async fn run_tick(service: &IntentService, auto_apply: bool) {
    for intent_id in service.feedback().registered_intents() {
        let satisfaction = match service.check_satisfaction(&intent_id).await {
            Ok(satisfaction) => satisfaction,
            Err(error) => {
                warn!(intent_id = %intent_id, error = %error, "satisfaction check failed");
                continue;
            }
        };

        if satisfaction.satisfied {
            debug!(intent_id = %intent_id, "intent goals satisfied");
            continue;
        }

        for violation in &satisfaction.violations {
            warn!(
                intent_id = %intent_id,
                metric = %violation.metric,
                threshold = violation.threshold,
                observed = violation.observed,
                "goal violated"
            );
        }

        if auto_apply {
            match service.apply_recommendations(&intent_id).await {
                Ok(results) => {
                    let failed = results.iter().filter(|result| !result.success).count();
                    info!(
                        intent_id = %intent_id,
                        applied = results.len() - failed,
                        failed,
                        "corrective adjustments dispatched"
                    );
                }
                Err(error) => {
                    warn!(intent_id = %intent_id, error = %error, "auto-apply failed");
                }
            }
        } else {
            match service.recommend(&intent_id).await {
                Ok(recommendations) => {
                    for recommendation in recommendations {
                        info!(
                            intent_id = %intent_id,
                            action = ?recommendation.action,
                            reason = %recommendation.reason,
                            "adjustment recommended"
                        );
                    }
                }
                Err(error) => {
                    warn!(intent_id = %intent_id, error = %error, "recommendation failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use intentd_core::config::FeedbackConfig;
    use intentd_core::errors::{ChannelError, MetricsError};
    use intentd_core::{
        ControlEnvelope, DeviceChannel, EnforcementRouter, FeedbackController, IntentService,
        MetricsSource, NetworkChannel, TrafficRule,
    };

    use super::{run_tick, spawn};

    #[derive(Default)]
    struct IdleDeviceChannel;

    #[async_trait]
    impl DeviceChannel for IdleDeviceChannel {
        fn is_connected(&self) -> bool {
            false
        }

        async fn publish_control(
            &self,
            _target: &str,
            _envelope: &ControlEnvelope,
        ) -> Result<(), ChannelError> {
            Err(ChannelError::NotConnected)
        }
    }

    #[derive(Default)]
    struct RecordingNetworkChannel {
        rules: Mutex<Vec<TrafficRule>>,
    }

    #[async_trait]
    impl NetworkChannel for RecordingNetworkChannel {
        async fn apply_rule(&self, rule: &TrafficRule) -> Result<(), ChannelError> {
            self.rules.lock().await.push(rule.clone());
            Ok(())
        }
    }

    struct SlowNetworkChannel {
        delay: Duration,
        rules: Mutex<Vec<TrafficRule>>,
    }

    #[async_trait]
    impl NetworkChannel for SlowNetworkChannel {
        async fn apply_rule(&self, rule: &TrafficRule) -> Result<(), ChannelError> {
            tokio::time::sleep(self.delay).await;
            self.rules.lock().await.push(rule.clone());
            Ok(())
        }
    }

    fn slow_service(network: Arc<SlowNetworkChannel>) -> Arc<IntentService> {
        let router = EnforcementRouter::new(Arc::new(IdleDeviceChannel), network);
        let metrics = Arc::new(ScriptedMetrics { latency: 150.0, fail: AtomicBool::new(false) });
        Arc::new(IntentService::new(router, Arc::new(FeedbackController::new(metrics))))
    }

    struct ScriptedMetrics {
        latency: f64,
        fail: AtomicBool,
    }

    #[async_trait]
    impl MetricsSource for ScriptedMetrics {
        async fn current_value(
            &self,
            _metric: &str,
            _target: Option<&str>,
        ) -> Result<Option<f64>, MetricsError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(MetricsError::Unreachable("connection refused".to_string()));
            }
            Ok(Some(self.latency))
        }
    }

    fn service(latency: f64, network: Arc<RecordingNetworkChannel>) -> IntentService {
        let router = EnforcementRouter::new(Arc::new(IdleDeviceChannel), network);
        let metrics = Arc::new(ScriptedMetrics { latency, fail: AtomicBool::new(false) });
        IntentService::new(router, Arc::new(FeedbackController::new(metrics)))
    }

    fn latency_goal() -> BTreeMap<String, f64> {
        BTreeMap::from([("max_latency".to_string(), 50.0)])
    }

    #[tokio::test]
    async fn violations_without_auto_apply_only_recommend() {
        let network = Arc::new(RecordingNetworkChannel::default());
        let service = service(150.0, network.clone());
        service.register_goal("intent-1-0", Some("node-3".to_string()), latency_goal());

        run_tick(&service, false).await;

        assert!(network.rules.lock().await.is_empty());
    }

    #[tokio::test]
    async fn violations_with_auto_apply_dispatch_corrections() {
        let network = Arc::new(RecordingNetworkChannel::default());
        let service = service(150.0, network.clone());
        service.register_goal("intent-1-0", Some("node-3".to_string()), latency_goal());

        run_tick(&service, true).await;

        let rules = network.rules.lock().await;
        assert_eq!(rules.len(), 2);
        assert!(rules.iter().all(|rule| rule.target == "node-3"));
    }

    #[tokio::test]
    async fn satisfied_goals_dispatch_nothing_even_with_auto_apply() {
        let network = Arc::new(RecordingNetworkChannel::default());
        let service = service(10.0, network.clone());
        service.register_goal("intent-1-0", Some("node-3".to_string()), latency_goal());

        run_tick(&service, true).await;

        assert!(network.rules.lock().await.is_empty());
    }

    #[tokio::test]
    async fn shutdown_drains_an_in_flight_tick_before_stopping() {
        let network = Arc::new(SlowNetworkChannel {
            delay: Duration::from_millis(50),
            rules: Mutex::new(Vec::new()),
        });
        let service = slow_service(network.clone());
        service.register_goal("intent-1-0", Some("node-3".to_string()), latency_goal());

        let handle = spawn(
            service,
            FeedbackConfig { enabled: true, interval_secs: 60, auto_apply: true },
        );

        // The first tick fires immediately; give it time to get in flight.
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.shutdown(Duration::from_secs(2)).await;

        let rules = network.rules.lock().await;
        assert_eq!(rules.len(), 2);
        assert!(rules.iter().all(|rule| rule.target == "node-3"));
    }

    #[tokio::test]
    async fn shutdown_proceeds_once_the_drain_window_expires() {
        let network = Arc::new(SlowNetworkChannel {
            delay: Duration::from_millis(500),
            rules: Mutex::new(Vec::new()),
        });
        let service = slow_service(network.clone());
        service.register_goal("intent-1-0", Some("node-3".to_string()), latency_goal());

        let handle = spawn(
            service,
            FeedbackConfig { enabled: true, interval_secs: 60, auto_apply: true },
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.shutdown(Duration::from_millis(50)).await;

        assert!(network.rules.lock().await.is_empty());
    }

    #[tokio::test]
    async fn tick_survives_an_unreachable_metrics_endpoint() {
        let network = Arc::new(RecordingNetworkChannel::default());
        let router = EnforcementRouter::new(Arc::new(IdleDeviceChannel), network.clone());
        let metrics = Arc::new(ScriptedMetrics { latency: 150.0, fail: AtomicBool::new(true) });
        let service = IntentService::new(router, Arc::new(FeedbackController::new(metrics)));
        service.register_goal("intent-1-0", None, latency_goal());

        // Fetch failures skip the goal, so the intent reads as satisfied.
        run_tick(&service, true).await;

        assert!(network.rules.lock().await.is_empty());
    }
}
