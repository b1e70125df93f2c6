//! Linux traffic-control network channel.
//!
//! Rules are applied with the `tc` binary on a single configured
//! interface. An HTB root qdisc is kept at handle 1:, with class 1:10 for
//! prioritized traffic, 1:20 for rate-limited traffic, and 1:30 as the
//! default. `replace` is used throughout so re-applying a rule is
//! idempotent. In dry-run mode the commands are logged instead of run.

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, info, warn};

use intentd_core::config::NetworkConfig;
use intentd_core::errors::ChannelError;
use intentd_core::{NetworkChannel, PolicyKind, TrafficRule};

pub struct TcNetworkChannel {
    interface: String,
    dry_run: bool,
}

impl TcNetworkChannel {
    pub fn new(config: &NetworkConfig) -> Self {
        Self { interface: config.interface.clone(), dry_run: config.dry_run }
    }

    /// The `tc` invocations (without the binary name) for one rule, root
    /// qdisc first.
    fn commands_for(&self, rule: &TrafficRule) -> Result<Vec<Vec<String>>, ChannelError> {
        let mut commands = vec![root_qdisc(&self.interface)];

        match rule.kind {
            PolicyKind::TrafficShaping => {
                let class = rule
                    .parameters
                    .get("class")
                    .and_then(Value::as_str)
                    .unwrap_or("high_priority");
                let (classid, leaf, prio, default_rate) = match class {
                    "low_priority" => ("1:30", "30:", "7", "10mbit"),
                    _ => ("1:10", "10:", "1", "100mbit"),
                };
                let rate = rule
                    .parameters
                    .get("rate")
                    .and_then(Value::as_str)
                    .map(normalize_rate)
                    .unwrap_or_else(|| default_rate.to_string());

                let mut class_command = args(&[
                    "class", "replace", "dev", &self.interface, "parent", "1:", "classid",
                    classid, "htb", "rate", &rate,
                ]);
                if let Some(ceil) = rule.parameters.get("ceil").and_then(Value::as_str) {
                    class_command.push("ceil".to_string());
                    class_command.push(normalize_rate(ceil));
                }
                if let Some(burst) = rule.parameters.get("burst").and_then(Value::as_str) {
                    class_command.push("burst".to_string());
                    class_command.push(burst.to_string());
                }
                class_command.push("prio".to_string());
                class_command.push(prio.to_string());
                commands.push(class_command);

                if rule.parameters.get("queue").and_then(Value::as_str) == Some("fq_codel") {
                    commands.push(args(&[
                        "qdisc", "replace", "dev", &self.interface, "parent", classid,
                        "handle", leaf, "fq_codel",
                    ]));
                }
            }
            PolicyKind::BandwidthLimit => {
                let rate = rate_for(rule)?;
                let ceil = rule
                    .parameters
                    .get("ceil")
                    .and_then(Value::as_str)
                    .map(normalize_rate)
                    .unwrap_or_else(|| rate.clone());
                let mut class_command = args(&[
                    "class", "replace", "dev", &self.interface, "parent", "1:", "classid",
                    "1:20", "htb", "rate", &rate, "ceil", &ceil,
                ]);
                if let Some(burst) = rule.parameters.get("burst").and_then(Value::as_str) {
                    class_command.push("burst".to_string());
                    class_command.push(burst.to_string());
                }
                commands.push(class_command);
            }
            PolicyKind::RoutingPriority => {
                commands.push(args(&[
                    "filter", "replace", "dev", &self.interface, "parent", "1:", "protocol",
                    "ip", "prio", "1", "u32", "match", "u32", "0", "0", "flowid", "1:10",
                ]));
            }
            _ => {
                return Err(ChannelError::RuleFailed(format!(
                    "policy kind {:?} is not a traffic-control rule",
                    rule.kind
                )))
            }
        }

        Ok(commands)
    }

    /// Best-effort removal of the root qdisc and everything under it.
    /// Failure is logged, not surfaced; the qdisc may simply not exist.
    pub async fn teardown(&self) {
        let command =
            args(&["qdisc", "del", "dev", &self.interface, "root", "handle", "1:", "htb"]);

        if self.dry_run {
            info!(
                command = %format!("tc {}", command.join(" ")),
                "dry run: traffic-control teardown not executed"
            );
            return;
        }

        if let Err(error) = self.run(&command).await {
            debug!(interface = %self.interface, error = %error, "traffic-control teardown skipped");
        } else {
            info!(interface = %self.interface, "traffic-control rules removed");
        }
    }

    async fn run(&self, command: &[String]) -> Result<(), ChannelError> {
        debug!(command = %command.join(" "), "running tc");
        let output = Command::new("tc")
            .args(command)
            .output()
            .await
            .map_err(|error| ChannelError::RuleFailed(format!("tc could not be spawned: {error}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(ChannelError::RuleFailed(format!(
                "tc exited with {}: {stderr}",
                output.status
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl NetworkChannel for TcNetworkChannel {
    async fn apply_rule(&self, rule: &TrafficRule) -> Result<(), ChannelError> {
        let commands = self.commands_for(rule)?;

        if self.dry_run {
            for command in &commands {
                info!(
                    target = %rule.target,
                    kind = ?rule.kind,
                    command = %format!("tc {}", command.join(" ")),
                    "dry run: traffic-control command not executed"
                );
            }
            return Ok(());
        }

        for command in &commands {
            if let Err(error) = self.run(command).await {
                warn!(target = %rule.target, error = %error, "traffic-control command failed");
                return Err(error);
            }
        }

        info!(target = %rule.target, kind = ?rule.kind, "traffic rule applied");
        Ok(())
    }
}

/// The class rate for a bandwidth rule: either a `rate` string with a unit
/// suffix or a bare `rate_mbps` number.
fn rate_for(rule: &TrafficRule) -> Result<String, ChannelError> {
    if let Some(rate) = rule.parameters.get("rate").and_then(Value::as_str) {
        return Ok(normalize_rate(rate));
    }
    if let Some(rate_mbps) = rule.parameters.get("rate_mbps").and_then(Value::as_f64) {
        return Ok(format!("{}mbit", rate_mbps.max(1.0).round() as u64));
    }

    Err(ChannelError::RuleFailed("bandwidth_limit rule carries no rate".to_string()))
}

/// `tc` spells units per-second as `bit`, not `bps`.
fn normalize_rate(rate: &str) -> String {
    let rate = rate.trim().to_ascii_lowercase();
    if let Some(prefix) = rate.strip_suffix("bps") {
        format!("{prefix}bit")
    } else {
        rate
    }
}

fn root_qdisc(interface: &str) -> Vec<String> {
    args(&["qdisc", "replace", "dev", interface, "root", "handle", "1:", "htb", "default", "30"])
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| (*part).to_string()).collect()
}
