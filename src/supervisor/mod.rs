//! Failure counting and the reboot escalation path.
//!
//! Two independent counters track sensor-count mismatches and every other
//! cycle failure. Both reset when they reach `max_errors`; a restart resets
//! them implicitly. The reboot itself is delegated to a [`Rebooter`].

use std::process::Command;

use anyhow::{bail, Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Duration};

use crate::notify::{notify_best_effort, Notifier};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorPolicy {
    pub max_errors: u32,
    /// Mismatches are often a loose cable, so rebooting on them is opt-in.
    pub reboot_on_sensor_count: bool,
    pub debug_notification: bool,
    pub mismatch_reboot_cooldown_secs: u64,
    pub error_reboot_cooldown_secs: u64,
    pub ultimate_failure_cooldown_secs: u64,
    pub reboot_command: Vec<String>,
}

impl Default for SupervisorPolicy {
    fn default() -> Self {
        Self {
            max_errors: 10,
            reboot_on_sensor_count: false,
            debug_notification: false,
            mismatch_reboot_cooldown_secs: 30,
            error_reboot_cooldown_secs: 60,
            ultimate_failure_cooldown_secs: 60,
            reboot_command: vec!["sudo".into(), "reboot".into()],
        }
    }
}

/// Restarts the host. Called only once the supervisor has decided to fail fast.
pub trait Rebooter {
    fn reboot(&self) -> Result<()>;
}

/// Runs a shell command such as `sudo reboot`.
pub struct CommandRebooter {
    command: Vec<String>,
}

impl CommandRebooter {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl Rebooter for CommandRebooter {
    fn reboot(&self) -> Result<()> {
        let Some((program, args)) = self.command.split_first() else {
            bail!("reboot command is empty");
        };
        let status = Command::new(program)
            .args(args)
            .status()
            .with_context(|| format!("failed to run {program}"))?;
        if !status.success() {
            bail!("{} exited with {status}", self.command.join(" "));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    /// The reboot was issued; the process must stop polling.
    Rebooted,
}

pub struct Supervisor {
    policy: SupervisorPolicy,
    debug_topic: String,
    sensor_mismatch_count: u32,
    other_error_count: u32,
}

fn stamp() -> String {
    Local::now().format("%a %I:%M %p").to_string()
}

impl Supervisor {
    pub fn new(policy: SupervisorPolicy, debug_topic: impl Into<String>) -> Self {
        Self {
            policy,
            debug_topic: debug_topic.into(),
            sensor_mismatch_count: 0,
            other_error_count: 0,
        }
    }

    pub fn sensor_mismatch_count(&self) -> u32 {
        self.sensor_mismatch_count
    }

    pub fn other_error_count(&self) -> u32 {
        self.other_error_count
    }

    /// Counts a cycle whose detected sensor count differs from the expected one.
    pub async fn check_sensor_count<N: Notifier, R: Rebooter>(
        &mut self,
        detected: usize,
        expected: usize,
        notifier: &N,
        rebooter: &R,
    ) -> Verdict {
        if detected == expected {
            return Verdict::Continue;
        }

        self.sensor_mismatch_count += 1;
        log_warn!(
            "only found {detected} / {expected} sensors (mismatch count {})",
            self.sensor_mismatch_count
        );
        if self.sensor_mismatch_count < self.policy.max_errors {
            return Verdict::Continue;
        }

        log_error!("detected only {detected} / {expected} sensors");
        self.sensor_mismatch_count = 0;

        let reboot = self.policy.reboot_on_sensor_count;
        if self.policy.debug_notification {
            let (title, body) = if reboot {
                (
                    "error",
                    format!("REBOOTING @ {} Detected only {detected} / {expected} sensors.", stamp()),
                )
            } else {
                ("Warning", format!("Detected only {detected} / {expected} sensors."))
            };
            notify_best_effort(notifier, &self.debug_topic, title, &body).await;
        }

        if !reboot {
            return Verdict::Continue;
        }
        log_error!("REBOOTING because detected only {detected} / {expected} sensors");
        self.reboot(rebooter, self.policy.mismatch_reboot_cooldown_secs)
            .await
    }

    /// Counts a failed cycle and reboots once the threshold is reached.
    pub async fn record_error<N: Notifier, R: Rebooter>(
        &mut self,
        failure: &str,
        notifier: &N,
        rebooter: &R,
    ) -> Verdict {
        self.other_error_count += 1;
        log_error!(
            "cycle failed: {failure} (error count {})",
            self.other_error_count
        );
        if self.other_error_count < self.policy.max_errors {
            return Verdict::Continue;
        }

        let count = self.other_error_count;
        self.other_error_count = 0;
        log_error!("REBOOTING due to error count of {count}");
        notify_best_effort(
            notifier,
            &self.debug_topic,
            "error",
            &format!("REBOOTING @ {} due to error count of {count}.", stamp()),
        )
        .await;
        self.reboot(rebooter, self.policy.error_reboot_cooldown_secs)
            .await
    }

    /// A failure no fallback could absorb; always ends in a reboot attempt.
    pub async fn ultimate_failure<N: Notifier, R: Rebooter>(
        &mut self,
        reason: &str,
        notifier: &N,
        rebooter: &R,
    ) -> Verdict {
        log_error!("ultimate failure: {reason}");
        notify_best_effort(
            notifier,
            &self.debug_topic,
            "error",
            &format!("REBOOTING @ {} after ultimate failure: {reason}", stamp()),
        )
        .await;
        self.reboot(rebooter, self.policy.ultimate_failure_cooldown_secs)
            .await
    }

    async fn reboot<R: Rebooter>(&self, rebooter: &R, cooldown_secs: u64) -> Verdict {
        sleep(Duration::from_secs(cooldown_secs)).await;
        log_error!("REBOOTING now");
        match rebooter.reboot() {
            Ok(()) => Verdict::Rebooted,
            Err(err) => {
                log_error!("reboot failed, continuing to poll: {err:#}");
                Verdict::Continue
            }
        }
    }
}
