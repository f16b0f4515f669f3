// Orchestrator: runs the stages in a fixed order, forever, tolerating
// per-stage failures.

use crate::activity_log::ActivityLog;
use crate::error::CoreError;
use crate::settings::Settings;
use crate::stages::{Stage, StageKind};
use log::{error, info};
use std::time::Duration;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleSummary {
    pub succeeded: usize,
    pub failed: usize,
}

pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    activity: ActivityLog,
    stage_timeout: Duration,
    cycle_delay: Duration,
}

impl Pipeline {
    pub fn new(stages: Vec<Box<dyn Stage>>, activity: ActivityLog, settings: &Settings) -> Self {
        Self {
            stages,
            activity,
            stage_timeout: Duration::from_secs(settings.stage_timeout_secs),
            cycle_delay: Duration::from_secs(settings.cycle_delay_secs),
        }
    }

    /// Run every stage once. A failing stage is logged and the cycle moves
    /// on; trade stages run untimed so in-flight transactions are never
    /// interrupted.
    pub async fn run_cycle(&self) -> CycleSummary {
        let mut summary = CycleSummary::default();

        for stage in &self.stages {
            let name = stage.name();
            self.activity.append(&format!("Running {}...", name));

            let result = match stage.kind() {
                StageKind::Trader => stage.run().await,
                StageKind::Worker => {
                    match tokio::time::timeout(self.stage_timeout, stage.run()).await {
                        Ok(r) => r,
                        Err(_) => Err(CoreError::Timeout(format!(
                            "{} exceeded {:?}",
                            name, self.stage_timeout
                        ))),
                    }
                }
            };

            match result {
                Ok(report) => {
                    summary.succeeded += 1;
                    self.activity.append(&format!(
                        "{} finished: {} examined, {} changed",
                        name, report.examined, report.changed
                    ));
                }
                Err(e) => {
                    summary.failed += 1;
                    error!("Stage {} failed: {}", name, e);
                    self.activity.append(&format!("{} failed: {}", name, e));
                }
            }
        }

        self.activity.append(&format!(
            "Cycle complete: {} succeeded, {} failed",
            summary.succeeded, summary.failed
        ));
        summary
    }

    /// Run cycles until the process is stopped.
    pub async fn run_forever(&self) {
        info!("Pipeline started with {} stages", self.stages.len());
        loop {
            self.run_cycle().await;
            tokio::time::sleep(self.cycle_delay).await;
        }
    }
}
