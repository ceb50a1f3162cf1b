//! Per-workflow context: current step, progress notifications and the
//! report handed back when the workflow ends.

use std::fmt;
use std::sync::Arc;

use skygrid_api::{ActorSnapshot, HostCapability};
use tracing::{info, warn};

use crate::authority::WorkflowKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Idle,
    Charging,
    BackingUp,
    SavingSource,
    ClearingSource,
    LoadingTarget,
    PastingAtTarget,
    RestoringAuxState,
    UpdatingBookkeeping,
    UpdatingGrid,
    UpdatingSlots,
    Teleporting,
    Done,
    Failed,
}

impl Step {
    /// Gerund phrase used in log lines and error messages.
    pub fn describe(&self) -> &'static str {
        match self {
            Step::Idle => "preparing",
            Step::Charging => "charging the fee",
            Step::BackingUp => "backing up your island",
            Step::SavingSource => "saving your island",
            Step::ClearingSource => "clearing the old area",
            Step::LoadingTarget => "loading the target slot",
            Step::PastingAtTarget => "pasting at the new location",
            Step::RestoringAuxState => "restoring homes and entities",
            Step::UpdatingBookkeeping => "updating slot records",
            Step::UpdatingGrid => "updating the grid",
            Step::UpdatingSlots => "updating slot coordinates",
            Step::Teleporting => "teleporting players",
            Step::Done => "finishing",
            Step::Failed => "failing",
        }
    }

    /// Short progress line for the player, if this step announces itself.
    fn progress(&self) -> Option<&'static str> {
        match self {
            Step::Charging => Some("Charging relocation fee..."),
            Step::BackingUp => Some("Creating a backup..."),
            Step::SavingSource => Some("Saving your island..."),
            Step::ClearingSource => Some("Clearing the area..."),
            Step::LoadingTarget => Some("Loading your other island..."),
            Step::PastingAtTarget => Some("Building your island at its new location..."),
            Step::RestoringAuxState => Some("Restoring homes and entities..."),
            Step::UpdatingBookkeeping | Step::UpdatingGrid | Step::UpdatingSlots => {
                Some("Updating records...")
            }
            Step::Teleporting => Some("Teleporting..."),
            Step::Idle | Step::Done | Step::Failed => None,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What happened, returned to whoever awaits the workflow.
#[derive(Debug, Clone)]
pub struct WorkflowReport {
    pub kind: WorkflowKind,
    pub actor: ActorSnapshot,
    pub steps: Vec<Step>,
    pub soft_failures: Vec<String>,
}

impl WorkflowReport {
    pub fn visited(&self, step: Step) -> bool {
        self.steps.contains(&step)
    }
}

/// Tracks the step and tells the actor about every transition. Messages to
/// a player who has left are dropped by the host.
pub struct WorkflowContext {
    host: Arc<dyn HostCapability>,
    report: WorkflowReport,
    step: Step,
}

impl WorkflowContext {
    pub fn new(kind: WorkflowKind, actor: ActorSnapshot, host: Arc<dyn HostCapability>) -> Self {
        Self {
            host,
            report: WorkflowReport {
                kind,
                actor,
                steps: vec![Step::Idle],
                soft_failures: Vec::new(),
            },
            step: Step::Idle,
        }
    }

    pub fn actor(&self) -> &ActorSnapshot {
        &self.report.actor
    }

    pub fn kind(&self) -> WorkflowKind {
        self.report.kind
    }

    pub fn step(&self) -> Step {
        self.step
    }

    pub fn enter(&mut self, step: Step) {
        info!(
            "[{}] {} {:?} -> {:?}",
            self.report.actor.name,
            self.report.kind.label(),
            self.step,
            step
        );
        self.step = step;
        self.report.steps.push(step);
        if let Some(line) = step.progress() {
            self.tell(line);
        }
    }

    pub fn tell(&self, message: &str) {
        self.host.send_message(self.report.actor.id, message);
    }

    /// Record a failure that does not stop the workflow.
    pub fn soft_fail(&mut self, what: &str, err: impl fmt::Display) {
        warn!(
            "[{}] {} continuing after {what} failed during {:?}: {err}",
            self.report.actor.name,
            self.report.kind.label(),
            self.step
        );
        self.report.soft_failures.push(format!("{what}: {err}"));
    }

    pub fn finish(mut self, message: &str) -> WorkflowReport {
        self.enter(Step::Done);
        self.tell(message);
        self.report
    }

    pub fn fail(&mut self) -> Step {
        let failed_at = self.step;
        self.step = Step::Failed;
        self.report.steps.push(Step::Failed);
        failed_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skygrid_api::{PlayerId, Position};
    use skygrid_world::SandboxWorld;
    use uuid::Uuid;

    #[test]
    fn steps_are_recorded_and_announced() {
        let world = Arc::new(SandboxWorld::new());
        let id = PlayerId(Uuid::from_u128(1));
        world.join(id, "Alex", Position::default());

        let mut ctx = WorkflowContext::new(WorkflowKind::Switch, ActorSnapshot::new(id, "Alex"), world.clone());
        ctx.enter(Step::SavingSource);
        ctx.soft_fail("backup", "disk full");
        let report = ctx.finish("Done!");

        assert_eq!(report.steps, vec![Step::Idle, Step::SavingSource, Step::Done]);
        assert_eq!(report.soft_failures, vec!["backup: disk full".to_string()]);
        assert_eq!(
            world.messages_for(id),
            vec!["Saving your island...".to_string(), "Done!".to_string()]
        );
    }

    #[test]
    fn fail_reports_step() {
        let world = Arc::new(SandboxWorld::new());
        let mut ctx = WorkflowContext::new(
            WorkflowKind::Relocate,
            ActorSnapshot::new(PlayerId(Uuid::from_u128(2)), "Sam"),
            world,
        );
        ctx.enter(Step::ClearingSource);
        assert_eq!(ctx.fail(), Step::ClearingSource);
        assert_eq!(ctx.step(), Step::Failed);
    }
}
