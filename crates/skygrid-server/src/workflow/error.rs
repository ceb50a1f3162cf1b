//! Workflow error taxonomy.
//!
//! * [`Rejection`]: a precondition failed before anything was touched.
//! * [`WorkflowError::Fatal`]: a step failed mid-flight; bookkeeping was
//!   left as it was before the workflow started.
//!
//! Soft failures (backups, entity respawn, addon hooks) never become errors;
//! they are logged and recorded on the workflow report.

use std::time::Duration;

use skygrid_api::CapabilityError;
use skygrid_data::{format_cooldown, CellStatus, DataError, GridCoord};
use thiserror::Error;

use super::context::Step;
use crate::authority::{AuthorityClosed, WorkflowKind};

#[derive(Debug, Error)]
pub enum Rejection {
    #[error("a {} is already in progress", .0.label())]
    AlreadyInFlight(WorkflowKind),

    #[error("coordinate {0} is being changed by another workflow")]
    CellBusy(GridCoord),

    #[error("you must wait {} before doing that again", wait_text(.0))]
    Cooldown(Duration),

    #[error("you need {needed:.2} {currency} but have {available:.2}")]
    InsufficientFunds {
        needed: f64,
        available: f64,
        currency: String,
    },

    #[error("you do not have permission ({0})")]
    NoPermission(&'static str),

    #[error("you do not have an island")]
    NoIsland,

    #[error("you already have an island at {0}")]
    AlreadyPlaced(GridCoord),

    #[error("your island was removed; restore a slot at a new location instead")]
    Homeless,

    #[error("you have no saved slots to restore")]
    NothingToRestore,

    #[error("slot {0} does not exist")]
    SlotNotFound(u32),

    #[error("slot {0} is already active")]
    SlotActive(u32),

    #[error("slot {0} has no saved island")]
    SlotEmpty(u32),

    #[error("slot {slot} is outside 1..={max}")]
    SlotLimit { slot: u32, max: u32 },

    #[error("coordinate {0} is {label}", label = .1.label())]
    Unavailable(GridCoord, CellStatus),

    #[error("that is already your location")]
    SameLocation,

    #[error("saved island is unreadable: {0}")]
    CorruptSchematic(String),

    #[error("backup {0} not found")]
    BackupNotFound(String),

    #[error("player {0} not found")]
    UnknownPlayer(String),

    #[error("the server is shutting down")]
    ShuttingDown,

    #[error("{}", .0.as_deref().unwrap_or("cancelled by another plugin"))]
    Vetoed(Option<String>),

    #[error("{0}")]
    Data(DataError),
}

fn wait_text(remaining: &Duration) -> String {
    format_cooldown(*remaining)
}

impl From<DataError> for Rejection {
    fn from(err: DataError) -> Self {
        match err {
            DataError::SlotNotFound { slot, .. } => Rejection::SlotNotFound(slot),
            DataError::SlotActive(slot) => Rejection::SlotActive(slot),
            DataError::SlotLimit { slot, max } => Rejection::SlotLimit { slot, max },
            DataError::AlreadyPlaced { coord, .. } => Rejection::AlreadyPlaced(coord),
            DataError::OutOfBounds(coord) => Rejection::Unavailable(coord, CellStatus::Locked),
            DataError::CellOccupied(coord) => Rejection::Unavailable(coord, CellStatus::Occupied),
            DataError::CellReserved(coord) => Rejection::Unavailable(coord, CellStatus::Reserved),
            other => Rejection::Data(other),
        }
    }
}

/// Underlying cause of a fatal step failure.
#[derive(Debug, Error)]
pub enum FailureCause {
    #[error(transparent)]
    Capability(#[from] CapabilityError),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error("background task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Authority(#[from] AuthorityClosed),
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("rejected: {0}")]
    Rejected(#[from] Rejection),

    #[error("{} failed while {}: {source}", .kind.label(), .step.describe())]
    Fatal {
        kind: WorkflowKind,
        step: Step,
        /// World and bookkeeping are back to their pre-workflow state.
        recoverable: bool,
        #[source]
        source: FailureCause,
    },

    #[error(transparent)]
    Authority(#[from] AuthorityClosed),
}

impl WorkflowError {
    pub fn is_recoverable(&self) -> bool {
        match self {
            WorkflowError::Rejected(_) => true,
            WorkflowError::Fatal { recoverable, .. } => *recoverable,
            WorkflowError::Authority(_) => false,
        }
    }

    /// Text for the player who started the workflow.
    pub fn user_message(&self) -> String {
        match self {
            WorkflowError::Rejected(reason) => format!("Cannot do that: {reason}."),
            WorkflowError::Fatal {
                kind,
                step,
                recoverable: true,
                ..
            } => format!(
                "The {} failed while {}. Your island was left as it was; please try again later.",
                kind.label(),
                step.describe()
            ),
            WorkflowError::Fatal { kind, step, .. } => format!(
                "The {} failed while {} and your island could not be put back. \
                 Please contact an administrator before doing anything else.",
                kind.label(),
                step.describe()
            ),
            WorkflowError::Authority(_) => {
                "The server is shutting down; your request was not completed.".into()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_errors_map_to_rejections() {
        assert!(matches!(
            Rejection::from(DataError::SlotActive(2)),
            Rejection::SlotActive(2)
        ));
        assert!(matches!(
            Rejection::from(DataError::OutOfBounds(GridCoord::new(20, 0))),
            Rejection::Unavailable(_, CellStatus::Locked)
        ));
    }

    #[test]
    fn unavailable_names_the_status() {
        let msg = Rejection::Unavailable(GridCoord::new(3, -2), CellStatus::Reserved).to_string();
        assert_eq!(msg, "coordinate 3,-2 is reserved");
    }

    #[test]
    fn cooldown_message_is_readable() {
        let msg = Rejection::Cooldown(Duration::from_secs(3_725)).to_string();
        assert_eq!(msg, "you must wait 1h 2m 5s before doing that again");
    }

    #[test]
    fn fatal_messages_distinguish_recovery() {
        let recoverable = WorkflowError::Fatal {
            kind: WorkflowKind::Switch,
            step: Step::LoadingTarget,
            recoverable: true,
            source: FailureCause::Task("boom".into()),
        };
        let broken = WorkflowError::Fatal {
            kind: WorkflowKind::Switch,
            step: Step::LoadingTarget,
            recoverable: false,
            source: FailureCause::Task("boom".into()),
        };
        assert!(recoverable.user_message().contains("try again later"));
        assert!(broken.user_message().contains("contact an administrator"));
        assert!(!broken.is_recoverable());
        assert!(broken.to_string().contains("loading the target slot"));
    }

    #[test]
    fn veto_reason_is_shown() {
        assert_eq!(Rejection::Vetoed(Some("Event in progress".into())).to_string(), "Event in progress");
        assert_eq!(Rejection::Vetoed(None).to_string(), "cancelled by another plugin");
    }
}
