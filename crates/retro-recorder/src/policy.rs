//! Pluggable decision of which rows an event produces

use retro_core::{Event, EventKind};

/// Rows to write for one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteAction {
    /// Nothing is stored
    Skip,
    /// Only the event row
    EventOnly,
    /// The event row plus a linked state row
    EventWithState,
}

/// Decides how the recorder persists an event
///
/// Supplied to the recorder at construction time.
pub trait WritePolicy: Send + Sync {
    fn action_for(&self, event: &Event) -> WriteAction;
}

/// Stores state rows for live and historic state changes
///
/// Historic rows are flagged so history queries can tell them apart.
#[derive(Debug, Clone, Copy, Default)]
pub struct HistoricWritePolicy;

impl WritePolicy for HistoricWritePolicy {
    fn action_for(&self, event: &Event) -> WriteAction {
        if event.kind().carries_state() {
            WriteAction::EventWithState
        } else {
            WriteAction::EventOnly
        }
    }
}

/// Stores state rows for live state changes only
///
/// Historic state changes are kept as plain event rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct LiveOnlyPolicy;

impl WritePolicy for LiveOnlyPolicy {
    fn action_for(&self, event: &Event) -> WriteAction {
        match event.kind() {
            EventKind::StateChanged => WriteAction::EventWithState,
            EventKind::HistoricStateChanged | EventKind::Other => WriteAction::EventOnly,
        }
    }
}
