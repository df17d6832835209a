//! The polymorphic macro-task surface.
//!
//! A macro-task is a coarse unit of work whose `run` is a collective
//! computation across one subworld. Its serialized form carries plain
//! fields and heavy-field presence bits only; heavy operands move through
//! the side store via the shuttle hooks and never ride a message.

use std::any::Any;
use std::fmt;

use serde::{Deserialize, Serialize};

use makroq_comm::{Communicator, Subworld};

use crate::error::QueueError;
use crate::store::SideStore;
use crate::wire::{encode_frame, TaskFrame};

/// Lifecycle of an enrolled task, observed only by the coordinator.
///
/// Transitions are monotone: `Unknown → Waiting → Running → Complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Unknown,
    Waiting,
    Running,
    Complete,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStatus::Unknown => "Unknown",
            TaskStatus::Waiting => "Waiting",
            TaskStatus::Running => "Running",
            TaskStatus::Complete => "Complete",
        };
        write!(f, "{name}")
    }
}

/// A unit of work the queue can dispatch to a subworld.
///
/// Implementations own their payload fields. The shuttle hooks default to
/// no-ops, which is correct for payloads without heavy fields — such tasks
/// never touch the side store.
pub trait MacroTask: Send {
    /// Stable identifier selecting the concrete variant at deserialization
    /// time.
    fn kind_tag(&self) -> &'static str;

    /// Scheduling priority; higher runs earlier. Ties break toward the
    /// smallest enrollment index.
    fn priority(&self) -> f64 {
        0.0
    }

    /// Execute the task inside `subworld`. Heavy inputs are in memory
    /// (loaded by the shuttle) on entry; heavy outputs are in memory on
    /// successful return.
    fn run(&mut self, subworld: &Subworld) -> Result<(), QueueError>;

    /// Serialize plain fields and heavy-field presence bits.
    fn encode_body(&self) -> Result<Vec<u8>, QueueError>;

    /// Inverse of [`MacroTask::encode_body`], populating an empty instance.
    fn decode_body(&mut self, body: &[u8]) -> Result<(), QueueError>;

    /// Whether the input payload carries a heavy field (in memory or in the
    /// side store).
    fn has_heavy_input(&self) -> bool {
        false
    }

    /// Whether the output payload carries a heavy field.
    fn has_heavy_output(&self) -> bool {
        false
    }

    /// Collectively write heavy inputs under `name` and drop them from
    /// memory.
    fn persist_input(
        &mut self,
        _comm: &dyn Communicator,
        _store: &SideStore,
        _name: &str,
    ) -> Result<(), QueueError> {
        Ok(())
    }

    /// Collectively rebuild heavy inputs from `name`, bound to `comm`.
    fn load_input(
        &mut self,
        _comm: &dyn Communicator,
        _store: &SideStore,
        _name: &str,
    ) -> Result<(), QueueError> {
        Ok(())
    }

    /// Collectively write heavy outputs under `name` and drop them from
    /// memory.
    fn persist_output(
        &mut self,
        _comm: &dyn Communicator,
        _store: &SideStore,
        _name: &str,
    ) -> Result<(), QueueError> {
        Ok(())
    }

    /// Collectively rebuild heavy outputs from `name`, bound to `comm`.
    fn load_output(
        &mut self,
        _comm: &dyn Communicator,
        _store: &SideStore,
        _name: &str,
    ) -> Result<(), QueueError> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

/// Serialize a task into its wire frame (`[presence][kind][body]`).
pub fn encode_task(task: &dyn MacroTask) -> Result<Vec<u8>, QueueError> {
    let frame = TaskFrame {
        kind: task.kind_tag().to_string(),
        body: task.encode_body()?,
    };
    encode_frame(Some(&frame))
}

/// Typed layer over [`MacroTask`] used by `map`: binding an input payload
/// into a fresh task cloned from a template, and extracting the typed
/// output after collection.
pub trait TypedTask: MacroTask + Sized + 'static {
    type Input;
    type Output;

    /// Clone this template and bind `input` as its payload.
    fn bind(&self, input: Self::Input) -> Self;

    /// Extract the output; `None` until the task has run and its heavy
    /// output was loaded.
    fn into_output(self) -> Option<Self::Output>;
}
