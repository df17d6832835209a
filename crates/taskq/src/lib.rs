//! Macro-task queue: coarse-grained tasks scheduled centrally and executed
//! collectively inside disjoint subworlds of a process universe.
//!
//! The queue's authoritative task list lives on universe rank 0. Subworlds
//! claim work over RPC, execute each task as a collective, and hand heavy
//! operands between groups through a named side store. See
//! [`MacroTaskQueue::map`] for the end-to-end fan-out.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod queue;
pub mod registry;
pub mod shuttle;
pub mod store;
pub mod task;
pub mod tasks;
pub mod wire;

pub use config::QueueConfig;
pub use coordinator::ClaimRecord;
pub use error::QueueError;
pub use queue::MacroTaskQueue;
pub use registry::TaskRegistry;
pub use shuttle::HeavyObject;
pub use store::{SideStore, SideStoreError};
pub use task::{encode_task, MacroTask, TaskStatus, TypedTask};
pub use tasks::{DistributedVector, SquareInput, SquareOutput, SquareTask};
pub use wire::{decode_frame, encode_frame, TaskFrame};
