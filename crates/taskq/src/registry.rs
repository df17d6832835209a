//! Kind-tag registry mapping serialized tasks back to concrete variants.
//!
//! The registry is an explicit value handed to the queue at construction,
//! so tests can install isolated registries instead of sharing process-wide
//! state.

use std::collections::HashMap;

use crate::error::QueueError;
use crate::task::MacroTask;
use crate::wire::decode_frame;

type Factory = Box<dyn Fn() -> Box<dyn MacroTask> + Send + Sync>;

/// Maps kind tags to factories producing empty task instances.
#[derive(Default)]
pub struct TaskRegistry {
    factories: HashMap<String, Factory>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task kind. Duplicate tags are a configuration error.
    pub fn register<T>(&mut self) -> Result<(), QueueError>
    where
        T: MacroTask + Default + 'static,
    {
        let kind = T::default().kind_tag().to_string();
        if self.factories.contains_key(&kind) {
            return Err(QueueError::InvalidArgument(format!(
                "task kind '{kind}' is already registered"
            )));
        }
        self.factories
            .insert(kind, Box::new(|| Box::new(T::default()) as Box<dyn MacroTask>));
        Ok(())
    }

    /// Number of registered kinds.
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Reconstruct a task from its wire frame. `Ok(None)` is the null task.
    ///
    /// Fails with `UnknownKind` when the tag has no factory and
    /// `TruncatedStream` when the frame or body underflows.
    pub fn decode(&self, wire: &[u8]) -> Result<Option<Box<dyn MacroTask>>, QueueError> {
        let Some(frame) = decode_frame(wire)? else {
            return Ok(None);
        };
        let factory = self
            .factories
            .get(&frame.kind)
            .ok_or_else(|| QueueError::UnknownKind(frame.kind.clone()))?;
        let mut task = factory();
        task.decode_body(&frame.body)?;
        Ok(Some(task))
    }
}
