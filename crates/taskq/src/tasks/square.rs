//! Demo task kind: squares a scalar and a distributed vector.

use std::any::Any;

use serde::{Deserialize, Serialize};

use makroq_comm::{Communicator, Subworld};

use crate::error::QueueError;
use crate::shuttle;
use crate::store::SideStore;
use crate::task::{MacroTask, TypedTask};
use crate::tasks::dvec::DistributedVector;

/// Input payload: two plain fields plus a heavy vector.
#[derive(Debug, Clone)]
pub struct SquareInput {
    pub index: i64,
    pub value: f64,
    pub priority: f64,
    pub weights: DistributedVector,
}

/// Output payload: the squared scalar plus the squared vector.
#[derive(Debug, Clone)]
pub struct SquareOutput {
    pub index: i64,
    pub squared: f64,
    pub data: DistributedVector,
}

/// Squares its scalar payload and its heavy weights elementwise.
#[derive(Debug, Default)]
pub struct SquareTask {
    pub index: i64,
    pub value: f64,
    priority: f64,
    weights: Option<DistributedVector>,
    /// Presence bit for the heavy input: true while the weights exist in
    /// memory or in the side store.
    weights_present: bool,
    squared: Option<f64>,
    result: Option<DistributedVector>,
    result_present: bool,
}

/// Plain fields and presence bits — the only parts that ride the wire.
#[derive(Serialize, Deserialize)]
struct SquareBody {
    index: i64,
    value: f64,
    priority: f64,
    has_weights: bool,
    squared: Option<f64>,
    has_result: bool,
}

impl SquareTask {
    /// A task with plain fields only; used as a `map` template and by
    /// codec tests.
    pub fn with_payload(index: i64, value: f64, priority: f64) -> Self {
        Self {
            index,
            value,
            priority,
            ..Self::default()
        }
    }
}

impl MacroTask for SquareTask {
    fn kind_tag(&self) -> &'static str {
        "square"
    }

    fn priority(&self) -> f64 {
        self.priority
    }

    fn run(&mut self, subworld: &Subworld) -> Result<(), QueueError> {
        let mut result = self.weights.take().ok_or_else(|| {
            QueueError::Protocol("square task ran without its weights loaded".into())
        })?;
        result.map_in_place(|x| x * x);
        self.squared = Some(self.value * self.value);
        self.result = Some(result);
        self.result_present = true;
        subworld.barrier();
        Ok(())
    }

    fn encode_body(&self) -> Result<Vec<u8>, QueueError> {
        let body = SquareBody {
            index: self.index,
            value: self.value,
            priority: self.priority,
            has_weights: self.weights_present,
            squared: self.squared,
            has_result: self.result_present,
        };
        rmp_serde::to_vec(&body).map_err(|e| QueueError::Serialization(e.to_string()))
    }

    fn decode_body(&mut self, body: &[u8]) -> Result<(), QueueError> {
        let body: SquareBody =
            rmp_serde::from_slice(body).map_err(|_| QueueError::TruncatedStream)?;
        self.index = body.index;
        self.value = body.value;
        self.priority = body.priority;
        self.weights_present = body.has_weights;
        self.squared = body.squared;
        self.result_present = body.has_result;
        Ok(())
    }

    fn has_heavy_input(&self) -> bool {
        self.weights_present
    }

    fn has_heavy_output(&self) -> bool {
        self.result_present
    }

    fn persist_input(
        &mut self,
        comm: &dyn Communicator,
        store: &SideStore,
        name: &str,
    ) -> Result<(), QueueError> {
        if let Some(weights) = self.weights.take() {
            shuttle::persist(comm, store, name, weights)?;
        }
        Ok(())
    }

    fn load_input(
        &mut self,
        comm: &dyn Communicator,
        store: &SideStore,
        name: &str,
    ) -> Result<(), QueueError> {
        if self.weights_present {
            self.weights = Some(shuttle::load(comm, store, name)?);
        }
        Ok(())
    }

    fn persist_output(
        &mut self,
        comm: &dyn Communicator,
        store: &SideStore,
        name: &str,
    ) -> Result<(), QueueError> {
        if let Some(result) = self.result.take() {
            shuttle::persist(comm, store, name, result)?;
        }
        Ok(())
    }

    fn load_output(
        &mut self,
        comm: &dyn Communicator,
        store: &SideStore,
        name: &str,
    ) -> Result<(), QueueError> {
        if self.result_present {
            self.result = Some(shuttle::load(comm, store, name)?);
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

impl TypedTask for SquareTask {
    type Input = SquareInput;
    type Output = SquareOutput;

    fn bind(&self, input: SquareInput) -> Self {
        Self {
            index: input.index,
            value: input.value,
            priority: input.priority,
            weights: Some(input.weights),
            weights_present: true,
            ..Self::default()
        }
    }

    fn into_output(self) -> Option<SquareOutput> {
        match (self.squared, self.result) {
            (Some(squared), Some(data)) => Some(SquareOutput {
                index: self.index,
                squared,
                data,
            }),
            _ => None,
        }
    }
}
