//! A block-distributed vector of doubles, bound to the group that holds it.
//!
//! Each member owns one contiguous block. The archive form is the full
//! logical vector, so a vector persisted by one group restores under any
//! other group's size with the blocks re-cut — the "modulo data
//! distribution" equivalence the shuttle promises.

use makroq_comm::{Communicator, CommunicatorExt};

use crate::error::QueueError;
use crate::shuttle::HeavyObject;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DistributedVector {
    len: usize,
    offset: usize,
    local: Vec<f64>,
}

impl DistributedVector {
    /// Distribute `full` over `comm`, keeping this rank's block.
    pub fn from_full(comm: &dyn Communicator, full: &[f64]) -> Self {
        let (start, end) = block_range(comm.rank(), comm.size(), full.len());
        Self {
            len: full.len(),
            offset: start,
            local: full[start..end].to_vec(),
        }
    }

    /// Logical length of the whole vector.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// This rank's block.
    pub fn local(&self) -> &[f64] {
        &self.local
    }

    /// Logical offset of this rank's block.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Apply `f` to every element of the local block.
    pub fn map_in_place<F: Fn(f64) -> f64>(&mut self, f: F) {
        for x in &mut self.local {
            *x = f(*x);
        }
    }

    /// Gather the full logical vector onto the group's local rank 0.
    pub fn to_full(&self, comm: &dyn Communicator) -> Result<Option<Vec<f64>>, QueueError> {
        let gathered = comm
            .gather(&self.local, 0)
            .map_err(QueueError::from)?;
        let Some(parts) = gathered else {
            return Ok(None);
        };
        let full: Vec<f64> = parts.into_iter().flatten().collect();
        if full.len() != self.len {
            return Err(QueueError::Protocol(format!(
                "distributed vector gathered {} elements, expected {}",
                full.len(),
                self.len
            )));
        }
        Ok(Some(full))
    }
}

impl HeavyObject for DistributedVector {
    fn archive(&self, comm: &dyn Communicator) -> Result<Option<Vec<u8>>, QueueError> {
        let Some(full) = self.to_full(comm)? else {
            return Ok(None);
        };
        let blob =
            rmp_serde::to_vec(&full).map_err(|e| QueueError::Serialization(e.to_string()))?;
        Ok(Some(blob))
    }

    fn restore(comm: &dyn Communicator, archive: &[u8]) -> Result<Self, QueueError> {
        let full: Vec<f64> =
            rmp_serde::from_slice(archive).map_err(|_| QueueError::TruncatedStream)?;
        Ok(Self::from_full(comm, &full))
    }
}

/// Block bounds for one rank: `ceil(len / size)`-sized chunks, trailing
/// ranks possibly empty.
fn block_range(rank: usize, size: usize, len: usize) -> (usize, usize) {
    let chunk = len.div_ceil(size);
    let start = (rank * chunk).min(len);
    let end = (start + chunk).min(len);
    (start, end)
}
