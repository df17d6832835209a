//! Collective operations over a group of rank threads.
//!
//! [`Communicator`] is the byte-level collective surface shared by the
//! universe and every subworld: barrier, rooted broadcast, rooted gather.
//! [`CommunicatorExt`] layers MessagePack-typed variants on top and is
//! blanket-implemented, so it works through `&dyn Communicator` too.
//!
//! Collective calls follow the usual discipline: every member of the group
//! must issue the same collectives in the same order with the same root.

use std::sync::{Barrier, Condvar, Mutex};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CommError;

/// Byte-level collective operations over one process group.
pub trait Communicator {
    /// Rank of the calling member within this group.
    fn rank(&self) -> usize;

    /// Number of members in this group.
    fn size(&self) -> usize;

    /// Block until every member of the group has arrived.
    fn barrier(&self);

    /// Rooted broadcast: after the call, every member's `buf` holds the
    /// root's bytes.
    fn broadcast_bytes(&self, buf: &mut Vec<u8>, root: usize) -> Result<(), CommError>;

    /// Rooted gather: the root receives every member's contribution in rank
    /// order; all other members receive `None`.
    fn gather_bytes(&self, part: Vec<u8>, root: usize) -> Result<Option<Vec<Vec<u8>>>, CommError>;
}

/// MessagePack-typed collectives, derived from the byte primitives.
pub trait CommunicatorExt: Communicator {
    /// Broadcast a serializable value: the root's `value` overwrites every
    /// other member's.
    fn broadcast<T>(&self, value: &mut T, root: usize) -> Result<(), CommError>
    where
        T: Serialize + DeserializeOwned,
    {
        let mut buf = if self.rank() == root {
            rmp_serde::to_vec(value)?
        } else {
            Vec::new()
        };
        self.broadcast_bytes(&mut buf, root)?;
        if self.rank() != root {
            *value = rmp_serde::from_slice(&buf)?;
        }
        Ok(())
    }

    /// Gather one serializable value per member onto the root, in rank order.
    fn gather<T>(&self, value: &T, root: usize) -> Result<Option<Vec<T>>, CommError>
    where
        T: Serialize + DeserializeOwned,
    {
        let part = rmp_serde::to_vec(value)?;
        match self.gather_bytes(part, root)? {
            Some(parts) => {
                let mut out = Vec::with_capacity(parts.len());
                for part in &parts {
                    out.push(rmp_serde::from_slice(part)?);
                }
                Ok(Some(out))
            }
            None => Ok(None),
        }
    }
}

impl<C: Communicator + ?Sized> CommunicatorExt for C {}

// ── In-process collective engine ────────────────────────────────────

/// Shared state backing the collectives of one group.
///
/// Broadcast uses one delivery box per member: the root fills every box,
/// each member empties only its own. Gather is the mirror image: each
/// member fills its own slot, the root drains them all. A member's box or
/// slot is its own rendezvous point, so back-to-back collectives cannot
/// observe each other's payloads.
pub(crate) struct GroupCore {
    size: usize,
    barrier: Barrier,
    bcast: Mutex<Vec<Option<Arc<Vec<u8>>>>>,
    bcast_cv: Condvar,
    gather: Mutex<Vec<Option<Vec<u8>>>>,
    gather_cv: Condvar,
}

impl GroupCore {
    pub(crate) fn new(size: usize) -> Self {
        Self {
            size,
            barrier: Barrier::new(size),
            bcast: Mutex::new(vec![None; size]),
            bcast_cv: Condvar::new(),
            gather: Mutex::new(vec![None; size]),
            gather_cv: Condvar::new(),
        }
    }

    pub(crate) fn size(&self) -> usize {
        self.size
    }

    pub(crate) fn barrier(&self) {
        self.barrier.wait();
    }

    pub(crate) fn broadcast(
        &self,
        my_rank: usize,
        buf: &mut Vec<u8>,
        root: usize,
    ) -> Result<(), CommError> {
        if root >= self.size {
            return Err(CommError::InvalidArgument(format!(
                "broadcast root {root} out of range for group of {}",
                self.size
            )));
        }
        if self.size == 1 {
            return Ok(());
        }

        if my_rank == root {
            let payload = Arc::new(buf.clone());
            let mut boxes = self.bcast.lock().unwrap();
            // Wait until every box from the previous broadcast was emptied.
            while boxes
                .iter()
                .enumerate()
                .any(|(i, b)| i != root && b.is_some())
            {
                boxes = self.bcast_cv.wait(boxes).unwrap();
            }
            for (i, b) in boxes.iter_mut().enumerate() {
                if i != root {
                    *b = Some(Arc::clone(&payload));
                }
            }
            self.bcast_cv.notify_all();
        } else {
            let mut boxes = self.bcast.lock().unwrap();
            while boxes[my_rank].is_none() {
                boxes = self.bcast_cv.wait(boxes).unwrap();
            }
            let payload = boxes[my_rank].take().unwrap();
            self.bcast_cv.notify_all();
            buf.clear();
            buf.extend_from_slice(&payload);
        }
        Ok(())
    }

    pub(crate) fn gather(
        &self,
        my_rank: usize,
        part: Vec<u8>,
        root: usize,
    ) -> Result<Option<Vec<Vec<u8>>>, CommError> {
        if root >= self.size {
            return Err(CommError::InvalidArgument(format!(
                "gather root {root} out of range for group of {}",
                self.size
            )));
        }
        if self.size == 1 {
            return Ok(Some(vec![part]));
        }

        let mut parts = self.gather.lock().unwrap();
        // Wait until our previous contribution was drained.
        while parts[my_rank].is_some() {
            parts = self.gather_cv.wait(parts).unwrap();
        }
        parts[my_rank] = Some(part);
        self.gather_cv.notify_all();

        if my_rank == root {
            while parts.iter().any(|p| p.is_none()) {
                parts = self.gather_cv.wait(parts).unwrap();
            }
            let out: Vec<Vec<u8>> = parts.iter_mut().map(|p| p.take().unwrap()).collect();
            self.gather_cv.notify_all();
            Ok(Some(out))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::universe::Universe;
    use crate::Communicator;
    use crate::CommunicatorExt;

    #[test]
    fn broadcast_from_root() {
        let results = Universe::launch(4, |u| {
            let mut value = if u.rank() == 2 { 99u64 } else { 0 };
            u.broadcast(&mut value, 2).unwrap();
            value
        });
        assert_eq!(results, vec![99, 99, 99, 99]);
    }

    #[test]
    fn gather_in_rank_order() {
        let results = Universe::launch(3, |u| u.gather(&(u.rank() as u32 * 10), 0).unwrap());
        assert_eq!(results[0], Some(vec![0, 10, 20]));
        assert_eq!(results[1], None);
        assert_eq!(results[2], None);
    }

    #[test]
    fn repeated_broadcasts_do_not_cross() {
        let results = Universe::launch(4, |u| {
            let mut seen = Vec::new();
            for round in 0..100u64 {
                let root = (round % u.size() as u64) as usize;
                let mut value = if u.rank() == root { round } else { u64::MAX };
                u.broadcast(&mut value, root).unwrap();
                seen.push(value);
            }
            seen
        });
        let expected: Vec<u64> = (0..100).collect();
        for per_rank in results {
            assert_eq!(per_rank, expected);
        }
    }

    #[test]
    fn broadcast_root_out_of_range() {
        let results = Universe::launch(2, |u| {
            let mut buf = Vec::new();
            u.broadcast_bytes(&mut buf, 5).is_err()
        });
        assert!(results.iter().all(|e| *e));
    }

    #[test]
    fn single_rank_collectives_are_noops() {
        let results = Universe::launch(1, |u| {
            u.barrier();
            let mut value = 7u8;
            u.broadcast(&mut value, 0).unwrap();
            let gathered = u.gather(&value, 0).unwrap();
            (value, gathered)
        });
        assert_eq!(results[0], (7, Some(vec![7])));
    }
}
