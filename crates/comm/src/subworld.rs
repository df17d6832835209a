//! Round-robin partitioning of the universe into disjoint subworlds.

use std::sync::Arc;

use tracing::debug;

use crate::error::CommError;
use crate::group::{Communicator, GroupCore};
use crate::universe::Universe;

/// A disjoint subgroup of universe ranks with its own collectives.
///
/// Handles are immutable once returned by [`partition`].
pub struct Subworld {
    id: usize,
    rank: usize,
    universe_rank: usize,
    ranks: Vec<usize>,
    core: Arc<GroupCore>,
}

impl Subworld {
    /// Identifier of this subworld (its round-robin color).
    pub fn id(&self) -> usize {
        self.id
    }

    /// The calling process's rank in the universe.
    pub fn universe_rank(&self) -> usize {
        self.universe_rank
    }

    /// Universe ranks belonging to this subworld, ascending.
    pub fn ranks(&self) -> &[usize] {
        &self.ranks
    }

    /// Whether the given universe rank is a member.
    pub fn contains(&self, universe_rank: usize) -> bool {
        self.ranks.contains(&universe_rank)
    }
}

impl Communicator for Subworld {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.core.size()
    }

    fn barrier(&self) {
        self.core.barrier();
    }

    fn broadcast_bytes(&self, buf: &mut Vec<u8>, root: usize) -> Result<(), CommError> {
        self.core.broadcast(self.rank, buf, root)
    }

    fn gather_bytes(&self, part: Vec<u8>, root: usize) -> Result<Option<Vec<Vec<u8>>>, CommError> {
        self.core.gather(self.rank, part, root)
    }
}

/// Split the universe into `nworlds` disjoint subworlds by round-robin
/// assignment: universe rank `r` joins subworld `r % nworlds`.
///
/// Collective over the universe; every rank must call with the same
/// `nworlds`. Fails with `InvalidArgument` unless `1 <= nworlds <= N`.
/// Local rank 0 of subworld `c` is universe rank `c`.
pub fn partition(universe: &Universe, nworlds: usize) -> Result<Subworld, CommError> {
    let n = universe.size();
    if nworlds < 1 || nworlds > n {
        return Err(CommError::InvalidArgument(format!(
            "cannot split {n} ranks into {nworlds} subworlds"
        )));
    }

    let color = universe.rank() % nworlds;
    let members: Vec<usize> = (0..n).filter(|r| r % nworlds == color).collect();
    let local_rank = universe.rank() / nworlds;

    let tag = universe.collective_tag("subworld");
    let key = format!("{tag}:{color}");
    let core = if local_rank == 0 {
        let core = Arc::new(GroupCore::new(members.len()));
        universe.exchange().publish_group(&key, Arc::clone(&core));
        core
    } else {
        universe.exchange().wait_group(&key)
    };
    universe.barrier();

    debug!(
        universe_rank = universe.rank(),
        subworld = color,
        local_rank,
        members = ?members,
        "joined subworld"
    );

    Ok(Subworld {
        id: color,
        rank: local_rank,
        universe_rank: universe.rank(),
        ranks: members,
        core,
    })
}
