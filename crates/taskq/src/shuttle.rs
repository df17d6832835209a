//! External-state shuttle: moves subworld-bound heavy objects through the
//! side store.
//!
//! A heavy object's in-memory form is tied to the group that holds it (its
//! pieces live across the group's ranks), so it cannot ride a message.
//! Instead the producing group folds it into one distribution-independent
//! archive blob, parks the blob in the side store under a deterministic
//! name, and the consuming group rebuilds the object under its own layout.
//! Group barriers bracket every store touch, matching the fence discipline
//! the queue relies on: a name is readable by any group once a
//! universe-wide barrier separates it from the paired persist.

use tracing::debug;

use makroq_comm::{Communicator, CommunicatorExt};

use crate::error::QueueError;
use crate::store::{SideStore, SideStoreError};

/// An object bound to the communicator that holds it.
pub trait HeavyObject: Sized + Send {
    /// Collectively fold this object into one archive blob.
    ///
    /// Collective over `comm`; returns the blob on the group's local rank 0
    /// and `None` elsewhere.
    fn archive(&self, comm: &dyn Communicator) -> Result<Option<Vec<u8>>, QueueError>;

    /// Rebuild the object from an archive blob, bound to `comm`'s size and
    /// layout. Every member receives the full blob.
    fn restore(comm: &dyn Communicator, archive: &[u8]) -> Result<Self, QueueError>;
}

/// Collectively write `object` to the store under `name`, consuming the
/// in-memory copy.
pub fn persist<H: HeavyObject>(
    comm: &dyn Communicator,
    store: &SideStore,
    name: &str,
    object: H,
) -> Result<(), QueueError> {
    comm.barrier();
    let written = match object.archive(comm)? {
        Some(blob) => {
            let result = store.write(name, &blob);
            if result.is_ok() {
                debug!(name, bytes = blob.len(), "heavy object persisted");
            }
            result
        }
        None => Ok(()),
    };
    drop(object);
    share_outcome(comm, written)?;
    comm.barrier();
    Ok(())
}

/// Collectively rebuild the object stored under `name`, bound to `comm`.
///
/// The blob is read on the group's local rank 0 and broadcast before
/// restoring, so a missing name fails identically on every member instead
/// of stranding the group in a collective.
pub fn load<H: HeavyObject>(
    comm: &dyn Communicator,
    store: &SideStore,
    name: &str,
) -> Result<H, QueueError> {
    comm.barrier();
    let mut blob: Option<Vec<u8>> = None;
    let mut read_err: Option<SideStoreError> = None;
    if comm.rank() == 0 {
        match store.read(name) {
            Ok(bytes) => blob = Some(bytes),
            Err(e) => read_err = Some(e),
        }
    }
    comm.broadcast(&mut blob, 0)?;
    let Some(blob) = blob else {
        // Rank 0 keeps the precise error; everyone else failed the same
        // read by proxy.
        return Err(match read_err {
            Some(e) => e.into(),
            None => SideStoreError::NotFound(name.to_string()).into(),
        });
    };

    let object = H::restore(comm, &blob)?;
    comm.barrier();
    debug!(name, "heavy object loaded");
    Ok(object)
}

/// Collectively erase the entry stored under `name`.
pub fn remove(
    comm: &dyn Communicator,
    store: &SideStore,
    name: &str,
) -> Result<(), QueueError> {
    comm.barrier();
    let removed = if comm.rank() == 0 {
        store.remove(name)
    } else {
        Ok(())
    };
    share_outcome(comm, removed)?;
    comm.barrier();
    Ok(())
}

/// Broadcast the writer's store outcome so a failed touch fails the whole
/// group instead of leaving it split across a collective.
fn share_outcome(
    comm: &dyn Communicator,
    outcome: Result<(), SideStoreError>,
) -> Result<(), QueueError> {
    let mut failure: Option<String> = outcome.as_ref().err().map(|e| e.to_string());
    comm.broadcast(&mut failure, 0)?;
    match (outcome, failure) {
        (Err(e), _) => Err(e.into()),
        (Ok(()), Some(detail)) => Err(SideStoreError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            detail,
        ))
        .into()),
        (Ok(()), None) => Ok(()),
    }
}
