//! The universe: a flat set of rank threads sharing collective state.
//!
//! [`Universe::launch`] spawns one thread per rank and hands each a
//! [`Universe`] handle. The handle is both a [`Communicator`] over the full
//! rank set and the anchor for everything that must be exchanged between
//! ranks out-of-band: subworld group state (see [`crate::partition`]) and
//! request/reply service endpoints (see [`crate::rpc`]).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use tracing::debug;

use crate::error::CommError;
use crate::group::{Communicator, GroupCore};
use crate::rpc::{ChannelRequestClient, ChannelRequestServer, RpcEnvelope};

// ── Exchange ────────────────────────────────────────────────────────

struct ExchangeInner {
    groups: HashMap<String, Arc<GroupCore>>,
    services: HashMap<String, mpsc::Sender<RpcEnvelope>>,
}

/// Rendezvous point for handles that cannot travel through byte
/// collectives: subgroup state and RPC endpoints. Lookups block until the
/// owning rank has published, which is safe under collective discipline.
pub(crate) struct Exchange {
    inner: Mutex<ExchangeInner>,
    cv: Condvar,
}

impl Exchange {
    fn new() -> Self {
        Self {
            inner: Mutex::new(ExchangeInner {
                groups: HashMap::new(),
                services: HashMap::new(),
            }),
            cv: Condvar::new(),
        }
    }

    pub(crate) fn publish_group(&self, key: &str, core: Arc<GroupCore>) {
        let mut inner = self.inner.lock().unwrap();
        inner.groups.insert(key.to_string(), core);
        self.cv.notify_all();
    }

    pub(crate) fn wait_group(&self, key: &str) -> Arc<GroupCore> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(core) = inner.groups.get(key) {
                return Arc::clone(core);
            }
            inner = self.cv.wait(inner).unwrap();
        }
    }

    fn publish_service(
        &self,
        key: &str,
        tx: mpsc::Sender<RpcEnvelope>,
    ) -> Result<(), CommError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.services.contains_key(key) {
            return Err(CommError::InvalidArgument(format!(
                "service '{key}' is already registered"
            )));
        }
        inner.services.insert(key.to_string(), tx);
        self.cv.notify_all();
        Ok(())
    }

    fn wait_service(&self, key: &str) -> mpsc::Sender<RpcEnvelope> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(tx) = inner.services.get(key) {
                return tx.clone();
            }
            inner = self.cv.wait(inner).unwrap();
        }
    }
}

// ── Universe ────────────────────────────────────────────────────────

struct UniverseShared {
    size: usize,
    core: GroupCore,
    exchange: Exchange,
}

/// Per-rank handle to the universe.
///
/// Cloning is cheap; clones share the collective state of the launch. The
/// per-handle collective counter is copied, so a clone stays consistent as
/// long as every rank keeps issuing collective constructions in the same
/// order (the same discipline the collectives themselves require).
pub struct Universe {
    rank: usize,
    shared: Arc<UniverseShared>,
    seq: AtomicU64,
}

impl Clone for Universe {
    fn clone(&self) -> Self {
        Self {
            rank: self.rank,
            shared: Arc::clone(&self.shared),
            seq: AtomicU64::new(self.seq.load(Ordering::Relaxed)),
        }
    }
}

impl Universe {
    /// Spawn `size` rank threads, run `body` on each, and return the
    /// per-rank results in rank order.
    ///
    /// Panics in a rank body propagate as a panic here, so test failures
    /// inside ranks stay visible.
    pub fn launch<F, R>(size: usize, body: F) -> Vec<R>
    where
        F: Fn(Universe) -> R + Send + Sync + 'static,
        R: Send + 'static,
    {
        assert!(size >= 1, "universe needs at least one rank");

        let shared = Arc::new(UniverseShared {
            size,
            core: GroupCore::new(size),
            exchange: Exchange::new(),
        });
        let body = Arc::new(body);

        let handles: Vec<_> = (0..size)
            .map(|rank| {
                let shared = Arc::clone(&shared);
                let body = Arc::clone(&body);
                thread::Builder::new()
                    .name(format!("rank-{rank}"))
                    .spawn(move || {
                        let universe = Universe {
                            rank,
                            shared,
                            seq: AtomicU64::new(0),
                        };
                        body(universe)
                    })
                    .expect("failed to spawn rank thread")
            })
            .collect();

        handles
            .into_iter()
            .map(|h| h.join().expect("rank thread panicked"))
            .collect()
    }

    /// Next tag for a collectively-constructed resource (subworld, service).
    ///
    /// Every rank must call this from the same sequence of collective
    /// constructions, so the tags agree across the universe without any
    /// communication.
    pub fn collective_tag(&self, prefix: &str) -> String {
        let n = self.seq.fetch_add(1, Ordering::Relaxed);
        format!("{prefix}:{n}")
    }

    /// Register a request/reply service under `name` and return the server
    /// half. One rank serves; every rank may [`Universe::connect`].
    pub fn serve(&self, name: &str) -> Result<ChannelRequestServer, CommError> {
        let (tx, rx) = mpsc::channel();
        self.shared.exchange.publish_service(name, tx)?;
        debug!(rank = self.rank, service = name, "service registered");
        Ok(ChannelRequestServer::new(rx))
    }

    /// Connect to the service registered under `name`, blocking until it
    /// has been published.
    pub fn connect(&self, name: &str) -> Result<ChannelRequestClient, CommError> {
        let tx = self.shared.exchange.wait_service(name);
        debug!(rank = self.rank, service = name, "connected to service");
        Ok(ChannelRequestClient::new(tx))
    }

    pub(crate) fn exchange(&self) -> &Exchange {
        &self.shared.exchange
    }
}

impl Communicator for Universe {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn barrier(&self) {
        self.shared.core.barrier();
    }

    fn broadcast_bytes(&self, buf: &mut Vec<u8>, root: usize) -> Result<(), CommError> {
        self.shared.core.broadcast(self.rank, buf, root)
    }

    fn gather_bytes(&self, part: Vec<u8>, root: usize) -> Result<Option<Vec<Vec<u8>>>, CommError> {
        self.shared.core.gather(self.rank, part, root)
    }
}
