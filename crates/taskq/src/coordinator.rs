//! Coordinator-side scheduler state and its RPC service.
//!
//! The authoritative task list lives on universe rank 0 behind a single
//! mutex; every status transition happens under it. Subworlds talk to the
//! coordinator through two RPCs — claim the next waiting task, report one
//! complete — served by a dedicated thread so the coordinator rank can run
//! tasks of its own without starving the queue.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use makroq_comm::{ChannelRequestServer, Message, RequestHandler};

use crate::error::QueueError;
use crate::task::TaskStatus;
use crate::wire::encode_frame;

/// RPC topics served by the coordinator.
pub(crate) mod topics {
    pub const NEXT_WAITING: &str = "taskq.next_waiting";
    pub const SET_COMPLETE: &str = "taskq.set_complete";
    pub const SHUTDOWN: &str = "taskq.shutdown";
    /// Reply topic signalling a coordinator-side failure; the payload is an
    /// error description.
    pub const ERROR: &str = "taskq.error";
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct NextWaitingRequest {
    /// Subworld id of the caller, recorded in the claim log.
    pub worker: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct NextWaitingReply {
    /// Claimed task index, or -1 when no task is waiting.
    pub index: i64,
    /// Wire frame of the claimed task; the null frame when `index` is -1.
    pub task: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct SetCompleteRequest {
    pub index: u64,
    /// Re-serialized task record carrying output plain fields and
    /// output-presence bits.
    pub task: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Ack;

// ── Records ─────────────────────────────────────────────────────────

/// One enrolled task as the coordinator sees it.
#[derive(Debug, Clone)]
pub(crate) struct TaskRecord {
    pub priority: f64,
    pub status: TaskStatus,
    /// Latest wire form: the enrolled task until completion, then the
    /// completed task including its output plain fields.
    pub wire: Vec<u8>,
}

/// One entry of the claim log: which subworld claimed which task, in claim
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimRecord {
    pub worker: u64,
    pub index: usize,
}

/// Authoritative scheduler state, guarded by one mutex on rank 0.
#[derive(Default)]
pub(crate) struct CoordinatorState {
    pub records: Vec<TaskRecord>,
    pub claims: Vec<ClaimRecord>,
}

impl CoordinatorState {
    /// Append a `Waiting` record and return its index.
    pub fn enroll(&mut self, priority: f64, wire: Vec<u8>) -> usize {
        self.records.push(TaskRecord {
            priority,
            status: TaskStatus::Waiting,
            wire,
        });
        self.records.len() - 1
    }

    /// Claim the highest-priority `Waiting` task, ties broken by smallest
    /// index. Marks it `Running` and logs the claim.
    pub fn next_waiting(&mut self, worker: u64) -> Option<(usize, Vec<u8>)> {
        let mut best: Option<usize> = None;
        for (i, record) in self.records.iter().enumerate() {
            if record.status != TaskStatus::Waiting {
                continue;
            }
            match best {
                Some(b) if self.records[b].priority >= record.priority => {}
                _ => best = Some(i),
            }
        }
        let index = best?;
        self.records[index].status = TaskStatus::Running;
        self.claims.push(ClaimRecord { worker, index });
        debug!(index, worker, "task claimed");
        Some((index, self.records[index].wire.clone()))
    }

    /// Record a task complete. The record must be `Running`.
    pub fn set_complete(&mut self, index: usize, wire: Vec<u8>) -> Result<(), QueueError> {
        let record = self.records.get_mut(index).ok_or_else(|| {
            QueueError::Protocol(format!("set_complete for unknown task {index}"))
        })?;
        if record.status != TaskStatus::Running {
            return Err(QueueError::Protocol(format!(
                "set_complete for task {index} in state {}",
                record.status
            )));
        }
        record.status = TaskStatus::Complete;
        record.wire = wire;
        Ok(())
    }

    /// Statuses of all records, in enrollment order.
    pub fn statuses(&self) -> Vec<TaskStatus> {
        self.records.iter().map(|r| r.status).collect()
    }
}

// ── Service thread ──────────────────────────────────────────────────

/// Handle to the coordinator service running on universe rank 0.
pub(crate) struct Coordinator {
    pub state: Arc<Mutex<CoordinatorState>>,
    pub handle: Option<JoinHandle<()>>,
}

impl Coordinator {
    /// Spawn the service loop over the given server endpoint.
    pub fn spawn(server: ChannelRequestServer) -> Self {
        let state: Arc<Mutex<CoordinatorState>> = Arc::default();
        let loop_state = Arc::clone(&state);
        let handle = std::thread::Builder::new()
            .name("taskq-coordinator".into())
            .spawn(move || service_loop(server, loop_state))
            .expect("failed to spawn coordinator thread");
        Self {
            state,
            handle: Some(handle),
        }
    }
}

fn service_loop(server: ChannelRequestServer, state: Arc<Mutex<CoordinatorState>>) {
    loop {
        let (token, request) = match server.recv_request() {
            Ok(pair) => pair,
            // Every client handle dropped: nothing left to serve.
            Err(_) => break,
        };

        let cid = request.correlation_id;
        let reply = match request.topic.as_str() {
            topics::NEXT_WAITING => handle_next_waiting(&state, &request),
            topics::SET_COMPLETE => handle_set_complete(&state, &request),
            topics::SHUTDOWN => {
                let reply = Message::with_correlation(topics::SHUTDOWN, &Ack, cid);
                if let Ok(reply) = reply {
                    let _ = server.send_reply(token, reply);
                }
                break;
            }
            other => Err(QueueError::Protocol(format!("unexpected topic '{other}'"))),
        };

        let reply = match reply {
            Ok(reply) => reply,
            Err(err) => {
                warn!(error = %err, topic = %request.topic, "coordinator request failed");
                match Message::with_correlation(topics::ERROR, &err.to_string(), cid) {
                    Ok(reply) => reply,
                    Err(_) => continue,
                }
            }
        };
        let _ = server.send_reply(token, reply);
    }
    debug!("coordinator service stopped");
}

fn handle_next_waiting(
    state: &Mutex<CoordinatorState>,
    request: &Message,
) -> Result<Message, QueueError> {
    let NextWaitingRequest { worker } = request
        .decode()
        .map_err(|e| QueueError::Serialization(e.to_string()))?;

    let claimed = state.lock().unwrap().next_waiting(worker);
    let reply = match claimed {
        Some((index, task)) => NextWaitingReply {
            index: index as i64,
            task,
        },
        None => NextWaitingReply {
            index: -1,
            task: encode_frame(None)?,
        },
    };
    Message::with_correlation(topics::NEXT_WAITING, &reply, request.correlation_id)
        .map_err(|e| QueueError::Serialization(e.to_string()))
}

fn handle_set_complete(
    state: &Mutex<CoordinatorState>,
    request: &Message,
) -> Result<Message, QueueError> {
    let SetCompleteRequest { index, task } = request
        .decode()
        .map_err(|e| QueueError::Serialization(e.to_string()))?;

    state.lock().unwrap().set_complete(index as usize, task)?;
    Message::with_correlation(topics::SET_COMPLETE, &Ack, request.correlation_id)
        .map_err(|e| QueueError::Serialization(e.to_string()))
}
