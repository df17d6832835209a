//! The macro-task queue: coordinator-owned task list, subworld dispatch
//! loop, and the batch `map` fan-out.
//!
//! Universe rank 0 owns the authoritative records behind one mutex and
//! serves the claim/complete RPCs from a dedicated thread; every other rank
//! keeps nothing but its subworld handle and an RPC client. Claims flow
//! through the RPC path only — the coordinator rank's own subworld included
//! — and the answer to every claim is broadcast inside the asking subworld
//! so all members agree on what they are running.

use std::time::{Duration, Instant};

use tracing::{debug, info};

use makroq_comm::{
    partition, ChannelRequestClient, Communicator, CommunicatorExt, Message, RequestSender,
    Subworld, Universe,
};

use crate::config::QueueConfig;
use crate::coordinator::{
    topics, Ack, ClaimRecord, Coordinator, NextWaitingReply, NextWaitingRequest,
    SetCompleteRequest,
};
use crate::error::{ErrorReport, QueueError};
use crate::registry::TaskRegistry;
use crate::shuttle;
use crate::store::SideStore;
use crate::task::{encode_task, MacroTask, TaskStatus, TypedTask};

fn input_name(index: usize) -> String {
    format!("input_{index}")
}

fn result_name(index: usize) -> String {
    format!("result_{index}")
}

/// Distributed macro-task queue over a partitioned universe.
pub struct MacroTaskQueue {
    universe: Universe,
    subworld: Subworld,
    registry: TaskRegistry,
    store: SideStore,
    client: ChannelRequestClient,
    coordinator: Option<Coordinator>,
    rpc_timeout: Duration,
    /// Tasks enrolled so far; agrees across ranks because enrollment is
    /// collective.
    enrolled: usize,
}

impl MacroTaskQueue {
    /// Build a queue over `nworlds` subworlds of the universe.
    ///
    /// Collective over the universe; every rank passes the same arguments.
    pub fn new(
        universe: &Universe,
        nworlds: usize,
        registry: TaskRegistry,
        config: QueueConfig,
    ) -> Result<Self, QueueError> {
        let subworld = partition(universe, nworlds)?;
        let store = SideStore::new(&config.store_dir)?;

        let tag = universe.collective_tag("taskq");
        let coordinator = if universe.rank() == 0 {
            let server = universe.serve(&tag)?;
            Some(Coordinator::spawn(server))
        } else {
            None
        };
        let client = universe.connect(&tag)?;
        universe.barrier();

        info!(
            rank = universe.rank(),
            subworld = subworld.id(),
            nworlds,
            "task queue ready"
        );

        Ok(Self {
            universe: universe.clone(),
            subworld,
            registry,
            store,
            client,
            coordinator,
            rpc_timeout: config.rpc_timeout(),
            enrolled: 0,
        })
    }

    /// The subworld this rank belongs to.
    pub fn subworld(&self) -> &Subworld {
        &self.subworld
    }

    /// The side store backing the shuttle.
    pub fn store(&self) -> &SideStore {
        &self.store
    }

    /// Claim order so far: `(worker, index)` pairs on universe rank 0,
    /// `None` elsewhere.
    pub fn claim_log(&self) -> Option<Vec<ClaimRecord>> {
        self.coordinator
            .as_ref()
            .map(|c| c.state.lock().unwrap().claims.clone())
    }

    /// Record statuses in enrollment order on universe rank 0, `None`
    /// elsewhere.
    pub fn statuses(&self) -> Option<Vec<TaskStatus>> {
        self.coordinator
            .as_ref()
            .map(|c| c.state.lock().unwrap().statuses())
    }

    /// Enroll tasks into the queue.
    ///
    /// Collective over the universe: heavy inputs are persisted to the side
    /// store (and dropped from memory) from the universe, and rank 0
    /// appends one `Waiting` record per task. Afterwards the coordinator is
    /// the sole holder of queue state.
    pub fn enroll(&mut self, tasks: Vec<Box<dyn MacroTask>>) -> Result<(), QueueError> {
        let count = tasks.len();
        for (offset, mut task) in tasks.into_iter().enumerate() {
            let index = self.enrolled + offset;
            task.persist_input(&self.universe, &self.store, &input_name(index))?;
            if let Some(coordinator) = &self.coordinator {
                let wire = encode_task(task.as_ref())?;
                coordinator
                    .state
                    .lock()
                    .unwrap()
                    .enroll(task.priority(), wire);
            }
        }
        self.enrolled += count;

        if let Some(coordinator) = &self.coordinator {
            let state = coordinator.state.lock().unwrap();
            info!(count, total = state.records.len(), "tasks enrolled");
            for (index, record) in state.records.iter().enumerate() {
                debug!(index, priority = record.priority, status = %record.status, "queued");
            }
        }
        self.universe.barrier();
        Ok(())
    }

    /// Fan a batch out over the subworlds and collect the outputs.
    ///
    /// One task per input is built by binding the payload into a clone of
    /// `template`. The call drains the queue, synchronizes error state
    /// across the universe, and (on success) loads every output back into
    /// the universe and empties the side store. The first error observed in
    /// rank order fails the whole batch on every rank; partial results are
    /// never returned.
    pub fn map<T: TypedTask>(
        &mut self,
        template: &T,
        inputs: Vec<T::Input>,
    ) -> Result<Vec<T::Output>, QueueError> {
        if inputs.is_empty() {
            self.universe.barrier();
            return Ok(Vec::new());
        }

        let base = self.enrolled;
        let count = inputs.len();
        let tasks: Vec<Box<dyn MacroTask>> = inputs
            .into_iter()
            .map(|input| Box::new(template.bind(input)) as Box<dyn MacroTask>)
            .collect();
        self.enroll(tasks)?;

        let outcome = self.dispatch();
        self.universe.barrier();
        self.sync_error(outcome)?;

        let mut outputs = Vec::with_capacity(count);
        for index in base..base + count {
            outputs.push(self.collect::<T>(index)?);
        }
        if self.universe.rank() == 0 {
            info!(count, "map complete");
        }
        Ok(outputs)
    }

    /// The subworld work loop: claim, rebuild, run, persist, report.
    fn dispatch(&self) -> Result<(), QueueError> {
        loop {
            let Some((index, wire)) = self.next_waiting()? else {
                break;
            };
            let started = Instant::now();

            let mut task = self.registry.decode(&wire)?.ok_or_else(|| {
                QueueError::Protocol(format!("claimed task {index} arrived as the null frame"))
            })?;

            task.load_input(&self.subworld, &self.store, &input_name(index))?;
            if task.has_heavy_input() {
                // The input blob has served its one consumer.
                shuttle::remove(&self.subworld, &self.store, &input_name(index))?;
            }

            task.run(&self.subworld)?;
            self.subworld.barrier();

            task.persist_output(&self.subworld, &self.store, &result_name(index))?;
            let completed = encode_task(task.as_ref())?;
            self.set_complete(index, completed)?;

            info!(
                index,
                subworld = self.subworld.id(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "completed task"
            );
        }
        Ok(())
    }

    /// Claim the next waiting task. RPC from subworld local rank 0, answer
    /// broadcast to the rest of the subworld.
    fn next_waiting(&self) -> Result<Option<(usize, Vec<u8>)>, QueueError> {
        let mut outcome: Option<Result<NextWaitingReply, ErrorReport>> =
            if self.subworld.rank() == 0 {
                Some(
                    self.request_next()
                        .map_err(|e| ErrorReport::from_error(&e)),
                )
            } else {
                None
            };
        self.subworld.broadcast(&mut outcome, 0)?;

        let reply = outcome
            .ok_or_else(|| QueueError::Protocol("no scheduler reply was broadcast".into()))?
            .map_err(ErrorReport::into_error)?;
        if reply.index < 0 {
            return Ok(None);
        }
        Ok(Some((reply.index as usize, reply.task)))
    }

    fn request_next(&self) -> Result<NextWaitingReply, QueueError> {
        let request = Message::new(
            topics::NEXT_WAITING,
            &NextWaitingRequest {
                worker: self.subworld.id() as u64,
            },
        )
        .map_err(|e| QueueError::Serialization(e.to_string()))?;
        let reply = self.client.request(request, self.rpc_timeout)?;
        Self::decode_reply(reply)
    }

    /// Report a task complete. RPC from subworld local rank 0; the outcome
    /// is shared with the whole subworld.
    fn set_complete(&self, index: usize, wire: Vec<u8>) -> Result<(), QueueError> {
        let mut failure: Option<ErrorReport> = None;
        if self.subworld.rank() == 0 {
            if let Err(e) = self.request_complete(index, wire) {
                failure = Some(ErrorReport::from_error(&e));
            }
        }
        self.subworld.broadcast(&mut failure, 0)?;
        self.subworld.barrier();
        match failure {
            Some(report) => Err(report.into_error()),
            None => Ok(()),
        }
    }

    fn request_complete(&self, index: usize, wire: Vec<u8>) -> Result<(), QueueError> {
        let request = Message::new(
            topics::SET_COMPLETE,
            &SetCompleteRequest {
                index: index as u64,
                task: wire,
            },
        )
        .map_err(|e| QueueError::Serialization(e.to_string()))?;
        let reply = self.client.request(request, self.rpc_timeout)?;
        let _: Ack = Self::decode_reply(reply)?;
        Ok(())
    }

    /// Decode an RPC reply, turning a coordinator-side failure back into
    /// its error.
    fn decode_reply<T: serde::de::DeserializeOwned>(reply: Message) -> Result<T, QueueError> {
        if reply.topic == topics::ERROR {
            let detail: String = reply
                .decode()
                .map_err(|e| QueueError::Serialization(e.to_string()))?;
            return Err(QueueError::Protocol(detail));
        }
        reply
            .decode()
            .map_err(|e| QueueError::Serialization(e.to_string()))
    }

    /// Agree on the batch outcome: the first error in rank order wins and
    /// is rebuilt with its taxonomy on every rank.
    fn sync_error(&self, outcome: Result<(), QueueError>) -> Result<(), QueueError> {
        let report = outcome.as_ref().err().map(ErrorReport::from_error);
        let gathered = self.universe.gather(&report, 0)?;
        let mut verdict: Option<ErrorReport> =
            gathered.and_then(|reports| reports.into_iter().flatten().next());
        self.universe.broadcast(&mut verdict, 0)?;
        match verdict {
            Some(report) => Err(report.into_error()),
            None => Ok(()),
        }
    }

    /// Load one completed task back into the universe and extract its
    /// typed output.
    fn collect<T: TypedTask>(&self, index: usize) -> Result<T::Output, QueueError> {
        let mut wire: Vec<u8> = Vec::new();
        if let Some(coordinator) = &self.coordinator {
            wire = coordinator.state.lock().unwrap().records[index].wire.clone();
        }
        self.universe.broadcast_bytes(&mut wire, 0)?;

        let mut task = self.registry.decode(&wire)?.ok_or_else(|| {
            QueueError::Protocol(format!("completed task {index} arrived as the null frame"))
        })?;
        task.load_output(&self.universe, &self.store, &result_name(index))?;
        if task.has_heavy_output() {
            shuttle::remove(&self.universe, &self.store, &result_name(index))?;
        }

        let task = task
            .into_any()
            .downcast::<T>()
            .map_err(|_| QueueError::Protocol(format!("task {index} is not the mapped kind")))?;
        task.into_output()
            .ok_or_else(|| QueueError::Protocol(format!("task {index} completed without an output")))
    }
}

impl Drop for MacroTaskQueue {
    fn drop(&mut self) {
        // Only the coordinator rank tears the service down; everyone else
        // just drops their client.
        if let Some(coordinator) = &mut self.coordinator {
            if let Ok(request) = Message::new(topics::SHUTDOWN, &Ack) {
                let _ = self.client.request(request, Duration::from_secs(5));
            }
            if let Some(handle) = coordinator.handle.take() {
                let _ = handle.join();
            }
        }
    }
}
