//! End-to-end scheduler scenarios over in-process universes.

use std::any::Any;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use makroq_comm::{Communicator, Subworld, Universe};
use makroq_taskq::{
    DistributedVector, MacroTask, MacroTaskQueue, QueueConfig, QueueError, SideStore, SquareInput,
    SquareTask, TaskRegistry, TaskStatus, TypedTask,
};

fn registry() -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    registry.register::<SquareTask>().unwrap();
    registry
}

fn config(path: &Path) -> QueueConfig {
    QueueConfig::default().with_store_dir(path)
}

fn square_inputs(u: &Universe, values: &[f64]) -> Vec<SquareInput> {
    values
        .iter()
        .enumerate()
        .map(|(i, d)| SquareInput {
            index: i as i64,
            value: *d,
            priority: 0.0,
            weights: DistributedVector::from_full(u, &[*d; 3]),
        })
        .collect()
}

fn assert_store_empty(dir: &tempfile::TempDir) {
    let store = SideStore::new(dir.path()).unwrap();
    assert_eq!(store.names().unwrap(), Vec::<String>::new());
}

// ── Scenario 1: universe 3, k = 3, five squaring tasks ──────────────

#[test]
fn five_tasks_over_three_singleton_subworlds() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().to_path_buf();

    let results = Universe::launch(3, move |u| {
        let mut queue = MacroTaskQueue::new(&u, 3, registry(), config(&path)).unwrap();
        let inputs = square_inputs(&u, &[0.0, 1.0, 2.0, 3.0, 4.0]);
        let outputs = queue.map(&SquareTask::default(), inputs).unwrap();

        let squared: Vec<f64> = outputs.iter().map(|o| o.squared).collect();
        let heavies: Vec<Option<Vec<f64>>> = outputs
            .iter()
            .map(|o| o.data.to_full(&u).unwrap())
            .collect();
        (squared, heavies, queue.statuses(), queue.claim_log())
    });

    for (rank, (squared, heavies, statuses, claims)) in results.into_iter().enumerate() {
        assert_eq!(squared, vec![0.0, 1.0, 4.0, 9.0, 16.0]);
        if rank != 0 {
            assert!(statuses.is_none());
            assert!(claims.is_none());
            continue;
        }

        for (i, heavy) in heavies.iter().enumerate() {
            let d = i as f64;
            assert_eq!(heavy.as_ref().unwrap(), &vec![d * d; 3]);
        }

        let statuses = statuses.unwrap();
        assert_eq!(statuses.len(), 5);
        assert!(statuses.iter().all(|s| *s == TaskStatus::Complete));

        // Claims are disjoint and cover the whole batch.
        let claims = claims.unwrap();
        let mut indices: Vec<usize> = claims.iter().map(|c| c.index).collect();
        indices.sort_unstable();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        for claim in &claims {
            assert!(claim.worker < 3);
        }
    }
    assert_store_empty(&dir);
}

// ── Scenario 2: universe 4, k = 2, priority-ordered claims ──────────

#[test]
fn high_priority_tasks_are_claimed_first() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().to_path_buf();
    let priorities = [0.0, 0.0, 5.0, 0.0, 5.0, 0.0, 0.0, 5.0, 0.0, 0.0];

    let results = Universe::launch(4, move |u| {
        let mut queue = MacroTaskQueue::new(&u, 2, registry(), config(&path)).unwrap();
        let inputs: Vec<SquareInput> = priorities
            .iter()
            .enumerate()
            .map(|(i, p)| SquareInput {
                index: i as i64,
                value: i as f64,
                priority: *p,
                weights: DistributedVector::from_full(&u, &[1.0, 2.0]),
            })
            .collect();
        let outputs = queue.map(&SquareTask::default(), inputs).unwrap();
        let squared: Vec<f64> = outputs.iter().map(|o| o.squared).collect();
        (squared, queue.claim_log())
    });

    let expected: Vec<f64> = (0..10).map(|i| (i * i) as f64).collect();
    for (rank, (squared, claims)) in results.into_iter().enumerate() {
        assert_eq!(squared, expected);
        if rank == 0 {
            let order: Vec<usize> = claims.unwrap().iter().map(|c| c.index).collect();
            // Priority 5 first (FIFO among equals), then the rest in
            // enrollment order.
            assert_eq!(order, vec![2, 4, 7, 0, 1, 3, 5, 6, 8, 9]);
        }
    }
    assert_store_empty(&dir);
}

// ── Scenario 3: universe 2, k = 2, a single task ────────────────────

#[test]
fn single_task_is_claimed_by_exactly_one_subworld() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().to_path_buf();

    let results = Universe::launch(2, move |u| {
        let mut queue = MacroTaskQueue::new(&u, 2, registry(), config(&path)).unwrap();
        let inputs = square_inputs(&u, &[3.0]);
        let outputs = queue.map(&SquareTask::default(), inputs).unwrap();
        (outputs[0].squared, queue.claim_log())
    });

    assert_eq!(results[0].0, 9.0);
    assert_eq!(results[1].0, 9.0);
    let claims = results[0].1.as_ref().unwrap();
    assert_eq!(claims.len(), 1);
    assert_eq!(claims[0].index, 0);
    assert_store_empty(&dir);
}

// ── Scenario 4: an unregistered kind tag poisons the batch ──────────

#[derive(Debug, Default)]
struct GhostTask;

impl MacroTask for GhostTask {
    fn kind_tag(&self) -> &'static str {
        "ghost"
    }

    fn run(&mut self, _subworld: &Subworld) -> Result<(), QueueError> {
        Ok(())
    }

    fn encode_body(&self) -> Result<Vec<u8>, QueueError> {
        Ok(Vec::new())
    }

    fn decode_body(&mut self, _body: &[u8]) -> Result<(), QueueError> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

impl TypedTask for GhostTask {
    type Input = ();
    type Output = ();

    fn bind(&self, _input: ()) -> Self {
        GhostTask
    }

    fn into_output(self) -> Option<()> {
        Some(())
    }
}

#[test]
fn unregistered_kind_fails_the_batch_everywhere() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().to_path_buf();

    let results = Universe::launch(2, move |u| {
        // The registry knows squares only; the ghost enrolls fine and dies
        // at deserialization on whichever subworld claims it.
        let mut queue = MacroTaskQueue::new(&u, 2, registry(), config(&path)).unwrap();
        let err = queue.map(&GhostTask, vec![()]).unwrap_err();
        (matches!(err, QueueError::UnknownKind(tag) if tag == "ghost"), queue.statuses())
    });

    for (rank, (is_unknown_kind, statuses)) in results.into_iter().enumerate() {
        assert!(is_unknown_kind, "rank {rank} saw a different error");
        if rank == 0 {
            // The claim happened before the failure, so the task is stuck
            // Running: no retry, no return arrow.
            assert_eq!(statuses.unwrap(), vec![TaskStatus::Running]);
        }
    }
}

// ── Scenario 5: universe 1, k = 1, coordinator == worker ────────────

#[test]
fn single_rank_universe_runs_serially() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().to_path_buf();

    let results = Universe::launch(1, move |u| {
        let mut queue = MacroTaskQueue::new(&u, 1, registry(), config(&path)).unwrap();
        let inputs = square_inputs(&u, &[2.0, 5.0, 7.0]);
        let outputs = queue.map(&SquareTask::default(), inputs).unwrap();
        let squared: Vec<f64> = outputs.iter().map(|o| o.squared).collect();
        (squared, queue.statuses().unwrap(), queue.claim_log().unwrap())
    });

    let (squared, statuses, claims) = &results[0];
    assert_eq!(squared, &vec![4.0, 25.0, 49.0]);
    assert_eq!(statuses.len(), 3);
    assert!(statuses.iter().all(|s| *s == TaskStatus::Complete));
    assert_eq!(claims.len(), 3);
    assert!(claims.iter().all(|c| c.worker == 0));
    assert_store_empty(&dir);
}

// ── Scenario 6: the empty batch ─────────────────────────────────────

#[test]
fn empty_batch_returns_empty_without_store_access() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().to_path_buf();

    let results = Universe::launch(4, move |u| {
        let mut queue = MacroTaskQueue::new(&u, 2, registry(), config(&path)).unwrap();
        let outputs = queue.map(&SquareTask::default(), Vec::new()).unwrap();
        (outputs.len(), queue.claim_log().map(|c| c.len()))
    });

    for (rank, (len, claims)) in results.into_iter().enumerate() {
        assert_eq!(len, 0);
        if rank == 0 {
            assert_eq!(claims, Some(0));
        }
    }
    assert_store_empty(&dir);
}

// ── Plain payloads: the shuttle is a no-op ──────────────────────────

#[derive(Debug, Default)]
struct PlainAddTask {
    a: i64,
    b: i64,
    sum: Option<i64>,
    pace: u64,
}

#[derive(Serialize, Deserialize)]
struct PlainAddBody {
    a: i64,
    b: i64,
    sum: Option<i64>,
    pace: u64,
}

#[derive(Debug, Clone, Copy)]
struct PlainAddInput {
    a: i64,
    b: i64,
    pace: u64,
}

impl MacroTask for PlainAddTask {
    fn kind_tag(&self) -> &'static str {
        "plain-add"
    }

    fn run(&mut self, subworld: &Subworld) -> Result<(), QueueError> {
        if self.pace > 0 {
            std::thread::sleep(Duration::from_millis(self.pace));
        }
        self.sum = Some(self.a + self.b);
        subworld.barrier();
        Ok(())
    }

    fn encode_body(&self) -> Result<Vec<u8>, QueueError> {
        let body = PlainAddBody {
            a: self.a,
            b: self.b,
            sum: self.sum,
            pace: self.pace,
        };
        rmp_serde::to_vec(&body).map_err(|e| QueueError::Serialization(e.to_string()))
    }

    fn decode_body(&mut self, body: &[u8]) -> Result<(), QueueError> {
        let body: PlainAddBody =
            rmp_serde::from_slice(body).map_err(|_| QueueError::TruncatedStream)?;
        self.a = body.a;
        self.b = body.b;
        self.sum = body.sum;
        self.pace = body.pace;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

impl TypedTask for PlainAddTask {
    type Input = PlainAddInput;
    type Output = i64;

    fn bind(&self, input: PlainAddInput) -> Self {
        Self {
            a: input.a,
            b: input.b,
            sum: None,
            pace: input.pace,
        }
    }

    fn into_output(self) -> Option<i64> {
        self.sum
    }
}

fn plain_registry() -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    registry.register::<PlainAddTask>().unwrap();
    registry
}

#[test]
fn heavy_free_payload_never_touches_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().to_path_buf();

    let results = Universe::launch(2, move |u| {
        let mut queue = MacroTaskQueue::new(&u, 2, plain_registry(), config(&path)).unwrap();
        let inputs: Vec<PlainAddInput> = (0..4)
            .map(|i| PlainAddInput {
                a: i,
                b: 10 * i,
                pace: 0,
            })
            .collect();
        let outputs = queue.map(&PlainAddTask::default(), inputs).unwrap();
        // Nothing was ever persisted, not even transiently.
        assert!(queue.store().is_empty().unwrap());
        outputs
    });

    for outputs in results {
        assert_eq!(outputs, vec![0, 11, 22, 33]);
    }
    assert_store_empty(&dir);
}

// ── Paced work: every subworld gets a share ─────────────────────────

#[test]
fn every_subworld_claims_when_work_is_paced() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().to_path_buf();

    let results = Universe::launch(3, move |u| {
        let mut queue = MacroTaskQueue::new(&u, 3, plain_registry(), config(&path)).unwrap();
        let inputs: Vec<PlainAddInput> = (0..6)
            .map(|i| PlainAddInput {
                a: i,
                b: i,
                pace: 40,
            })
            .collect();
        queue.map(&PlainAddTask::default(), inputs).unwrap();
        queue.claim_log()
    });

    let claims = results[0].as_ref().unwrap();
    let workers: HashSet<u64> = claims.iter().map(|c| c.worker).collect();
    assert_eq!(workers, (0..3).collect());
    let indices: HashSet<usize> = claims.iter().map(|c| c.index).collect();
    assert_eq!(indices, (0..6).collect());
}

// ── Idempotence: mapping twice gives element-wise equal results ─────

#[test]
fn mapping_the_same_inputs_twice_matches() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().to_path_buf();

    let results = Universe::launch(4, move |u| {
        let mut queue = MacroTaskQueue::new(&u, 2, registry(), config(&path)).unwrap();
        let first = queue
            .map(&SquareTask::default(), square_inputs(&u, &[1.0, 2.0, 3.0]))
            .unwrap();
        let second = queue
            .map(&SquareTask::default(), square_inputs(&u, &[1.0, 2.0, 3.0]))
            .unwrap();
        let first: Vec<f64> = first.iter().map(|o| o.squared).collect();
        let second: Vec<f64> = second.iter().map(|o| o.squared).collect();
        (first, second, queue.statuses())
    });

    for (rank, (first, second, statuses)) in results.into_iter().enumerate() {
        assert_eq!(first, vec![1.0, 4.0, 9.0]);
        assert_eq!(first, second);
        if rank == 0 {
            let statuses = statuses.unwrap();
            assert_eq!(statuses.len(), 6);
            assert!(statuses.iter().all(|s| *s == TaskStatus::Complete));
        }
    }
    assert_store_empty(&dir);
}

// ── Boundary: k = 1 keeps everything in one subworld ────────────────

#[test]
fn one_subworld_takes_the_whole_batch() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().to_path_buf();

    let results = Universe::launch(4, move |u| {
        let mut queue = MacroTaskQueue::new(&u, 1, registry(), config(&path)).unwrap();
        let outputs = queue
            .map(&SquareTask::default(), square_inputs(&u, &[1.0, 4.0]))
            .unwrap();
        let squared: Vec<f64> = outputs.iter().map(|o| o.squared).collect();
        (squared, queue.claim_log())
    });

    for (rank, (squared, claims)) in results.into_iter().enumerate() {
        assert_eq!(squared, vec![1.0, 16.0]);
        if rank == 0 {
            assert!(claims.unwrap().iter().all(|c| c.worker == 0));
        }
    }
    assert_store_empty(&dir);
}

// ── Standalone enroll leaves records Waiting ────────────────────────

#[test]
fn enroll_marks_tasks_waiting() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().to_path_buf();

    let results = Universe::launch(2, move |u| {
        let mut queue = MacroTaskQueue::new(&u, 2, registry(), config(&path)).unwrap();
        let tasks: Vec<Box<dyn MacroTask>> = vec![
            Box::new(SquareTask::with_payload(0, 1.0, 0.0)),
            Box::new(SquareTask::with_payload(1, 2.0, 3.0)),
        ];
        queue.enroll(tasks).unwrap();
        queue.statuses()
    });

    assert_eq!(
        results[0].as_ref().unwrap(),
        &vec![TaskStatus::Waiting, TaskStatus::Waiting]
    );
    assert!(results[1].is_none());
}
