//! taskq-demo — drive one `map` fan-out end-to-end on an in-process
//! universe.
//!
//! Launches `--ranks` rank threads, partitions them into `--subworlds`
//! subworlds, and maps a batch of squaring tasks (plain scalar plus a
//! distributed heavy vector) across them. Rank 0 reports the outputs and
//! the claim order afterwards.

use clap::Parser;
use tracing::info;

use makroq_comm::{Communicator, Universe};
use makroq_taskq::{
    DistributedVector, MacroTaskQueue, QueueConfig, QueueError, SquareInput, SquareOutput,
    SquareTask, TaskRegistry,
};

// ── CLI ─────────────────────────────────────────────────────────────

/// Macro-task queue demo: centralized scheduling over process subworlds.
#[derive(Parser, Debug)]
#[command(name = "taskq-demo", version, about)]
struct Cli {
    /// Number of universe ranks to launch.
    #[arg(long, env = "TASKQ_RANKS", default_value_t = 4)]
    ranks: usize,

    /// Number of subworlds to partition the universe into.
    #[arg(long, env = "TASKQ_SUBWORLDS", default_value_t = 2)]
    subworlds: usize,

    /// Number of tasks to submit.
    #[arg(long, env = "TASKQ_TASKS", default_value_t = 8)]
    tasks: usize,

    /// Path to a queue config TOML file. Without it, a throwaway side
    /// store directory is used.
    #[arg(long, env = "TASKQ_CONFIG")]
    config: Option<String>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut _store_guard = None;
    let config = match &cli.config {
        Some(path) => {
            let config = QueueConfig::from_file(path)?;
            info!(path = %path, "loaded queue config");
            config
        }
        None => {
            let dir = tempfile::tempdir()?;
            let config = QueueConfig::default().with_store_dir(dir.path());
            _store_guard = Some(dir);
            config
        }
    };

    let subworlds = cli.subworlds;
    let ntasks = cli.tasks;
    info!(ranks = cli.ranks, subworlds, tasks = ntasks, "launching universe");

    type RankResult = (usize, Vec<SquareOutput>, Option<Vec<makroq_taskq::ClaimRecord>>);
    let results = Universe::launch(cli.ranks, move |u| -> Result<RankResult, QueueError> {
        let mut registry = TaskRegistry::new();
        registry.register::<SquareTask>()?;
        let mut queue = MacroTaskQueue::new(&u, subworlds, registry, config.clone())?;

        let inputs: Vec<SquareInput> = (0..ntasks)
            .map(|i| SquareInput {
                index: i as i64,
                value: i as f64,
                priority: 0.0,
                weights: DistributedVector::from_full(&u, &vec![i as f64; 4]),
            })
            .collect();

        let outputs = queue.map(&SquareTask::default(), inputs)?;
        Ok((u.rank(), outputs, queue.claim_log()))
    });

    for result in results {
        let (rank, outputs, claims) = result?;
        if rank != 0 {
            continue;
        }
        for output in &outputs {
            info!(index = output.index, squared = output.squared, "output");
        }
        if let Some(claims) = claims {
            for claim in claims {
                info!(index = claim.index, subworld = claim.worker, "claimed by");
            }
        }
    }

    Ok(())
}
