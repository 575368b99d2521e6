mod cli;
mod logging;
mod plugins;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{info, warn};
use warden_core::app::StatusCounts;
use warden_core::domain::{HostId, SubmitTask, Task};
use warden_core::impls::{InMemoryRegistry, InMemoryTaskStore};
use warden_core::{Coordinator, CoordinatorConfig};

use crate::cli::{Command, RunArgs};

const POLL: Duration = Duration::from_millis(100);

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::parse();
    logging::init_logging(args.log_level)?;

    match args.command {
        Command::Run(run_args) => run(run_args).await,
        Command::CheckConfig { config } => check_config(&config),
    }
}

fn check_config(path: &Path) -> Result<()> {
    let config = CoordinatorConfig::load_from_path(path)
        .with_context(|| format!("loading config from {path:?}"))?;
    print!("{}", config.to_toml_string()?);
    Ok(())
}

fn load_tasks(path: &Path) -> Result<Vec<SubmitTask>> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading tasks file at {path:?}"))?;
    serde_json::from_str(&contents).with_context(|| format!("parsing tasks JSON from {path:?}"))
}

async fn run(args: RunArgs) -> Result<()> {
    let base = match &args.config {
        Some(path) => CoordinatorConfig::load_from_path(path)
            .with_context(|| format!("loading config from {path:?}"))?,
        None => CoordinatorConfig::default(),
    };
    let requests = load_tasks(&args.tasks)?;
    let instances = args.instances as usize;
    if let Some(i) = args.crash_instance
        && i >= instances
    {
        bail!("--crash-instance {i} is out of range for {instances} instance(s)");
    }

    let store = InMemoryTaskStore::new();
    let registry = InMemoryRegistry::new();
    let catalog = Arc::new(plugins::demo_catalog()?);

    let mut coordinators = Vec::with_capacity(instances);
    for i in 0..instances {
        let mut config = base.clone();
        config.host = HostId::new(format!("{}-{i}", base.host));
        let coordinator = Coordinator::builder(config)
            .store(Arc::new(store.clone()))
            .registry(Arc::new(registry.clone()))
            .catalog(Arc::clone(&catalog))
            .expect_engines(&plugins::ENGINES)
            .build()?;
        coordinator.start().await?;
        coordinators.push(Arc::new(coordinator));
    }

    for (n, request) in requests.into_iter().enumerate() {
        let coordinator = &coordinators[n % instances];
        match coordinator.submit(request).await {
            Ok(task_id) => info!(task_id = %task_id, host = %coordinator.host(), "submitted"),
            Err(e) => warn!(index = n, error = %e, "submission rejected"),
        }
    }

    if let (Some(i), Some(ms)) = (args.crash_instance, args.crash_after_ms) {
        let coordinator = Arc::clone(&coordinators[i]);
        let registry = registry.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            warn!(host = %coordinator.host(), "simulating crash");
            let left = coordinator.halt().await;
            info!(host = %coordinator.host(), orphaned = left.len(), "instance down, expiring its session");
            registry.evict(coordinator.host());
        });
    }

    let finished = tokio::select! {
        finished = wait_for_tasks(&store, Duration::from_millis(args.timeout_ms)) => finished,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted");
            false
        }
    };

    // a halted instance has nothing left to drain
    for coordinator in &coordinators {
        coordinator.shutdown().await;
    }

    let tasks = store.all_tasks().await;
    let counts = StatusCounts::from_tasks(&tasks);
    info!(
        success = counts.success,
        failure = counts.failure,
        killed = counts.killed,
        active = counts.active(),
        "run finished"
    );
    println!("{}", serde_json::to_string_pretty(&tasks)?);

    if !finished {
        bail!("{} task(s) did not finish", counts.active());
    }
    Ok(())
}

/// Poll until every task is terminal. `false` on timeout.
async fn wait_for_tasks(store: &InMemoryTaskStore, timeout: Duration) -> bool {
    let all_terminal = async {
        loop {
            let tasks: Vec<Task> = store.all_tasks().await;
            if tasks.iter().all(|t| t.status.is_terminal()) {
                return;
            }
            tokio::time::sleep(POLL).await;
        }
    };
    tokio::time::timeout(timeout, all_terminal).await.is_ok()
}
