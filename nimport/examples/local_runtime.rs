//! Local runtime example with in-memory store and a scripted engine.
//!
//! Submits one import before workers are running (executed inline) and
//! one after (executed by the pool), then prints both jobs with their
//! captured logs.
//!
//! Settings are read from `NIMPORT_*` variables, log filtering from
//! `RUST_LOG`.

use std::sync::Arc;
use std::time::Duration;

use nimport::telemetry::init_tracing;
use nimport::*;
use nimport_testkit::{ScriptedEngineFactory, fixtures};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = OrchestratorConfig::from_env()?;
    let table = Arc::new(ChannelTable::new(&config.capture));
    init_tracing(Arc::clone(&table), "info")?;

    let store = Arc::new(InMemoryJobStore::new());
    let engines = ScriptedEngineFactory::new().with_diff("+ interface Ethernet1/1 on leaf-01", 1);

    let workers = if config.workers.count == 0 {
        WorkerConfig::new(2)
    } else {
        config.workers.clone()
    };
    let runtime = DispatcherBuilder::new()
        .with_store(store.clone())
        .with_credentials(fixtures::credential_store())
        .with_engine_factory(Arc::new(engines))
        .with_channel_table(table)
        .with_retry_policy(config.retry.clone())
        .build_local(workers)?;
    let service = ImportService::new(Arc::clone(&runtime.dispatcher));

    println!("[MAIN] Submitting check import without workers");
    let inline = service.execute(fixtures::request(JobMode::Check)).await?;
    println!(
        "[MAIN] Job {} ran {} -> {}",
        inline.job.job.id, inline.execution_mode, inline.job.job.status
    );

    runtime.pool.spawn().await;
    println!(
        "[MAIN] Spawned {} workers",
        runtime.dispatcher.worker_count().await
    );

    let queued = service.execute(fixtures::request(JobMode::Apply)).await?;
    println!(
        "[MAIN] Job {} handed to {} workers",
        queued.job.job.id, queued.worker_count
    );

    let queued_id = queued.job.job.id;
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let status = service.status(queued_id).await?;
            if status.status.is_terminal() {
                return anyhow::Ok(());
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await??;

    runtime.pool.shutdown().await?;

    for id in [inline.job.job.id, queued_id] {
        let status = service.status(id).await?;
        println!("\n{}", serde_json::to_string_pretty(&status)?);
        for entry in service.logs(id, &LogFilter::default()).await? {
            println!(
                "  #{:<3} {:<8} {:<28} {}",
                entry.sequence,
                entry.level.as_str(),
                entry.source,
                entry.message
            );
        }
    }

    let report = cleanup_old_jobs(store.as_ref(), config.retention_days()).await?;
    println!("\n[MAIN] Retention removed {} jobs", report.jobs_deleted);

    Ok(())
}
