//! `foreman supervisor run` command: drive a project's queue autonomously
//! until it idles out or the operator interrupts it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use foreman_core::queue::QueueEngine;
use foreman_core::supervisor::{Supervisor, SupervisorConfig};
use sqlx::SqlitePool;

#[allow(clippy::too_many_arguments)]
pub async fn run_start(
    pool: SqlitePool,
    queue: Arc<QueueEngine>,
    check_interval_s: u64,
    auto_approve_threshold: i32,
    max_idle_minutes: u64,
    enable_auto_approval: bool,
) -> Result<()> {
    let config = SupervisorConfig {
        project_id: queue.project_id().to_string(),
        check_interval: Duration::from_secs(check_interval_s),
        auto_approve_threshold,
        max_idle: Duration::from_secs(max_idle_minutes * 60),
        enable_auto_approval,
    };

    let supervisor = Supervisor::new(pool, queue.clone(), config);
    supervisor.start_continuous().await;
    println!("Autonomous supervisor running for project {}.", queue.project_id());
    println!("Press Ctrl+C to stop.");

    // Graceful shutdown: first signal stops the loop, second force-exits.
    let got_first_signal = Arc::new(AtomicBool::new(false));
    loop {
        tokio::signal::ctrl_c().await.ok();
        if got_first_signal.swap(true, Ordering::SeqCst) {
            eprintln!("\nForce exit.");
            std::process::exit(130);
        }
        eprintln!("\nStopping supervisor (Ctrl+C again to force)...");
        break;
    }

    supervisor.stop().await;
    let stats = supervisor.stats().await;
    println!(
        "Stopped. completed={} failed={} auto_approved={} manual_approval={}",
        stats.tasks_completed, stats.tasks_failed, stats.tasks_auto_approved, stats.tasks_manual_approval
    );

    Ok(())
}
