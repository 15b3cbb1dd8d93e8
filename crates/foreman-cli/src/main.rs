mod config;
mod gate_cmd;
mod status_cmd;
mod supervisor_cmd;
mod task_cmd;
#[cfg(test)]
mod test_util;

use std::sync::Arc;

use clap::{Parser, Subcommand};

use foreman_core::llm::SubprocessDriver;
use foreman_core::queue::QueueEngine;
use foreman_db::models::{AutonomyLevel, TaskType};
use foreman_db::pool;

use config::ForemanConfig;

#[derive(Parser)]
#[command(name = "foreman", about = "Autonomous multi-agent task orchestrator")]
struct Cli {
    /// Database URL (overrides FOREMAN_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Project to operate on
    #[arg(long, global = true, default_value = "default")]
    project: String,

    /// Working directory the LLM driver runs its agent in
    #[arg(long, global = true, default_value = ".")]
    project_path: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a foreman config file (no database required)
    Init {
        /// SQLite connection URL
        #[arg(long, default_value = "sqlite://./foreman.db")]
        db_url: String,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Initialize the foreman database (creates file + runs migrations)
    DbInit,
    /// Enqueue a new task
    Enqueue {
        /// Short task title
        title: String,
        /// Longer task description (used as the LLM prompt if --prompt is omitted)
        #[arg(long, default_value = "")]
        description: String,
        /// Kind of work, drives the Approval Resolver's output checks
        #[arg(long, default_value = "code_generation")]
        task_type: TaskType,
        /// Agent persona to run the task under
        #[arg(long, default_value = "developer")]
        persona: String,
        /// Gating policy: auto, supervised, or approval_gates
        #[arg(long, default_value = "supervised")]
        autonomy: AutonomyLevel,
        /// Dispatch priority, higher runs first
        #[arg(long, default_value_t = 50)]
        priority: i32,
        /// Parent task ID, if this is a subtask
        #[arg(long)]
        parent: Option<String>,
        /// Explicit prompt text, used verbatim instead of the description
        #[arg(long)]
        prompt: Option<String>,
    },
    /// List tasks and project progress
    Status,
    /// Show full detail for one task
    Show {
        /// Task ID to show
        task_id: String,
    },
    /// Cancel a task
    Cancel {
        /// Task ID to cancel
        task_id: String,
    },
    /// Change a task's dispatch priority
    Reorder {
        /// Task ID to reorder
        task_id: String,
        /// New priority (higher runs first)
        priority: i32,
    },
    /// Add a dependency edge: task_id cannot dispatch until depends_on completes
    Depend {
        /// Task that should wait
        task_id: String,
        /// Task it depends on
        depends_on: String,
    },
    /// Approval gate management
    Gate {
        #[command(subcommand)]
        command: GateCommands,
    },
    /// Run the autonomous supervisor loop for the project until it idles out
    Supervise {
        /// Seconds between main-loop ticks
        #[arg(long, default_value_t = 5)]
        check_interval: u64,
        /// Minimum score (0-100) for auto-approval
        #[arg(long, default_value_t = 80)]
        auto_approve_threshold: i32,
        /// Minutes of no activity before the loop exits
        #[arg(long, default_value_t = 30)]
        max_idle_minutes: u64,
        /// Disable the auto-approval sweep entirely
        #[arg(long)]
        no_auto_approve: bool,
    },
}

#[derive(Subcommand)]
enum GateCommands {
    /// List gates recorded against a task
    List {
        /// Task ID to list gates for
        task_id: String,
    },
    /// Approve a pending gate
    Approve {
        /// Gate ID to approve
        gate_id: String,
        /// Name recorded as the approver
        #[arg(long, default_value = "operator")]
        approver: String,
        /// Optional notes
        #[arg(long)]
        notes: Option<String>,
    },
    /// Reject a pending gate
    Reject {
        /// Gate ID to reject
        gate_id: String,
        /// Name recorded as the approver
        #[arg(long, default_value = "operator")]
        approver: String,
        /// Optional notes
        #[arg(long)]
        notes: Option<String>,
    },
}

/// Execute the `foreman init` command: write config file.
fn cmd_init(db_url: &str, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: db_url.to_string(),
        },
        llm: config::LlmSection::default(),
    };

    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    println!("  llm.binary = {}", cfg.llm.binary);
    println!();
    println!("Next: run `foreman db-init` to create and migrate the database.");

    Ok(())
}

/// Execute the `foreman db-init` command: create database file and run migrations.
async fn cmd_db_init(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let resolved = ForemanConfig::resolve(cli_db_url);

    println!("Initializing foreman database...");

    let db_pool = pool::create_pool(&resolved.db_config).await?;
    let migrations_path = pool::default_migrations_path();
    pool::run_migrations(&db_pool, migrations_path).await?;

    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    db_pool.close().await;
    println!("foreman db-init complete.");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Commands::Init { db_url, force } = &cli.command {
        cmd_init(db_url, *force)?;
        return Ok(());
    }
    if let Commands::DbInit = &cli.command {
        cmd_db_init(cli.database_url.as_deref()).await?;
        return Ok(());
    }

    let resolved = ForemanConfig::resolve(cli.database_url.as_deref());
    let db_pool = pool::create_pool(&resolved.db_config).await?;
    pool::run_migrations(&db_pool, pool::default_migrations_path()).await?;

    let driver = Arc::new(SubprocessDriver::new(
        resolved.llm_binary.clone(),
        resolved.llm_args.clone(),
    ));
    let queue = QueueEngine::new(db_pool.clone(), driver, cli.project.clone(), cli.project_path.clone());

    let result = run_command(cli.command, db_pool.clone(), queue).await;
    db_pool.close().await;
    result
}

async fn run_command(command: Commands, db_pool: sqlx::SqlitePool, queue: Arc<QueueEngine>) -> anyhow::Result<()> {
    match command {
        Commands::Init { .. } | Commands::DbInit => unreachable!("handled before this point"),
        Commands::Enqueue {
            title,
            description,
            task_type,
            persona,
            autonomy,
            priority,
            parent,
            prompt,
        } => {
            task_cmd::run_enqueue(
                &queue,
                &title,
                &description,
                task_type,
                &persona,
                autonomy,
                priority,
                parent.as_deref(),
                prompt.as_deref(),
            )
            .await?;
        }
        Commands::Status => {
            status_cmd::run_status(&db_pool, &queue).await?;
        }
        Commands::Show { task_id } => {
            status_cmd::run_show(&queue, &task_id).await?;
        }
        Commands::Cancel { task_id } => {
            task_cmd::run_cancel(&queue, &task_id).await?;
        }
        Commands::Reorder { task_id, priority } => {
            task_cmd::run_reorder(&queue, &task_id, priority).await?;
        }
        Commands::Depend { task_id, depends_on } => {
            task_cmd::run_depend(&queue, &task_id, &depends_on).await?;
        }
        Commands::Gate { command } => match command {
            GateCommands::List { task_id } => gate_cmd::run_list(&queue, &task_id).await?,
            GateCommands::Approve {
                gate_id,
                approver,
                notes,
            } => gate_cmd::run_approve(&queue, &gate_id, &approver, notes.as_deref()).await?,
            GateCommands::Reject {
                gate_id,
                approver,
                notes,
            } => gate_cmd::run_reject(&queue, &gate_id, &approver, notes.as_deref()).await?,
        },
        Commands::Supervise {
            check_interval,
            auto_approve_threshold,
            max_idle_minutes,
            no_auto_approve,
        } => {
            supervisor_cmd::run_start(
                db_pool,
                queue,
                check_interval,
                auto_approve_threshold,
                max_idle_minutes,
                !no_auto_approve,
            )
            .await?;
        }
    }

    Ok(())
}
