//! Command-line runner for the standard jobsmith queues.
//!
//! Usage:
//!   jobsmith run --demo-jobs 20 --duration 30s
//!   jobsmith run --config jobsmith.toml
//!   jobsmith config --profile production > jobsmith.toml

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use jobsmith::{
    InMemoryStatsCollector, JobService, JobsmithConfig, MemoryStore, QueueRegistry,
    StatisticsCollector, SystemClock, WorkerPool,
    clock::Clock,
    config::parse_duration,
    executor::{JobHandler, ProcessorRegistry, handler},
    logging::init_logging,
    presets::{InAppKind, StandardQueues, job_types},
    store::JobStore,
};
use rand::Rng;
use serde_json::json;
use std::{process, sync::Arc, time::Duration};
use tracing::{info, warn};

#[derive(Parser)]
#[command(
    name = "jobsmith",
    version,
    about = "Run the jobsmith email, notification and processing queues"
)]
struct Cli {
    #[arg(
        long = "config",
        global = true,
        help = "Path to a TOML configuration file",
        value_name = "PATH"
    )]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Start worker pools for the standard queues")]
    Run {
        #[arg(long = "concurrency", help = "Override worker.max_concurrency")]
        concurrency: Option<usize>,

        #[arg(
            long = "demo-jobs",
            default_value_t = 0,
            help = "Enqueue this many sample jobs across the queues on startup"
        )]
        demo_jobs: usize,

        #[arg(
            long = "duration",
            help = "Stop after this long (e.g. 30s, 5m) instead of waiting for Ctrl-C",
            value_parser = parse_duration_arg
        )]
        duration: Option<Duration>,
    },

    #[command(about = "Print a configuration file")]
    Config {
        #[arg(long = "profile", value_enum, help = "Start from a preset profile")]
        profile: Option<Profile>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Profile {
    Default,
    Development,
    Production,
}

fn parse_duration_arg(s: &str) -> Result<Duration, String> {
    parse_duration(s)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match load_config(cli.config.as_deref()) {
        Ok(config) => match cli.command {
            Command::Run {
                concurrency,
                demo_jobs,
                duration,
            } => run(config, concurrency, demo_jobs, duration).await,
            Command::Config { profile } => print_config(config, profile),
        },
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn load_config(path: Option<&str>) -> anyhow::Result<JobsmithConfig> {
    match path {
        Some(path) => JobsmithConfig::from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path)),
        None => JobsmithConfig::from_env().context("invalid JOBSMITH_* environment"),
    }
}

fn print_config(config: JobsmithConfig, profile: Option<Profile>) -> anyhow::Result<()> {
    let config = match profile {
        None => config,
        Some(Profile::Default) => JobsmithConfig::default(),
        Some(Profile::Development) => JobsmithConfig::development(),
        Some(Profile::Production) => JobsmithConfig::production(),
    };
    print!("{}", config.to_toml()?);
    Ok(())
}

async fn run(
    mut config: JobsmithConfig,
    concurrency: Option<usize>,
    demo_jobs: usize,
    duration: Option<Duration>,
) -> anyhow::Result<()> {
    if let Some(concurrency) = concurrency {
        config.worker.max_concurrency = concurrency;
    }
    config.validate()?;
    init_logging(&config.logging)?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store: Arc<dyn JobStore> = Arc::new(MemoryStore::with_clock(clock.clone()));
    let registry = Arc::new(QueueRegistry::new());
    let queues =
        StandardQueues::register_configured(&registry, store, clock.clone(), &config).await;
    let collector = Arc::new(InMemoryStatsCollector::new_default().with_clock(clock.clone()));

    let mut pools = vec![
        WorkerPool::new(
            queues.email.clone(),
            email_processors()?,
            config.worker_config(queues.email.name()),
        ),
        WorkerPool::new(
            queues.notification.clone(),
            notification_processors()?,
            config.worker_config(queues.notification.name()),
        ),
        WorkerPool::new(
            queues.processing.clone(),
            processing_processors()?,
            config.worker_config(queues.processing.name()),
        ),
    ]
    .into_iter()
    .map(|pool| pool.with_stats_collector(collector.clone() as Arc<dyn StatisticsCollector>))
    .collect::<Vec<_>>();

    for pool in &mut pools {
        pool.start()?;
    }

    if demo_jobs > 0 {
        enqueue_demo_jobs(&queues, demo_jobs).await?;
    }

    match duration {
        Some(duration) => {
            info!(?duration, "Running for a fixed duration");
            tokio::select! {
                _ = tokio::time::sleep(duration) => {}
                _ = tokio::signal::ctrl_c() => info!("Interrupted"),
            }
        }
        None => {
            info!("Running until Ctrl-C");
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for Ctrl-C")?;
        }
    }

    for pool in &mut pools {
        if let Err(e) = pool.stop().await {
            warn!(queue = %pool.queue().name(), error = %e, "Worker pool did not stop cleanly");
        }
    }

    let service = JobService::new(registry.clone()).with_clock(clock);
    let snapshot = service.stats().await?;
    let processing = collector
        .get_system_statistics(Duration::from_secs(3600))
        .await?;

    for (name, error) in registry.close_all().await {
        warn!(queue = %name, error = %error, "Queue did not close cleanly");
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({ "queues": snapshot, "processing": processing }))?
    );
    Ok(())
}

/// Sleep for a random simulated delivery latency.
async fn simulate_latency(min_ms: u64, max_ms: u64) {
    let millis = rand::thread_rng().gen_range(min_ms..=max_ms);
    tokio::time::sleep(Duration::from_millis(millis)).await;
}

fn simulated_failure(rate: f64) -> bool {
    rand::thread_rng().gen_bool(rate)
}

fn email_processors() -> jobsmith::Result<ProcessorRegistry> {
    let deliver: JobHandler = handler(|job| async move {
        simulate_latency(50, 250).await;
        if simulated_failure(0.05) {
            return Err(jobsmith::JobsmithError::handler("SMTP server rejected the message"));
        }
        Ok(json!({
            "messageId": uuid::Uuid::new_v4().to_string(),
            "deliveredTo": job.payload["to"],
        }))
    });

    Ok(ProcessorRegistry::builder(deliver.clone())
        .register(job_types::WELCOME_EMAIL, deliver.clone())?
        .register(job_types::PASSWORD_RESET, deliver.clone())?
        .register(job_types::NOTIFICATION_EMAIL, deliver)?
        .build())
}

fn notification_processors() -> jobsmith::Result<ProcessorRegistry> {
    let deliver: JobHandler = handler(|job| async move {
        simulate_latency(20, 120).await;
        if simulated_failure(0.1) {
            return Err(jobsmith::JobsmithError::handler(format!(
                "{} provider unavailable",
                job.payload["channel"].as_str().unwrap_or("notification")
            )));
        }
        Ok(json!({ "channel": job.payload["channel"], "delivered": true }))
    });

    Ok(ProcessorRegistry::builder(deliver.clone())
        .register(job_types::PUSH_NOTIFICATION, deliver.clone())?
        .register(job_types::SMS_NOTIFICATION, deliver.clone())?
        .register(job_types::IN_APP_NOTIFICATION, deliver)?
        .build())
}

fn processing_processors() -> jobsmith::Result<ProcessorRegistry> {
    let process: JobHandler = handler(|job| async move {
        simulate_latency(500, 2000).await;
        Ok(json!({ "processed": job.type_name, "outputs": 1 }))
    });

    Ok(ProcessorRegistry::builder(process.clone())
        .register(job_types::IMAGE_PROCESSING, process.clone())?
        .register(job_types::DATA_EXPORT, process.clone())?
        .register(job_types::REPORT_GENERATION, process)?
        .build())
}

async fn enqueue_demo_jobs(queues: &StandardQueues, count: usize) -> jobsmith::Result<()> {
    for i in 0..count {
        let user = format!("user-{}", i);
        let email = format!("{}@example.com", user);
        match i % 6 {
            0 => queues.send_welcome_email(&email, &user).await?,
            1 => queues.send_password_reset_email(&email, "reset-token").await?,
            2 => queues.send_push_notification(&user, "Hello", "You have a new message", None).await?,
            3 => queues.send_sms_notification(&user, "+15550100", "Your code is 1234").await?,
            4 => queues.send_in_app_notification(&user, "Profile saved", InAppKind::Success).await?,
            _ => queues.process_image(&format!("https://cdn.example.com/{}.png", user), &["resize", "compress"]).await?,
        };
    }
    info!(count, "Enqueued demo jobs");
    Ok(())
}
