use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use uuid::Uuid;

use caseflow::cli::{Cli, Command};
use caseflow::command::builtin::CommandDependencies;
use caseflow::command::{CommandSetBuilder, TransitionKind};
use caseflow::config::CaseflowConfig;
use caseflow::engine::wait_for_engine_response;
use caseflow::instance::InstanceIdentifier;
use caseflow::logging::init_logging;
use caseflow::remote::{ProcessEngineClient, ProcessEngineStatusResponse};
use caseflow::retry::RetryStrategy;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => CaseflowConfig::load_from(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => CaseflowConfig::load()?,
    };

    match cli.command {
        Command::Plan {
            kind,
            service_task_type,
            initial,
        } => plan(kind, service_task_type.as_deref(), initial),
        Command::Validate => validate(&config)?,
        Command::Backoff {
            kind,
            delay_ms,
            max_retries,
            max_delay_ms,
            iterations,
        } => {
            let mut strategy = RetryStrategy::new(kind.into(), Duration::from_millis(delay_ms));
            if let Some(max) = max_retries {
                strategy = strategy.with_max_retries(max);
            }
            if let Some(max) = max_delay_ms {
                strategy = strategy.with_max_delay(Duration::from_millis(max));
            }
            backoff(&strategy, iterations);
        }
        Command::Status {
            party,
            instance,
            wait,
        } => status(&config, party, instance, wait).await?,
    }

    Ok(())
}

fn plan(kind: TransitionKind, service_task_type: Option<&str>, initial: bool) {
    let set = CommandSetBuilder::build(kind, service_task_type, initial);
    println!("{kind}:");
    for (i, request) in set.commands.iter().enumerate() {
        println!("  {:>2}. {}", i + 1, request.command_key);
    }
    if !set.post_commit.is_empty() {
        println!("after commit:");
        for (i, request) in set.post_commit.iter().enumerate() {
            match &request.payload {
                Some(payload) => println!("  {:>2}. {} {payload}", i + 1, request.command_key),
                None => println!("  {:>2}. {}", i + 1, request.command_key),
            }
        }
    }
}

fn validate(config: &CaseflowConfig) -> Result<()> {
    let engine = config.process_engine(CommandDependencies::default())?;
    let sessions = config.session_cache();
    println!(
        "every transition is covered; lock ttl {:?}, poll timeout {:?}, session expiry {:?}",
        engine.lock_ttl(),
        engine.poll_settings().timeout,
        sessions.sliding_expiry()
    );
    Ok(())
}

fn backoff(strategy: &RetryStrategy, iterations: u32) {
    println!("{strategy}");
    for iteration in 1..=iterations {
        if !strategy.can_retry(iteration) {
            println!("  {iteration:>3}: give up");
            break;
        }
        println!("  {iteration:>3}: wait {:?}", strategy.calculate_delay(iteration));
    }
}

async fn status(config: &CaseflowConfig, party: i64, guid: Uuid, wait: bool) -> Result<()> {
    let client = config.engine_client()?;
    let instance = InstanceIdentifier::new(party, guid);

    if wait {
        let cancellation = CancellationToken::new();
        let on_ctrl_c = cancellation.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                on_ctrl_c.cancel();
            }
        });
        wait_for_engine_response(&client, instance, &config.poll, &cancellation).await?;
    }

    match client.get_active_job_status(instance).await? {
        Some(job) => print_job(instance, &job),
        None => println!("{instance}: no active job"),
    }
    Ok(())
}

fn print_job(instance: InstanceIdentifier, job: &ProcessEngineStatusResponse) {
    println!("{instance}: {}", job.overall_status);
    for task in job.ordered_incomplete_tasks() {
        match task.backoff_until {
            Some(until) => println!(
                "  {:>3}. {:<32} {} (retry {} after {until})",
                task.processing_order, task.command_key, task.status, task.requeue_count
            ),
            None => println!("  {:>3}. {:<32} {}", task.processing_order, task.command_key, task.status),
        }
    }
}
