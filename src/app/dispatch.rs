use anyhow::{Context, Result};
use rand::Rng;
use rand::distr::Alphanumeric;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::app::status::{render_config_summary, render_lock_status};
use crate::cli::{Cli, Commands, LockCommands};
use wecom_mirror::Config;
use wecom_mirror::config::LockBackend;
use wecom_mirror::sync::{Clock, SharedClock, SystemClock, TaskLock};
use wecom_mirror::transport::gateway::run_gateway;
use wecom_mirror::transport::wecom::seal_text_callback;

fn random_nonce() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect()
}

fn shared_lock(config: &Config, clock: SharedClock) -> TaskLock {
    TaskLock::file(
        config.lock_path(),
        Duration::from_secs(config.sync.lock_timeout_secs),
        clock,
    )
}

fn run_lock_command(config: &Config, command: LockCommands) -> Result<()> {
    if config.sync.lock_backend == LockBackend::Memory {
        println!(
            "Lock backend is in-process memory; only the running gateway can see its task lock."
        );
        return Ok(());
    }

    let clock: SharedClock = Arc::new(SystemClock);
    let lock = shared_lock(config, Arc::clone(&clock));
    let timeout = Duration::from_secs(config.sync.lock_timeout_secs);

    match command {
        LockCommands::Status => {
            println!("Lock file: {}", config.lock_path().display());
            println!(
                "{}",
                render_lock_status(lock.holder().as_ref(), clock.now(), timeout)
            );
        }
        LockCommands::Release => match lock.holder() {
            Some(record) => {
                lock.release();
                info!(owner = %record.owner_id, "task lock released by operator");
                println!("Released task lock held by {}", record.owner_id);
            }
            None => println!("Task lock is already free"),
        },
    }
    Ok(())
}

fn run_simulate(
    config: &Config,
    user: &str,
    content: &str,
    timestamp: Option<i64>,
    nonce: Option<String>,
) -> Result<()> {
    config.validate()?;
    let timestamp = timestamp.unwrap_or_else(|| SystemClock.now().timestamp());
    let nonce = nonce.unwrap_or_else(random_nonce);
    let sealed = seal_text_callback(&config.wecom, user, content, timestamp, &nonce)
        .context("seal simulated callback")?;

    println!(
        "POST http://{}:{}{}?{}",
        config.gateway.host,
        config.gateway.port,
        config.gateway.callback_path,
        sealed.query()
    );
    println!();
    println!("{}", sealed.body);
    Ok(())
}

pub async fn dispatch(cli: Cli, config: Arc<Config>) -> Result<()> {
    match cli.command {
        Commands::Serve { port, host } => {
            config.validate()?;
            let port = port.unwrap_or(config.gateway.port);
            let host = host.unwrap_or_else(|| config.gateway.host.clone());
            if port == 0 {
                info!("Starting wecom-mirror gateway on {host} (random port)");
            } else {
                info!("Starting wecom-mirror gateway on {host}:{port}");
            }
            run_gateway(&host, port, Arc::clone(&config)).await
        }

        Commands::Lock { lock_command } => run_lock_command(&config, lock_command),

        Commands::Simulate {
            user,
            content,
            timestamp,
            nonce,
        } => run_simulate(&config, &user, &content, timestamp, nonce),

        Commands::CheckConfig => {
            config.validate()?;
            println!("{}", render_config_summary(&config));
            println!();
            println!("Configuration is valid.");
            Ok(())
        }
    }
}
