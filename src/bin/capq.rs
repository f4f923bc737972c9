//! capq CLI: drive the capture dispatcher from the command line.

use capq::config::{Config, DispatcherConfig};
use capq::model::CompletionRecord;
use capq::pool::AdmissionPolicy;
use capq::provider::{CommandCamera, SimulatedCamera};
use capq::telemetry::{TelemetryConfig, init_telemetry};
use capq::{CaptureProvider, Dispatcher, DispatcherHandle, Urgency};
use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

#[derive(Parser)]
#[command(name = "capq", about = "Urgency-ordered capture dispatcher")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Submit one request per client to a simulated camera and print each
    /// client's callback
    Demo {
        /// Urgency of each client's request, in submission order
        #[arg(long, value_delimiter = ',', default_values_t = [1, 2, 3, 4, 5])]
        urgencies: Vec<Urgency>,
        /// Simulated exposure time
        #[arg(long, default_value_t = 1000)]
        delay_ms: u64,
        /// Make every capture fail with this message
        #[arg(long)]
        fail: Option<String>,
        #[command(flatten)]
        pool: PoolArgs,
    },
    /// Capture by running an external command; its stdout is the image
    Exec {
        /// Capture command
        command: PathBuf,
        /// Arguments passed to the command
        #[arg(last = true)]
        args: Vec<String>,
        /// Urgency of a request (repeat for several requests)
        #[arg(long = "urgency", default_values_t = [0])]
        urgencies: Vec<Urgency>,
        /// Print one JSON record per completed request
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        pool: PoolArgs,
    },
}

#[derive(Args)]
struct PoolArgs {
    /// Dispatcher config TOML (overrides CAPQ_* environment variables)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Maximum concurrent captures
    #[arg(long)]
    max_concurrent: Option<usize>,
    /// Admission policy when saturated: block or reject
    #[arg(long)]
    admission: Option<AdmissionPolicy>,
}

impl PoolArgs {
    fn resolve(&self, base: DispatcherConfig) -> anyhow::Result<DispatcherConfig> {
        let mut config = match self.config {
            Some(ref path) => DispatcherConfig::load(path)
                .with_context(|| format!("loading dispatcher config {}", path.display()))?,
            None => base,
        };
        if let Some(n) = self.max_concurrent {
            config.max_concurrent = n;
        }
        if let Some(policy) = self.admission {
            config.admission = policy;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let guard = init_telemetry(
        TelemetryConfig::local("capq", config.log_level.clone())
            .with_endpoint(config.otel_endpoint.clone()),
    )?;
    tracing::debug!(otlp = guard.is_exporting(), "telemetry initialized");

    match cli.command {
        Command::Demo {
            urgencies,
            delay_ms,
            fail,
            pool,
        } => {
            let mut camera = SimulatedCamera::new(Duration::from_millis(delay_ms));
            if let Some(message) = fail {
                camera = camera.failing(message);
            }
            cmd_demo(camera, pool.resolve(config.dispatcher)?, urgencies).await
        }
        Command::Exec {
            command,
            args,
            urgencies,
            json,
            pool,
        } => {
            let camera = args
                .into_iter()
                .fold(CommandCamera::new(command), |camera, arg| camera.arg(arg));
            cmd_exec(camera, pool.resolve(config.dispatcher)?, urgencies, json).await
        }
    }
}

/// Start the loop on its own task and stop it on Ctrl-C.
fn start<P: CaptureProvider>(
    dispatcher: Dispatcher<P>,
) -> (DispatcherHandle, tokio::task::JoinHandle<capq::Result<()>>) {
    let handle = dispatcher.handle();

    let on_signal = handle.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        on_signal.stop();
    });

    let runner = tokio::spawn(async move { dispatcher.run().await });
    (handle, runner)
}

async fn cmd_demo(
    camera: SimulatedCamera,
    config: DispatcherConfig,
    urgencies: Vec<Urgency>,
) -> anyhow::Result<()> {
    let dispatcher = Dispatcher::new(camera, config)?;
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<()>();

    // Queue every client before the loop starts so dispatch order is
    // purely by urgency.
    for (i, urgency) in urgencies.iter().copied().enumerate() {
        let client = i + 1;
        let (ok_tx, err_tx) = (done_tx.clone(), done_tx.clone());
        dispatcher.submit(
            urgency,
            move |image| {
                println!("Client {client} success callback: {}", image.to_text());
                let _ = ok_tx.send(());
            },
            move |reason| {
                println!("Client {client} failure callback: {reason}");
                let _ = err_tx.send(());
            },
        );
    }
    drop(done_tx);

    let (handle, runner) = start(dispatcher);

    // Ends when every client heard back: each handler's sender is dropped
    // once it has run.
    while done_rx.recv().await.is_some() {}

    handle.stop();
    runner.await??;
    Ok(())
}

async fn cmd_exec(
    camera: CommandCamera,
    config: DispatcherConfig,
    urgencies: Vec<Urgency>,
    json: bool,
) -> anyhow::Result<()> {
    let dispatcher = Dispatcher::new(camera, config)?;
    let mut waiting = JoinSet::new();

    for urgency in urgencies {
        let ticket = dispatcher.submit_ticket(urgency);
        let submitted = Instant::now();
        waiting.spawn(async move {
            let id = ticket.id();
            let outcome = ticket.await;
            CompletionRecord::new(id, urgency, &outcome, submitted.elapsed())
        });
    }

    let (handle, runner) = start(dispatcher);

    let mut failures = 0usize;
    while let Some(record) = waiting.join_next().await {
        let record = record?;
        if !record.success {
            failures += 1;
        }
        if json {
            println!("{}", serde_json::to_string(&record)?);
        } else if let Some(ref error) = record.error {
            println!("{} (urgency {}): failed: {error}", record.request_id, record.urgency);
        } else {
            println!(
                "{} (urgency {}): {} bytes in {}ms",
                record.request_id,
                record.urgency,
                record.bytes.unwrap_or(0),
                record.duration_ms
            );
        }
    }

    handle.stop();
    runner.await??;

    if failures > 0 {
        anyhow::bail!("{failures} capture(s) failed");
    }
    Ok(())
}
