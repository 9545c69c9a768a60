use clap::Parser;
use std::sync::Arc;
use taskflow_backend::InMemoryBackend;
use taskflow_broker::InMemoryBroker;
use taskflow_core::Config;
use taskflow_worker::handler::{AddHandler, ConcatHandler};
use taskflow_worker::{Server, WorkerError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "tf-worker")]
#[command(about = "Distributed task queue worker", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(long)]
    config: Option<String>,

    /// Consumer tag reported to the broker
    #[arg(long, default_value = "taskflow_worker")]
    consumer_tag: String,

    /// Number of concurrent task pipelines
    #[arg(short, long, default_value = "4")]
    concurrency: usize,

    /// Consume from a custom queue instead of the default
    #[arg(long)]
    queue: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    let broker = Arc::new(InMemoryBroker::new());
    let backend = Arc::new(InMemoryBackend::new());
    let server = Server::new(config, broker, backend);

    server.register_task("add", AddHandler);
    server.register_task("concat", ConcatHandler);
    tracing::info!("Registered tasks: {:?}", server.registered_task_names());

    let worker = match &args.queue {
        Some(queue) => server.new_worker_with_queue(&args.consumer_tag, args.concurrency, queue),
        None => server.new_worker(&args.consumer_tag, args.concurrency),
    };
    let worker = Arc::new(worker);

    match worker.launch().await {
        Ok(()) | Err(WorkerError::GracefulQuit) => Ok(()),
        Err(e) => Err(e.into()),
    }
}
