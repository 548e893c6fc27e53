// crates/cli/src/main.rs
//! jobstream: run one remote job and collect its pages into a result store.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jobstream_core::{
    ClientConfig, DecoderConfig, JobState, PageSize, ResultStore, StreamingDecoder,
};
use jobstream_jobs::{HttpTransport, JobDispatcher, StoreSink};
use jobstream_observability::{init_tracing, LogFormat};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "jobstream")]
#[command(about = "Client for paged remote jobs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a job, poll it to completion and store its results
    Run {
        /// Base URL of the job service (defaults to JOBSTREAM_URL)
        #[arg(long)]
        url: Option<String>,

        /// Remote endpoint name, appended to the base URL
        #[arg(short, long)]
        endpoint: String,

        /// Request body as JSON
        #[arg(short, long, default_value = "{}")]
        body: String,

        /// Elements per page (defaults to JOBSTREAM_PAGE_SIZE or 200)
        #[arg(short, long)]
        page_size: Option<u32>,

        /// Store namespace for the results
        #[arg(long, default_value = "cli")]
        namespace: String,

        /// Store key for the results (defaults to the endpoint)
        #[arg(long)]
        key: Option<String>,

        /// Emit logs as JSON
        #[arg(long)]
        json_logs: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            url,
            endpoint,
            body,
            page_size,
            namespace,
            key,
            json_logs,
        } => {
            init_tracing(if json_logs {
                LogFormat::Json
            } else {
                LogFormat::Compact
            });
            let mut config = ClientConfig::default();
            if let Some(url) = url {
                config = config.with_base_url(url);
            }
            if let Some(size) = page_size {
                config = config.with_page_size(PageSize::new(size)?);
            }
            let key = key.unwrap_or_else(|| endpoint.clone());
            run(config, endpoint, &body, &namespace, &key).await
        }
    }
}

async fn run(
    config: ClientConfig,
    endpoint: String,
    body: &str,
    namespace: &str,
    key: &str,
) -> Result<ExitCode> {
    let request_body: Value = serde_json::from_str(body).context("--body is not valid JSON")?;
    let transport = HttpTransport::from_config(&config).context("cannot build HTTP transport")?;
    let decoder = StreamingDecoder::with_config(DecoderConfig::from(&config))?;

    let store = Arc::new(ResultStore::new());
    let (callback, sink) = StoreSink::attach(&store, decoder, namespace, key, None)?;

    let dispatcher = JobDispatcher::from_config(endpoint, Arc::new(transport), &config);
    let job = dispatcher.request_with_callback(request_body, config.default_page_size, callback);

    let state = tokio::select! {
        state = job.wait() => state,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, canceling job");
            if let Some(cancel) = job.cancel() {
                cancel.await.context("cancel task failed")?;
            }
            job.wait().await
        }
    };
    let report = sink.finished().await;

    let job_id = job.job_id().map(|id| id.to_string());
    println!(
        "{state} job={} elements={} stored={}",
        job_id.as_deref().unwrap_or("-"),
        report.elements,
        store.size(namespace, key)
    );
    if let Some(error) = &report.error {
        eprintln!("error: {error}");
    }

    Ok(if state == JobState::Done {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
