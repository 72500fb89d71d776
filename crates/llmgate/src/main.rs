use std::process::ExitCode;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use llmgate::api::{self, AppState};
use llmgate::jobs::{JobStore, JobSubmitter, JobWorker, ResultRetriever, WorkerOptions};
use llmgate::{init_logging, load_config, Database, GatewayError, OllamaClient};

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("llmgate: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> llmgate::Result<()> {
    let config = load_config()?;
    init_logging(config.log_format);

    info!(
        backend = %config.backend_url,
        database = %config.database_file().display(),
        scratch = %config.scratch_dir.display(),
        "Starting llmgate"
    );

    let store = JobStore::new(Database::open_in_dir(&config.database_path)?);
    let backend = OllamaClient::new(&config.backend_url, config.backend_timeout())?;

    let worker = JobWorker::new(
        store.clone(),
        Arc::new(backend.clone()),
        WorkerOptions {
            poll_interval: config.poll_interval(),
            stale_after: config.stale_after(),
        },
    );
    let submitter = JobSubmitter::new(
        store.clone(),
        &config.scratch_dir,
        config.multimodal_models.clone(),
    )
    .with_trigger(worker.trigger());
    let retriever = ResultRetriever::new(store.clone(), config.result_expiry());

    let shutdown = CancellationToken::new();
    let worker_handle = tokio::spawn(worker.run(shutdown.clone()));

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .map_err(|source| GatewayError::Bind {
            addr: config.listen_addr.clone(),
            source,
        })?;
    info!(addr = %config.listen_addr, "Listening");

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received");
                signal_token.cancel();
            }
            Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
        }
    });

    let router = api::router(AppState {
        store,
        submitter,
        retriever,
        backend,
    });
    let served = api::serve(listener, router, shutdown.clone()).await;

    shutdown.cancel();
    if let Err(e) = worker_handle.await {
        error!(error = %e, "Job worker task failed");
    }
    served.map_err(GatewayError::Serve)?;

    info!("llmgate stopped");
    Ok(())
}
