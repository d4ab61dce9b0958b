//! Skin Type Classification Service - Main Entry Point
//!
//! Resolves the classifier weights once, then serves predictions over HTTP
//! while archiving every uploaded photo.

use anyhow::{Context, Result};
use skin_type_service::{
    config::{AppConfig, LoggingConfig, StorageBackend},
    metrics::{MetricsReporter, ServiceMetrics},
    models::{select_device, Classifier, ModelLoader},
    orchestrator::RequestOrchestrator,
    preprocess::ImageCodec,
    server::{router, ServiceState},
    storage::{ArchiveStore, GcsClient},
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = AppConfig::load()?;

    init_logging(&config.logging)?;
    info!("Starting Skin Type Classification Service");
    info!(
        "Confidence threshold: {:.2}, inference workers: {}, max upload: {} bytes",
        config.pipeline.threshold, config.pipeline.workers, config.upload.max_file_size
    );

    // Initialize metrics
    let metrics = Arc::new(ServiceMetrics::new());

    let device = select_device(&config.model.device)?;
    info!(device = ?device, "Inference device selected");

    // One storage client shared by the model loader and the archive
    let gcs = if config.storage.backend == StorageBackend::Gcs
        || config.model.locator.starts_with("gs://")
    {
        Some(Arc::new(GcsClient::from_config(&config.storage)?))
    } else {
        None
    };

    // Resolve model weights
    let mut loader = ModelLoader::new(device.clone()).with_fallback_seed(config.model.fallback_seed);
    if let Some(client) = &gcs {
        loader = loader.with_object_store(client.clone());
    }
    let loaded = loader.resolve(&config.model.locator).await?;
    let classifier = Classifier::new(loaded);
    if classifier.source().is_fallback() {
        warn!("Serving with a re-initialized classification head; predictions are not meaningful");
    }
    let model_source = classifier.source().clone();

    let archive = Arc::new(ArchiveStore::from_config(&config.storage, gcs)?);
    let storage_backend = archive.backend().name();

    let codec = Arc::new(ImageCodec::new(config.upload.max_file_size, device));
    let orchestrator = Arc::new(RequestOrchestrator::new(
        codec,
        Arc::new(classifier),
        archive,
        metrics.clone(),
        &config.upload,
        &config.pipeline,
    ));

    // Start metrics reporter
    if config.metrics.report_interval_secs > 0 {
        let reporter = MetricsReporter::new(metrics.clone(), config.metrics.report_interval_secs);
        tokio::spawn(reporter.start());
    }

    let app = router(Arc::new(ServiceState {
        orchestrator,
        model_source,
        storage_backend,
    }));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    // Print final summary
    info!("Service shutting down...");
    metrics.print_summary();

    Ok(())
}

fn init_logging(logging: &LoggingConfig) -> Result<()> {
    // RUST_LOG wins over the configured level
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&logging.level).context("Invalid log level")?,
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
