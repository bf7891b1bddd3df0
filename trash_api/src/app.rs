use crate::{
    config::Config,
    prediction::PredictionService,
    server::{HttpServer, SharedState},
    store::FileStore,
    telemetry::Metrics,
};
use std::sync::Arc;
use tokio::signal;
use trash_prediction::{
    Annotator, ClassLabels, ModelConfig, ModelService, OrtModelService, Validatable,
};

pub async fn start_app(config: Config) -> anyhow::Result<()> {
    let labels = ClassLabels::from_config(&config.labels)?;
    tracing::info!(
        "Loaded labels: {}",
        labels.names().collect::<Vec<_>>().join(", ")
    );

    let model = load_model(&config.model).await;
    let store = Arc::new(FileStore::new(&config.storage).await?);
    let annotator = Arc::new(Annotator::new()?);

    let prediction_service = PredictionService::new(
        model,
        labels,
        annotator,
        store,
        config.model.confidence_threshold,
    )
    .with_max_batch_files(config.batch.max_files)
    .with_frame_stride(config.video.frame_stride);

    let state = SharedState {
        prediction_service: Arc::new(prediction_service),
        metrics: Arc::new(Metrics::new()?),
    };

    let server = HttpServer::new(state, &config.server).await?;
    server
        .run(async {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received, starting graceful shutdown.");
        })
        .await
}

/// A model that fails to load leaves the service up, reporting itself unhealthy.
async fn load_model(config: &ModelConfig) -> Option<Arc<dyn ModelService>> {
    let model_config = config.clone();
    match tokio::task::spawn_blocking(move || OrtModelService::new(&model_config)).await {
        Ok(Ok(service)) => {
            tracing::info!("Model loaded from {:?}", config.get_path());
            Some(Arc::new(service))
        }
        Ok(Err(e)) => {
            tracing::error!("Failed to load model, serving without it: {}", e);
            None
        }
        Err(e) => {
            tracing::error!("Model loading task failed: {}", e);
            None
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
