use crate::{
    config::Config,
    decoder::ImageDecoder,
    inference_service::InferenceService,
    model_handle::ModelHandle,
    ort_service::OrtModelLoader,
    preprocess::Preprocessor,
    server::HttpServer,
    state::ClassLabels,
};

pub async fn start_app(config: Config) -> anyhow::Result<()> {
    let labels = match ClassLabels::from_config(&config.labels) {
        Ok(labels) => labels,
        Err(e) => {
            tracing::error!("Failed to load class labels: {}", e);
            return Err(e.into());
        }
    };
    tracing::info!("Loaded {} class labels", labels.len());

    if !config.model.get_path().exists() {
        tracing::warn!(
            "Model file not found: {:?}, predictions will fail until it is provided",
            config.model.get_path()
        );
    }

    let loader = OrtModelLoader::new(&config.model, labels.len());
    let inference_service = InferenceService::new(
        ImageDecoder::new(config.decoder.clone()),
        Preprocessor::new(config.model.target_size(), config.decoder.max_source_edge),
        ModelHandle::new(loader),
        labels,
        config.inference.get_timeout(),
    );

    if config.model.eager_load {
        let service = inference_service.clone();
        tokio::spawn(async move { service.warm_up().await });
    }

    let server = HttpServer::new(inference_service, &config).await?;
    server.run().await
}
