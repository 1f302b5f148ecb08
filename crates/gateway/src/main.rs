use anyhow::Context;
use common::{TelemetryGuard, setup_logging};
use gateway::{
    ApiSettings, AppState, StreamProcessor, StreamSettings, SubscriberRegistry,
    config::{GatewayConfig, get_configuration, redact_credentials},
    router,
    source::{FfmpegSettings, FfmpegSourceOpener},
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use vision::DetectorHandle;
use vision::detector::load_model;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = get_configuration().context("failed to load configuration")?;

    let _telemetry = match &config.otel_endpoint {
        Some(endpoint) => Some(TelemetryGuard::init("gateway", endpoint, config.environment)?),
        None => {
            setup_logging(config.environment);
            None
        }
    };

    tracing::info!(
        environment = config.environment.as_str(),
        source = %redact_credentials(&config.stream.source_url),
        "Gateway starting"
    );

    let detector = DetectorHandle::new(config.detector.confidence_threshold);
    let model_path = PathBuf::from(&config.detector.model_path);
    let input_size = config.detector.input_size;
    detector
        .spawn_load(move || load_model(&model_path, input_size))
        .context("failed to spawn model loader")?;

    let processor = Arc::new(build_processor(&config, detector));
    let state = AppState::new(processor.clone(), api_settings(&config));

    if config.stream.autostart {
        let autostart = processor.clone();
        tokio::task::spawn_blocking(move || autostart.start()).await??;
    }

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind_addr))?;
    tracing::info!("HTTP server listening on {}", config.server.bind_addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down stream processing");
    tokio::task::spawn_blocking(move || processor.stop()).await?;

    Ok(())
}

fn build_processor(config: &GatewayConfig, detector: DetectorHandle) -> StreamProcessor {
    let opener = FfmpegSourceOpener::new(FfmpegSettings {
        url: config.stream.source_url.clone(),
        width: config.stream.width,
        height: config.stream.height,
        io_timeout: config.stream.io_timeout(),
    });

    let settings = StreamSettings {
        sample_every: config.stream.sample_every,
        frame_interval: config.stream.frame_interval(),
        read_backoff: config.stream.read_backoff(),
        jpeg_quality: config.stream.jpeg_quality,
    };

    StreamProcessor::new(
        Arc::new(opener),
        detector,
        Arc::new(SubscriberRegistry::new()),
        settings,
    )
}

fn api_settings(config: &GatewayConfig) -> ApiSettings {
    ApiSettings {
        channel_url: config.server.channel_url.clone(),
        subscriber_queue: config.stream.subscriber_queue,
        send_timeout: config.stream.send_timeout(),
        max_upload_bytes: config.server.max_upload_bytes,
        ..ApiSettings::default()
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
