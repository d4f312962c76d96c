use std::path::PathBuf;
use std::sync::Arc;

use ldap_gateway::api::{
    ApiCertificateStore, ApiClient, HttpFlowExecutor, IdentityApi,
};
use ldap_gateway::config::Configuration;
use ldap_gateway::registry::Registry;
use ldap_gateway::{Gateway, server, telemetry};
use tokio::net::TcpListener;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> Result<(), telemetry::SetupError> {
    // Read configuration file.
    let path = std::env::var("CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_default();
    let config = Configuration::default().path(path).read()?;

    // Initialize logging, and OTLP export when an endpoint is set.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let otlp_logs = config
        .otlp_endpoint
        .as_deref()
        .map(telemetry::setup_logging)
        .transpose()?;
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(otlp_logs)
        .init();

    let tracer = match config.otlp_endpoint.as_deref() {
        Some(endpoint) => {
            let provider = telemetry::setup_tracer(endpoint)?;
            opentelemetry::global::set_tracer_provider(provider.clone());
            Some(provider)
        },
        None => None,
    };

    // Initialize metrics.
    if let Err(err) = telemetry::setup_metrics_recorder(config.metrics) {
        tracing::error!(error = %err, "failed to install metrics recorder");
    }

    tracing::info!(
        version = config.version(),
        api = %config.api.url,
        "starting LDAP gateway"
    );

    let client = ApiClient::new(
        &config.api.url,
        config.api.token.clone(),
        config.api.insecure,
    )?;
    let flows = Arc::new(HttpFlowExecutor::new(&client));
    let api: Arc<dyn IdentityApi> = Arc::new(client);
    let registry = Arc::new(Registry::new(
        api.clone(),
        flows,
        Arc::new(ApiCertificateStore::new(api)),
        config.flag_eviction_delay(),
    ));

    // Load providers before accepting any connection.
    if let Err(err) = registry.refresh().await {
        tracing::error!(error = %err, "failed to load providers, retrying on next refresh");
    }

    let refresher = Arc::clone(&registry);
    let refresh_interval = config.refresh_interval();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(refresh_interval);
        // first tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Err(err) = refresher.refresh().await {
                tracing::warn!(error = %err, "failed to refresh providers");
            }
        }
    });

    let warmer = Arc::clone(&registry);
    let warmup_interval = config.flow_warmup_interval();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(warmup_interval);
        loop {
            interval.tick().await;
            warmer.warm_up().await;
        }
    });

    let listener = TcpListener::bind(config.listen).await?;
    tokio::select! {
        _ = server::serve(listener, Gateway::new(registry)) => {},
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
        },
    }

    if let Some(tracer) = tracer {
        if let Err(err) = tracer.shutdown() {
            tracing::warn!(error = %err, "failed to flush traces");
        }
    }

    Ok(())
}
