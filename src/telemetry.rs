//! Telemetry logic.
//! Support tracing, metrics and logging.
use std::future::Future;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use metrics::{Unit, gauge};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder};
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::trace::{Span, Tracer};
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{LogExporter, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::{SdkLogger, SdkLoggerProvider};
use opentelemetry_sdk::trace::SdkTracerProvider;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};
use tokio::time::sleep;

pub type SetupError = Box<dyn std::error::Error + Send + Sync>;

const REQUEST_DURATION: &str = "ldap_requests_duration_seconds";
const REQUEST_REJECTED: &str = "ldap_requests_rejected_total";
const PROVIDERS: &str = "ldap_providers";

fn ressources() -> Resource {
    Resource::builder().with_service_name("ldap-gateway").build()
}

/// LDAP operation, used as the `type` label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Bind,
    Search,
    Unbind,
}

impl RequestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestKind::Bind => "bind",
            RequestKind::Search => "search",
            RequestKind::Unbind => "unbind",
        }
    }
}

/// Create tracer for OLTP.
pub fn setup_tracer(endpoint: &str) -> Result<SdkTracerProvider, SetupError> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(ressources())
        .build())
}

/// Create recorder for Prometheus metrics, served on `listen`.
pub fn setup_metrics_recorder(listen: SocketAddr) -> Result<(), BuildError> {
    const EXPONENTIAL_SECONDS: &[f64] = &[
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ];

    metrics::describe_gauge!(
        "process_cpu_usage",
        Unit::Percent,
        "CPU usage of the process in percentage."
    );
    metrics::describe_gauge!(
        "process_memory_bytes",
        Unit::Bytes,
        "Total process memory in bytes."
    );
    metrics::describe_gauge!(
        PROVIDERS,
        Unit::Count,
        "Providers served since the last successful refresh."
    );
    metrics::describe_counter!(
        REQUEST_REJECTED,
        Unit::Count,
        "LDAP requests rejected, by reason."
    );
    metrics::describe_histogram!(
        REQUEST_DURATION,
        Unit::Seconds,
        "Time spent answering LDAP requests."
    );

    let mut system = System::new_with_specifics(RefreshKind::nothing());
    let pid = Pid::from_u32(std::process::id());

    // Create a loop to update system information.
    // Wait 10 seconds before update it.
    tokio::spawn(async move {
        loop {
            system.refresh_processes_specifics(
                ProcessesToUpdate::Some(&[pid]),
                true,
                ProcessRefreshKind::nothing().with_memory().with_cpu(),
            );

            if let Some(process) = system.process(pid) {
                gauge!("process_memory_bytes").set(process.memory() as f64);
                gauge!("process_cpu_usage").set(process.cpu_usage() as f64);
            }

            sleep(Duration::from_secs(10)).await;
        }
    });

    PrometheusBuilder::new()
        .with_http_listener(listen)
        .set_buckets_for_metric(
            Matcher::Full(REQUEST_DURATION.to_string()),
            EXPONENTIAL_SECONDS,
        )?
        .install()
}

/// Create OLTP exporter for logs.
pub fn setup_logging(
    endpoint: &str,
) -> Result<OpenTelemetryTracingBridge<SdkLoggerProvider, SdkLogger>, SetupError>
{
    let exporter = LogExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;
    let provider: SdkLoggerProvider = SdkLoggerProvider::builder()
        .with_resource(ressources())
        .with_batch_exporter(exporter)
        .build();
    Ok(OpenTelemetryTracingBridge::new(&provider))
}

/// Count a rejected request.
pub fn record_rejection(reason: &'static str, kind: RequestKind, app: &str) {
    metrics::counter!(
        REQUEST_REJECTED,
        "reason" => reason,
        "type" => kind.as_str(),
        "app" => app.to_owned()
    )
    .increment(1);
}

pub fn record_providers(count: usize) {
    gauge!(PROVIDERS).set(count as f64);
}

/// Run one LDAP request inside a span and record its latency.
pub async fn track<F, T>(kind: RequestKind, app: &str, request: F) -> T
where
    F: Future<Output = T>,
{
    let tracer = global::tracer("ldap-gateway");
    let mut otel_span = tracer.start(kind.as_str());

    let start = Instant::now();
    let output = request.await;
    let latency = start.elapsed().as_secs_f64();

    otel_span.set_attribute(KeyValue::new("type", kind.as_str()));
    otel_span.set_attribute(KeyValue::new("app", app.to_owned()));
    metrics::histogram!(
        REQUEST_DURATION,
        "type" => kind.as_str(),
        "app" => app.to_owned()
    )
    .record(latency);

    otel_span.end();

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_track_returns_output() {
        let output = track(RequestKind::Search, "ldap", async { 42 }).await;
        assert_eq!(output, 42);
    }

    #[test]
    fn test_request_kind_labels() {
        assert_eq!(RequestKind::Bind.as_str(), "bind");
        assert_eq!(RequestKind::Unbind.as_str(), "unbind");
    }
}
