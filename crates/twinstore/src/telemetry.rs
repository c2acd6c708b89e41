//! Logging and OpenTelemetry initialization.
//!
//! Always installs a fmt subscriber filtered by `telemetry.log_level`. When an
//! OTLP endpoint is configured, traces and logs are exported over gRPC as well.

use std::time::Duration;

use anyhow::{Context, Result};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, SdkTracerProvider};
use opentelemetry_sdk::Resource;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use twinconf::TelemetryConfig;

/// Timeout for OTLP exports - prevents blocking on unavailable endpoints
const EXPORT_TIMEOUT: Duration = Duration::from_secs(5);

/// Keeps the exporters alive; flush them with [`TelemetryGuard::shutdown`].
#[derive(Default)]
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
    logger_provider: Option<SdkLoggerProvider>,
}

impl TelemetryGuard {
    /// True when spans and logs are shipped over OTLP.
    pub fn exporting(&self) -> bool {
        self.tracer_provider.is_some()
    }

    /// Flush pending spans and log records.
    pub fn shutdown(self) {
        if let Some(provider) = self.tracer_provider {
            if let Err(e) = provider.shutdown() {
                eprintln!("tracer provider shutdown failed: {e}");
            }
        }
        if let Some(provider) = self.logger_provider {
            if let Err(e) = provider.shutdown() {
                eprintln!("logger provider shutdown failed: {e}");
            }
        }
    }
}

fn env_filter(config: &TelemetryConfig) -> EnvFilter {
    EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber.
pub fn init(config: &TelemetryConfig) -> Result<TelemetryGuard> {
    if !config.otlp_enabled() {
        tracing_subscriber::registry()
            .with(env_filter(config))
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .context("Failed to install tracing subscriber")?;
        return Ok(TelemetryGuard::default());
    }

    let resource = Resource::builder_empty()
        .with_service_name("twinstore")
        .with_attributes(vec![KeyValue::new("service.version", env!("CARGO_PKG_VERSION"))])
        .build();

    let endpoint = if config.otlp_endpoint.contains("://") {
        config.otlp_endpoint.clone()
    } else {
        format!("http://{}", config.otlp_endpoint)
    };

    let trace_exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint.clone())
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .context("Failed to create OTLP span exporter")?;

    let batch_span_processor =
        opentelemetry_sdk::trace::BatchSpanProcessor::builder(trace_exporter).build();

    let tracer_provider = SdkTracerProvider::builder()
        .with_span_processor(batch_span_processor)
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource.clone())
        .build();

    let tracer = tracer_provider.tracer("twinstore");
    global::set_tracer_provider(tracer_provider.clone());

    let log_exporter = opentelemetry_otlp::LogExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .context("Failed to create OTLP log exporter")?;

    let log_processor = opentelemetry_sdk::logs::BatchLogProcessor::builder(log_exporter).build();

    let logger_provider = SdkLoggerProvider::builder()
        .with_log_processor(log_processor)
        .with_resource(resource)
        .build();

    let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);
    let log_appender =
        opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge::new(&logger_provider);

    tracing_subscriber::registry()
        .with(env_filter(config))
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .with(log_appender)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    tracing::info!(endpoint = %config.otlp_endpoint, "OpenTelemetry export enabled (traces, logs)");

    Ok(TelemetryGuard {
        tracer_provider: Some(tracer_provider),
        logger_provider: Some(logger_provider),
    })
}

/// Parse a W3C traceparent header and return an OpenTelemetry Context.
///
/// Format: `{version}-{trace_id}-{span_id}-{trace_flags}`
/// Example: `00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01`
///
/// Returns None if the traceparent is invalid or missing.
pub fn parse_traceparent(traceparent: Option<&str>) -> Option<opentelemetry::Context> {
    use opentelemetry::trace::{
        SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState,
    };

    let tp = traceparent?;
    let parts: Vec<&str> = tp.split('-').collect();

    if parts.len() != 4 {
        tracing::debug!("Invalid traceparent format: {}", tp);
        return None;
    }

    if parts[0] != "00" {
        tracing::debug!("Unsupported traceparent version: {}", parts[0]);
        return None;
    }

    let trace_id = TraceId::from_bytes(hex_to_bytes::<16>(parts[1])?);
    let span_id = SpanId::from_bytes(hex_to_bytes::<8>(parts[2])?);
    let flags = u8::from_str_radix(parts[3], 16).unwrap_or(0);

    let span_context = SpanContext::new(
        trace_id,
        span_id,
        TraceFlags::new(flags),
        true,
        TraceState::default(),
    );

    Some(opentelemetry::Context::current().with_remote_span_context(span_context))
}

/// Create a tracing span with the given traceparent as the parent context.
///
/// Use this to continue a distributed trace from an incoming request.
#[macro_export]
macro_rules! span_with_parent {
    ($traceparent:expr, $name:expr) => {{
        use tracing_opentelemetry::OpenTelemetrySpanExt;

        let span = tracing::info_span!($name);
        if let Some(parent_ctx) = $crate::telemetry::parse_traceparent($traceparent) {
            span.set_parent(parent_ctx);
        }
        span
    }};
    ($traceparent:expr, $name:expr, $($field:tt)*) => {{
        use tracing_opentelemetry::OpenTelemetrySpanExt;

        let span = tracing::info_span!($name, $($field)*);
        if let Some(parent_ctx) = $crate::telemetry::parse_traceparent($traceparent) {
            span.set_parent(parent_ctx);
        }
        span
    }};
}

fn hex_to_bytes<const N: usize>(hex: &str) -> Option<[u8; N]> {
    if hex.len() != N * 2 || !hex.is_ascii() {
        return None;
    }

    let mut bytes = [0u8; N];
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
    }
    Some(bytes)
}
