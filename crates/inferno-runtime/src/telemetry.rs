//! Process-wide `tracing` setup for the `inferno` binary.
//!
//! Console output is compact by default; `INFERNO_LOG_FORMAT=json` switches
//! it to one JSON object per line for log shippers on the gateway.  Spans
//! additionally go to an OTLP/HTTP collector when
//! `OTEL_EXPORTER_OTLP_ENDPOINT` is set.  `RUST_LOG` filters both.
//!
//! ```rust,no_run
//! let _guard = inferno_runtime::telemetry::init_tracing("inferno");
//! tracing::info!(device_id = "inferno1", "bridge starting");
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{trace::SdkTracerProvider, Resource};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable selecting the console format.
pub const LOG_FORMAT_ENV: &str = "INFERNO_LOG_FORMAT";

const OTLP_ENDPOINT_ENV: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

/// Console output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl LogFormat {
    /// `json` in any case selects [`LogFormat::Json`]; anything else, or no
    /// value, is compact.
    pub fn from_env_value(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.trim().eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        }
    }
}

/// Install the global subscriber for `service_name`.
///
/// Keep the returned guard alive until exit; its drop flushes exported spans.
pub fn init_tracing(service_name: &str) -> TracerProviderGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let format = LogFormat::from_env_value(std::env::var(LOG_FORMAT_ENV).ok().as_deref());
    let provider = otlp_provider(service_name);

    let otel = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("inferno")));
    let (json, compact) = match format {
        LogFormat::Json => (Some(fmt::layer().json()), None),
        LogFormat::Compact => (None, Some(fmt::layer().compact())),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(otel)
        .with(json)
        .with(compact)
        .init();

    TracerProviderGuard(provider)
}

/// Flushes and shuts down the span exporter on drop.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("[inferno] span exporter shutdown failed: {e}");
        }
    }
}

/// Span pipeline towards `OTEL_EXPORTER_OTLP_ENDPOINT`, if configured.  A
/// broken exporter is reported on stderr and leaves console logging only.
fn otlp_provider(service_name: &str) -> Option<SdkTracerProvider> {
    let endpoint = std::env::var(OTLP_ENDPOINT_ENV).ok()?;
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[inferno] OTLP exporter unavailable: {e}"))
        .ok()?;

    Some(
        SdkTracerProvider::builder()
            .with_resource(
                Resource::builder()
                    .with_service_name(service_name.to_string())
                    .build(),
            )
            // Installed before the runtime exists.
            .with_simple_exporter(exporter)
            .build(),
    )
}
