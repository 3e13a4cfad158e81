pub mod metrics;

use opentelemetry::global;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::{trace as sdktrace, Resource};
use tracing_subscriber::{
    fmt, fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

/// TelemetryConfig は telemetry ライブラリの初期化設定を保持する。
pub struct TelemetryConfig {
    pub service_name: String,
    pub version: String,
    pub environment: String,
    pub trace_endpoint: Option<String>,
    pub sample_rate: f64,
    pub log_level: String,
    /// ログ出力フォーマット。"text" の場合はプレーンテキスト、それ以外は JSON。
    pub log_format: String,
}

/// LogFormat はログの出力形式。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("text") {
            Self::Text
        } else {
            Self::Json
        }
    }
}

/// build_tracer は OTLP gRPC エクスポータ付きの TracerProvider を登録し、トレーサーを返す。
fn build_tracer(
    cfg: &TelemetryConfig,
    endpoint: &str,
) -> Result<sdktrace::Tracer, Box<dyn std::error::Error>> {
    let exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;
    let provider = sdktrace::TracerProvider::builder()
        .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
        .with_sampler(sdktrace::Sampler::TraceIdRatioBased(cfg.sample_rate.clamp(0.0, 1.0)))
        .with_resource(Resource::new(vec![
            KeyValue::new("service.name", cfg.service_name.clone()),
            KeyValue::new("service.version", cfg.version.clone()),
            KeyValue::new("deployment.environment", cfg.environment.clone()),
        ]))
        .build();
    let tracer = provider.tracer("workloom");
    global::set_tracer_provider(provider);
    Ok(tracer)
}

/// init_telemetry は tracing-subscriber を初期化し、trace_endpoint があれば OTLP へのスパン送信も有効にする。
/// RUST_LOG が設定されていればそちらを log_level より優先する。
pub fn init_telemetry(cfg: &TelemetryConfig) -> Result<(), Box<dyn std::error::Error>> {
    let tracer = cfg
        .trace_endpoint
        .as_deref()
        .map(|endpoint| build_tracer(cfg, endpoint))
        .transpose()?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));
    let format = LogFormat::parse(&cfg.log_format);

    let json_layer = (format == LogFormat::Json).then(|| {
        fmt::layer()
            .json()
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE)
    });
    let text_layer = (format == LogFormat::Text).then(|| {
        fmt::layer()
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE)
    });
    let otel_layer = tracer.map(|t| tracing_opentelemetry::layer().with_tracer(t));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .with(otel_layer)
        .try_init()?;
    Ok(())
}

/// shutdown は未送信のスパンをフラッシュして TracerProvider を閉じる。
pub fn shutdown() {
    global::shutdown_tracer_provider();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("text"), LogFormat::Text);
        assert_eq!(LogFormat::parse("TEXT"), LogFormat::Text);
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse(""), LogFormat::Json);
    }
}
