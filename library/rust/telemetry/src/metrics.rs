use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

/// Metrics は integration サーバーの Prometheus メトリクスをまとめたヘルパー構造体である。
/// HTTP の RED メトリクスに加え、スクレイピングジョブ・レートリミッター・CRM 同期・
/// マッピング実行のドメインメトリクスを提供する。
pub struct Metrics {
    pub http_requests_total: IntCounterVec,
    pub http_request_duration: HistogramVec,
    pub scraping_jobs_total: IntCounterVec,
    pub scraping_jobs_running: IntGauge,
    pub rate_limit_decisions_total: IntCounterVec,
    pub sync_records_total: IntCounterVec,
    pub mapping_runs_total: IntCounterVec,
    registry: Registry,
}

/// デフォルトのヒストグラムバケット。
const DEFAULT_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

fn counter_vec(registry: &Registry, name: &str, help: &str, service: &str, labels: &[&str]) -> IntCounterVec {
    let counter = IntCounterVec::new(Opts::new(name, help).const_label("service", service), labels)
        .expect("metric definition must be valid");
    registry
        .register(Box::new(counter.clone()))
        .expect("metric names must be unique within the registry");
    counter
}

impl Metrics {
    /// new は Prometheus メトリクスを初期化して返す。
    /// service_name はメトリクスの service ラベルに使用される。
    pub fn new(service_name: &str) -> Self {
        let registry = Registry::new();

        let http_requests_total = counter_vec(
            &registry,
            "http_requests_total",
            "Total number of HTTP requests",
            service_name,
            &["method", "path", "status"],
        );

        let http_request_duration = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "Histogram of HTTP request latency",
            )
            .const_label("service", service_name)
            .buckets(DEFAULT_BUCKETS.to_vec()),
            &["method", "path"],
        )
        .expect("metric definition must be valid");
        registry
            .register(Box::new(http_request_duration.clone()))
            .expect("metric names must be unique within the registry");

        let scraping_jobs_total = counter_vec(
            &registry,
            "scraping_jobs_total",
            "Total number of scraping jobs by terminal status",
            service_name,
            &["job_type", "status"],
        );

        let scraping_jobs_running = IntGauge::with_opts(
            Opts::new("scraping_jobs_running", "Number of scraping jobs currently running")
                .const_label("service", service_name),
        )
        .expect("metric definition must be valid");
        registry
            .register(Box::new(scraping_jobs_running.clone()))
            .expect("metric names must be unique within the registry");

        let rate_limit_decisions_total = counter_vec(
            &registry,
            "rate_limit_decisions_total",
            "Total number of rate limiter acquisitions by outcome",
            service_name,
            &["outcome"],
        );

        let sync_records_total = counter_vec(
            &registry,
            "sync_records_total",
            "Total number of CRM sync records by direction and outcome",
            service_name,
            &["provider", "direction", "outcome"],
        );

        let mapping_runs_total = counter_vec(
            &registry,
            "mapping_runs_total",
            "Total number of mapping runs by terminal status",
            service_name,
            &["status"],
        );

        Self {
            http_requests_total,
            http_request_duration,
            scraping_jobs_total,
            scraping_jobs_running,
            rate_limit_decisions_total,
            sync_records_total,
            mapping_runs_total,
            registry,
        }
    }

    /// record_http_request は HTTP リクエストカウンタとレイテンシを記録する。
    pub fn record_http_request(&self, method: &str, path: &str, status: &str, duration_secs: f64) {
        self.http_requests_total
            .with_label_values(&[method, path, status])
            .inc();
        self.http_request_duration
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    pub fn record_job_started(&self) {
        self.scraping_jobs_running.inc();
    }

    /// record_job_finished はジョブの終了ステータスを記録し、実行中ゲージを減らす。
    pub fn record_job_finished(&self, job_type: &str, status: &str) {
        self.scraping_jobs_running.dec();
        self.scraping_jobs_total
            .with_label_values(&[job_type, status])
            .inc();
    }

    /// record_rate_limit は "acquired" / "rejected" のいずれかを記録する。
    pub fn record_rate_limit(&self, outcome: &str) {
        self.rate_limit_decisions_total
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn record_sync_records(&self, provider: &str, direction: &str, outcome: &str, count: u64) {
        if count > 0 {
            self.sync_records_total
                .with_label_values(&[provider, direction, outcome])
                .inc_by(count);
        }
    }

    pub fn record_mapping_run(&self, status: &str) {
        self.mapping_runs_total.with_label_values(&[status]).inc();
    }

    /// gather_metrics は Prometheus テキストフォーマットでメトリクスを返す。
    /// /metrics エンドポイントのハンドラで使用する。
    pub fn gather_metrics(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!(error = %e, "failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
