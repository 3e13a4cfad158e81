use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use workloom_integration_server::adapter::handler::{self, AppState};
use workloom_integration_server::adapter::repository::{
    AccountPostgresRepository, InMemoryAccountRepository, InMemoryMappingRepository,
    InMemoryMappingRunRepository, InMemoryProfileRepository, InMemoryScrapingJobRepository,
    InMemorySyncOperationRepository, MappingPostgresRepository, MappingRunPostgresRepository,
    ProfilePostgresRepository, ScrapingJobPostgresRepository, SyncOperationPostgresRepository,
};
use workloom_integration_server::domain::entity::account::Provider;
use workloom_integration_server::domain::repository::{
    AccountRepository, MappingRepository, MappingRunRepository, ProfileRepository,
    ScrapingJobRepository, SyncOperationRepository,
};
use workloom_integration_server::infrastructure::account_guard::AccountWorkGuard;
use workloom_integration_server::infrastructure::clock::{Clock, SystemClock};
use workloom_integration_server::infrastructure::config::{Config, ConnectorEndpoint};
use workloom_integration_server::infrastructure::connector::{CallPolicy, ConnectorRegistry};
use workloom_integration_server::infrastructure::credential_vault::{CredentialVault, MasterKey};
use workloom_integration_server::infrastructure::database;
use workloom_integration_server::infrastructure::gateway_connector::GatewayConnector;
use workloom_integration_server::infrastructure::mapping_dispatcher::MappingDispatcher;
use workloom_integration_server::infrastructure::rate_limiter::RateLimiter;
use workloom_integration_server::usecase::mapping_run_engine::MappingRunSettings;
use workloom_integration_server::usecase::scraping_job_scheduler::SchedulerSettings;
use workloom_integration_server::usecase::{
    AccountRegistry, ConnectionValidator, LinkedInService, MappingRunEngine, MappingService,
    ScrapingJobScheduler, SyncReconciler,
};
use workloom_retry::RetryConfig;

struct Repositories {
    accounts: Arc<dyn AccountRepository>,
    jobs: Arc<dyn ScrapingJobRepository>,
    mappings: Arc<dyn MappingRepository>,
    runs: Arc<dyn MappingRunRepository>,
    profiles: Arc<dyn ProfileRepository>,
    sync_operations: Arc<dyn SyncOperationRepository>,
}

impl Repositories {
    fn postgres(pool: &sqlx::PgPool) -> Self {
        Self {
            accounts: Arc::new(AccountPostgresRepository::new(pool.clone())),
            jobs: Arc::new(ScrapingJobPostgresRepository::new(pool.clone())),
            mappings: Arc::new(MappingPostgresRepository::new(pool.clone())),
            runs: Arc::new(MappingRunPostgresRepository::new(pool.clone())),
            profiles: Arc::new(ProfilePostgresRepository::new(pool.clone())),
            sync_operations: Arc::new(SyncOperationPostgresRepository::new(pool.clone())),
        }
    }

    fn in_memory() -> Self {
        Self {
            accounts: Arc::new(InMemoryAccountRepository::new()),
            jobs: Arc::new(InMemoryScrapingJobRepository::new()),
            mappings: Arc::new(InMemoryMappingRepository::new()),
            runs: Arc::new(InMemoryMappingRunRepository::new()),
            profiles: Arc::new(InMemoryProfileRepository::new()),
            sync_operations: Arc::new(InMemorySyncOperationRepository::new()),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path =
        std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config/config.yaml".to_string());
    let cfg = Config::load(&config_path)?;

    let telemetry_cfg = workloom_telemetry::TelemetryConfig {
        service_name: cfg.app.name.clone(),
        version: cfg.app.version.clone(),
        environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| cfg.app.environment.clone()),
        trace_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok(),
        sample_rate: cfg.observability.sample_rate,
        log_level: cfg.observability.log_level.clone(),
        log_format: cfg.observability.log_format.clone(),
    };
    workloom_telemetry::init_telemetry(&telemetry_cfg)
        .map_err(|e| anyhow::anyhow!("failed to init telemetry: {}", e))?;

    info!(
        app_name = %cfg.app.name,
        version = %cfg.app.version,
        environment = %cfg.app.environment,
        "starting integration server"
    );

    // --- Database ---
    let db_pool = if let Ok(url) = std::env::var("DATABASE_URL") {
        let max = cfg.database.as_ref().map_or(25, |d| d.max_open_conns);
        let pool = database::connect(database::options_from_url(&url)?, max).await?;
        info!("database connection pool established from DATABASE_URL");
        Some(pool)
    } else if let Some(ref db_config) = cfg.database {
        info!("connecting to database");
        let pool =
            database::connect(db_config.connect_options()?, db_config.max_open_conns).await?;
        info!("database connection pool established");
        Some(pool)
    } else {
        info!("no database configured, using in-memory repositories");
        None
    };
    let repos = match db_pool {
        Some(ref pool) => Repositories::postgres(pool),
        None => Repositories::in_memory(),
    };

    // --- Vault ---
    let (master_key, is_dev_key) = MasterKey::from_env(&cfg.vault.master_key_env)?;
    if is_dev_key {
        tracing::warn!(
            env = %cfg.vault.master_key_env,
            "master key not set, using the all-zero development key"
        );
    }
    let vault = Arc::new(CredentialVault::new(master_key));

    // --- Shared infrastructure ---
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let limiter = Arc::new(RateLimiter::new(clock.clone(), cfg.rate_limit.timezone()?));
    let guard = AccountWorkGuard::new();
    let metrics = Arc::new(workloom_telemetry::metrics::Metrics::new(&cfg.app.name));
    let connectors = build_connectors(&cfg)?;
    let policy = CallPolicy {
        timeout: cfg.scheduler.connector_timeout(),
        retry: RetryConfig::new(cfg.scheduler.retry_max_attempts)
            .with_initial_delay(cfg.scheduler.retry_initial_delay()),
    };

    // --- Use cases ---
    let accounts = Arc::new(AccountRegistry::new(
        repos.accounts.clone(),
        repos.jobs.clone(),
        vault,
        limiter.clone(),
        guard.clone(),
        cfg.scheduler.failure_threshold,
    ));
    let validator = Arc::new(ConnectionValidator::new(
        accounts.clone(),
        connectors.clone(),
        policy.clone(),
    ));
    let scheduler = Arc::new(ScrapingJobScheduler::new(
        accounts.clone(),
        repos.jobs.clone(),
        limiter.clone(),
        connectors.clone(),
        guard.clone(),
        clock.clone(),
        metrics.clone(),
        policy.clone(),
        SchedulerSettings {
            max_concurrent_jobs: cfg.scheduler.max_concurrent_jobs,
            worker_timeout: cfg.scheduler.worker_timeout(),
            search_page_size: cfg.scheduler.search_page_size,
            ..SchedulerSettings::default()
        },
    ));
    let linkedin = Arc::new(LinkedInService::new(
        accounts.clone(),
        validator.clone(),
        limiter.clone(),
        connectors.clone(),
        clock.clone(),
        metrics.clone(),
        policy.clone(),
    ));
    let sync = Arc::new(SyncReconciler::new(
        accounts.clone(),
        repos.mappings.clone(),
        repos.profiles.clone(),
        repos.sync_operations.clone(),
        connectors,
        guard,
        clock.clone(),
        metrics.clone(),
        policy,
    ));
    let mappings = Arc::new(MappingService::new(
        repos.mappings.clone(),
        repos.runs.clone(),
        repos.profiles.clone(),
        clock.clone(),
    ));
    let runs = Arc::new(MappingRunEngine::new(
        repos.mappings,
        repos.runs,
        repos.profiles,
        accounts.clone(),
        scheduler.clone(),
        limiter,
        clock,
        metrics.clone(),
        MappingRunSettings {
            run_interval: cfg.mapping.run_interval(),
            max_results_per_run: cfg.mapping.max_results_per_run,
        },
    ));

    // 前回のプロセスで終了しなかったジョブとランを FAILED にする
    let recovered = scheduler.recover_unfinished().await?;
    if recovered > 0 {
        info!(count = recovered, "unfinished scraping jobs marked failed at startup");
    }
    let recovered_runs = runs.recover_unfinished().await?;
    if recovered_runs > 0 {
        info!(count = recovered_runs, "unfinished mapping runs marked failed at startup");
    }

    let cancel_token = CancellationToken::new();
    let dispatcher = MappingDispatcher::new(
        runs.clone(),
        cfg.mapping.dispatch_interval(),
        cancel_token.clone(),
    );
    let dispatcher_handle = dispatcher.start();

    let state = AppState {
        accounts,
        validator,
        scheduler,
        linkedin,
        sync,
        mappings,
        runs,
        metrics,
        db_pool,
    };
    let app = handler::router(state);

    let host: std::net::IpAddr = cfg.server.host.parse()?;
    let addr = SocketAddr::new(host, cfg.server.port);
    info!("REST server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    dispatcher.stop();
    if let Err(e) = dispatcher_handle.await {
        tracing::warn!(error = %e, "mapping dispatcher task did not stop cleanly");
    }
    workloom_telemetry::shutdown();
    info!("integration server exited");
    Ok(())
}

/// build_connectors は設定されたプロバイダごとにゲートウェイコネクタを登録する。
fn build_connectors(cfg: &Config) -> anyhow::Result<ConnectorRegistry> {
    let endpoints: [(Provider, Option<&ConnectorEndpoint>); 3] = [
        (Provider::Linkedin, cfg.connectors.linkedin.as_ref()),
        (Provider::Salesforce, cfg.connectors.salesforce.as_ref()),
        (Provider::Hubspot, cfg.connectors.hubspot.as_ref()),
    ];
    let mut registry = ConnectorRegistry::new();
    for (provider, endpoint) in endpoints {
        match endpoint {
            Some(endpoint) => {
                let connector = GatewayConnector::new(&endpoint.base_url)?;
                info!(provider = %provider, base_url = %endpoint.base_url, "connector registered");
                registry = registry.with(provider, Arc::new(connector));
            }
            None => tracing::warn!(provider = %provider, "no connector configured"),
        }
    }
    Ok(registry)
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}
