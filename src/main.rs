// src/main.rs
use anyhow::{Context, Result};
use hyper::{Body, Request, Response, Server, StatusCode};
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use fleet_health::{
    config::{self, StorageBackendKind},
    events::EventBroadcaster,
    health::{HealthProbe, ServiceRegistry, StaticRegistry},
    metrics::MetricsRegistry,
    policy::HealthPolicyService,
    repair::{
        AutoRepairService, CommandExecutor, FileScanner, NoopScanner, RepairTimeouts,
        SecurityScanner,
    },
    scheduler::HealthScheduler,
    server::{HealthApi, RequestHandler, ServerBuilder},
    storage::{HealthStorageService, HealthStore, MemoryStore, SledStore},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fleet_health=debug".parse()?)
                .add_directive("hyper=info".parse()?),
        )
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());

    info!("Loading configuration from: {}", config_path);
    let config = config::load_config(&config_path).await?;

    // Initialize metrics
    let metrics_registry = MetricsRegistry::new()?;
    let metrics = metrics_registry.collector();

    // Open storage; failure here is the only fatal error of the subsystem
    let store: Arc<dyn HealthStore> = match config.storage.backend {
        StorageBackendKind::Sled => Arc::new(
            SledStore::open(&config.storage.path).with_context(|| {
                format!(
                    "Failed to open health store at {}",
                    config.storage.path.display()
                )
            })?,
        ),
        StorageBackendKind::Memory => {
            warn!("Using in-memory health store, history will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };
    let storage = Arc::new(HealthStorageService::new(
        store.clone(),
        config.storage.retention(),
    ));

    let registry = Arc::new(StaticRegistry::from_config(&config));
    let thresholds: HashMap<String, u64> = registry
        .services()
        .await
        .into_iter()
        .map(|s| (s.name, s.max_response_time_ms))
        .collect();
    info!("Monitoring {} services", thresholds.len());

    let policies = Arc::new(
        HealthPolicyService::load(store, thresholds, config.probe.max_response_time_ms)
            .await
            .context("Failed to load health policies")?,
    );
    policies
        .seed(&config.policies)
        .await
        .context("Failed to seed health policies")?;

    let scanner: Arc<dyn SecurityScanner> = match &config.security.findings_path {
        Some(path) => {
            info!("Reading security findings from {}", path.display());
            Arc::new(FileScanner::new(path.clone()))
        }
        None => Arc::new(NoopScanner),
    };

    let events = EventBroadcaster::default();
    let repair = Arc::new(
        AutoRepairService::new(
            Arc::new(CommandExecutor::from_config(&config.repair)),
            scanner,
            registry.clone(),
            policies.clone(),
            storage.clone(),
            events.clone(),
            RepairTimeouts::from_config(&config.repair),
        )
        .with_metrics(metrics.clone()),
    );

    let prober = Arc::new(HealthProbe::new().context("Failed to create HTTP client")?);
    let scheduler = Arc::new(
        HealthScheduler::new(
            config.scheduler.clone(),
            registry,
            prober,
            storage.clone(),
            policies.clone(),
            repair.clone(),
            events.clone(),
        )
        .with_metrics(metrics),
    );

    // Start health scheduler
    scheduler.start()?;

    // Start metrics server if enabled
    if config.metrics.enabled {
        let metrics_addr: SocketAddr = ([0, 0, 0, 0], config.metrics.port).into();
        start_metrics_server(metrics_addr, metrics_registry, config.metrics.path.clone()).await?;
    }

    // Create request handler
    let api = Arc::new(HealthApi::new(
        scheduler.clone(),
        storage,
        policies,
        repair,
        events,
    ));
    let handler = RequestHandler::new(api);

    // Start API server
    info!("Starting health API on {}", config.server.listen);
    ServerBuilder::new(config.server.listen)
        .with_handler(handler)
        .serve_with_shutdown(shutdown_signal())
        .await?;

    scheduler.stop().await;
    Ok(())
}

async fn start_metrics_server(
    addr: SocketAddr,
    registry: MetricsRegistry,
    path: String,
) -> Result<()> {
    let registry = Arc::new(registry);
    let metrics_path = Arc::new(path);
    let service_path = metrics_path.clone();

    let make_service = hyper::service::make_service_fn(move |_| {
        let registry = registry.clone();
        let path = service_path.clone();

        async move {
            Ok::<_, Infallible>(hyper::service::service_fn(move |req: Request<Body>| {
                let registry = registry.clone();
                let path = path.clone();

                async move {
                    let response = if req.uri().path() == path.as_str() {
                        let mut response = Response::new(Body::from(registry.gather()));
                        response.headers_mut().insert(
                            hyper::header::CONTENT_TYPE,
                            hyper::header::HeaderValue::from_static("text/plain; version=0.0.4"),
                        );
                        response
                    } else {
                        let mut response = Response::new(Body::from("Not Found"));
                        *response.status_mut() = StatusCode::NOT_FOUND;
                        response
                    };
                    Ok::<_, Infallible>(response)
                }
            }))
        }
    });

    let server = Server::try_bind(&addr)
        .with_context(|| format!("Failed to bind metrics listener on {}", addr))?
        .serve(make_service);

    info!(
        "Metrics server listening on http://{}{}",
        addr,
        metrics_path.as_str()
    );

    tokio::spawn(async move {
        if let Err(e) = server.await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(())
}

// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
