//! tenantd entrypoint: `serve` runs the API and background workers,
//! `ingest` drives one batch fetch from the CLI, `migrate` applies the
//! schema and exits. Grounded on the teacher's `main.rs` — one `Config`
//! loaded once, `tokio::spawn` per subsystem, no hidden globals.

use std::collections::HashMap;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tenantd::adapters::ckan::CkanAdapter;
use tenantd::adapters::shopify::ShopifyAdapter;
use tenantd::adapters::SourceAdapter;
use tenantd::api::{build_router, AppState};
use tenantd::auth::JwtHandler;
use tenantd::config::Config;
use tenantd::middleware::ConnectionRateLimiter;
use tenantd::queue::handlers::{AdapterRegistry, EmitFeedHandler, FetchHandler, NormalizeHandler, RecomputeMetricsHandler};
use tenantd::queue::store::QueueName;
use tenantd::queue::worker::QueueWorkerPool;
use tenantd::scheduler::Scheduler;
use tenantd::sourceref::LocalFsBlobStore;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tenantd")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the API server plus every queue worker pool and the scheduler.
    Serve,
    /// Run one ingestion pass for every connection and exit (§6 "Exit codes").
    Ingest,
    /// Apply the schema and exit.
    Migrate,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    let exit_code = match cli.command {
        Command::Serve => run_serve(config).await,
        Command::Ingest => run_ingest(config).await,
        Command::Migrate => run_migrate(config),
    };
    std::process::exit(exit_code);
}

fn build_shopify_adapter(config: &Config) -> Arc<ShopifyAdapter> {
    Arc::new(ShopifyAdapter::new(
        config.provider_client_id.clone(),
        config.provider_client_secret.clone(),
        config.provider_scopes.clone(),
        config.app_base_url.clone(),
    ))
}

fn build_adapter_registry(shopify: Arc<ShopifyAdapter>, config: &Config) -> Arc<AdapterRegistry> {
    let mut adapters: HashMap<&'static str, Arc<dyn SourceAdapter>> = HashMap::new();
    adapters.insert("shopify", shopify);
    adapters.insert("ckan", Arc::new(CkanAdapter::new(config.ckan_portal_base_url.clone())));
    Arc::new(AdapterRegistry { adapters })
}

async fn run_serve(config: Config) -> i32 {
    let db = match tenantd::db::connect(&config.database_path) {
        Ok(db) => db,
        Err(e) => {
            tracing::error!(error = %e, "failed to open database");
            return 1;
        }
    };

    let config = Arc::new(config);
    let shopify = build_shopify_adapter(&config);
    let adapters = build_adapter_registry(shopify.clone(), &config);

    let blob_store: Arc<dyn tenantd::sourceref::BlobStore> = match LocalFsBlobStore::new(&config.blob_root) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!(error = %e, "failed to initialise blob store");
            return 1;
        }
    };

    let jwt = Arc::new(JwtHandler::new(config.jwt_secret.clone()));
    let sync_rate_limiter = ConnectionRateLimiter::new(std::time::Duration::from_secs(config.sync_rate_limit_window_secs));

    let state = AppState {
        db: db.clone(),
        config: config.clone(),
        adapters: adapters.clone(),
        blob_store: blob_store.clone(),
        jwt,
        sync_rate_limiter,
        shopify,
    };

    let scheduler = Scheduler::new(db.clone());
    if let Err(e) = scheduler.verify_startup() {
        tracing::error!(error = %e, "scheduler refused to start, queue unreachable");
        return 1;
    }
    scheduler.spawn();

    spawn_worker_pool(db.clone(), QueueName::Ingest, 4, vec![Arc::new(FetchHandler {
        adapters: adapters.clone(),
        blob_store: blob_store.clone(),
    })]);
    spawn_worker_pool(db.clone(), QueueName::Normalize, 4, vec![Arc::new(NormalizeHandler)]);
    spawn_worker_pool(db.clone(), QueueName::Metrics, 2, vec![Arc::new(RecomputeMetricsHandler)]);
    spawn_worker_pool(db.clone(), QueueName::Feed, 2, vec![Arc::new(EmitFeedHandler)]);

    let router = build_router(state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error = %e, addr, "failed to bind");
            return 1;
        }
    };

    tracing::info!(addr, "tenantd listening");
    if let Err(e) = axum::serve(listener, router).await {
        tracing::error!(error = %e, "server exited with error");
        return 1;
    }

    0
}

fn spawn_worker_pool(
    db: tenantd::db::DbPool,
    queue: QueueName,
    concurrency: usize,
    handlers: Vec<Arc<dyn tenantd::queue::job::JobHandler>>,
) {
    let mut pool = QueueWorkerPool::new(db, queue, concurrency);
    for handler in handlers {
        pool.register(handler);
    }
    pool.spawn();
}

/// One-shot batch ingestion: fetch every known data type for every
/// connection, synchronously, and report exit code 3 if any data type
/// failed (§6 "Exit codes").
async fn run_ingest(config: Config) -> i32 {
    let db = match tenantd::db::connect(&config.database_path) {
        Ok(db) => db,
        Err(e) => {
            tracing::error!(error = %e, "failed to open database");
            return 1;
        }
    };

    let shopify = build_shopify_adapter(&config);
    let adapters = build_adapter_registry(shopify, &config);
    let blob_store: Arc<dyn tenantd::sourceref::BlobStore> = match LocalFsBlobStore::new(&config.blob_root) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!(error = %e, "failed to initialise blob store");
            return 1;
        }
    };

    let handler = FetchHandler { adapters, blob_store };
    let connections: Vec<(String, String)> = {
        let conn = match db.get() {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "failed to acquire db connection");
                return 2;
            }
        };
        let mut stmt = match conn.prepare("SELECT id, tenant_id FROM connections") {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "failed to query connections");
                return 2;
            }
        };
        let rows = stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)));
        let rows: rusqlite::Result<Vec<(String, String)>> = match rows {
            Ok(mapped) => mapped.collect(),
            Err(e) => Err(e),
        };
        match rows {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!(error = %e, "failed to read connections");
                return 2;
            }
        }
    };

    let mut any_failed = false;
    for (connection_id, tenant_id) in connections {
        for data_type in ["products", "orders", "bills", "legislators", "vote_events", "attendance"] {
            let ctx = tenantd::queue::job::JobCtx { db: db.clone(), tenant_id: Some(tenant_id.clone()) };
            let payload = serde_json::json!({ "connection_id": connection_id, "data_type": data_type });
            if let Err(e) = tenantd::queue::job::JobHandler::handle(&handler, payload, &ctx).await {
                tracing::warn!(error = %e, connection_id, data_type, "ingest CLI fetch failed");
                any_failed = true;
            }
        }
    }

    if any_failed {
        3
    } else {
        0
    }
}

fn run_migrate(config: Config) -> i32 {
    match tenantd::db::connect(&config.database_path) {
        Ok(_) => {
            tracing::info!("schema applied");
            0
        }
        Err(e) => {
            tracing::error!(error = %e, "migration failed");
            1
        }
    }
}
