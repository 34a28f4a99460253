use dotenvy::dotenv;
use kpi_worker::{WorkerState, config::WorkerConfig, create_app};
use practice_core::{
    KpiStore, Notifier, RecordStore,
    adapters::{
        http_notifier::HttpNotifier, in_memory_logs::InMemoryKpiStore,
        in_memory_outbound::InMemoryNotifier, in_memory_records::InMemoryRecordStore,
        postgres_store::PostgresStore,
    },
    domain::kpi::KpiJobs,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::FmtSubscriber;

const EMAIL_API_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    dotenv().ok();
    let config = WorkerConfig::from_env().unwrap_or_else(|e| {
        panic!("Invalid worker configuration: {}", e);
    });

    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.log_level)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env()) // Allow RUST_LOG
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    info!("Starting KPI Worker v{}...", env!("CARGO_PKG_VERSION"));

    // Schema is owned by the gateway's migrations.
    let (records, kpis): (Arc<dyn RecordStore>, Arc<dyn KpiStore>) =
        match config.database_url.as_deref() {
            Some(url) => match PgPoolOptions::new().max_connections(2).connect(url).await {
                Ok(pool) => {
                    info!("Connected to Postgres");
                    let store = Arc::new(PostgresStore::new(pool));
                    (store.clone() as Arc<dyn RecordStore>, store as Arc<dyn KpiStore>)
                }
                Err(e) => {
                    error!("Failed to connect to Postgres: {}", e);
                    return;
                }
            },
            None => {
                warn!("DATABASE_URL not set (using in-memory stores)");
                (
                    Arc::new(InMemoryRecordStore::default()) as Arc<dyn RecordStore>,
                    Arc::new(InMemoryKpiStore::default()) as Arc<dyn KpiStore>,
                )
            }
        };

    let notifier: Arc<dyn Notifier> = match config.email_api_key.as_deref() {
        Some(key) => match HttpNotifier::new(&config.email_api_url, key, EMAIL_API_TIMEOUT) {
            Ok(notifier) => Arc::new(notifier),
            Err(e) => {
                error!("E-mail notifier setup failed: {}", e);
                return;
            }
        },
        None => {
            warn!("EMAIL_API_KEY not set (digests are kept in-process, not sent)");
            Arc::new(InMemoryNotifier::default())
        }
    };

    let state = WorkerState {
        jobs: Arc::new(KpiJobs::new(records, kpis, notifier, config.digest.clone())),
    };
    let app = create_app(state);

    info!("KPI Worker listening on {}", config.bind_addr);
    let listener = TcpListener::bind(config.bind_addr)
        .await
        .unwrap_or_else(|e| {
            panic!("Failed to bind to address {}: {}", config.bind_addr, e);
        });

    axum::serve(listener, app.into_make_service())
        .await
        .unwrap_or_else(|e| {
            panic!("Server failed to run: {}", e);
        });
}
