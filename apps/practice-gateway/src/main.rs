use dotenvy::dotenv;
use practice_core::{
    AuditLog, Cache, EventPublisher, FailedAttemptStore, IpLookup, MembershipStore, NoticeFeed,
    RecordStore, TenantDirectory,
    adapters::{
        http_ip_lookup::HttpIpLookup,
        in_memory_cache::InMemoryCache,
        in_memory_event_bus::InMemoryEventBus,
        in_memory_logs::{InMemoryAuditLog, InMemoryFailedAttemptStore},
        in_memory_outbound::StaticIpLookup,
        in_memory_records::{InMemoryMembershipStore, InMemoryRecordStore},
        local_auth::LocalAuthProvider,
        postgres_store::PostgresStore,
        redis_cache::RedisCache,
        redis_event_bus::RedisEventBus,
    },
    domain::failed_login::FailedLoginTracker,
    domain::tenant::provision_known_tenants,
};
use practice_gateway::{AppState, application::sessions::SessionRegistry, config::GatewayConfig, create_app};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::FmtSubscriber;

const IP_LOOKUP_TIMEOUT: Duration = Duration::from_secs(3);

struct Stores {
    records: Arc<dyn RecordStore>,
    memberships: Arc<dyn MembershipStore>,
    directory: Arc<dyn TenantDirectory>,
    failed_attempts: Arc<dyn FailedAttemptStore>,
    audit: Arc<dyn AuditLog>,
}

fn in_memory_stores() -> Stores {
    let memberships = InMemoryMembershipStore::default();
    Stores {
        records: Arc::new(InMemoryRecordStore::default()),
        memberships: Arc::new(memberships.clone()),
        directory: Arc::new(memberships),
        failed_attempts: Arc::new(InMemoryFailedAttemptStore::default()),
        audit: Arc::new(InMemoryAuditLog::default()),
    }
}

// Runs migrations using sqlx migrate
async fn connect_postgres(db_url: &str) -> Result<Stores, Box<dyn std::error::Error + Send + Sync>> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await?;

    info!("Applying database migrations...");
    let migrator = sqlx::migrate::Migrator::new(std::path::Path::new("./migrations")).await?;
    migrator.run(&pool).await?;
    info!("Migrations applied successfully.");

    let store = Arc::new(PostgresStore::new(pool));
    Ok(Stores {
        records: store.clone(),
        memberships: store.clone(),
        directory: store.clone(),
        failed_attempts: store.clone(),
        audit: store,
    })
}

struct Notices {
    publisher: Arc<dyn EventPublisher>,
    feed: Arc<dyn NoticeFeed>,
}

fn in_memory_notices() -> Notices {
    let bus = InMemoryEventBus::default();
    Notices {
        publisher: Arc::new(bus.clone()),
        feed: Arc::new(bus),
    }
}

async fn connect_redis(redis_url: Option<&str>, session_ttl_seconds: u64) -> (Arc<dyn Cache>, Notices) {
    let Some(url) = redis_url else {
        warn!("REDIS_URL not set (sessions and notices stay in-process)");
        return (
            Arc::new(InMemoryCache::new(10_000, session_ttl_seconds)),
            in_memory_notices(),
        );
    };

    let cache: Arc<dyn Cache> = match RedisCache::new(url, "practice:", session_ttl_seconds).await
    {
        Ok(cache) => Arc::new(cache),
        Err(e) => {
            warn!("Redis cache unavailable, using in-memory sessions: {}", e);
            Arc::new(InMemoryCache::new(10_000, session_ttl_seconds))
        }
    };
    let notices = match RedisEventBus::new(url, Some("practice:")).await {
        Ok(bus) => Notices {
            publisher: Arc::new(bus.clone()),
            feed: Arc::new(bus),
        },
        Err(e) => {
            warn!("Redis notice bus unavailable, using in-memory bus: {}", e);
            in_memory_notices()
        }
    };
    (cache, notices)
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    let config = GatewayConfig::from_env().unwrap_or_else(|e| {
        panic!("Invalid gateway configuration: {}", e);
    });

    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.log_level)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env()) // Allow RUST_LOG
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    info!("Starting Practice Gateway v{}...", env!("CARGO_PKG_VERSION"));

    let stores = match config.database_url.as_deref() {
        Some(url) => match connect_postgres(url).await {
            Ok(stores) => {
                info!("Connected to Postgres");
                stores
            }
            Err(e) => {
                error!("Database setup failed: {}", e);
                return; // Exit if migrations fail - database is in inconsistent state
            }
        },
        None => {
            warn!("DATABASE_URL not set (using in-memory stores)");
            in_memory_stores()
        }
    };

    let (session_cache, notices) =
        connect_redis(config.redis_url.as_deref(), config.session_ttl_seconds).await;

    let ip_lookup: Arc<dyn IpLookup> =
        match HttpIpLookup::new(&config.ip_lookup_url, IP_LOOKUP_TIMEOUT) {
            Ok(lookup) => Arc::new(lookup),
            Err(e) => {
                warn!("IP lookup disabled: {}", e);
                Arc::new(StaticIpLookup::unavailable())
            }
        };

    let auth = LocalAuthProvider::new(session_cache, config.session_ttl_seconds);
    if let Some(user) = &config.bootstrap {
        if let Err(e) = auth.register_with_id(&user.user_id, &user.email, &user.password) {
            error!("Failed to register bootstrap user {}: {}", user.email, e);
        }
        match user.membership() {
            Some(membership) => {
                if let Err(e) = stores.directory.enroll(&user.user_id, &membership).await {
                    error!("Failed to enroll bootstrap user in {}: {}", membership.tenant.code, e);
                }
            }
            None => warn!("BOOTSTRAP_TENANT_CODE not set (bootstrap user has no clinic)"),
        }
    }

    if let Err(e) = provision_known_tenants(stores.directory.as_ref(), config.scope).await {
        error!("Tenant provisioning failed: {}", e);
    }

    let app_state = AppState {
        auth: Arc::new(auth),
        records: stores.records,
        memberships: stores.memberships,
        directory: stores.directory,
        failed_logins: Arc::new(FailedLoginTracker::new(
            stores.failed_attempts,
            ip_lookup,
            config.security,
        )),
        audit: stores.audit,
        notices: notices.publisher,
        notice_feed: notices.feed,
        sessions: SessionRegistry::default(),
        security: config.security,
        scope: config.scope,
    };

    let app = create_app(app_state);

    info!("Practice Gateway listening on {}", config.bind_addr);
    let listener = TcpListener::bind(config.bind_addr)
        .await
        .unwrap_or_else(|e| {
            panic!("Failed to bind to address {}: {}", config.bind_addr, e);
        });

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .unwrap_or_else(|e| {
            panic!("Server failed to run: {}", e);
        });
}
