use std::sync::Arc;

use marquee_core::{BookingRepository, CacheAside, CacheGateway, CatalogRepository, TokenBlacklist};
use tracing::info;

use crate::app_config::Config;
use crate::booking_repo::PgBookingStore;
use crate::catalog_repo::PgCatalogStore;
use crate::database::DbClient;
use crate::redis_repo::RedisClient;

/// Everything the process shares, built once at startup.
#[derive(Clone)]
pub struct Services {
    pub db: DbClient,
    pub redis: RedisClient,
    pub bookings: BookingRepository,
    pub catalog: CatalogRepository,
    pub blacklist: TokenBlacklist,
}

impl Services {
    pub async fn connect(config: &Config) -> anyhow::Result<Self> {
        let db = DbClient::new(&config.database).await?;
        info!(max_connections = config.database.max_connections, "postgres pool ready");

        let redis = RedisClient::new(&config.redis.url).await?;
        Ok(Self::assemble(db, redis, config))
    }

    fn assemble(db: DbClient, redis: RedisClient, config: &Config) -> Self {
        let gateway: Arc<dyn CacheGateway> = Arc::new(redis.clone());
        let cache = CacheAside::new(gateway.clone(), config.cache.namespace.clone());

        let bookings = BookingRepository::new(
            Arc::new(PgBookingStore::new(db.pool.clone())),
            cache.clone(),
        );
        let catalog = CatalogRepository::new(
            Arc::new(PgCatalogStore::new(db.pool.clone())),
            cache,
            config.cache.catalog_ttl(),
        );
        let blacklist = TokenBlacklist::new(gateway, config.cache.namespace.clone());

        Self {
            db,
            redis,
            bookings,
            catalog,
            blacklist,
        }
    }

    /// Checks both backends answer.
    pub async fn ping(&self) -> anyhow::Result<()> {
        self.db.ping().await?;
        self.redis.ping().await?;
        Ok(())
    }
}
