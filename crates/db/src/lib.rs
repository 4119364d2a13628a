use std::time::Duration;

use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use utils::assets::asset_dir;

pub mod agent_store;
pub mod entities;
pub mod models;
pub mod types;

#[derive(Clone)]
pub struct DBService {
    pub pool: DatabaseConnection,
}

pub type DbPool = DatabaseConnection;
pub use sea_orm::DbErr;
pub use sea_orm::TransactionTrait;

impl DBService {
    pub async fn new() -> Result<DBService, DbErr> {
        let db_path = asset_dir().join("db.sqlite");
        let database_url = format!("sqlite://{}?mode=rwc", db_path.to_string_lossy());
        Self::connect(&database_url).await
    }

    /// In-memory database, used by tests.
    pub async fn new_in_memory() -> Result<DBService, DbErr> {
        Self::connect("sqlite::memory:").await
    }

    async fn connect(database_url: &str) -> Result<DBService, DbErr> {
        let mut options = ConnectOptions::new(database_url.to_string());
        options
            .max_connections(5)
            .connect_timeout(Duration::from_secs(30))
            .sqlx_logging(false)
            .map_sqlx_sqlite_opts(|opts| {
                opts.pragma("journal_mode", "WAL")
                    .pragma("synchronous", "NORMAL")
                    .busy_timeout(Duration::from_secs(30))
            });
        let pool = Database::connect(options).await?;
        db_migration::Migrator::up(&pool, None).await?;
        Ok(DBService { pool })
    }
}
