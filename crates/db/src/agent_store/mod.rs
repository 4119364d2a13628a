//! Per-agent sqlite store.
//!
//! Each agent owns a private database file under `<assets>/agents/` holding
//! its conversation histories, the content-addressed workspace objects and
//! refs, and the serialized agent state. Nothing in here is shared across
//! agents.

use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, EntityTrait, Schema,
};
use std::time::Duration;
use utils::assets::agents_dir;
use uuid::Uuid;

pub mod entities;

#[derive(Clone)]
pub struct AgentDb {
    pub pool: DatabaseConnection,
}

impl AgentDb {
    pub async fn open(agent_id: Uuid) -> Result<Self, DbErr> {
        let dir = agents_dir();
        std::fs::create_dir_all(&dir).map_err(|err| DbErr::Custom(err.to_string()))?;
        let db_path = dir.join(format!("{agent_id}.sqlite"));
        let database_url = format!("sqlite://{}?mode=rwc", db_path.to_string_lossy());
        Self::connect(&database_url).await
    }

    /// In-memory store, used by tests.
    pub async fn open_in_memory() -> Result<Self, DbErr> {
        Self::connect("sqlite::memory:").await
    }

    async fn connect(database_url: &str) -> Result<Self, DbErr> {
        let mut options = ConnectOptions::new(database_url.to_string());
        options
            .max_connections(1)
            .connect_timeout(Duration::from_secs(30))
            .sqlx_logging(false)
            .map_sqlx_sqlite_opts(|opts| {
                opts.pragma("journal_mode", "WAL")
                    .pragma("synchronous", "NORMAL")
                    .busy_timeout(Duration::from_secs(30))
            });
        let pool = Database::connect(options).await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// The agent store has no migration history; tables are created straight
    /// from the entity definitions on every open.
    async fn init_schema(&self) -> Result<(), DbErr> {
        self.create_table(entities::full_conversation::Entity).await?;
        self.create_table(entities::compact_conversation::Entity).await?;
        self.create_table(entities::workspace_object::Entity).await?;
        self.create_table(entities::workspace_ref::Entity).await?;
        self.create_table(entities::workspace_index::Entity).await?;
        self.create_table(entities::agent_state::Entity).await?;
        Ok(())
    }

    async fn create_table<E: EntityTrait>(&self, entity: E) -> Result<(), DbErr> {
        let backend = self.pool.get_database_backend();
        let schema = Schema::new(backend);
        let mut stmt = schema.create_table_from_entity(entity);
        stmt.if_not_exists();
        self.pool.execute(backend.build(&stmt)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use sea_orm::{ActiveModelTrait, EntityTrait, Set};

    use super::*;

    #[tokio::test]
    async fn schema_init_is_idempotent() {
        let store = AgentDb::open_in_memory().await.unwrap();
        store.init_schema().await.unwrap();

        let active = entities::workspace_ref::ActiveModel {
            name: Set("HEAD".to_string()),
            oid: Set("ref: refs/heads/main".to_string()),
        };
        active.insert(&store.pool).await.unwrap();

        let head = entities::workspace_ref::Entity::find_by_id("HEAD")
            .one(&store.pool)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(head.oid, "ref: refs/heads/main");
    }
}
