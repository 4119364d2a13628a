use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, Set};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

use crate::entities::user;

#[derive(Debug, Error)]
pub enum UserError {
    #[error(transparent)]
    Database(#[from] DbErr),
    #[error("User not found")]
    UserNotFound,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    #[ts(type = "Date")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "Date")]
    pub updated_at: DateTime<Utc>,
}

impl User {
    fn from_model(model: user::Model) -> Self {
        Self {
            id: model.uuid,
            email: model.email,
            display_name: model.display_name,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }

    pub async fn find_by_id<C: ConnectionTrait>(db: &C, id: Uuid) -> Result<Option<Self>, DbErr> {
        let record = user::Entity::find()
            .filter(user::Column::Uuid.eq(id))
            .one(db)
            .await?;
        Ok(record.map(Self::from_model))
    }

    pub async fn find_by_email<C: ConnectionTrait>(
        db: &C,
        email: &str,
    ) -> Result<Option<Self>, DbErr> {
        let record = user::Entity::find()
            .filter(user::Column::Email.eq(email))
            .one(db)
            .await?;
        Ok(record.map(Self::from_model))
    }

    pub async fn create<C: ConnectionTrait>(
        db: &C,
        email: &str,
        display_name: Option<&str>,
        user_id: Uuid,
    ) -> Result<Self, DbErr> {
        let now = Utc::now();
        let active = user::ActiveModel {
            uuid: Set(user_id),
            email: Set(email.to_string()),
            display_name: Set(display_name.map(str::to_string)),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };
        let model = active.insert(db).await?;
        Ok(Self::from_model(model))
    }
}
