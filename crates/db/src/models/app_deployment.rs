use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder, Set};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::{entities::app_deployment, models::ids};

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct AppDeployment {
    pub id: Uuid,
    pub app_id: Uuid,
    pub preview_url: String,
    #[ts(type = "Date")]
    pub deployed_at: DateTime<Utc>,
}

impl AppDeployment {
    pub async fn create<C: ConnectionTrait>(
        db: &C,
        app_id: Uuid,
        preview_url: &str,
        deployment_id: Uuid,
    ) -> Result<Self, DbErr> {
        let app_pk = ids::app_id_by_uuid(db, app_id)
            .await?
            .ok_or(DbErr::RecordNotFound("App not found".to_string()))?;
        let active = app_deployment::ActiveModel {
            uuid: Set(deployment_id),
            app_id: Set(app_pk),
            preview_url: Set(preview_url.to_string()),
            deployed_at: Set(Utc::now()),
            ..Default::default()
        };
        let model = active.insert(db).await?;
        Ok(Self {
            id: model.uuid,
            app_id,
            preview_url: model.preview_url,
            deployed_at: model.deployed_at,
        })
    }

    pub async fn find_latest_for_app<C: ConnectionTrait>(
        db: &C,
        app_id: Uuid,
    ) -> Result<Option<Self>, DbErr> {
        let Some(app_pk) = ids::app_id_by_uuid(db, app_id).await? else {
            return Ok(None);
        };
        let record = app_deployment::Entity::find()
            .filter(app_deployment::Column::AppId.eq(app_pk))
            .order_by_desc(app_deployment::Column::DeployedAt)
            .one(db)
            .await?;
        Ok(record.map(|model| Self {
            id: model.uuid,
            app_id,
            preview_url: model.preview_url,
            deployed_at: model.deployed_at,
        }))
    }
}
