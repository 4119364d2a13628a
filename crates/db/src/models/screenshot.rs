use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder, Set};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::{entities::screenshot, models::ids};

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct Screenshot {
    pub id: Uuid,
    pub app_id: Uuid,
    pub file_path: String,
    #[ts(type = "Date")]
    pub captured_at: DateTime<Utc>,
}

impl Screenshot {
    pub async fn create<C: ConnectionTrait>(
        db: &C,
        app_id: Uuid,
        file_path: &str,
        screenshot_id: Uuid,
    ) -> Result<Self, DbErr> {
        let app_pk = ids::app_id_by_uuid(db, app_id)
            .await?
            .ok_or(DbErr::RecordNotFound("App not found".to_string()))?;
        let now = Utc::now();
        let active = screenshot::ActiveModel {
            uuid: Set(screenshot_id),
            app_id: Set(app_pk),
            file_path: Set(file_path.to_string()),
            captured_at: Set(now),
            ..Default::default()
        };
        let model = active.insert(db).await?;
        Ok(Self {
            id: model.uuid,
            app_id,
            file_path: model.file_path,
            captured_at: model.captured_at,
        })
    }

    pub async fn find_latest_for_app<C: ConnectionTrait>(
        db: &C,
        app_id: Uuid,
    ) -> Result<Option<Self>, DbErr> {
        let Some(app_pk) = ids::app_id_by_uuid(db, app_id).await? else {
            return Ok(None);
        };
        let record = screenshot::Entity::find()
            .filter(screenshot::Column::AppId.eq(app_pk))
            .order_by_desc(screenshot::Column::CapturedAt)
            .one(db)
            .await?;
        Ok(record.map(|model| Self {
            id: model.uuid,
            app_id,
            file_path: model.file_path,
            captured_at: model.captured_at,
        }))
    }
}
