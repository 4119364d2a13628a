use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

pub use crate::types::AppStatus;

use crate::{
    entities::app,
    models::ids,
};

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Database(#[from] DbErr),
    #[error("App not found")]
    AppNotFound,
    #[error("Invalid project name: {0}")]
    InvalidProjectName(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct App {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub title: String,
    pub user_query: String,
    pub project_name: String,
    pub template_name: String,
    pub status: AppStatus,
    pub preview_url: Option<String>,
    pub screenshot_url: Option<String>,
    pub github_repo_url: Option<String>,
    #[ts(type = "Date")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "Date")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, TS)]
pub struct CreateApp {
    pub user_id: Option<Uuid>,
    pub title: String,
    pub user_query: String,
    pub project_name: String,
    pub template_name: String,
}

impl App {
    async fn from_model<C: ConnectionTrait>(db: &C, model: app::Model) -> Result<Self, DbErr> {
        let user_id = match model.user_id {
            Some(id) => ids::user_uuid_by_id(db, id).await?,
            None => None,
        };
        Ok(Self {
            id: model.uuid,
            user_id,
            title: model.title,
            user_query: model.user_query,
            project_name: model.project_name,
            template_name: model.template_name,
            status: model.status,
            preview_url: model.preview_url,
            screenshot_url: model.screenshot_url,
            github_repo_url: model.github_repo_url,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }

    async fn model_by_uuid<C: ConnectionTrait>(db: &C, id: Uuid) -> Result<app::Model, AppError> {
        app::Entity::find()
            .filter(app::Column::Uuid.eq(id))
            .one(db)
            .await?
            .ok_or(AppError::AppNotFound)
    }

    pub async fn find_by_id<C: ConnectionTrait>(db: &C, id: Uuid) -> Result<Option<Self>, DbErr> {
        let record = app::Entity::find()
            .filter(app::Column::Uuid.eq(id))
            .one(db)
            .await?;
        match record {
            Some(model) => Ok(Some(Self::from_model(db, model).await?)),
            None => Ok(None),
        }
    }

    pub async fn find_all_for_user<C: ConnectionTrait>(
        db: &C,
        user_id: Uuid,
    ) -> Result<Vec<Self>, DbErr> {
        let Some(user_pk) = ids::user_id_by_uuid(db, user_id).await? else {
            return Ok(Vec::new());
        };
        let records = app::Entity::find()
            .filter(app::Column::UserId.eq(user_pk))
            .order_by_desc(app::Column::CreatedAt)
            .all(db)
            .await?;
        let mut apps = Vec::with_capacity(records.len());
        for model in records {
            apps.push(Self::from_model(db, model).await?);
        }
        Ok(apps)
    }

    pub async fn create<C: ConnectionTrait>(
        db: &C,
        data: &CreateApp,
        app_id: Uuid,
    ) -> Result<Self, AppError> {
        let user_pk = match data.user_id {
            Some(user_id) => ids::user_id_by_uuid(db, user_id).await?,
            None => None,
        };
        let now = Utc::now();
        let active = app::ActiveModel {
            uuid: Set(app_id),
            user_id: Set(user_pk),
            title: Set(data.title.clone()),
            user_query: Set(data.user_query.clone()),
            project_name: Set(data.project_name.clone()),
            template_name: Set(data.template_name.clone()),
            status: Set(AppStatus::Generating),
            preview_url: Set(None),
            screenshot_url: Set(None),
            github_repo_url: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };
        let model = active.insert(db).await?;
        Ok(Self::from_model(db, model).await?)
    }

    pub async fn update_status<C: ConnectionTrait>(
        db: &C,
        id: Uuid,
        status: AppStatus,
    ) -> Result<(), AppError> {
        let mut active: app::ActiveModel = Self::model_by_uuid(db, id).await?.into();
        active.status = Set(status);
        active.updated_at = Set(Utc::now());
        active.update(db).await?;
        Ok(())
    }

    pub async fn update_preview_url<C: ConnectionTrait>(
        db: &C,
        id: Uuid,
        preview_url: &str,
    ) -> Result<(), AppError> {
        let mut active: app::ActiveModel = Self::model_by_uuid(db, id).await?.into();
        active.preview_url = Set(Some(preview_url.to_string()));
        active.updated_at = Set(Utc::now());
        active.update(db).await?;
        Ok(())
    }

    pub async fn update_screenshot_url<C: ConnectionTrait>(
        db: &C,
        id: Uuid,
        screenshot_url: &str,
    ) -> Result<(), AppError> {
        let mut active: app::ActiveModel = Self::model_by_uuid(db, id).await?.into();
        active.screenshot_url = Set(Some(screenshot_url.to_string()));
        active.updated_at = Set(Utc::now());
        active.update(db).await?;
        Ok(())
    }

    pub async fn update_project_name<C: ConnectionTrait>(
        db: &C,
        id: Uuid,
        project_name: &str,
    ) -> Result<(), AppError> {
        if !utils::text::is_valid_project_name(project_name) {
            return Err(AppError::InvalidProjectName(project_name.to_string()));
        }
        let mut active: app::ActiveModel = Self::model_by_uuid(db, id).await?.into();
        active.project_name = Set(project_name.to_string());
        active.updated_at = Set(Utc::now());
        active.update(db).await?;
        Ok(())
    }

    pub async fn update_github_repo_url<C: ConnectionTrait>(
        db: &C,
        id: Uuid,
        repo_url: &str,
    ) -> Result<(), AppError> {
        let mut active: app::ActiveModel = Self::model_by_uuid(db, id).await?.into();
        active.github_repo_url = Set(Some(repo_url.to_string()));
        active.updated_at = Set(Utc::now());
        active.update(db).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DBService;

    #[tokio::test]
    async fn create_and_update_app_roundtrip() {
        let db = DBService::new_in_memory().await.unwrap();
        let app_id = Uuid::new_v4();
        let app = App::create(
            &db.pool,
            &CreateApp {
                user_id: None,
                title: "Todo List".to_string(),
                user_query: "build a todo list".to_string(),
                project_name: "todo-list-abc123".to_string(),
                template_name: "react-vite".to_string(),
            },
            app_id,
        )
        .await
        .unwrap();
        assert_eq!(app.id, app_id);
        assert_eq!(app.status, AppStatus::Generating);

        App::update_status(&db.pool, app_id, AppStatus::Ready)
            .await
            .unwrap();
        App::update_preview_url(&db.pool, app_id, "http://localhost:40123")
            .await
            .unwrap();

        let reloaded = App::find_by_id(&db.pool, app_id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, AppStatus::Ready);
        assert_eq!(
            reloaded.preview_url.as_deref(),
            Some("http://localhost:40123")
        );
    }

    #[tokio::test]
    async fn project_name_is_validated_on_update() {
        let db = DBService::new_in_memory().await.unwrap();
        let app_id = Uuid::new_v4();
        App::create(
            &db.pool,
            &CreateApp {
                user_id: None,
                title: "t".to_string(),
                user_query: "q".to_string(),
                project_name: "valid-name".to_string(),
                template_name: "react-vite".to_string(),
            },
            app_id,
        )
        .await
        .unwrap();

        let err = App::update_project_name(&db.pool, app_id, "Bad Name!")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidProjectName(_)));

        App::update_project_name(&db.pool, app_id, "renamed-app")
            .await
            .unwrap();
        let reloaded = App::find_by_id(&db.pool, app_id).await.unwrap().unwrap();
        assert_eq!(reloaded.project_name, "renamed-app");
    }
}
