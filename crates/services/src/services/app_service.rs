//! Façade over the application database. Everything outside the `db` crate
//! goes through here; routes and agents never touch entities directly.

use db::{
    DBService, DbErr,
    models::{
        app::{App, AppError, AppStatus, CreateApp},
        app_deployment::AppDeployment,
        screenshot::Screenshot,
        user::User,
    },
};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AppServiceError {
    #[error(transparent)]
    Database(#[from] DbErr),
    #[error(transparent)]
    App(#[from] AppError),
}

#[derive(Clone)]
pub struct AppService {
    db: DBService,
}

impl AppService {
    pub fn new(db: DBService) -> Self {
        Self { db }
    }

    pub async fn create_app(&self, data: &CreateApp, app_id: Uuid) -> Result<App, AppServiceError> {
        Ok(App::create(&self.db.pool, data, app_id).await?)
    }

    pub async fn get_app(&self, app_id: Uuid) -> Result<Option<App>, AppServiceError> {
        Ok(App::find_by_id(&self.db.pool, app_id).await?)
    }

    pub async fn list_apps_for_user(&self, user_id: Uuid) -> Result<Vec<App>, AppServiceError> {
        Ok(App::find_all_for_user(&self.db.pool, user_id).await?)
    }

    pub async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, AppServiceError> {
        Ok(User::find_by_id(&self.db.pool, user_id).await?)
    }

    /// Owner-only endpoints resolve ownership here; apps without a user are
    /// open to their creator session only and never owner-matched.
    pub async fn user_owns_app(&self, user_id: Uuid, app_id: Uuid) -> Result<bool, AppServiceError> {
        let app = App::find_by_id(&self.db.pool, app_id).await?;
        Ok(app.and_then(|a| a.user_id).is_some_and(|owner| owner == user_id))
    }

    pub async fn update_app_status(
        &self,
        app_id: Uuid,
        status: AppStatus,
    ) -> Result<(), AppServiceError> {
        Ok(App::update_status(&self.db.pool, app_id, status).await?)
    }

    pub async fn update_app_preview_url(
        &self,
        app_id: Uuid,
        preview_url: &str,
    ) -> Result<(), AppServiceError> {
        App::update_preview_url(&self.db.pool, app_id, preview_url).await?;
        AppDeployment::create(&self.db.pool, app_id, preview_url, Uuid::new_v4()).await?;
        Ok(())
    }

    /// Persist a captured screenshot and point the app at it.
    pub async fn update_app_screenshot(
        &self,
        app_id: Uuid,
        file_path: &str,
    ) -> Result<(), AppServiceError> {
        Screenshot::create(&self.db.pool, app_id, file_path, Uuid::new_v4()).await?;
        App::update_screenshot_url(&self.db.pool, app_id, file_path).await?;
        Ok(())
    }

    pub async fn update_app_project_name(
        &self,
        app_id: Uuid,
        project_name: &str,
    ) -> Result<(), AppServiceError> {
        Ok(App::update_project_name(&self.db.pool, app_id, project_name).await?)
    }

    pub async fn update_app_github_repo(
        &self,
        app_id: Uuid,
        repo_url: &str,
    ) -> Result<(), AppServiceError> {
        Ok(App::update_github_repo_url(&self.db.pool, app_id, repo_url).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn screenshot_update_records_row_and_pointer() {
        let db = DBService::new_in_memory().await.unwrap();
        let service = AppService::new(db.clone());
        let app_id = Uuid::new_v4();
        service
            .create_app(
                &CreateApp {
                    user_id: None,
                    title: "t".to_string(),
                    user_query: "q".to_string(),
                    project_name: "proj-abc".to_string(),
                    template_name: "react-vite".to_string(),
                },
                app_id,
            )
            .await
            .unwrap();

        service
            .update_app_screenshot(app_id, "screenshots/app/1.png")
            .await
            .unwrap();

        let app = service.get_app(app_id).await.unwrap().unwrap();
        assert_eq!(app.screenshot_url.as_deref(), Some("screenshots/app/1.png"));
        let latest = Screenshot::find_latest_for_app(&db.pool, app_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.file_path, "screenshots/app/1.png");
    }

    #[tokio::test]
    async fn ownership_check_matches_only_the_owner() {
        let db = DBService::new_in_memory().await.unwrap();
        let service = AppService::new(db.clone());
        let owner = Uuid::new_v4();
        User::create(&db.pool, "owner@example.com", None, owner)
            .await
            .unwrap();
        let other = Uuid::new_v4();
        User::create(&db.pool, "other@example.com", None, other)
            .await
            .unwrap();

        let app_id = Uuid::new_v4();
        service
            .create_app(
                &CreateApp {
                    user_id: Some(owner),
                    title: "t".to_string(),
                    user_query: "q".to_string(),
                    project_name: "proj-xyz".to_string(),
                    template_name: "react-vite".to_string(),
                },
                app_id,
            )
            .await
            .unwrap();

        assert!(service.user_owns_app(owner, app_id).await.unwrap());
        assert!(!service.user_owns_app(other, app_id).await.unwrap());
    }
}
