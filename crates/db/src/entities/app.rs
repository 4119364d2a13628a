use sea_orm::entity::prelude::*;

use crate::types::AppStatus;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "apps")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub uuid: Uuid,
    pub user_id: Option<i64>,
    pub title: String,
    pub user_query: String,
    pub project_name: String,
    pub template_name: String,
    pub status: AppStatus,
    pub preview_url: Option<String>,
    pub screenshot_url: Option<String>,
    pub github_repo_url: Option<String>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
