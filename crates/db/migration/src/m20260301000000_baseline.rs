use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::DatabaseBackend;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create().if_not_exists()
                    .table(Users::Table)
                    .col(pk_id_col(manager, Users::Id))
                    .col(uuid_col(Users::Uuid))
                    .col(ColumnDef::new(Users::Email).string().not_null())
                    .col(ColumnDef::new(Users::DisplayName).string())
                    .col(timestamp_col(Users::CreatedAt))
                    .col(timestamp_col(Users::UpdatedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create().if_not_exists()
                    .name("idx_users_uuid")
                    .table(Users::Table)
                    .col(Users::Uuid)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create().if_not_exists()
                    .name("idx_users_email")
                    .table(Users::Table)
                    .col(Users::Email)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create().if_not_exists()
                    .table(Apps::Table)
                    .col(pk_id_col(manager, Apps::Id))
                    .col(uuid_col(Apps::Uuid))
                    .col(ColumnDef::new(Apps::UserId).integer())
                    .col(ColumnDef::new(Apps::Title).string().not_null())
                    .col(ColumnDef::new(Apps::UserQuery).text().not_null())
                    .col(ColumnDef::new(Apps::ProjectName).string().not_null())
                    .col(ColumnDef::new(Apps::TemplateName).string().not_null())
                    .col(
                        ColumnDef::new(Apps::Status)
                            .string_len(32)
                            .not_null()
                            .default(Expr::val("generating")),
                    )
                    .col(ColumnDef::new(Apps::PreviewUrl).string())
                    .col(ColumnDef::new(Apps::ScreenshotUrl).string())
                    .col(ColumnDef::new(Apps::GithubRepoUrl).string())
                    .col(timestamp_col(Apps::CreatedAt))
                    .col(timestamp_col(Apps::UpdatedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create().if_not_exists()
                    .name("idx_apps_uuid")
                    .table(Apps::Table)
                    .col(Apps::Uuid)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create().if_not_exists()
                    .name("idx_apps_user_id")
                    .table(Apps::Table)
                    .col(Apps::UserId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create().if_not_exists()
                    .table(Screenshots::Table)
                    .col(pk_id_col(manager, Screenshots::Id))
                    .col(uuid_col(Screenshots::Uuid))
                    .col(ColumnDef::new(Screenshots::AppId).integer().not_null())
                    .col(ColumnDef::new(Screenshots::FilePath).string().not_null())
                    .col(timestamp_col(Screenshots::CapturedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create().if_not_exists()
                    .name("idx_screenshots_app_id")
                    .table(Screenshots::Table)
                    .col(Screenshots::AppId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create().if_not_exists()
                    .table(AppDeployments::Table)
                    .col(pk_id_col(manager, AppDeployments::Id))
                    .col(uuid_col(AppDeployments::Uuid))
                    .col(ColumnDef::new(AppDeployments::AppId).integer().not_null())
                    .col(ColumnDef::new(AppDeployments::PreviewUrl).string().not_null())
                    .col(timestamp_col(AppDeployments::DeployedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create().if_not_exists()
                    .name("idx_app_deployments_app_id")
                    .table(AppDeployments::Table)
                    .col(AppDeployments::AppId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(AppDeployments::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Screenshots::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Apps::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Users::Table).to_owned())
            .await?;
        Ok(())
    }
}

fn pk_id_col<T: Iden + 'static>(manager: &SchemaManager, col: T) -> ColumnDef {
    let mut col = ColumnDef::new(col);
    match manager.get_database_backend() {
        DatabaseBackend::Sqlite => {
            col.integer();
        }
        _ => {
            col.big_integer();
        }
    }
    col.not_null().auto_increment().primary_key().to_owned()
}

fn uuid_col<T: Iden + 'static>(col: T) -> ColumnDef {
    ColumnDef::new(col).uuid().not_null().to_owned()
}

fn timestamp_col<T: Iden + 'static>(col: T) -> ColumnDef {
    ColumnDef::new(col)
        .timestamp()
        .not_null()
        .default(Expr::current_timestamp())
        .to_owned()
}

#[derive(Iden)]
enum Users {
    Table,
    Id,
    Uuid,
    Email,
    DisplayName,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum Apps {
    Table,
    Id,
    Uuid,
    UserId,
    Title,
    UserQuery,
    ProjectName,
    TemplateName,
    Status,
    PreviewUrl,
    ScreenshotUrl,
    GithubRepoUrl,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum Screenshots {
    Table,
    Id,
    Uuid,
    AppId,
    FilePath,
    CapturedAt,
}

#[derive(Iden)]
enum AppDeployments {
    Table,
    Id,
    Uuid,
    AppId,
    PreviewUrl,
    DeployedAt,
}
