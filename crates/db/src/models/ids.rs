//! Lookups between internal integer keys and the public uuids exposed by the
//! API layer.

use sea_orm::{ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter};
use uuid::Uuid;

use crate::entities::{app, user};

pub async fn user_id_by_uuid<C: ConnectionTrait>(
    db: &C,
    uuid: Uuid,
) -> Result<Option<i64>, DbErr> {
    let record = user::Entity::find()
        .filter(user::Column::Uuid.eq(uuid))
        .one(db)
        .await?;
    Ok(record.map(|m| m.id))
}

pub async fn user_uuid_by_id<C: ConnectionTrait>(db: &C, id: i64) -> Result<Option<Uuid>, DbErr> {
    let record = user::Entity::find_by_id(id).one(db).await?;
    Ok(record.map(|m| m.uuid))
}

pub async fn app_id_by_uuid<C: ConnectionTrait>(db: &C, uuid: Uuid) -> Result<Option<i64>, DbErr> {
    let record = app::Entity::find()
        .filter(app::Column::Uuid.eq(uuid))
        .one(db)
        .await?;
    Ok(record.map(|m| m.id))
}

pub async fn app_uuid_by_id<C: ConnectionTrait>(db: &C, id: i64) -> Result<Option<Uuid>, DbErr> {
    let record = app::Entity::find_by_id(id).one(db).await?;
    Ok(record.map(|m| m.uuid))
}
