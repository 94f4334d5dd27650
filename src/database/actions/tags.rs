use crate::{
    error::{DomainError, QueryError},
    schema::{Id, Tag},
};

use sqlx::{Pool, Postgres};

pub async fn list_tags(pool: &Pool<Postgres>) -> Result<Vec<Tag>, potion::Error> {
    let list: Vec<Tag> = sqlx::query_as("SELECT id, name, color, slug FROM tags ORDER BY name")
        .fetch_all(pool)
        .await
        .map_err(|e| QueryError::from(e).into())?;

    Ok(list)
}

pub async fn get_tag(id: Id, pool: &Pool<Postgres>) -> Result<Tag, potion::Error> {
    let tag: Option<Tag> = sqlx::query_as("SELECT id, name, color, slug FROM tags WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(|e| QueryError::from(e).into())?;

    tag.ok_or_else(|| DomainError::not_found("Tag not found").into())
}
