use sqlx::{Pool, Postgres};

use crate::{
    error::{DomainError, QueryError},
    schema::{Id, Ingredient},
};

/// Escapes `LIKE` wildcards so a search prefix is matched literally.
pub fn like_prefix(search: &str) -> String {
    let mut pattern = String::with_capacity(search.len() + 1);
    for c in search.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// Lists ingredients, optionally narrowed to names starting with `name`
/// (case-insensitive).
pub async fn list_ingredients(
    name: Option<&str>,
    pool: &Pool<Postgres>,
) -> Result<Vec<Ingredient>, potion::Error> {
    let rows: Vec<Ingredient> = match name.filter(|name| !name.is_empty()) {
        Some(name) => sqlx::query_as(
            "
            SELECT id, name, measurement_unit FROM ingredients
            WHERE LOWER(name) LIKE LOWER($1)
            ORDER BY name
        ",
        )
        .bind(like_prefix(name))
        .fetch_all(pool)
        .await
        .map_err(|e| QueryError::from(e).into())?,
        None => sqlx::query_as("SELECT id, name, measurement_unit FROM ingredients ORDER BY name")
            .fetch_all(pool)
            .await
            .map_err(|e| QueryError::from(e).into())?,
    };

    Ok(rows)
}

pub async fn get_ingredient(id: Id, pool: &Pool<Postgres>) -> Result<Ingredient, potion::Error> {
    let row: Option<Ingredient> =
        sqlx::query_as("SELECT id, name, measurement_unit FROM ingredients WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(|e| QueryError::from(e).into())?;

    row.ok_or_else(|| DomainError::not_found("Ingredient not found").into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_pattern() {
        assert_eq!(like_prefix("Sug"), "Sug%");
        assert_eq!(like_prefix(""), "%");
    }

    #[test]
    fn wildcards_are_escaped() {
        assert_eq!(like_prefix("50%"), "50\\%%");
        assert_eq!(like_prefix("a_b"), "a\\_b%");
        assert_eq!(like_prefix("c\\d"), "c\\\\d%");
    }
}
