use std::collections::HashMap;

use sqlx::{Pool, Postgres};

use crate::{
    constants::USER_COUNT_PER_PAGE,
    error::{DomainError, QueryError},
    form::Form,
    pagination::{Page, PageRequest},
    schema::{AuthorRecipe, Id, RecipeMinified, Subscribed, UserProfile, UserProfileRow},
};

/// Reads `recipes_limit`. Absent means unlimited, negative values are rejected.
pub fn parse_recipes_limit(form: &Form) -> Result<Option<i64>, potion::Error> {
    let limit: Option<i64> = form.get_number("recipes_limit")?;

    match limit {
        Some(limit) if limit < 0 => Err(DomainError::validation(
            "recipes_limit",
            "Must be a non-negative integer",
        )
        .into()),
        limit => Ok(limit),
    }
}

/// Keeps the newest `min(limit, available)` recipes.
pub fn truncate_recipes(
    mut recipes: Vec<RecipeMinified>,
    limit: Option<i64>,
) -> Vec<RecipeMinified> {
    if let Some(limit) = limit {
        recipes.truncate(usize::try_from(limit).unwrap_or(0));
    }
    recipes
}

/// Groups a batched recipe listing per author, preserving the query order.
fn group_by_author(recipes: Vec<AuthorRecipe>) -> HashMap<Id, Vec<RecipeMinified>> {
    let mut grouped: HashMap<Id, Vec<RecipeMinified>> = HashMap::new();
    recipes.into_iter().for_each(|recipe| {
        grouped
            .entry(recipe.author_id)
            .or_default()
            .push(recipe.into())
    });
    grouped
}

pub fn build_subscribed(
    profile: UserProfile,
    recipes: Vec<RecipeMinified>,
    recipes_limit: Option<i64>,
) -> Subscribed {
    let recipes_count = recipes.len() as i64;

    Subscribed {
        profile,
        recipes: truncate_recipes(recipes, recipes_limit),
        recipes_count,
    }
}

async fn list_author_recipes(
    author_ids: &[Id],
    pool: &Pool<Postgres>,
) -> Result<Vec<AuthorRecipe>, potion::Error> {
    let rows: Vec<AuthorRecipe> = sqlx::query_as(
        "
        SELECT author_id, id, name, image, cooking_time
        FROM recipes
        WHERE author_id = ANY($1)
        ORDER BY pub_date DESC, id DESC
    ",
    )
    .bind(author_ids)
    .fetch_all(pool)
    .await
    .map_err(|e| QueryError::from(e).into())?;

    Ok(rows)
}

/// The author as seen by `viewer_id`, which is always a subscriber here.
pub async fn get_subscribed(
    author_id: Id,
    viewer_id: Id,
    recipes_limit: Option<i64>,
    pool: &Pool<Postgres>,
) -> Result<Subscribed, potion::Error> {
    let profile: Option<UserProfile> = sqlx::query_as(
        "
        SELECT u.email, u.id, u.username, u.first_name, u.last_name,
            EXISTS(
                SELECT 1 FROM subscriptions s WHERE s.user_id = $2 AND s.author_id = u.id
            ) AS is_subscribed
        FROM users u
        WHERE u.id = $1
    ",
    )
    .bind(author_id)
    .bind(viewer_id)
    .fetch_optional(pool)
    .await
    .map_err(|e| QueryError::from(e).into())?;

    let profile =
        profile.ok_or_else(|| potion::Error::from(DomainError::not_found("Author not found")))?;

    let recipes = list_author_recipes(&[author_id], pool)
        .await?
        .into_iter()
        .map(RecipeMinified::from)
        .collect();

    Ok(build_subscribed(profile, recipes, recipes_limit))
}

/// Authors followed by `user_id`, newest subscription first. Recipes for the
/// whole page are loaded with one query.
pub async fn list_subscriptions(
    user_id: Id,
    page: Option<i64>,
    limit: Option<i64>,
    recipes_limit: Option<i64>,
    pool: &Pool<Postgres>,
) -> Result<Page<Subscribed>, potion::Error> {
    let request = PageRequest::new(page, limit, USER_COUNT_PER_PAGE);

    let rows: Vec<UserProfileRow> = sqlx::query_as(
        "
        SELECT u.email, u.id, u.username, u.first_name, u.last_name,
            TRUE AS is_subscribed, COUNT(*) OVER() AS count
        FROM subscriptions s
        INNER JOIN users u ON u.id = s.author_id
        WHERE s.user_id = $1
        ORDER BY s.id DESC
        LIMIT $2 OFFSET $3
    ",
    )
    .bind(user_id)
    .bind(request.limit)
    .bind(request.offset())
    .fetch_all(pool)
    .await
    .map_err(|e| QueryError::from(e).into())?;

    let count = match rows.first() {
        Some(row) => row.count,
        None => {
            let total: (i64,) =
                sqlx::query_as("SELECT COUNT(*) FROM subscriptions WHERE user_id = $1")
                    .bind(user_id)
                    .fetch_one(pool)
                    .await
                    .map_err(|e| QueryError::from(e).into())?;
            return Ok(Page::no_rows(total.0, request));
        }
    };

    let author_ids: Vec<Id> = rows.iter().map(|row| row.id).collect();
    let mut recipes = group_by_author(list_author_recipes(&author_ids, pool).await?);

    let results = rows
        .into_iter()
        .map(|row| {
            let author_recipes = recipes.remove(&row.id).unwrap_or_default();
            build_subscribed(row.into(), author_recipes, recipes_limit)
        })
        .collect();

    Ok(Page::from_rows(results, count, request))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minified(id: Id) -> RecipeMinified {
        RecipeMinified {
            id,
            name: format!("recipe {id}"),
            image: None,
            cooking_time: 5,
        }
    }

    fn profile() -> UserProfile {
        UserProfile {
            email: "author@example.com".to_string(),
            id: 3,
            username: "author".to_string(),
            first_name: "A".to_string(),
            last_name: "B".to_string(),
            is_subscribed: true,
        }
    }

    #[test]
    fn limit_larger_than_available_returns_everything() {
        let subscribed = build_subscribed(profile(), vec![minified(1), minified(2)], Some(10));
        assert_eq!(subscribed.recipes.len(), 2);
        assert_eq!(subscribed.recipes_count, 2);
    }

    #[test]
    fn limit_truncates_but_count_is_total() {
        let subscribed = build_subscribed(
            profile(),
            vec![minified(3), minified(2), minified(1)],
            Some(1),
        );
        assert_eq!(subscribed.recipes, vec![minified(3)]);
        assert_eq!(subscribed.recipes_count, 3);
    }

    #[test]
    fn no_limit_keeps_all() {
        assert_eq!(truncate_recipes(vec![minified(1), minified(2)], None).len(), 2);
        assert!(truncate_recipes(vec![minified(1)], Some(0)).is_empty());
    }

    fn authored(author_id: Id, id: Id) -> AuthorRecipe {
        AuthorRecipe {
            author_id,
            id,
            name: format!("recipe {id}"),
            image: None,
            cooking_time: 1,
        }
    }

    #[test]
    fn recipes_are_grouped_per_author() {
        let grouped = group_by_author(vec![authored(1, 10), authored(2, 11), authored(1, 9)]);

        let ids: Vec<Id> = grouped[&1].iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![10, 9]);
        assert_eq!(grouped[&2].len(), 1);
    }

    #[test]
    fn recipes_limit_parsing() {
        let form = Form::from_data(vec![("recipes_limit".to_string(), "2".to_string())]);
        assert_eq!(parse_recipes_limit(&form).ok(), Some(Some(2)));

        let form = Form::from_data(vec![]);
        assert_eq!(parse_recipes_limit(&form).ok(), Some(None));

        let form = Form::from_data(vec![("recipes_limit".to_string(), "-1".to_string())]);
        assert!(parse_recipes_limit(&form).is_err());

        let form = Form::from_data(vec![("recipes_limit".to_string(), "many".to_string())]);
        assert!(parse_recipes_limit(&form).is_err());
    }
}
