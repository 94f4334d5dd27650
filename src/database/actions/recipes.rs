use sqlx::{Pool, Postgres, QueryBuilder};

use crate::{
    authentication::permissions::ActionType,
    constants::{MAX_LEN_NAME, MIN_COOKING_TIME},
    error::{DomainError, QueryError},
    form::Form,
    jwt::SessionData,
    pagination::{Page, PageRequest},
    schema::{Id, Recipe, RecipeInput, RecipePatch, RecipeRow, RecipeView},
};

use super::relations::{
    compose_recipe_page, ensure_relations_exist, replace_recipe_relations,
    validate_recipe_relations,
};

/// Filters accepted by the recipe listing. Empty `tags` means no tag filter.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RecipeFilter {
    pub id: Option<Id>,
    pub author: Option<Id>,
    pub is_favorited: Option<bool>,
    pub is_in_shopping_cart: Option<bool>,
    pub tags: Vec<String>,
}

impl RecipeFilter {
    pub fn from_form(form: &Form) -> Result<Self, potion::Error> {
        Ok(Self {
            id: None,
            author: form.get_number("author")?,
            is_favorited: form.get_bool("is_favorited")?,
            is_in_shopping_cart: form.get_bool("is_in_shopping_cart")?,
            tags: form.get_all("tags"),
        })
    }

    pub fn by_id(id: Id) -> Self {
        Self {
            id: Some(id),
            ..Default::default()
        }
    }
}

/// Pushes the annotated, filtered recipe set as a derived table `v`. The
/// per-viewer flags are correlated `EXISTS` subqueries. An anonymous viewer
/// binds NULL and every flag comes out false.
fn push_filtered_recipes(
    query_builder: &mut QueryBuilder<'static, Postgres>,
    filter: &RecipeFilter,
    viewer: Option<Id>,
) {
    query_builder.push(
        "(
            SELECT r.id, r.name, r.text, r.image, r.cooking_time, r.pub_date,
                r.author_id, u.email AS author_email, u.username AS author_username,
                u.first_name AS author_first_name, u.last_name AS author_last_name,
                EXISTS(SELECT 1 FROM subscriptions s WHERE s.author_id = r.author_id AND s.user_id = ",
    );
    query_builder.push_bind(viewer);
    query_builder.push(
        ") AS author_is_subscribed,
                EXISTS(SELECT 1 FROM favorites f WHERE f.recipe_id = r.id AND f.user_id = ",
    );
    query_builder.push_bind(viewer);
    query_builder.push(
        ") AS is_favorited,
                EXISTS(SELECT 1 FROM shopping_cart c WHERE c.recipe_id = r.id AND c.user_id = ",
    );
    query_builder.push_bind(viewer);
    query_builder.push(
        ") AS is_in_shopping_cart
            FROM recipes r
            INNER JOIN users u ON u.id = r.author_id
        ) v WHERE TRUE",
    );

    if let Some(id) = filter.id {
        query_builder.push(" AND v.id = ").push_bind(id);
    }
    if let Some(author) = filter.author {
        query_builder.push(" AND v.author_id = ").push_bind(author);
    }
    if let Some(is_favorited) = filter.is_favorited {
        query_builder
            .push(" AND v.is_favorited = ")
            .push_bind(is_favorited);
    }
    if let Some(is_in_shopping_cart) = filter.is_in_shopping_cart {
        query_builder
            .push(" AND v.is_in_shopping_cart = ")
            .push_bind(is_in_shopping_cart);
    }
    if !filter.tags.is_empty() {
        // EXISTS instead of a join: a recipe carrying several of the tags still comes back once
        query_builder.push(
            " AND EXISTS(SELECT 1 FROM recipe_tags rt INNER JOIN tags t ON t.id = rt.tag_id WHERE rt.recipe_id = v.id AND t.slug = ANY(",
        );
        query_builder.push_bind(filter.tags.clone());
        query_builder.push("))");
    }
}

/// Builds one page of the annotated recipe listing, total included, in one round trip.
pub fn build_recipe_query(
    filter: &RecipeFilter,
    viewer: Option<Id>,
    page: Option<PageRequest>,
) -> QueryBuilder<'static, Postgres> {
    let mut query_builder: QueryBuilder<Postgres> =
        QueryBuilder::new("SELECT v.*, COUNT(*) OVER() AS count FROM ");
    push_filtered_recipes(&mut query_builder, filter, viewer);

    query_builder.push(" ORDER BY v.pub_date DESC, v.id DESC");

    if let Some(page) = page {
        query_builder
            .push(" LIMIT ")
            .push_bind(page.limit)
            .push(" OFFSET ")
            .push_bind(page.offset());
    }

    query_builder
}

/// Counts the recipes matching `filter`, for pages past the end where the
/// window count has no row to ride on.
pub fn build_recipe_count_query(
    filter: &RecipeFilter,
    viewer: Option<Id>,
) -> QueryBuilder<'static, Postgres> {
    let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new("SELECT COUNT(*) FROM ");
    push_filtered_recipes(&mut query_builder, filter, viewer);

    query_builder
}

pub async fn fetch_recipes(
    filter: &RecipeFilter,
    viewer: Option<Id>,
    page: PageRequest,
    pool: &Pool<Postgres>,
) -> Result<Page<RecipeView>, potion::Error> {
    let mut query_builder = build_recipe_query(filter, viewer, Some(page));
    let rows: Vec<RecipeRow> = query_builder
        .build_query_as()
        .fetch_all(pool)
        .await
        .map_err(|e| QueryError::from(e).into())?;

    let total_count = match rows.first() {
        Some(row) => row.count,
        None => {
            let mut count_builder = build_recipe_count_query(filter, viewer);
            let total: (i64,) = count_builder
                .build_query_as()
                .fetch_one(pool)
                .await
                .map_err(|e| QueryError::from(e).into())?;
            return Ok(Page::no_rows(total.0, page));
        }
    };
    let views = compose_recipe_page(rows, pool).await?;

    Ok(Page::from_rows(views, total_count, page))
}

pub async fn get_recipe_view(
    id: Id,
    viewer: Option<Id>,
    pool: &Pool<Postgres>,
) -> Result<RecipeView, potion::Error> {
    let mut query_builder = build_recipe_query(&RecipeFilter::by_id(id), viewer, None);
    let row: Option<RecipeRow> = query_builder
        .build_query_as()
        .fetch_optional(pool)
        .await
        .map_err(|e| QueryError::from(e).into())?;

    let row = row.ok_or_else(|| DomainError::not_found("Recipe not found"))?;

    compose_recipe_page(vec![row], pool)
        .await?
        .pop()
        .ok_or_else(|| DomainError::not_found("Recipe not found").into())
}

pub async fn get_recipe(id: Id, pool: &Pool<Postgres>) -> Result<Option<Recipe>, potion::Error> {
    let row: Option<Recipe> = sqlx::query_as("SELECT * FROM recipes WHERE id = $1")
        .bind(id)
        .fetch_optional(&*pool)
        .await
        .map_err(|e| QueryError::from(e).into())?;

    Ok(row)
}

/// Fetches a recipe the session is allowed to modify: its author, or an admin.
pub async fn get_recipe_mut(
    id: Id,
    session: &SessionData,
    pool: &Pool<Postgres>,
) -> Result<Recipe, potion::Error> {
    session.authenticate(ActionType::ManageOwnRecipes)?;
    let recipe = get_recipe(id, pool).await?;

    match recipe {
        Some(recipe) => match session.authenticate(ActionType::ManageAllRecipes) {
            Ok(_) => Ok(recipe),
            Err(_) => {
                if recipe.author_id != session.user_id {
                    Err(DomainError::Permission(
                        "Only the author can modify this recipe".to_string(),
                    )
                    .into())
                } else {
                    Ok(recipe)
                }
            }
        },
        None => Err(DomainError::not_found("Recipe not found").into()),
    }
}

/// Validates the scalar recipe fields, returning the cooking time in its stored width.
pub fn validate_recipe_fields(
    name: &str,
    text: &str,
    cooking_time: i32,
) -> Result<i16, DomainError> {
    if name.trim().is_empty() {
        return Err(DomainError::validation("name", "This field may not be blank"));
    }
    if name.chars().count() > MAX_LEN_NAME {
        return Err(DomainError::validation(
            "name",
            &format!("Ensure this field has no more than {MAX_LEN_NAME} characters"),
        ));
    }
    if text.trim().is_empty() {
        return Err(DomainError::validation("text", "This field may not be blank"));
    }
    if cooking_time < MIN_COOKING_TIME {
        return Err(DomainError::validation(
            "cooking_time",
            "Must be at least 1",
        ));
    }

    i16::try_from(cooking_time)
        .map_err(|_| DomainError::validation("cooking_time", "Value is too large"))
}

pub async fn create_recipe(
    input: RecipeInput,
    session: &SessionData,
    pool: &Pool<Postgres>,
) -> Result<RecipeView, potion::Error> {
    session.authenticate(ActionType::CreateRecipes)?;

    let cooking_time = validate_recipe_fields(&input.name, &input.text, input.cooking_time)?;
    validate_recipe_relations(&input.ingredients, &input.tags)?;

    let mut tr = pool
        .begin()
        .await
        .map_err(|_| QueryError::new("Could not start transaction".to_owned()).into())?;

    ensure_relations_exist(&input.ingredients, &input.tags, &mut tr).await?;

    let id: (Id,) = sqlx::query_as(
        "
        INSERT INTO recipes (author_id, name, text, image, cooking_time)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id
    ",
    )
    .bind(session.user_id)
    .bind(&input.name)
    .bind(&input.text)
    .bind(&input.image)
    .bind(cooking_time)
    .fetch_one(&mut *tr)
    .await
    .map_err(|e| QueryError::from(e).into())?;

    replace_recipe_relations(id.0, &input.ingredients, &input.tags, &mut tr).await?;

    tr.commit()
        .await
        .map_err(|_| QueryError::new("Could not commit transaction".to_owned()).into())?;

    log::info!("User {} created recipe {}", session.user_id, id.0);

    get_recipe_view(id.0, Some(session.user_id), pool).await
}

/// Scalar fields left out of the patch keep their stored values. A missing or
/// null `image` keeps the stored image, so PATCH can't clear it.
fn merge_patch_fields(patch: RecipePatch, recipe: Recipe) -> (String, String, Option<String>, i32) {
    (
        patch.name.unwrap_or(recipe.name),
        patch.text.unwrap_or(recipe.text),
        patch.image.or(recipe.image),
        patch.cooking_time.unwrap_or(recipe.cooking_time.into()),
    )
}

/// Partial update. Ingredients and tags are still mandatory and replace the
/// previous sets entirely.
pub async fn update_recipe(
    id: Id,
    patch: RecipePatch,
    session: &SessionData,
    pool: &Pool<Postgres>,
) -> Result<RecipeView, potion::Error> {
    let recipe = get_recipe_mut(id, session, pool).await?;

    let ingredients = patch
        .ingredients
        .ok_or_else(|| DomainError::validation("ingredients", "This field is required"))?;
    let tags = patch
        .tags
        .ok_or_else(|| DomainError::validation("tags", "This field is required"))?;

    let (name, text, image, cooking_time) = merge_patch_fields(patch, recipe);
    let cooking_time = validate_recipe_fields(&name, &text, cooking_time)?;
    validate_recipe_relations(&ingredients, &tags)?;

    let mut tr = pool
        .begin()
        .await
        .map_err(|_| QueryError::new("Could not start transaction".to_owned()).into())?;

    ensure_relations_exist(&ingredients, &tags, &mut tr).await?;

    sqlx::query(
        "UPDATE recipes SET name = $1, text = $2, image = $3, cooking_time = $4 WHERE id = $5",
    )
    .bind(name)
    .bind(text)
    .bind(image)
    .bind(cooking_time)
    .bind(id)
    .execute(&mut *tr)
    .await
    .map_err(|e| QueryError::from(e).into())?;

    replace_recipe_relations(id, &ingredients, &tags, &mut tr).await?;

    tr.commit()
        .await
        .map_err(|_| QueryError::new("Could not commit transaction".to_owned()).into())?;

    log::info!("User {} updated recipe {}", session.user_id, id);

    get_recipe_view(id, Some(session.user_id), pool).await
}

/// Join rows, favorites and cart entries go with the recipe through `ON DELETE CASCADE`.
pub async fn delete_recipe(
    id: Id,
    session: &SessionData,
    pool: &Pool<Postgres>,
) -> Result<(), potion::Error> {
    get_recipe_mut(id, session, pool).await?;

    sqlx::query("DELETE FROM recipes WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .map_err(|e| QueryError::from(e).into())?;

    log::info!("User {} deleted recipe {}", session.user_id, id);

    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn stored_recipe() -> Recipe {
        Recipe {
            id: 4,
            author_id: 1,
            name: "Pancakes".to_string(),
            text: "Mix and fry".to_string(),
            image: Some("recipes/images/pancakes.png".to_string()),
            cooking_time: 20,
            pub_date: Utc::now(),
        }
    }

    #[test]
    fn patch_keeps_fields_it_leaves_out() {
        let patch = RecipePatch {
            name: Some("Crepes".to_string()),
            ..Default::default()
        };

        let (name, text, image, cooking_time) = merge_patch_fields(patch, stored_recipe());
        assert_eq!(name, "Crepes");
        assert_eq!(text, "Mix and fry");
        assert_eq!(image.as_deref(), Some("recipes/images/pancakes.png"));
        assert_eq!(cooking_time, 20);
    }

    #[test]
    fn null_image_does_not_clear_stored_image() {
        let patch: RecipePatch =
            serde_json::from_str(r#"{"image": null, "cooking_time": 5}"#).unwrap();

        let (_, _, image, cooking_time) = merge_patch_fields(patch, stored_recipe());
        assert_eq!(image.as_deref(), Some("recipes/images/pancakes.png"));
        assert_eq!(cooking_time, 5);
    }

    #[test]
    fn annotations_are_correlated_subqueries() {
        let query = build_recipe_query(&RecipeFilter::default(), Some(3), None);
        let sql = query.sql();

        assert!(sql.contains(
            "EXISTS(SELECT 1 FROM favorites f WHERE f.recipe_id = r.id AND f.user_id = $2)"
        ));
        assert!(sql.contains(
            "EXISTS(SELECT 1 FROM shopping_cart c WHERE c.recipe_id = r.id AND c.user_id = $3)"
        ));
        assert!(sql.contains("ORDER BY v.pub_date DESC, v.id DESC"));
        assert!(!sql.contains("LIMIT"));
    }

    #[test]
    fn every_filter_adds_a_bound_condition() {
        let filter = RecipeFilter {
            id: None,
            author: Some(5),
            is_favorited: Some(true),
            is_in_shopping_cart: Some(false),
            tags: vec!["breakfast".to_string(), "vegan".to_string()],
        };
        let page = PageRequest::new(Some(2), Some(6), 6);
        let query = build_recipe_query(&filter, Some(1), Some(page));
        let sql = query.sql();

        assert!(sql.contains("AND v.author_id = $4"));
        assert!(sql.contains("AND v.is_favorited = $5"));
        assert!(sql.contains("AND v.is_in_shopping_cart = $6"));
        assert!(sql.contains("t.slug = ANY($7)"));
        assert!(sql.contains("LIMIT $8 OFFSET $9"));
    }

    #[test]
    fn tag_filter_never_joins_into_the_row_set() {
        let filter = RecipeFilter {
            tags: vec!["breakfast".to_string(), "vegan".to_string()],
            ..Default::default()
        };
        let query = build_recipe_query(&filter, None, None);
        let sql = query.sql();

        // the only join on recipe_tags lives inside the EXISTS
        assert_eq!(sql.matches("recipe_tags").count(), 1);
        assert!(sql.contains("AND EXISTS(SELECT 1 FROM recipe_tags rt"));
    }

    #[test]
    fn count_query_shares_the_listing_filters() {
        let filter = RecipeFilter {
            author: Some(5),
            is_favorited: Some(true),
            tags: vec!["vegan".to_string()],
            ..Default::default()
        };
        let count = build_recipe_count_query(&filter, Some(1));
        let listing = build_recipe_query(&filter, Some(1), None);

        let count_sql = count.sql();
        assert!(count_sql.starts_with("SELECT COUNT(*) FROM ("));
        assert!(count_sql.contains("AND v.author_id = $4"));
        assert!(count_sql.contains("AND v.is_favorited = $5"));
        assert!(count_sql.contains("t.slug = ANY($6)"));
        assert!(!count_sql.contains("ORDER BY"));
        assert!(!count_sql.contains("LIMIT"));

        // same row set as the listing, only the projection differs
        let listing_sql = listing.sql();
        let source = |sql: &str| {
            let start = sql.find(" FROM (").unwrap();
            let end = sql.find(" ORDER BY").unwrap_or(sql.len());
            sql[start..end].to_string()
        };
        assert_eq!(source(count_sql), source(listing_sql));
    }

    #[test]
    fn filter_from_query_string() {
        let form = Form::from_data(vec![
            ("author".to_string(), "2".to_string()),
            ("tags".to_string(), "breakfast".to_string()),
            ("tags".to_string(), "vegan".to_string()),
            ("is_in_shopping_cart".to_string(), "1".to_string()),
        ]);
        let filter = RecipeFilter::from_form(&form).ok().unwrap();

        assert_eq!(filter.author, Some(2));
        assert_eq!(filter.is_favorited, None);
        assert_eq!(filter.is_in_shopping_cart, Some(true));
        assert_eq!(filter.tags, vec!["breakfast", "vegan"]);
    }

    #[test]
    fn recipe_fields_validation() {
        assert_eq!(validate_recipe_fields("Pancakes", "Whisk", 15), Ok(15));
        assert!(matches!(
            validate_recipe_fields("Pancakes", "Whisk", 0),
            Err(DomainError::Validation { field: "cooking_time", .. })
        ));
        assert!(matches!(
            validate_recipe_fields("  ", "Whisk", 5),
            Err(DomainError::Validation { field: "name", .. })
        ));
        assert!(matches!(
            validate_recipe_fields("Pancakes", "", 5),
            Err(DomainError::Validation { field: "text", .. })
        ));
        assert!(validate_recipe_fields(&"x".repeat(MAX_LEN_NAME + 1), "Whisk", 5).is_err());
        assert!(validate_recipe_fields("Pancakes", "Whisk", 40_000).is_err());
    }
}
