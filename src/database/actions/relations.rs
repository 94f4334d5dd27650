use std::collections::{HashMap, HashSet};

use sqlx::{Pool, Postgres, QueryBuilder, Transaction};

use crate::{
    constants::MIN_INGREDIENT_AMOUNT,
    error::{DomainError, QueryError},
    schema::{
        Id, LinkedRecipeTag, RecipeIngredientInput, RecipeIngredientView, RecipePart, RecipeRow,
        RecipeView, Tag,
    },
};

// bind parameters per row in the bulk inserts below
const INGREDIENT_BINDS: usize = 3;
const TAG_BINDS: usize = 2;
const MAX_BINDS: usize = 65535;

/// Checks a submitted ingredient/tag set before anything is written.
pub fn validate_recipe_relations(
    ingredients: &[RecipeIngredientInput],
    tags: &[Id],
) -> Result<(), DomainError> {
    if ingredients.is_empty() {
        return Err(DomainError::validation(
            "ingredients",
            "At least one ingredient is required",
        ));
    }

    let mut seen = HashSet::new();
    for ingredient in ingredients {
        if !seen.insert(ingredient.id) {
            return Err(DomainError::validation("ingredients", "duplicate entries"));
        }
        if ingredient.amount < MIN_INGREDIENT_AMOUNT {
            return Err(DomainError::validation(
                "ingredients",
                "Amount must be at least 1",
            ));
        }
    }

    if tags.is_empty() {
        return Err(DomainError::validation("tags", "At least one tag is required"));
    }

    let mut seen = HashSet::new();
    if !tags.iter().all(|tag| seen.insert(*tag)) {
        return Err(DomainError::validation("tags", "duplicate entries"));
    }

    Ok(())
}

/// Attaches the batched join rows to their recipes, keeping the order of `rows`.
pub fn compose_recipes(
    rows: Vec<RecipeRow>,
    parts: Vec<RecipePart>,
    tags: Vec<LinkedRecipeTag>,
) -> Vec<RecipeView> {
    let mut parts_by_recipe: HashMap<Id, Vec<RecipeIngredientView>> = HashMap::new();
    parts.into_iter().for_each(|part| {
        parts_by_recipe
            .entry(part.recipe_id)
            .or_default()
            .push(part.into())
    });

    let mut tags_by_recipe: HashMap<Id, Vec<Tag>> = HashMap::new();
    tags.into_iter().for_each(|tag| {
        tags_by_recipe
            .entry(tag.recipe_id)
            .or_default()
            .push(tag.into())
    });

    rows.into_iter()
        .map(|row| RecipeView {
            id: row.id,
            tags: tags_by_recipe.remove(&row.id).unwrap_or_default(),
            author: row.author(),
            ingredients: parts_by_recipe.remove(&row.id).unwrap_or_default(),
            is_favorited: row.is_favorited,
            is_in_shopping_cart: row.is_in_shopping_cart,
            name: row.name,
            image: row.image,
            text: row.text,
            cooking_time: row.cooking_time,
        })
        .collect()
}

pub async fn list_recipe_parts(
    pool: &Pool<Postgres>,
    recipe_ids: &[Id],
) -> Result<Vec<RecipePart>, potion::Error> {
    let rows: Vec<RecipePart> = sqlx::query_as(
        "
        SELECT rp.recipe_id AS recipe_id, i.id AS ingredient_id, i.name AS name,
            i.measurement_unit AS measurement_unit, rp.amount AS amount
        FROM recipe_ingredients rp
        INNER JOIN ingredients i ON i.id = rp.ingredient_id
        WHERE rp.recipe_id = ANY($1)
        ORDER BY rp.recipe_id, rp.id
    ",
    )
    .bind(recipe_ids)
    .fetch_all(pool)
    .await
    .map_err(|e| QueryError::from(e).into())?;

    Ok(rows)
}

pub async fn list_recipe_tags(
    pool: &Pool<Postgres>,
    recipe_ids: &[Id],
) -> Result<Vec<LinkedRecipeTag>, potion::Error> {
    let rows: Vec<LinkedRecipeTag> = sqlx::query_as(
        "
        SELECT rt.recipe_id AS recipe_id, t.id AS tag_id, t.name AS name, t.color AS color,
            t.slug AS slug
        FROM recipe_tags rt
        INNER JOIN tags t ON t.id = rt.tag_id
        WHERE rt.recipe_id = ANY($1)
        ORDER BY rt.recipe_id, rt.id
    ",
    )
    .bind(recipe_ids)
    .fetch_all(pool)
    .await
    .map_err(|e| QueryError::from(e).into())?;

    Ok(rows)
}

/// Loads ingredients and tags for a page of recipes with two queries in total.
pub async fn compose_recipe_page(
    rows: Vec<RecipeRow>,
    pool: &Pool<Postgres>,
) -> Result<Vec<RecipeView>, potion::Error> {
    if rows.is_empty() {
        return Ok(vec![]);
    }

    let ids: Vec<Id> = rows.iter().map(|row| row.id).collect();
    let parts = list_recipe_parts(pool, &ids).await?;
    let tags = list_recipe_tags(pool, &ids).await?;

    Ok(compose_recipes(rows, parts, tags))
}

/// Rejects ingredient or tag ids that don't exist.
pub async fn ensure_relations_exist(
    ingredients: &[RecipeIngredientInput],
    tags: &[Id],
    tr: &mut Transaction<'_, Postgres>,
) -> Result<(), potion::Error> {
    let ingredient_ids: Vec<Id> = ingredients.iter().map(|i| i.id).collect();

    let found: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM ingredients WHERE id = ANY($1)")
        .bind(&ingredient_ids)
        .fetch_one(&mut **tr)
        .await
        .map_err(|e| QueryError::from(e).into())?;

    if found.0 != ingredient_ids.len() as i64 {
        return Err(DomainError::validation("ingredients", "Unknown ingredient").into());
    }

    let found: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tags WHERE id = ANY($1)")
        .bind(tags)
        .fetch_one(&mut **tr)
        .await
        .map_err(|e| QueryError::from(e).into())?;

    if found.0 != tags.len() as i64 {
        return Err(DomainError::validation("tags", "Unknown tag").into());
    }

    Ok(())
}

/// Deletes every join row of the recipe and bulk inserts the submitted set.
/// Must run inside the caller's transaction so the swap is never observed half done.
pub async fn replace_recipe_relations(
    recipe_id: Id,
    ingredients: &[RecipeIngredientInput],
    tags: &[Id],
    tr: &mut Transaction<'_, Postgres>,
) -> Result<(), potion::Error> {
    sqlx::query("DELETE FROM recipe_ingredients WHERE recipe_id = $1")
        .bind(recipe_id)
        .execute(&mut **tr)
        .await
        .map_err(|e| QueryError::from(e).into())?;

    sqlx::query("DELETE FROM recipe_tags WHERE recipe_id = $1")
        .bind(recipe_id)
        .execute(&mut **tr)
        .await
        .map_err(|e| QueryError::from(e).into())?;

    for chunk in ingredients.chunks(MAX_BINDS / INGREDIENT_BINDS) {
        let mut query_builder: QueryBuilder<Postgres> =
            QueryBuilder::new("INSERT INTO recipe_ingredients (recipe_id, ingredient_id, amount) ");

        query_builder.push_values(chunk, |mut b, ingredient| {
            b.push_bind(recipe_id)
                .push_bind(ingredient.id)
                .push_bind(ingredient.amount);
        });

        query_builder
            .build()
            .execute(&mut **tr)
            .await
            .map_err(|e| QueryError::from(e).into())?;
    }

    for chunk in tags.chunks(MAX_BINDS / TAG_BINDS) {
        let mut query_builder: QueryBuilder<Postgres> =
            QueryBuilder::new("INSERT INTO recipe_tags (recipe_id, tag_id) ");

        query_builder.push_values(chunk, |mut b, tag_id| {
            b.push_bind(recipe_id).push_bind(*tag_id);
        });

        query_builder
            .build()
            .execute(&mut **tr)
            .await
            .map_err(|e| QueryError::from(e).into())?;
    }

    log::info!(
        "Replaced relations of recipe {recipe_id}: {} ingredients, {} tags",
        ingredients.len(),
        tags.len()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn input(id: Id, amount: i32) -> RecipeIngredientInput {
        RecipeIngredientInput { id, amount }
    }

    fn row(id: Id) -> RecipeRow {
        RecipeRow {
            id,
            name: format!("recipe {id}"),
            text: String::from("mix and bake"),
            image: None,
            cooking_time: 10,
            pub_date: Utc::now(),
            is_favorited: id == 2,
            is_in_shopping_cart: false,
            author_id: 1,
            author_email: String::from("author@example.com"),
            author_username: String::from("author"),
            author_first_name: String::from("A"),
            author_last_name: String::from("B"),
            author_is_subscribed: true,
            count: 2,
        }
    }

    fn part(recipe_id: Id, ingredient_id: Id, amount: i32) -> RecipePart {
        RecipePart {
            recipe_id,
            ingredient_id,
            name: format!("ingredient {ingredient_id}"),
            measurement_unit: String::from("g"),
            amount,
        }
    }

    fn tag(recipe_id: Id, tag_id: Id, slug: &str) -> LinkedRecipeTag {
        LinkedRecipeTag {
            recipe_id,
            tag_id,
            name: slug.to_string(),
            color: String::from("#E26C2D"),
            slug: slug.to_string(),
        }
    }

    #[test]
    fn duplicate_ingredient_is_rejected() {
        let result = validate_recipe_relations(&[input(1, 2), input(1, 3)], &[1]);
        assert_eq!(
            result,
            Err(DomainError::validation("ingredients", "duplicate entries"))
        );
    }

    #[test]
    fn duplicate_tag_is_rejected() {
        let result = validate_recipe_relations(&[input(1, 2)], &[4, 5, 4]);
        assert_eq!(result, Err(DomainError::validation("tags", "duplicate entries")));
    }

    #[test]
    fn empty_sets_are_rejected() {
        assert!(matches!(
            validate_recipe_relations(&[], &[1]),
            Err(DomainError::Validation { field: "ingredients", .. })
        ));
        assert!(matches!(
            validate_recipe_relations(&[input(1, 1)], &[]),
            Err(DomainError::Validation { field: "tags", .. })
        ));
    }

    #[test]
    fn zero_amount_is_rejected() {
        assert!(matches!(
            validate_recipe_relations(&[input(1, 0)], &[1]),
            Err(DomainError::Validation { field: "ingredients", .. })
        ));
    }

    #[test]
    fn distinct_sets_pass() {
        assert_eq!(
            validate_recipe_relations(&[input(1, 200), input(2, 1)], &[1, 2]),
            Ok(())
        );
    }

    #[test]
    fn join_rows_land_on_their_recipes() {
        let views = compose_recipes(
            vec![row(2), row(1)],
            vec![part(1, 10, 200), part(2, 11, 1), part(1, 12, 3)],
            vec![tag(2, 1, "breakfast"), tag(2, 2, "vegan")],
        );

        assert_eq!(views.len(), 2);
        assert_eq!(views[0].id, 2);
        assert!(views[0].is_favorited);
        assert_eq!(views[0].ingredients.len(), 1);
        let slugs: Vec<&str> = views[0].tags.iter().map(|t| t.slug.as_str()).collect();
        assert_eq!(slugs, vec!["breakfast", "vegan"]);

        assert_eq!(views[1].id, 1);
        assert!(views[1].tags.is_empty());
        let ids: Vec<Id> = views[1].ingredients.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![10, 12]);
        assert_eq!(views[1].ingredients[0].amount, 200);
        assert_eq!(views[1].author.username, "author");
        assert!(views[1].author.is_subscribed);
    }
}
