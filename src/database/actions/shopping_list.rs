use std::collections::BTreeMap;

use sqlx::{Pool, Postgres};

use crate::{
    error::QueryError,
    schema::{CartPart, Id, ShoppingListLine},
};

/// Every ingredient row of every recipe in the user's cart, unmerged.
pub async fn fetch_cart_parts(
    user_id: Id,
    pool: &Pool<Postgres>,
) -> Result<Vec<CartPart>, potion::Error> {
    let rows: Vec<CartPart> = sqlx::query_as(
        "
        SELECT i.name AS name, i.measurement_unit AS measurement_unit, rp.amount AS amount
        FROM shopping_cart c
        INNER JOIN recipe_ingredients rp ON rp.recipe_id = c.recipe_id
        INNER JOIN ingredients i ON i.id = rp.ingredient_id
        WHERE c.user_id = $1
    ",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
    .map_err(|e| QueryError::from(e).into())?;

    Ok(rows)
}

/// Sums amounts per (name, unit). The output is ordered by that key so two
/// exports of the same cart are byte-identical.
pub fn aggregate_shopping_list(parts: Vec<CartPart>) -> Vec<ShoppingListLine> {
    let mut totals: BTreeMap<(String, String), i64> = BTreeMap::new();
    parts.into_iter().for_each(|part| {
        *totals
            .entry((part.name, part.measurement_unit))
            .or_insert(0) += i64::from(part.amount)
    });

    totals
        .into_iter()
        .map(|((name, measurement_unit), total_amount)| ShoppingListLine {
            name,
            measurement_unit,
            total_amount,
        })
        .collect()
}

pub fn render_shopping_list(lines: &[ShoppingListLine]) -> String {
    if lines.is_empty() {
        return String::from("Shopping list is empty\n");
    }

    let mut document = String::from("Shopping list\n\n");
    lines.iter().for_each(|line| {
        document.push_str(&format!(
            "- {} ({}): {}\n",
            line.name, line.measurement_unit, line.total_amount
        ))
    });

    document
}

pub async fn download_shopping_list(
    user_id: Id,
    pool: &Pool<Postgres>,
) -> Result<String, potion::Error> {
    let parts = fetch_cart_parts(user_id, pool).await?;
    let lines = aggregate_shopping_list(parts);

    log::info!(
        "User {user_id} exported a shopping list of {} items",
        lines.len()
    );

    Ok(render_shopping_list(&lines))
}
