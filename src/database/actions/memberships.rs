use sqlx::{Pool, Postgres};

use crate::{
    authentication::permissions::ActionType,
    error::{DomainError, QueryError},
    jwt::SessionData,
    schema::{Id, RecipeMinified, Subscribed},
};

use super::subscriptions::get_subscribed;

/// The three (user, target) relations that share add/remove semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MembershipKind {
    Favorite,
    ShoppingCart,
    Subscription,
}

impl MembershipKind {
    pub fn table(&self) -> &'static str {
        match self {
            MembershipKind::Favorite => "favorites",
            MembershipKind::ShoppingCart => "shopping_cart",
            MembershipKind::Subscription => "subscriptions",
        }
    }

    pub fn target_column(&self) -> &'static str {
        match self {
            MembershipKind::Favorite | MembershipKind::ShoppingCart => "recipe_id",
            MembershipKind::Subscription => "author_id",
        }
    }

    pub fn target_table(&self) -> &'static str {
        match self {
            MembershipKind::Favorite | MembershipKind::ShoppingCart => "recipes",
            MembershipKind::Subscription => "users",
        }
    }

    fn missing_target(&self) -> DomainError {
        match self {
            MembershipKind::Favorite | MembershipKind::ShoppingCart => {
                DomainError::not_found("Recipe not found")
            }
            MembershipKind::Subscription => DomainError::not_found("Author not found"),
        }
    }

    fn already_exists(&self) -> DomainError {
        let message = match self {
            MembershipKind::Favorite => "Recipe is already in favorites",
            MembershipKind::ShoppingCart => "Recipe is already in the shopping cart",
            MembershipKind::Subscription => "Already subscribed to this author",
        };
        DomainError::AlreadyExists(message.to_string())
    }
}

/// Storage operations the membership rules are written against.
#[allow(async_fn_in_trait)]
pub trait MembershipStore {
    type Error: From<DomainError>;

    async fn target_exists(&self, kind: MembershipKind, target: Id) -> Result<bool, Self::Error>;

    async fn membership_exists(
        &self,
        kind: MembershipKind,
        user_id: Id,
        target: Id,
    ) -> Result<bool, Self::Error>;

    /// Returns false when the pair was already present. The unique constraint
    /// decides, not the caller's earlier existence check.
    async fn insert_membership(
        &self,
        kind: MembershipKind,
        user_id: Id,
        target: Id,
    ) -> Result<bool, Self::Error>;

    /// Returns false when there was nothing to delete.
    async fn delete_membership(
        &self,
        kind: MembershipKind,
        user_id: Id,
        target: Id,
    ) -> Result<bool, Self::Error>;
}

impl MembershipStore for Pool<Postgres> {
    type Error = potion::Error;

    async fn target_exists(&self, kind: MembershipKind, target: Id) -> Result<bool, Self::Error> {
        let row: (bool,) = sqlx::query_as(&format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE id = $1)",
            kind.target_table()
        ))
        .bind(target)
        .fetch_one(self)
        .await
        .map_err(|e| QueryError::from(e).into())?;

        Ok(row.0)
    }

    async fn membership_exists(
        &self,
        kind: MembershipKind,
        user_id: Id,
        target: Id,
    ) -> Result<bool, Self::Error> {
        let row: (bool,) = sqlx::query_as(&format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE user_id = $1 AND {} = $2)",
            kind.table(),
            kind.target_column()
        ))
        .bind(user_id)
        .bind(target)
        .fetch_one(self)
        .await
        .map_err(|e| QueryError::from(e).into())?;

        Ok(row.0)
    }

    async fn insert_membership(
        &self,
        kind: MembershipKind,
        user_id: Id,
        target: Id,
    ) -> Result<bool, Self::Error> {
        let result = sqlx::query(&format!(
            "INSERT INTO {} (user_id, {}) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            kind.table(),
            kind.target_column()
        ))
        .bind(user_id)
        .bind(target)
        .execute(self)
        .await
        .map_err(|e| QueryError::from(e).into())?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_membership(
        &self,
        kind: MembershipKind,
        user_id: Id,
        target: Id,
    ) -> Result<bool, Self::Error> {
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE user_id = $1 AND {} = $2",
            kind.table(),
            kind.target_column()
        ))
        .bind(user_id)
        .bind(target)
        .execute(self)
        .await
        .map_err(|e| QueryError::from(e).into())?;

        Ok(result.rows_affected() > 0)
    }
}

pub async fn add_membership<S: MembershipStore>(
    store: &S,
    kind: MembershipKind,
    user_id: Id,
    target: Id,
) -> Result<(), S::Error> {
    if kind == MembershipKind::Subscription && user_id == target {
        return Err(
            DomainError::SelfReference("You can't subscribe to yourself".to_string()).into(),
        );
    }

    if !store.target_exists(kind, target).await? {
        return Err(kind.missing_target().into());
    }

    if store.membership_exists(kind, user_id, target).await? {
        return Err(kind.already_exists().into());
    }

    if !store.insert_membership(kind, user_id, target).await? {
        log::warn!(
            "Concurrent insert into {} for user {user_id} and target {target}",
            kind.table()
        );
        return Err(kind.already_exists().into());
    }

    log::info!("User {user_id} added {target} to {}", kind.table());

    Ok(())
}

pub async fn remove_membership<S: MembershipStore>(
    store: &S,
    kind: MembershipKind,
    user_id: Id,
    target: Id,
) -> Result<(), S::Error> {
    if !store.target_exists(kind, target).await? {
        return Err(kind.missing_target().into());
    }

    if !store.delete_membership(kind, user_id, target).await? {
        return Err(DomainError::not_found("No such membership").into());
    }

    log::info!("User {user_id} removed {target} from {}", kind.table());

    Ok(())
}

pub async fn get_recipe_minified(
    id: Id,
    pool: &Pool<Postgres>,
) -> Result<RecipeMinified, potion::Error> {
    let row: Option<RecipeMinified> =
        sqlx::query_as("SELECT id, name, image, cooking_time FROM recipes WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(|e| QueryError::from(e).into())?;

    row.ok_or_else(|| DomainError::not_found("Recipe not found").into())
}

async fn add_recipe_membership(
    kind: MembershipKind,
    recipe_id: Id,
    session: &SessionData,
    pool: &Pool<Postgres>,
) -> Result<RecipeMinified, potion::Error> {
    session.authenticate(ActionType::ManageOwnMemberships)?;
    add_membership(pool, kind, session.user_id, recipe_id).await?;

    get_recipe_minified(recipe_id, pool).await
}

pub async fn add_to_favorites(
    recipe_id: Id,
    session: &SessionData,
    pool: &Pool<Postgres>,
) -> Result<RecipeMinified, potion::Error> {
    add_recipe_membership(MembershipKind::Favorite, recipe_id, session, pool).await
}

pub async fn remove_from_favorites(
    recipe_id: Id,
    session: &SessionData,
    pool: &Pool<Postgres>,
) -> Result<(), potion::Error> {
    session.authenticate(ActionType::ManageOwnMemberships)?;
    remove_membership(pool, MembershipKind::Favorite, session.user_id, recipe_id).await
}

pub async fn add_to_shopping_cart(
    recipe_id: Id,
    session: &SessionData,
    pool: &Pool<Postgres>,
) -> Result<RecipeMinified, potion::Error> {
    add_recipe_membership(MembershipKind::ShoppingCart, recipe_id, session, pool).await
}

pub async fn remove_from_shopping_cart(
    recipe_id: Id,
    session: &SessionData,
    pool: &Pool<Postgres>,
) -> Result<(), potion::Error> {
    session.authenticate(ActionType::ManageOwnMemberships)?;
    remove_membership(pool, MembershipKind::ShoppingCart, session.user_id, recipe_id).await
}

pub async fn subscribe(
    author_id: Id,
    recipes_limit: Option<i64>,
    session: &SessionData,
    pool: &Pool<Postgres>,
) -> Result<Subscribed, potion::Error> {
    session.authenticate(ActionType::ManageOwnMemberships)?;
    add_membership(pool, MembershipKind::Subscription, session.user_id, author_id).await?;

    get_subscribed(author_id, session.user_id, recipes_limit, pool).await
}

pub async fn unsubscribe(
    author_id: Id,
    session: &SessionData,
    pool: &Pool<Postgres>,
) -> Result<(), potion::Error> {
    session.authenticate(ActionType::ManageOwnMemberships)?;
    remove_membership(pool, MembershipKind::Subscription, session.user_id, author_id).await
}
