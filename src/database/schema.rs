use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type Id = i32;

#[derive(
    Clone, Debug, PartialEq, PartialOrd, sqlx::Type, Serialize, Eq, Ord, Hash, Deserialize,
)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    User,
    Admin,
}

#[derive(sqlx::FromRow, Debug, Clone, Serialize)]
pub struct User {
    pub id: Id,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub role: UserRole,
}

/// Public shape of a user, annotated for the viewer.
#[derive(sqlx::FromRow, Debug, Clone, Serialize, PartialEq)]
pub struct UserProfile {
    pub email: String,
    pub id: Id,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub is_subscribed: bool,
}

#[derive(sqlx::FromRow, Debug, Clone, Serialize)]
pub struct UserProfileRow {
    pub email: String,
    pub id: Id,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub is_subscribed: bool,

    pub count: i64,
}

impl From<UserProfileRow> for UserProfile {
    fn from(row: UserProfileRow) -> Self {
        Self {
            email: row.email,
            id: row.id,
            username: row.username,
            first_name: row.first_name,
            last_name: row.last_name,
            is_subscribed: row.is_subscribed,
        }
    }
}

#[derive(sqlx::FromRow, Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tag {
    pub id: Id,
    pub name: String,
    pub color: String,
    pub slug: String,
}

#[derive(sqlx::FromRow, Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ingredient {
    pub id: Id,
    pub name: String,
    pub measurement_unit: String,
}

#[derive(sqlx::FromRow, Debug, Clone, Serialize)]
pub struct Recipe {
    pub id: Id,
    pub author_id: Id,
    pub name: String,
    pub text: String,
    pub image: Option<String>,
    pub cooking_time: i16,
    pub pub_date: DateTime<Utc>,
}

/// One row of the annotated recipe listing, author columns flattened in.
#[derive(sqlx::FromRow, Debug, Clone)]
pub struct RecipeRow {
    pub id: Id,
    pub name: String,
    pub text: String,
    pub image: Option<String>,
    pub cooking_time: i16,
    pub pub_date: DateTime<Utc>,

    pub is_favorited: bool,
    pub is_in_shopping_cart: bool,

    pub author_id: Id,
    pub author_email: String,
    pub author_username: String,
    pub author_first_name: String,
    pub author_last_name: String,
    pub author_is_subscribed: bool,

    pub count: i64,
}

impl RecipeRow {
    pub fn author(&self) -> UserProfile {
        UserProfile {
            email: self.author_email.to_owned(),
            id: self.author_id,
            username: self.author_username.to_owned(),
            first_name: self.author_first_name.to_owned(),
            last_name: self.author_last_name.to_owned(),
            is_subscribed: self.author_is_subscribed,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RecipeView {
    pub id: Id,
    pub tags: Vec<Tag>,
    pub author: UserProfile,
    pub ingredients: Vec<RecipeIngredientView>,
    pub is_favorited: bool,
    pub is_in_shopping_cart: bool,
    pub name: String,
    pub image: Option<String>,
    pub text: String,
    pub cooking_time: i16,
}

/// A recipe_ingredients row joined with its ingredient.
#[derive(sqlx::FromRow, Debug, Clone)]
pub struct RecipePart {
    pub recipe_id: Id,
    pub ingredient_id: Id,
    pub name: String,
    pub measurement_unit: String,
    pub amount: i32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RecipeIngredientView {
    pub id: Id,
    pub name: String,
    pub measurement_unit: String,
    pub amount: i32,
}

impl From<RecipePart> for RecipeIngredientView {
    fn from(part: RecipePart) -> Self {
        Self {
            id: part.ingredient_id,
            name: part.name,
            measurement_unit: part.measurement_unit,
            amount: part.amount,
        }
    }
}

/// A recipe_tags row joined with its tag.
#[derive(sqlx::FromRow, Debug, Clone)]
pub struct LinkedRecipeTag {
    pub recipe_id: Id,
    pub tag_id: Id,
    pub name: String,
    pub color: String,
    pub slug: String,
}

impl From<LinkedRecipeTag> for Tag {
    fn from(tag: LinkedRecipeTag) -> Self {
        Self {
            id: tag.tag_id,
            name: tag.name,
            color: tag.color,
            slug: tag.slug,
        }
    }
}

#[derive(sqlx::FromRow, Debug, Clone, Serialize, PartialEq)]
pub struct RecipeMinified {
    pub id: Id,
    pub name: String,
    pub image: Option<String>,
    pub cooking_time: i16,
}

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct AuthorRecipe {
    pub author_id: Id,
    pub id: Id,
    pub name: String,
    pub image: Option<String>,
    pub cooking_time: i16,
}

impl From<AuthorRecipe> for RecipeMinified {
    fn from(recipe: AuthorRecipe) -> Self {
        Self {
            id: recipe.id,
            name: recipe.name,
            image: recipe.image,
            cooking_time: recipe.cooking_time,
        }
    }
}

/// An author as seen by one of their subscribers.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Subscribed {
    #[serde(flatten)]
    pub profile: UserProfile,
    pub recipes: Vec<RecipeMinified>,
    pub recipes_count: i64,
}

#[derive(sqlx::FromRow, Debug, Clone, PartialEq)]
pub struct CartPart {
    pub name: String,
    pub measurement_unit: String,
    pub amount: i32,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ShoppingListLine {
    pub name: String,
    pub measurement_unit: String,
    pub total_amount: i64,
}

// Request bodies

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RecipeIngredientInput {
    pub id: Id,
    pub amount: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecipeInput {
    pub ingredients: Vec<RecipeIngredientInput>,
    pub tags: Vec<Id>,
    pub image: Option<String>,
    pub name: String,
    pub text: String,
    pub cooking_time: i32,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RecipePatch {
    pub ingredients: Option<Vec<RecipeIngredientInput>>,
    pub tags: Option<Vec<Id>>,
    pub image: Option<String>,
    pub name: Option<String>,
    pub text: Option<String>,
    pub cooking_time: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
}

/// Returned after registration, without the password.
#[derive(sqlx::FromRow, Debug, Clone, Serialize)]
pub struct CreatedUser {
    pub email: String,
    pub id: Id,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PasswordChange {
    pub new_password: String,
    pub current_password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthToken {
    pub auth_token: String,
}
