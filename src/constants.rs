pub const RECIPE_COUNT_PER_PAGE: i64 = 6;
pub const USER_COUNT_PER_PAGE: i64 = 6;
pub const MAX_PAGE_SIZE: i64 = 100;

pub const MAX_LEN_NAME: usize = 200;
pub const MAX_LEN_USERNAME: usize = 150;
pub const MAX_LEN_EMAIL: usize = 254;
pub const MAX_LEN_PASSWORD: usize = 150;
pub const MAX_LEN_PERSON_NAME: usize = 150;

pub const MIN_COOKING_TIME: i32 = 1;
pub const MIN_INGREDIENT_AMOUNT: i32 = 1;

pub const SESSION_LIFETIME_HOURS: i64 = 24;

pub const SHOPPING_LIST_FILENAME: &str = "shopping_cart.txt";

/// Accepted spellings of the boolean recipe filters.
pub const TRUTHY: &[&str] = &["1", "true", "True"];
pub const FALSY: &[&str] = &["0", "false", "False"];
