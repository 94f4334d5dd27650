use crate::{
    authentication::{
        cryptography::{hash_password, verify_password},
        jwt::{generate_jwt_session, SessionData},
    },
    constants::{
        MAX_LEN_EMAIL, MAX_LEN_PASSWORD, MAX_LEN_PERSON_NAME, MAX_LEN_USERNAME,
        USER_COUNT_PER_PAGE,
    },
    error::{DomainError, QueryError},
    pagination::{Page, PageRequest},
    schema::{
        AuthToken, CreatedUser, Id, LoginForm, NewUser, PasswordChange, User, UserProfile,
        UserProfileRow,
    },
};

use potion::HtmlError;
use sqlx::{Pool, Postgres};

pub async fn get_user_by_id(
    user_id: Id,
    pool: &Pool<Postgres>,
) -> Result<Option<User>, potion::Error> {
    let row: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await
        .map_err(|e| QueryError::from(e).into())?;

    Ok(row)
}

pub async fn get_user_by_email(
    email: &str,
    pool: &Pool<Postgres>,
) -> Result<Option<User>, potion::Error> {
    let row: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = $1")
        .bind(email)
        .fetch_optional(pool)
        .await
        .map_err(|e| QueryError::from(e).into())?;

    Ok(row)
}

/// Letters, digits and `.@+-_` only.
pub fn validate_username(username: &str) -> Result<(), DomainError> {
    if username.is_empty() {
        return Err(DomainError::validation("username", "This field may not be blank"));
    }
    if username.chars().count() > MAX_LEN_USERNAME {
        return Err(DomainError::validation("username", "Username is too long"));
    }
    if !username
        .chars()
        .all(|c| c.is_alphanumeric() || "_.@+-".contains(c))
    {
        return Err(DomainError::validation(
            "username",
            "Username may only contain letters, digits and .@+-_",
        ));
    }
    Ok(())
}

pub fn validate_new_user(user: &NewUser) -> Result<(), DomainError> {
    validate_username(&user.username)?;

    if user.email.is_empty() || !user.email.contains('@') {
        return Err(DomainError::validation("email", "Enter a valid email address"));
    }
    if user.email.chars().count() > MAX_LEN_EMAIL {
        return Err(DomainError::validation("email", "Email is too long"));
    }

    for (field, value) in [("first_name", &user.first_name), ("last_name", &user.last_name)] {
        if value.trim().is_empty() {
            return Err(DomainError::validation(field, "This field may not be blank"));
        }
        if value.chars().count() > MAX_LEN_PERSON_NAME {
            return Err(DomainError::validation(field, "Value is too long"));
        }
    }

    validate_password(&user.password, "password")
}

fn validate_password(password: &str, field: &'static str) -> Result<(), DomainError> {
    if password.is_empty() {
        return Err(DomainError::validation(field, "This field may not be blank"));
    }
    if password.chars().count() > MAX_LEN_PASSWORD {
        return Err(DomainError::validation(field, "Password is too long"));
    }
    Ok(())
}

fn hash(password: &str) -> Result<String, potion::Error> {
    hash_password(password)
        .map_err(|_| HtmlError::InternalServerError.new("Failed to hash password"))
}

/// Creates a user with the hashed version of their password.
pub async fn register_user(
    user: NewUser,
    pool: &Pool<Postgres>,
) -> Result<CreatedUser, potion::Error> {
    validate_new_user(&user)?;

    if get_user_by_email(&user.email, pool).await?.is_some() {
        return Err(
            DomainError::validation("email", "A user with that email already exists").into(),
        );
    }

    let password = hash(&user.password)?;

    let created: Option<CreatedUser> = sqlx::query_as(
        "
        INSERT INTO users (email, username, first_name, last_name, password)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT DO NOTHING
        RETURNING email, id, username, first_name, last_name
    ",
    )
    .bind(&user.email)
    .bind(&user.username)
    .bind(&user.first_name)
    .bind(&user.last_name)
    .bind(password)
    .fetch_optional(pool)
    .await
    .map_err(|e| QueryError::from(e).into())?;

    let created = created.ok_or_else(|| {
        potion::Error::from(DomainError::validation(
            "username",
            "A user with that username already exists",
        ))
    })?;

    log::info!("Registered user {} ({})", created.username, created.id);

    Ok(created)
}

pub async fn fetch_users(
    viewer: Option<Id>,
    page: Option<i64>,
    limit: Option<i64>,
    pool: &Pool<Postgres>,
) -> Result<Page<UserProfile>, potion::Error> {
    let request = PageRequest::new(page, limit, USER_COUNT_PER_PAGE);

    let rows: Vec<UserProfileRow> = sqlx::query_as(
        "
        SELECT u.email, u.id, u.username, u.first_name, u.last_name,
            EXISTS(SELECT 1 FROM subscriptions s WHERE s.user_id = $1 AND s.author_id = u.id) AS is_subscribed,
            COUNT(*) OVER() AS count
        FROM users u
        ORDER BY u.id
        LIMIT $2 OFFSET $3
    ",
    )
    .bind(viewer)
    .bind(request.limit)
    .bind(request.offset())
    .fetch_all(pool)
    .await
    .map_err(|e| QueryError::from(e).into())?;

    let count = match rows.first() {
        Some(row) => row.count,
        None => {
            let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
                .fetch_one(pool)
                .await
                .map_err(|e| QueryError::from(e).into())?;
            return Ok(Page::no_rows(total.0, request));
        }
    };

    let results = rows.into_iter().map(UserProfile::from).collect();

    Ok(Page::from_rows(results, count, request))
}

pub async fn get_user_profile(
    user_id: Id,
    viewer: Option<Id>,
    pool: &Pool<Postgres>,
) -> Result<UserProfile, potion::Error> {
    let row: Option<UserProfile> = sqlx::query_as(
        "
        SELECT u.email, u.id, u.username, u.first_name, u.last_name,
            EXISTS(SELECT 1 FROM subscriptions s WHERE s.user_id = $2 AND s.author_id = u.id) AS is_subscribed
        FROM users u
        WHERE u.id = $1
    ",
    )
    .bind(user_id)
    .bind(viewer)
    .fetch_optional(pool)
    .await
    .map_err(|e| QueryError::from(e).into())?;

    row.ok_or_else(|| DomainError::not_found("User not found").into())
}

pub async fn set_password(
    change: PasswordChange,
    session: &SessionData,
    pool: &Pool<Postgres>,
) -> Result<(), potion::Error> {
    validate_password(&change.new_password, "new_password")?;

    let user = get_user_by_id(session.user_id, pool)
        .await?
        .ok_or_else(|| potion::Error::from(DomainError::not_found("User not found")))?;

    let authenticated = verify_password(&change.current_password, &user.password)
        .map_err(|_| HtmlError::InternalServerError.new("Stored password hash is invalid"))?;
    if !authenticated {
        return Err(DomainError::validation("current_password", "Wrong password").into());
    }

    let password = hash(&change.new_password)?;

    sqlx::query("UPDATE users SET password = $1 WHERE id = $2")
        .bind(password)
        .bind(user.id)
        .execute(pool)
        .await
        .map_err(|e| QueryError::from(e).into())?;

    log::info!("User {} changed their password", user.id);

    Ok(())
}

pub async fn login_user(
    form: LoginForm,
    secret: &[u8],
    pool: &Pool<Postgres>,
) -> Result<AuthToken, potion::Error> {
    let invalid = || HtmlError::InvalidRequest.new("Invalid credentials");

    let user = get_user_by_email(&form.email, pool).await?.ok_or_else(invalid)?;

    let authenticated = verify_password(&form.password, &user.password).map_err(|_| invalid())?;
    if !authenticated {
        return Err(invalid());
    }

    Ok(AuthToken {
        auth_token: generate_jwt_session(&user, secret)?,
    })
}
