use std::{convert::Infallible, future::Future, sync::Arc};

use serde::Serialize;
use serde_json::json;
use sqlx::{Pool, Postgres};
use warp::{
    http::{header::CONTENT_DISPOSITION, StatusCode},
    reject::Rejection,
    reply::{self, Reply, Response},
};

use crate::{
    actions::*,
    constants::{RECIPE_COUNT_PER_PAGE, SHOPPING_LIST_FILENAME},
    form::{Form, FormData},
    jwt::SessionData,
    middleware::Unauthorized,
    pagination::{Page, PageRequest},
    schema::{
        AuthToken, CreatedUser, Id, Ingredient, LoginForm, NewUser, PasswordChange, RecipeInput,
        RecipeMinified, RecipePatch, RecipeView, Subscribed, Tag, UserProfile,
    },
};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub pool: Pool<Postgres>,
    pub secret: Arc<[u8]>,
}

fn status_of(error: &potion::Error) -> StatusCode {
    u16::try_from(error.code)
        .ok()
        .and_then(|code| StatusCode::from_u16(code).ok())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

fn detail_reply(detail: &str, status: StatusCode) -> Response {
    reply::with_status(reply::json(&json!({ "detail": detail })), status).into_response()
}

pub fn error_reply(error: potion::Error) -> Response {
    let status = status_of(&error);
    if status.is_server_error() {
        log::error!("Request failed with {status}: {:?}", error.info);
    }

    let detail = error
        .info
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("Error").to_string());

    detail_reply(&detail, status)
}

pub async fn respond<T, F>(status: StatusCode, action: F) -> Result<Response, Infallible>
where
    T: Serialize,
    F: Future<Output = Result<T, potion::Error>>,
{
    Ok(match action.await {
        Ok(body) => reply::with_status(reply::json(&body), status).into_response(),
        Err(e) => error_reply(e),
    })
}

pub async fn respond_empty<F>(action: F) -> Result<Response, Infallible>
where
    F: Future<Output = Result<(), potion::Error>>,
{
    Ok(match action.await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_reply(e),
    })
}

pub async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    if err.is_not_found() {
        return Ok(detail_reply("Not found", StatusCode::NOT_FOUND));
    }
    if err.find::<Unauthorized>().is_some() {
        return Ok(detail_reply(
            "Authentication credentials were not provided",
            StatusCode::UNAUTHORIZED,
        ));
    }
    if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        return Ok(detail_reply(&e.to_string(), StatusCode::BAD_REQUEST));
    }
    if let Some(e) = err.find::<warp::reject::InvalidQuery>() {
        return Ok(detail_reply(&e.to_string(), StatusCode::BAD_REQUEST));
    }
    if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        return Ok(detail_reply(
            "Method not allowed",
            StatusCode::METHOD_NOT_ALLOWED,
        ));
    }
    if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        return Ok(detail_reply("Payload too large", StatusCode::PAYLOAD_TOO_LARGE));
    }

    log::error!("Unhandled rejection: {err:?}");
    Ok(detail_reply(
        "Internal server error",
        StatusCode::INTERNAL_SERVER_ERROR,
    ))
}

fn page_request(form: &Form, default_limit: i64) -> Result<PageRequest, potion::Error> {
    Ok(PageRequest::new(
        form.get_number("page")?,
        form.get_number("limit")?,
        default_limit,
    ))
}

fn viewer(session: &Option<SessionData>) -> Option<Id> {
    session.as_ref().map(|session| session.user_id)
}

// Users

pub async fn list_users(
    data: FormData,
    session: Option<SessionData>,
    state: AppState,
) -> Result<Page<UserProfile>, potion::Error> {
    let form = Form::from_data(data);
    let page: Option<i64> = form.get_number("page")?;
    let limit: Option<i64> = form.get_number("limit")?;

    fetch_users(viewer(&session), page, limit, &state.pool).await
}

pub async fn create_user(user: NewUser, state: AppState) -> Result<CreatedUser, potion::Error> {
    register_user(user, &state.pool).await
}

pub async fn current_user(
    session: SessionData,
    state: AppState,
) -> Result<UserProfile, potion::Error> {
    get_user_profile(session.user_id, Some(session.user_id), &state.pool).await
}

pub async fn user_profile(
    id: Id,
    session: Option<SessionData>,
    state: AppState,
) -> Result<UserProfile, potion::Error> {
    get_user_profile(id, viewer(&session), &state.pool).await
}

pub async fn change_password(
    change: PasswordChange,
    session: SessionData,
    state: AppState,
) -> Result<(), potion::Error> {
    set_password(change, &session, &state.pool).await
}

pub async fn user_subscriptions(
    data: FormData,
    session: SessionData,
    state: AppState,
) -> Result<Page<Subscribed>, potion::Error> {
    let form = Form::from_data(data);
    let page: Option<i64> = form.get_number("page")?;
    let limit: Option<i64> = form.get_number("limit")?;
    let recipes_limit = parse_recipes_limit(&form)?;

    list_subscriptions(session.user_id, page, limit, recipes_limit, &state.pool).await
}

pub async fn subscribe_to(
    id: Id,
    data: FormData,
    session: SessionData,
    state: AppState,
) -> Result<Subscribed, potion::Error> {
    let recipes_limit = parse_recipes_limit(&Form::from_data(data))?;

    subscribe(id, recipes_limit, &session, &state.pool).await
}

pub async fn unsubscribe_from(
    id: Id,
    session: SessionData,
    state: AppState,
) -> Result<(), potion::Error> {
    unsubscribe(id, &session, &state.pool).await
}

// Authentication

pub async fn login(form: LoginForm, state: AppState) -> Result<AuthToken, potion::Error> {
    login_user(form, &state.secret, &state.pool).await
}

/// Sessions are stateless tokens, so there is nothing to revoke server side.
pub async fn logout(session: SessionData) -> Result<(), potion::Error> {
    log::info!("User {} logged out", session.user_id);
    Ok(())
}

// Reference data

pub async fn all_tags(state: AppState) -> Result<Vec<Tag>, potion::Error> {
    list_tags(&state.pool).await
}

pub async fn tag(id: Id, state: AppState) -> Result<Tag, potion::Error> {
    get_tag(id, &state.pool).await
}

pub async fn search_ingredients(
    data: FormData,
    state: AppState,
) -> Result<Vec<Ingredient>, potion::Error> {
    let form = Form::from_data(data);

    list_ingredients(form.get_str("name"), &state.pool).await
}

pub async fn ingredient(id: Id, state: AppState) -> Result<Ingredient, potion::Error> {
    get_ingredient(id, &state.pool).await
}

// Recipes

pub async fn list_recipes(
    data: FormData,
    session: Option<SessionData>,
    state: AppState,
) -> Result<Page<RecipeView>, potion::Error> {
    let form = Form::from_data(data);
    let filter = RecipeFilter::from_form(&form)?;
    let page = page_request(&form, RECIPE_COUNT_PER_PAGE)?;

    fetch_recipes(&filter, viewer(&session), page, &state.pool).await
}

pub async fn recipe(
    id: Id,
    session: Option<SessionData>,
    state: AppState,
) -> Result<RecipeView, potion::Error> {
    get_recipe_view(id, viewer(&session), &state.pool).await
}

pub async fn new_recipe(
    input: RecipeInput,
    session: SessionData,
    state: AppState,
) -> Result<RecipeView, potion::Error> {
    create_recipe(input, &session, &state.pool).await
}

pub async fn patch_recipe(
    id: Id,
    patch: RecipePatch,
    session: SessionData,
    state: AppState,
) -> Result<RecipeView, potion::Error> {
    update_recipe(id, patch, &session, &state.pool).await
}

pub async fn remove_recipe(
    id: Id,
    session: SessionData,
    state: AppState,
) -> Result<(), potion::Error> {
    delete_recipe(id, &session, &state.pool).await
}

pub async fn favorite(
    id: Id,
    session: SessionData,
    state: AppState,
) -> Result<RecipeMinified, potion::Error> {
    add_to_favorites(id, &session, &state.pool).await
}

pub async fn unfavorite(
    id: Id,
    session: SessionData,
    state: AppState,
) -> Result<(), potion::Error> {
    remove_from_favorites(id, &session, &state.pool).await
}

pub async fn add_to_cart(
    id: Id,
    session: SessionData,
    state: AppState,
) -> Result<RecipeMinified, potion::Error> {
    add_to_shopping_cart(id, &session, &state.pool).await
}

pub async fn remove_from_cart(
    id: Id,
    session: SessionData,
    state: AppState,
) -> Result<(), potion::Error> {
    remove_from_shopping_cart(id, &session, &state.pool).await
}

/// The shopping list as a plain-text attachment.
pub async fn download_shopping_cart(
    session: SessionData,
    state: AppState,
) -> Result<Response, Infallible> {
    Ok(match download_shopping_list(session.user_id, &state.pool).await {
        Ok(document) => reply::with_header(
            document,
            CONTENT_DISPOSITION,
            format!("attachment; filename=\"{SHOPPING_LIST_FILENAME}\""),
        )
        .into_response(),
        Err(e) => error_reply(e),
    })
}

#[cfg(test)]
mod tests {
    use warp::hyper::body::to_bytes;

    use super::*;
    use crate::error::DomainError;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn domain_errors_keep_their_status() {
        let response = error_reply(DomainError::not_found("No such membership").into());
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            body_json(response).await,
            json!({ "detail": "No such membership" })
        );

        let response = error_reply(DomainError::validation("tags", "duplicate entries").into());
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await,
            json!({ "detail": "tags: duplicate entries" })
        );
    }

    #[tokio::test]
    async fn successful_action_uses_given_status() {
        let response = respond(StatusCode::CREATED, async { Ok(vec![1, 2]) })
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(body_json(response).await, json!([1, 2]));

        let response = respond_empty(async { Ok(()) }).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn unauthorized_rejection_is_401() {
        let response = handle_rejection(warp::reject::custom(Unauthorized))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = handle_rejection(warp::reject::not_found()).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
