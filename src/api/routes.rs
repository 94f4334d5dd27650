use std::convert::Infallible;

use warp::{
    filters::BoxedFilter,
    http::StatusCode,
    reply::Response,
    Filter,
};

use super::handlers::{self, respond, respond_empty, AppState};
use crate::{
    form::FormData,
    middleware::{with_possible_session, with_session},
    schema::{Id, LoginForm, NewUser, PasswordChange, RecipeInput, RecipePatch},
};

const MAX_BODY_BYTES: u64 = 1024 * 1024;

fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn with_query() -> impl Filter<Extract = (FormData,), Error = warp::Rejection> + Clone {
    warp::query::<FormData>()
}

fn json_body<T>() -> impl Filter<Extract = (T,), Error = warp::Rejection> + Clone
where
    T: serde::de::DeserializeOwned + Send,
{
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

fn users(state: AppState) -> BoxedFilter<(Response,)> {
    let session = with_session(state.secret.clone());
    let possible_session = with_possible_session(state.secret.clone());
    let state = with_state(state);

    let list = warp::path!("api" / "users")
        .and(warp::get())
        .and(with_query())
        .and(possible_session.clone())
        .and(state.clone())
        .and_then(|data, session, state| {
            respond(StatusCode::OK, handlers::list_users(data, session, state))
        });

    let create = warp::path!("api" / "users")
        .and(warp::post())
        .and(json_body::<NewUser>())
        .and(state.clone())
        .and_then(|user, state| respond(StatusCode::CREATED, handlers::create_user(user, state)));

    let me = warp::path!("api" / "users" / "me")
        .and(warp::get())
        .and(session.clone())
        .and(state.clone())
        .and_then(|session, state| respond(StatusCode::OK, handlers::current_user(session, state)));

    let set_password = warp::path!("api" / "users" / "set_password")
        .and(warp::post())
        .and(session.clone())
        .and(json_body::<PasswordChange>())
        .and(state.clone())
        .and_then(|session, change, state| {
            respond_empty(handlers::change_password(change, session, state))
        });

    let subscriptions = warp::path!("api" / "users" / "subscriptions")
        .and(warp::get())
        .and(with_query())
        .and(session.clone())
        .and(state.clone())
        .and_then(|data, session, state| {
            respond(StatusCode::OK, handlers::user_subscriptions(data, session, state))
        });

    let profile = warp::path!("api" / "users" / Id)
        .and(warp::get())
        .and(possible_session)
        .and(state.clone())
        .and_then(|id, session, state| {
            respond(StatusCode::OK, handlers::user_profile(id, session, state))
        });

    let subscribe = warp::path!("api" / "users" / Id / "subscribe")
        .and(warp::post())
        .and(with_query())
        .and(session.clone())
        .and(state.clone())
        .and_then(|id, data, session, state| {
            respond(StatusCode::CREATED, handlers::subscribe_to(id, data, session, state))
        });

    let unsubscribe = warp::path!("api" / "users" / Id / "subscribe")
        .and(warp::delete())
        .and(session)
        .and(state)
        .and_then(|id, session, state| {
            respond_empty(handlers::unsubscribe_from(id, session, state))
        });

    list.or(create)
        .unify()
        .or(me)
        .unify()
        .or(set_password)
        .unify()
        .or(subscriptions)
        .unify()
        .or(profile)
        .unify()
        .or(subscribe)
        .unify()
        .or(unsubscribe)
        .unify()
        .boxed()
}

fn auth(state: AppState) -> BoxedFilter<(Response,)> {
    let session = with_session(state.secret.clone());
    let state = with_state(state);

    let login = warp::path!("api" / "auth" / "token" / "login")
        .and(warp::post())
        .and(json_body::<LoginForm>())
        .and(state)
        .and_then(|form, state| respond(StatusCode::OK, handlers::login(form, state)));

    let logout = warp::path!("api" / "auth" / "token" / "logout")
        .and(warp::post())
        .and(session)
        .and_then(|session| respond_empty(handlers::logout(session)));

    login.or(logout).unify().boxed()
}

fn reference_data(state: AppState) -> BoxedFilter<(Response,)> {
    let state = with_state(state);

    let tags = warp::path!("api" / "tags")
        .and(warp::get())
        .and(state.clone())
        .and_then(|state| respond(StatusCode::OK, handlers::all_tags(state)));

    let tag = warp::path!("api" / "tags" / Id)
        .and(warp::get())
        .and(state.clone())
        .and_then(|id, state| respond(StatusCode::OK, handlers::tag(id, state)));

    let ingredients = warp::path!("api" / "ingredients")
        .and(warp::get())
        .and(with_query())
        .and(state.clone())
        .and_then(|data, state| respond(StatusCode::OK, handlers::search_ingredients(data, state)));

    let ingredient = warp::path!("api" / "ingredients" / Id)
        .and(warp::get())
        .and(state)
        .and_then(|id, state| respond(StatusCode::OK, handlers::ingredient(id, state)));

    tags.or(tag)
        .unify()
        .or(ingredients)
        .unify()
        .or(ingredient)
        .unify()
        .boxed()
}

fn recipes(state: AppState) -> BoxedFilter<(Response,)> {
    let session = with_session(state.secret.clone());
    let possible_session = with_possible_session(state.secret.clone());
    let state = with_state(state);

    let list = warp::path!("api" / "recipes")
        .and(warp::get())
        .and(with_query())
        .and(possible_session.clone())
        .and(state.clone())
        .and_then(|data, session, state| {
            respond(StatusCode::OK, handlers::list_recipes(data, session, state))
        });

    let create = warp::path!("api" / "recipes")
        .and(warp::post())
        .and(session.clone())
        .and(json_body::<RecipeInput>())
        .and(state.clone())
        .and_then(|session, input, state| {
            respond(StatusCode::CREATED, handlers::new_recipe(input, session, state))
        });

    let download = warp::path!("api" / "recipes" / "download_shopping_cart")
        .and(warp::get())
        .and(session.clone())
        .and(state.clone())
        .and_then(handlers::download_shopping_cart);

    let detail = warp::path!("api" / "recipes" / Id)
        .and(warp::get())
        .and(possible_session)
        .and(state.clone())
        .and_then(|id, session, state| {
            respond(StatusCode::OK, handlers::recipe(id, session, state))
        });

    let update = warp::path!("api" / "recipes" / Id)
        .and(warp::patch())
        .and(session.clone())
        .and(json_body::<RecipePatch>())
        .and(state.clone())
        .and_then(|id, session, patch, state| {
            respond(StatusCode::OK, handlers::patch_recipe(id, patch, session, state))
        });

    let delete = warp::path!("api" / "recipes" / Id)
        .and(warp::delete())
        .and(session.clone())
        .and(state.clone())
        .and_then(|id, session, state| respond_empty(handlers::remove_recipe(id, session, state)));

    let favorite = warp::path!("api" / "recipes" / Id / "favorite")
        .and(warp::post())
        .and(session.clone())
        .and(state.clone())
        .and_then(|id, session, state| {
            respond(StatusCode::CREATED, handlers::favorite(id, session, state))
        });

    let unfavorite = warp::path!("api" / "recipes" / Id / "favorite")
        .and(warp::delete())
        .and(session.clone())
        .and(state.clone())
        .and_then(|id, session, state| respond_empty(handlers::unfavorite(id, session, state)));

    let add_to_cart = warp::path!("api" / "recipes" / Id / "shopping_cart")
        .and(warp::post())
        .and(session.clone())
        .and(state.clone())
        .and_then(|id, session, state| {
            respond(StatusCode::CREATED, handlers::add_to_cart(id, session, state))
        });

    let remove_from_cart = warp::path!("api" / "recipes" / Id / "shopping_cart")
        .and(warp::delete())
        .and(session)
        .and(state)
        .and_then(|id, session, state| {
            respond_empty(handlers::remove_from_cart(id, session, state))
        });

    list.or(create)
        .unify()
        .or(download)
        .unify()
        .or(detail)
        .unify()
        .or(update)
        .unify()
        .or(delete)
        .unify()
        .or(favorite)
        .unify()
        .or(unfavorite)
        .unify()
        .or(add_to_cart)
        .unify()
        .or(remove_from_cart)
        .unify()
        .boxed()
}

/// Every `/api` route, with rejections rendered as `{"detail": ...}`.
pub fn routes(state: AppState) -> BoxedFilter<(Response,)> {
    users(state.clone())
        .or(auth(state.clone()))
        .unify()
        .or(reference_data(state.clone()))
        .unify()
        .or(recipes(state))
        .unify()
        .recover(handlers::handle_rejection)
        .unify()
        .boxed()
}
