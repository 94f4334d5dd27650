use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use warp::Filter;

use super::{handlers::AppState, routes::routes};
use crate::{config::Config, error::QueryError};

/// Connects to the database, applies pending migrations and serves the API until shutdown.
pub async fn serve(config: Config) -> Result<(), potion::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .map_err(|e| QueryError::from(e).into())?;

    sqlx::migrate!()
        .run(&pool)
        .await
        .map_err(|e| QueryError::from(sqlx::Error::from(e)).into())?;

    let state = AppState {
        pool,
        secret: Arc::from(config.jwt_secret.as_slice()),
    };

    log::info!("Listening on {}", config.bind_address);

    warp::serve(routes(state).with(warp::log("foodgram::api")))
        .run(config.bind_address)
        .await;

    Ok(())
}
