mod database {
    pub mod actions;
    pub mod error;
    pub mod form;
    pub mod pagination;
    pub mod schema;
}
mod authentication {
    pub mod cryptography;
    pub mod jwt;
    pub mod middleware;
    pub mod permissions;
}
mod api {
    pub mod handlers;
    pub mod routes;
    pub mod server;
}
mod config;
mod constants;

pub use api::*;
pub use authentication::*;
pub use config::Config;
pub use constants::*;
pub use database::*;
pub use server::serve;
