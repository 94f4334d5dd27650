use std::sync::Arc;

use warp::{
    reject::{self, Rejection},
    Filter,
};

use super::jwt::{verify_jwt_session, SessionData};

#[derive(Debug)]
pub struct Unauthorized;

impl reject::Reject for Unauthorized {}

/// Accepts `Token <jwt>` as well as `Bearer <jwt>`.
pub fn parse_authorization(header: &str) -> Option<&str> {
    let header = header.trim();
    header
        .strip_prefix("Token ")
        .or_else(|| header.strip_prefix("Bearer "))
        .map(|token| token.trim())
        .filter(|token| !token.is_empty())
}

fn session_from_header(header: Option<String>, secret: &[u8]) -> Option<SessionData> {
    let header = header?;
    let token = parse_authorization(&header)?;

    verify_jwt_session(token, secret).ok().map(|data| data.into())
}

pub fn with_session(
    secret: Arc<[u8]>,
) -> impl Filter<Extract = (SessionData,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization").and_then(move |header: Option<String>| {
        let secret = secret.clone();
        async move {
            match session_from_header(header, &secret) {
                Some(session) => Ok(session),
                None => Err(warp::reject::custom(Unauthorized)),
            }
        }
    })
}

pub fn with_possible_session(
    secret: Arc<[u8]>,
) -> impl Filter<Extract = (Option<SessionData>,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization")
        .map(move |header: Option<String>| session_from_header(header, &secret))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_and_bearer_schemes() {
        assert_eq!(parse_authorization("Token abc.def"), Some("abc.def"));
        assert_eq!(parse_authorization("Bearer abc.def"), Some("abc.def"));
        assert_eq!(parse_authorization("Basic dXNlcg=="), None);
        assert_eq!(parse_authorization("Token "), None);
    }
}
