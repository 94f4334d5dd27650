use chrono::Duration;
use chrono::Local;
use hmac::{Hmac, Mac};
use jwt::SignWithKey;
use jwt::VerifyWithKey;
use potion::HtmlError;
use serde::Deserialize;
use serde::Serialize;
use sha2::Sha256;

use crate::constants::SESSION_LIFETIME_HOURS;
use crate::database::schema::User;
use crate::schema::UserRole;

use super::permissions::ActionType;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JwtSessionData {
    pub user_id: i32,
    pub username: String,
    pub role: UserRole,
    iat: i64,
    exp: i64,
}

impl JwtSessionData {
    pub fn new(id: i32, username: String, role: UserRole) -> Self {
        let now = Local::now();
        let iat = now.timestamp();
        let exp = (now + Duration::hours(SESSION_LIFETIME_HOURS)).timestamp();

        Self {
            user_id: id,
            username,
            role,
            iat,
            exp,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionData {
    pub user_id: i32,
    pub username: String,
    pub role: UserRole,
    pub is_admin: bool,
}

impl SessionData {
    pub fn authenticate(&self, action: ActionType) -> Result<(), potion::Error> {
        if !action.authenticate(&self) {
            return Err(
                HtmlError::Unauthorized.new("You don't have permission to perform this action")
            );
        }
        Ok(())
    }
}

impl Into<SessionData> for JwtSessionData {
    fn into(self) -> SessionData {
        SessionData {
            username: self.username,
            user_id: self.user_id,
            is_admin: self.role == UserRole::Admin,
            role: self.role,
        }
    }
}

fn signing_key(secret: &[u8]) -> Result<Hmac<Sha256>, potion::Error> {
    Hmac::new_from_slice(secret)
        .map_err(|_| HtmlError::InternalServerError.new("Invalid session signing key"))
}

fn sign_claims(claims: &JwtSessionData, secret: &[u8]) -> Result<String, potion::Error> {
    let key = signing_key(secret)?;

    claims
        .sign_with_key(&key)
        .map_err(|_| HtmlError::InternalServerError.new("Failed to sign session"))
}

pub fn generate_jwt_session(user: &User, secret: &[u8]) -> Result<String, potion::Error> {
    let claims = JwtSessionData::new(user.id, user.username.to_owned(), user.role.to_owned());

    sign_claims(&claims, secret)
}

pub fn verify_jwt_session(token: &str, secret: &[u8]) -> Result<JwtSessionData, potion::Error> {
    let key = signing_key(secret)?;

    token
        .verify_with_key(&key)
        .map_err(|_| HtmlError::InvalidSession.new("Invalid Session; Invalid token"))
        .map(|session: JwtSessionData| {
            let now = Local::now().timestamp();

            if (session.exp - now).is_negative() {
                return Err(HtmlError::InvalidSession.new("Invalid session; Token expired"));
            }
            return Ok(session);
        })?
}
