use crate::common::response::ApiError;
use crate::state::AppState;
use axum::{
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const ADMIN_ROLE: &str = "ADMIN";

/// Claims issued by the account service.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TokenClaims {
    pub sub: Uuid,
    pub role: String,
    pub exp: usize,
    pub iat: usize,
}

/// Identity of the caller as far as the pipeline cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requester {
    pub user_id: Uuid,
    pub is_admin: bool,
}

impl From<&TokenClaims> for Requester {
    fn from(claims: &TokenClaims) -> Self {
        Self {
            user_id: claims.sub,
            is_admin: claims.role.eq_ignore_ascii_case(ADMIN_ROLE),
        }
    }
}

fn bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

pub fn decode_claims(token: &str, secret: &str) -> Result<TokenClaims, jsonwebtoken::errors::Error> {
    decode::<TokenClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(&req).ok_or_else(|| {
        ApiError(
            "Unauthorized: Missing or invalid token".to_string(),
            StatusCode::UNAUTHORIZED,
        )
    })?;

    let claims = decode_claims(token, &state.config.jwt_secret).map_err(|_| {
        ApiError(
            "Unauthorized: Invalid token signature".to_string(),
            StatusCode::UNAUTHORIZED,
        )
    })?;

    let requester = Requester::from(&claims);
    req.extensions_mut().insert(claims);
    req.extensions_mut().insert(requester);

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};

    fn token(role: &str, secret: &str) -> (Uuid, String) {
        let sub = Uuid::new_v4();
        let now = time::OffsetDateTime::now_utc().unix_timestamp() as usize;
        let claims = TokenClaims {
            sub,
            role: role.to_string(),
            exp: now + 600,
            iat: now,
        };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap();
        (sub, token)
    }

    #[test]
    fn test_decode_valid_token() {
        let (sub, token) = token("ADMIN", "secret");
        let claims = decode_claims(&token, "secret").unwrap();
        let requester = Requester::from(&claims);
        assert_eq!(requester.user_id, sub);
        assert!(requester.is_admin);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let (_, token) = token("USER", "secret");
        assert!(decode_claims(&token, "other").is_err());
    }

    #[test]
    fn test_non_admin_role() {
        let (_, token) = token("USER", "secret");
        let claims = decode_claims(&token, "secret").unwrap();
        assert!(!Requester::from(&claims).is_admin);
    }
}
