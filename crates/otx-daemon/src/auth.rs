//! Request authentication.
//!
//! Production: `Authorization: Bearer <JWT>` validated against the
//! configured secret; the subject claim is the user id. Outside
//! production an `X-Test-Mode-User: <UUID>` header may impersonate a
//! user; that header is refused when `APP_ENV=production`. Cron task
//! endpoints use the shared-secret header instead of user auth.

use axum::http::HeaderMap;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::api_types::ApiError;
use crate::state::AppState;

pub const CRON_SECRET_HEADER: &str = "x-cron-secret";
pub const TEST_MODE_HEADER: &str = "x-test-mode-user";

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: usize,
}

/// Validate the cron shared secret. Mismatch or absence → 401.
pub fn require_cron_secret(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let presented = headers
        .get(CRON_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if presented.is_empty() || presented != state.cron_secret {
        warn!("cron request rejected: bad or missing shared secret");
        return Err(ApiError::AuthFailed);
    }
    Ok(())
}

/// Resolve the requesting user.
pub fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Uuid, ApiError> {
    if let Some(value) = headers.get(axum::http::header::AUTHORIZATION) {
        let raw = value.to_str().map_err(|_| ApiError::AuthFailed)?;
        let token = raw.strip_prefix("Bearer ").ok_or(ApiError::AuthFailed)?;
        let decoded = decode::<Claims>(
            token,
            &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| ApiError::AuthFailed)?;
        return Uuid::parse_str(&decoded.claims.sub).map_err(|_| ApiError::AuthFailed);
    }

    if let Some(value) = headers.get(TEST_MODE_HEADER) {
        if state.app_env.is_production() {
            warn!("test-mode impersonation header refused in production");
            return Err(ApiError::AuthFailed);
        }
        let raw = value.to_str().map_err(|_| ApiError::AuthFailed)?;
        return Uuid::parse_str(raw).map_err(|_| ApiError::AuthFailed);
    }

    Err(ApiError::AuthFailed)
}

/// Mint a token for the given subject. The production identity provider
/// is external; this exists for operator tooling and in-process tests.
pub fn issue_token(jwt_secret: &str, user_id: Uuid, ttl_secs: i64) -> Option<String> {
    let exp = (chrono::Utc::now() + chrono::Duration::seconds(ttl_secs)).timestamp();
    let claims = Claims {
        sub: user_id.to_string(),
        exp: exp.max(0) as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(jwt_secret.as_bytes()),
    )
    .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AppState;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(
                axum::http::HeaderName::from_bytes(k.as_bytes()).unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        map
    }

    #[test]
    fn cron_secret_must_match() {
        let (state, _, _) = AppState::for_tests();
        assert!(require_cron_secret(&state, &headers(&[(CRON_SECRET_HEADER, "test-cron-secret")])).is_ok());
        assert!(require_cron_secret(&state, &headers(&[(CRON_SECRET_HEADER, "wrong")])).is_err());
        assert!(require_cron_secret(&state, &headers(&[])).is_err());
    }

    #[test]
    fn bearer_token_resolves_subject() {
        let (state, _, _) = AppState::for_tests();
        let user = Uuid::new_v4();
        let token = issue_token(&state.jwt_secret, user, 3600).unwrap();
        let map = headers(&[("authorization", &format!("Bearer {token}"))]);
        assert_eq!(authenticate(&state, &map).unwrap(), user);
    }

    #[test]
    fn garbage_token_rejected() {
        let (state, _, _) = AppState::for_tests();
        let map = headers(&[("authorization", "Bearer not.a.jwt")]);
        assert!(authenticate(&state, &map).is_err());
    }

    #[test]
    fn wrong_secret_rejected() {
        let (state, _, _) = AppState::for_tests();
        let user = Uuid::new_v4();
        let token = issue_token("some-other-secret", user, 3600).unwrap();
        let map = headers(&[("authorization", &format!("Bearer {token}"))]);
        assert!(authenticate(&state, &map).is_err());
    }

    #[test]
    fn expired_token_rejected() {
        let (state, _, _) = AppState::for_tests();
        let user = Uuid::new_v4();
        let token = issue_token(&state.jwt_secret, user, -3600).unwrap();
        let map = headers(&[("authorization", &format!("Bearer {token}"))]);
        assert!(authenticate(&state, &map).is_err());
    }

    #[test]
    fn test_mode_header_works_outside_production() {
        let (state, _, _) = AppState::for_tests();
        let user = Uuid::new_v4();
        let map = headers(&[(TEST_MODE_HEADER, &user.to_string())]);
        assert_eq!(authenticate(&state, &map).unwrap(), user);
    }

    #[test]
    fn test_mode_header_refused_in_production() {
        let (mut state, _, _) = AppState::for_tests();
        state.app_env = otx_config::AppEnv::Production;
        let user = Uuid::new_v4();
        let map = headers(&[(TEST_MODE_HEADER, &user.to_string())]);
        assert!(authenticate(&state, &map).is_err());
    }
}
