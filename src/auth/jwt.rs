use std::time::Duration;

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{config::JwtConfig, error::AppError, state::AppState, user::repo::User};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: usize,
    pub iat: usize,
    pub iss: String,
    pub aud: String,
}

#[derive(Clone)]
pub struct JwtKeys {
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
    pub issuer: String,
    pub audience: String,
    pub ttl: Duration,
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        Self::new(&state.config.jwt)
    }
}

impl JwtKeys {
    pub fn new(config: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.secret.as_bytes()),
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            ttl: Duration::from_secs((config.ttl_minutes.max(1) as u64) * 60),
        }
    }

    pub fn sign(&self, user_id: Uuid) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();
        let exp = now + TimeDuration::seconds(self.ttl.as_secs() as i64);
        let claims = Claims {
            sub: user_id,
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = encode(&Header::default(), &claims, &self.encoding)?;
        debug!(user_id = %user_id, "jwt signed");
        Ok(token)
    }

    pub fn verify(&self, token: &str) -> anyhow::Result<Claims> {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        debug!(user_id = %data.claims.sub, "jwt verified");
        Ok(data.claims)
    }
}

/// The authenticated caller. Rejects with 401 unless the request carries
/// `Authorization: Token <jwt>` (or `Bearer <jwt>`) with a valid token whose
/// user still exists and is active.
pub struct AuthUser(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
    PgPool: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                AppError::Unauthorized("Authentication credentials were not provided.".into())
            })?;

        let token = header
            .strip_prefix("Token ")
            .or_else(|| header.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::Unauthorized("Invalid Authorization header.".into()))?;

        let claims = JwtKeys::from_ref(state).verify(token).map_err(|e| {
            warn!(error = %e, "invalid or expired token");
            AppError::Unauthorized("Invalid token.".into())
        })?;

        let db = PgPool::from_ref(state);
        match User::active_flag(&db, claims.sub).await? {
            Some(true) => Ok(AuthUser(claims.sub)),
            _ => {
                warn!(user_id = %claims.sub, "token for inactive or deleted user");
                Err(AppError::Unauthorized("User inactive or deleted.".into()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::create_user;
    use axum::http::Request;

    fn make_keys() -> JwtKeys {
        JwtKeys::new(&JwtConfig {
            secret: "test".into(),
            issuer: "test-issuer".into(),
            audience: "test-aud".into(),
            ttl_minutes: 5,
        })
    }

    async fn extract(state: &AppState, header: Option<&str>) -> Result<AuthUser, AppError> {
        let mut req = Request::builder().uri("/");
        if let Some(h) = header {
            req = req.header("authorization", h);
        }
        let (mut parts, _) = req.body(()).unwrap().into_parts();
        AuthUser::from_request_parts(&mut parts, state).await
    }

    #[test]
    fn sign_and_verify_token() {
        let keys = make_keys();
        let user_id = Uuid::new_v4();
        let token = keys.sign(user_id).expect("sign");
        let claims = keys.verify(&token).expect("verify token");
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.iss, "test-issuer");
        assert_eq!(claims.aud, "test-aud");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn verify_rejects_wrong_issuer_or_audience() {
        let good = make_keys();
        let mut bad = make_keys();
        bad.issuer = "other-iss".into();
        bad.audience = "other-aud".into();
        let token = good.sign(Uuid::new_v4()).expect("sign");
        assert!(bad.verify(&token).is_err());
    }

    #[test]
    fn verify_rejects_tampered_token() {
        let keys = make_keys();
        let mut token = keys.sign(Uuid::new_v4()).expect("sign");
        token.push('x');
        assert!(keys.verify(&token).is_err());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn extractor_accepts_token_and_bearer_schemes(pool: PgPool) {
        let state = AppState::with_pool(pool);
        let user = create_user(&state.db, "auth@example.com").await;
        let token = JwtKeys::from_ref(&state).sign(user.id).unwrap();

        let AuthUser(a) = extract(&state, Some(&format!("Token {token}"))).await.unwrap();
        let AuthUser(b) = extract(&state, Some(&format!("Bearer {token}"))).await.unwrap();
        assert_eq!(a, user.id);
        assert_eq!(b, user.id);
    }

    #[tokio::test]
    async fn extractor_rejects_missing_or_bad_credentials() {
        let state = AppState::fake();
        for header in [None, Some("Basic abc"), Some("Token "), Some("Token nope")] {
            let err = extract(&state, header).await.err().expect("should reject");
            assert!(matches!(err, AppError::Unauthorized(_)), "{header:?}");
        }
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn extractor_rejects_inactive_user(pool: PgPool) {
        let state = AppState::with_pool(pool);
        let user = create_user(&state.db, "inactive@example.com").await;
        let token = JwtKeys::from_ref(&state).sign(user.id).unwrap();
        sqlx::query("UPDATE users SET is_active = FALSE WHERE id = $1")
            .bind(user.id)
            .execute(&state.db)
            .await
            .unwrap();

        let err = extract(&state, Some(&format!("Token {token}"))).await.err();
        assert!(matches!(err, Some(AppError::Unauthorized(_))));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn extractor_rejects_deleted_user(pool: PgPool) {
        let state = AppState::with_pool(pool);
        let user = create_user(&state.db, "gone@example.com").await;
        let token = JwtKeys::from_ref(&state).sign(user.id).unwrap();
        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user.id)
            .execute(&state.db)
            .await
            .unwrap();

        let err = extract(&state, Some(&format!("Token {token}"))).await.err();
        assert!(matches!(err, Some(AppError::Unauthorized(_))));
    }
}
