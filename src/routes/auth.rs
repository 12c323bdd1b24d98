use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    services::Engine,
};

use super::AppState;

/// Header carrying the caller's user id
pub const USER_ID_HEADER: &str = "x-user-id";

/// How strictly a route needs a caller identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRequirement {
    None,
    Optional,
    Required,
}

impl AuthRequirement {
    /// Resolves the caller from the request headers
    ///
    /// A header that is present must hold the UUID of a known user, even when
    /// identity is only optional.
    pub async fn resolve(self, headers: &HeaderMap, engine: &Engine) -> AppResult<Option<Uuid>> {
        if self == AuthRequirement::None {
            return Ok(None);
        }

        let Some(raw) = headers.get(USER_ID_HEADER) else {
            return match self {
                AuthRequirement::Required => Err(AppError::Unauthorized),
                _ => Ok(None),
            };
        };

        let raw = raw
            .to_str()
            .map_err(|_| AppError::InvalidUser("non-ascii user id".to_string()))?;
        let user_id =
            Uuid::parse_str(raw.trim()).map_err(|_| AppError::InvalidUser(raw.to_string()))?;

        if !engine.user_exists(user_id).await? {
            return Err(AppError::InvalidUser(user_id.to_string()));
        }
        Ok(Some(user_id))
    }
}

/// Extractor for routes that require a signed-in user
pub struct RequiredUser(pub Uuid);

/// Extractor for routes that personalise when a user is present
pub struct OptionalUser(pub Option<Uuid>);

#[async_trait]
impl FromRequestParts<AppState> for RequiredUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        AuthRequirement::Required
            .resolve(&parts.headers, &state.engine)
            .await?
            .map(RequiredUser)
            .ok_or(AppError::Unauthorized)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for OptionalUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user = AuthRequirement::Optional
            .resolve(&parts.headers, &state.engine)
            .await?;
        Ok(OptionalUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Stores;
    use crate::services::EngineConfig;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[tokio::test]
    async fn test_required_without_header_is_unauthorized() {
        let (engine, _handle) = Engine::new(EngineConfig::default(), Stores::in_memory());
        let result = AuthRequirement::Required
            .resolve(&HeaderMap::new(), &engine)
            .await;
        assert!(matches!(result, Err(AppError::Unauthorized)));
    }

    #[tokio::test]
    async fn test_optional_without_header_is_anonymous() {
        let (engine, _handle) = Engine::new(EngineConfig::default(), Stores::in_memory());
        let result = AuthRequirement::Optional
            .resolve(&HeaderMap::new(), &engine)
            .await
            .unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_malformed_and_unknown_ids_are_invalid() {
        let (engine, _handle) = Engine::new(EngineConfig::default(), Stores::in_memory());

        let malformed = AuthRequirement::Optional
            .resolve(&headers("not-a-uuid"), &engine)
            .await;
        assert!(matches!(malformed, Err(AppError::InvalidUser(_))));

        let unknown = AuthRequirement::Required
            .resolve(&headers(&Uuid::new_v4().to_string()), &engine)
            .await;
        assert!(matches!(unknown, Err(AppError::InvalidUser(_))));
    }

    #[tokio::test]
    async fn test_none_ignores_header() {
        let (engine, _handle) = Engine::new(EngineConfig::default(), Stores::in_memory());
        let result = AuthRequirement::None
            .resolve(&headers("garbage"), &engine)
            .await
            .unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_registered_user_resolves() {
        let (engine, _handle) = Engine::new(EngineConfig::default(), Stores::in_memory());
        let user = Uuid::new_v4();
        engine.register_user(user).await.unwrap();

        let result = AuthRequirement::Required
            .resolve(&headers(&user.to_string()), &engine)
            .await
            .unwrap();
        assert_eq!(result, Some(user));
    }
}
