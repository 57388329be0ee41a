//! Acting user, as asserted by the host application.

use std::convert::Infallible;

use axum::{extract::FromRequestParts, http::request::Parts};

/// Header carrying the acting user's name.
pub const ACTOR_HEADER: &str = "x-fieldvault-user";

/// Extractor for the acting user, recorded in the audit trail.
///
/// Authentication happens in the host; this only reads the name it passes
/// along. Requests without the header are anonymous.
///
/// ```ignore
/// async fn handler(Actor(user): Actor) -> impl IntoResponse {
///     // user: Option<String>
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Actor(pub Option<String>);

impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user = parts
            .headers
            .get(ACTOR_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        Ok(Self(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use rstest::rstest;

    #[rstest]
    #[case(Some("alice"), Some("alice"))]
    #[case(Some("  bob "), Some("bob"))]
    #[case(Some(""), None)]
    #[case(None, None)]
    #[tokio::test]
    async fn test_actor_from_header(#[case] header: Option<&str>, #[case] expected: Option<&str>) {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = header {
            builder = builder.header(ACTOR_HEADER, value);
        }
        let (mut parts, ()) = builder.body(()).unwrap().into_parts();

        let Actor(user) = Actor::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(user.as_deref(), expected);
    }
}
