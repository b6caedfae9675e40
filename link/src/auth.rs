//! Authentication provider for the remote store.
//!
//! Attaches credentials to prime queries (HTTP) and to the realtime
//! WebSocket handshake.

use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue, Request};

use crate::error::{LinkError, Result};

/// Header carrying the project API key.
pub const API_KEY_HEADER: &str = "apikey";

/// Authentication credentials for the remote store.
///
/// # Examples
///
/// ```rust
/// use estate_link::AuthProvider;
///
/// // Project API key (sent as `apikey` and as bearer token)
/// let auth = AuthProvider::api_key("anon-key".to_string());
///
/// // Signed-in user's JWT
/// let auth = AuthProvider::jwt_token("eyJhbGc...".to_string());
///
/// // No authentication (local development)
/// let auth = AuthProvider::none();
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthProvider {
    ApiKey(String),

    JwtToken(String),

    None,
}

impl AuthProvider {
    pub fn api_key(key: String) -> Self {
        Self::ApiKey(key)
    }

    pub fn jwt_token(token: String) -> Self {
        Self::JwtToken(token)
    }

    pub fn none() -> Self {
        Self::None
    }

    /// Attach authentication headers to an HTTP request builder
    ///
    /// - ApiKey: `apikey: <key>` and `Authorization: Bearer <key>`
    /// - JwtToken: `Authorization: Bearer <token>`
    /// - None: No headers
    pub fn apply_to_request(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder> {
        match self {
            Self::ApiKey(key) => Ok(request.header(API_KEY_HEADER, key).bearer_auth(key)),
            Self::JwtToken(token) => Ok(request.bearer_auth(token)),
            Self::None => Ok(request),
        }
    }

    /// Attach the same headers to a WebSocket handshake request.
    pub fn apply_to_ws_request<T>(&self, request: &mut Request<T>) -> Result<()> {
        let headers = request.headers_mut();
        match self {
            Self::ApiKey(key) => {
                headers.insert(API_KEY_HEADER, header_value(key)?);
                headers.insert(AUTHORIZATION, header_value(&format!("Bearer {}", key))?);
            },
            Self::JwtToken(token) => {
                headers.insert(AUTHORIZATION, header_value(&format!("Bearer {}", token))?);
            },
            Self::None => {},
        }
        Ok(())
    }

    pub fn is_authenticated(&self) -> bool {
        !matches!(self, Self::None)
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| {
        LinkError::ConfigurationError(format!("Invalid credential header value: {}", e))
    })
}
