//! Parsing of deep-link callbacks returned by an OAuth provider.
//!
//! A callback looks like
//! `extkit://oauth?provider=github&state=...&code=...`. Implicit-grant
//! providers put their parameters in the fragment instead of the query; both
//! are read, with query parameters taking precedence.

use std::collections::HashMap;

use url::{Url, form_urlencoded};

use super::store::StoredToken;
use crate::error::AuthorizationError;

/// What the provider sent back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackPayload {
    /// A ready-to-use token (implicit grant).
    Token(StoredToken),
    /// An authorization code to exchange.
    Code(String),
    /// The provider reported a failure.
    Error(String),
}

/// A parsed callback URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Callback {
    /// Provider key the callback is addressed to.
    pub provider: Option<String>,
    /// Echoed anti-forgery state.
    pub state: Option<String>,
    /// Result of the authorization step, or why it could not be read.
    pub payload: Result<CallbackPayload, AuthorizationError>,
}

impl Callback {
    /// Parse a raw deep-link URL.
    ///
    /// Fails only when `raw` is not a URL; a URL without a usable payload
    /// parses with an error payload so it can still be attributed.
    pub fn parse(raw: &str) -> Result<Self, AuthorizationError> {
        let url = Url::parse(raw.trim())
            .map_err(|e| AuthorizationError::MalformedCallback(format!("{}: {}", raw, e)))?;

        let mut params: HashMap<String, String> = HashMap::new();
        if let Some(fragment) = url.fragment() {
            params.extend(form_urlencoded::parse(fragment.as_bytes()).into_owned());
        }
        params.extend(url.query_pairs().into_owned());

        let provider = params.remove("provider").or_else(|| {
            url.path_segments()
                .and_then(|mut segs| segs.rfind(|s| !s.is_empty()))
                .map(str::to_string)
        });
        let state = params.remove("state");
        let payload = payload_from(&mut params);

        Ok(Self {
            provider,
            state,
            payload,
        })
    }
}

/// An error, a token or a code, in that order of precedence.
fn payload_from(params: &mut HashMap<String, String>) -> Result<CallbackPayload, AuthorizationError> {
    if let Some(code) = params.remove("error") {
        let message = params
            .remove("error_description")
            .filter(|d| !d.is_empty())
            .unwrap_or(code);
        return Ok(CallbackPayload::Error(message));
    }

    if let Some(access_token) = params.remove("access_token") {
        let expires_in = match params.remove("expires_in") {
            Some(v) => Some(v.parse::<u64>().map_err(|_| {
                AuthorizationError::MalformedCallback(format!("invalid expires_in: {}", v))
            })?),
            None => None,
        };
        let mut token = StoredToken::new(access_token);
        if let Some(tt) = params.remove("token_type") {
            token.token_type = tt;
        }
        token.scope = params.remove("scope");
        token.refresh_token = params.remove("refresh_token");
        token.expires_in = expires_in;
        return Ok(CallbackPayload::Token(token));
    }

    if let Some(code) = params.remove("code") {
        return Ok(CallbackPayload::Code(code));
    }

    Err(AuthorizationError::MalformedCallback(
        "callback carried neither a token nor a code".to_string(),
    ))
}
