//! Bearer token validation against a static allow-list.

use std::collections::HashSet;

use netsqlite_types::BEARER_PREFIX;

/// Checks tokens against the configured allow-list.
///
/// Immutable after construction, so it is shared freely between the RPC
/// middleware and raw-protocol sessions.
#[derive(Debug, Clone, Default)]
pub struct TokenValidator {
    tokens: HashSet<String>,
}

impl TokenValidator {
    /// Builds a validator from the configured tokens. Empty entries are
    /// dropped, so an empty token can never validate.
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens
                .into_iter()
                .map(Into::into)
                .filter(|t: &String| !t.is_empty())
                .collect(),
        }
    }

    /// Returns `true` if `token` is on the allow-list.
    pub fn validate(&self, token: &str) -> bool {
        !token.is_empty() && self.tokens.contains(token)
    }

    /// Validates an `authorization` header value: `Bearer <token>` or a bare
    /// token.
    pub fn validate_header(&self, value: &str) -> bool {
        let token = value.strip_prefix(BEARER_PREFIX).unwrap_or(value).trim();
        self.validate(token)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Shortens a token for log output. Only the first four characters are
/// ever shown.
pub fn redact(token: &str) -> String {
    let prefix: String = token.chars().take(4).collect();
    format!("{prefix}…")
}
