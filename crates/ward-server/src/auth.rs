use std::collections::HashMap;

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use tracing::debug;

use ward_core::ids::UserId;

use crate::error::ApiError;
use crate::server::AppState;

/// Static bearer-token to user mapping. Session issuance lives elsewhere.
#[derive(Clone, Debug, Default)]
pub struct TokenTable {
    tokens: HashMap<String, UserId>,
}

impl TokenTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, token: impl Into<String>, user: UserId) {
        self.tokens.insert(token.into(), user);
    }

    /// Parse `token=user_id,token2=user_id2`. Whitespace around entries is
    /// ignored; empty entries are skipped.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let mut table = Self::new();
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (token, user) = entry
                .split_once('=')
                .ok_or_else(|| format!("token entry without '=': {entry}"))?;
            let (token, user) = (token.trim(), user.trim());
            if token.is_empty() || user.is_empty() {
                return Err(format!("token entry with empty side: {entry}"));
            }
            table.insert(token, UserId::from_raw(user));
        }
        Ok(table)
    }

    pub fn resolve(&self, token: &str) -> Option<UserId> {
        self.tokens.get(token).cloned()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// The authenticated caller, from `Authorization: Bearer <token>`.
#[derive(Clone, Debug)]
pub struct Principal(pub UserId);

impl FromRequestParts<AppState> for Principal {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .ok_or(ApiError::Unauthorized)?;
        match state.tokens.resolve(token) {
            Some(user) => Ok(Self(user)),
            None => {
                debug!("unknown bearer token");
                Err(ApiError::Unauthorized)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_token_table() {
        let table = TokenTable::parse(" t1=user_a , t2=user_b,,").unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.resolve("t1").unwrap().as_str(), "user_a");
        assert_eq!(table.resolve("t2").unwrap().as_str(), "user_b");
        assert!(table.resolve("t3").is_none());
    }

    #[test]
    fn parse_rejects_malformed_entries() {
        assert!(TokenTable::parse("no_equals").is_err());
        assert!(TokenTable::parse("=user").is_err());
        assert!(TokenTable::parse("tok=").is_err());
        assert!(TokenTable::parse("").unwrap().is_empty());
    }
}
