//! Client-side validation of access tokens.

use std::fmt;

use crate::error::{Result, StoreError};

/// Prefixes of the token formats the store issues (classic, OAuth and
/// fine-grained personal access tokens).
pub const ACCEPTED_TOKEN_PREFIXES: [&str; 3] = ["ghp_", "gho_", "github_pat_"];

/// A bearer credential that passed format validation.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    /// Validates `raw` before it is ever sent over the network.
    pub fn parse(raw: &str) -> Result<Self> {
        let token = raw.trim();
        if token.is_empty() {
            return Err(StoreError::Validation("access token is empty".to_string()));
        }
        if !ACCEPTED_TOKEN_PREFIXES
            .iter()
            .any(|prefix| token.starts_with(prefix))
        {
            return Err(StoreError::Validation(format!(
                "invalid token format: expected a token starting with one of {}",
                ACCEPTED_TOKEN_PREFIXES.join(", ")
            )));
        }
        if token.chars().any(char::is_whitespace) {
            return Err(StoreError::Validation(
                "invalid token format: token contains whitespace".to_string(),
            ));
        }
        Ok(Self(token.to_string()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = ACCEPTED_TOKEN_PREFIXES
            .iter()
            .find(|prefix| self.0.starts_with(*prefix))
            .copied()
            .unwrap_or_default();
        write!(f, "AccessToken({prefix}****)")
    }
}
