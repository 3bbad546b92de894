// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Scopes granted by a bearer token, read from the unverified JWT payload.

use crate::error::TokenError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use std::collections::BTreeSet;

/// Scopes and app roles carried by one token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenScopes {
    pub scopes: BTreeSet<String>,
    pub roles: BTreeSet<String>,
}

impl TokenScopes {
    /// Delegated scopes and app roles together.
    pub fn all(&self) -> BTreeSet<String> {
        self.scopes.union(&self.roles).cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty() && self.roles.is_empty()
    }
}

/// Extract scopes from an `Authorization` header value.
pub fn scopes_from_authorization(header: Option<&str>) -> Result<TokenScopes, TokenError> {
    let header = header.map(str::trim).filter(|h| !h.is_empty()).ok_or(TokenError::Missing)?;
    let (scheme, token) = header.split_once(' ').ok_or(TokenError::NotBearer)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(TokenError::NotBearer);
    }
    scopes_from_jwt(token.trim())
}

/// Extract scopes from a raw JWT. The signature is not checked.
pub fn scopes_from_jwt(token: &str) -> Result<TokenScopes, TokenError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(TokenError::Malformed(format!(
            "expected 3 segments, found {}",
            parts.len()
        )));
    }

    // some issuers pad the payload anyway
    let payload = parts[1].trim_end_matches('=');
    let decoded = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| TokenError::Malformed(format!("payload is not base64url: {e}")))?;
    let claims: serde_json::Value = serde_json::from_slice(&decoded)
        .map_err(|e| TokenError::Malformed(format!("payload is not JSON: {e}")))?;

    let scope_claim = claims
        .get("scp")
        .or_else(|| claims.get("scope"))
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    let scopes = scope_claim.split_whitespace().map(String::from).collect();

    let roles = claims
        .get("roles")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|r| r.as_str())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    Ok(TokenScopes { scopes, roles })
}

/// Like [`scopes_from_authorization`] but degrades to an empty set.
pub fn scopes_or_empty(header: Option<&str>) -> TokenScopes {
    match scopes_from_authorization(header) {
        Ok(scopes) => scopes,
        Err(e) => {
            tracing::debug!(error = %e, "no usable token scopes");
            TokenScopes::default()
        }
    }
}
