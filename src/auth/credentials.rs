//! Redacted secrets and the access/refresh credential pair.

// self
use crate::_prelude::*;

/// Token string that never appears in `Debug` or `Display` output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);
impl Secret {
	/// Wraps a new secret string.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Returns the inner token value. Callers must avoid logging this string.
	pub fn expose(&self) -> &str {
		&self.0
	}

	/// Formats the value as an `Authorization` header.
	pub fn bearer(&self) -> String {
		format!("Bearer {}", self.0)
	}

	/// Whether the secret is an empty string.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}
impl From<&str> for Secret {
	fn from(value: &str) -> Self {
		Self::new(value)
	}
}
impl From<String> for Secret {
	fn from(value: String) -> Self {
		Self(value)
	}
}
impl Debug for Secret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("Secret(<redacted>)")
	}
}
impl Display for Secret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("<redacted>")
	}
}

/// Access/refresh token pair held by a [`TokenManager`](crate::auth::TokenManager).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CredentialPair {
	/// Bearer token attached to outbound calls.
	pub access_token: Option<Secret>,
	/// Token exchanged at the refresh endpoint for a new access token.
	pub refresh_token: Option<Secret>,
}
impl CredentialPair {
	/// Creates a pair from optional parts, dropping empty strings.
	pub fn new(access_token: Option<Secret>, refresh_token: Option<Secret>) -> Self {
		Self {
			access_token: access_token.filter(|secret| !secret.is_empty()),
			refresh_token: refresh_token.filter(|secret| !secret.is_empty()),
		}
	}

	/// Whether neither token is held.
	pub fn is_empty(&self) -> bool {
		self.access_token.is_none() && self.refresh_token.is_none()
	}
}

/// Storage keys the credential pair is persisted under.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialKeys {
	/// Key holding the access token.
	pub access_token: String,
	/// Key holding the refresh token.
	pub refresh_token: String,
}
impl Default for CredentialKeys {
	fn default() -> Self {
		Self { access_token: "auth_token".into(), refresh_token: "refresh_token".into() }
	}
}
