//! Object keys and the key allocator.
//!
//! Every uploaded artifact lives under `"<state>/<namespace>/<token>/<name>"`.
//! The state segment is the only thing the sweeper ever changes, and it does
//! so by writing a new key rather than mutating the old one.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{RngCore, rngs::OsRng};
use std::fmt;
use thiserror::Error;

/// Namespace substituted for empty or reserved hints.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Number of random bytes drawn per upload token.
pub const TOKEN_BYTES: usize = 32;

/// Prefix that scopes a listing to every live object.
pub const LIVE_PREFIX: &str = "live/";

/// Lifecycle state encoded in the first key segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyState {
    Live,
    Trash,
}

impl KeyState {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyState::Live => "live",
            KeyState::Trash => "trash",
        }
    }

    fn parse(segment: &str) -> Option<Self> {
        match segment {
            "live" => Some(KeyState::Live),
            "trash" => Some(KeyState::Trash),
            _ => None,
        }
    }
}

impl fmt::Display for KeyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyParseError {
    #[error("key `{0}` does not have four segments")]
    MissingSegments(String),
    #[error("key `{0}` has an unknown state segment")]
    UnknownState(String),
    #[error("key `{0}` has an empty namespace or token")]
    EmptySegment(String),
}

/// Structured identity of a stored artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub state: KeyState,
    pub namespace: String,
    pub token: String,
    pub name: String,
}

impl ObjectKey {
    /// Allocate a fresh live key for an upload.
    ///
    /// `original_name` is kept verbatim; callers that need a filename policy
    /// apply it before allocating.
    pub fn allocate(namespace_hint: &str, original_name: &str) -> Self {
        Self {
            state: KeyState::Live,
            namespace: normalize_namespace(namespace_hint),
            token: random_token(),
            name: original_name.to_string(),
        }
    }

    /// Parse a serialized key.
    ///
    /// The name is everything after the third `/`, so names are never split
    /// even if a foreign writer put slashes in them.
    pub fn parse(raw: &str) -> Result<Self, KeyParseError> {
        let mut parts = raw.splitn(4, '/');
        let (Some(state), Some(namespace), Some(token), Some(name)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(KeyParseError::MissingSegments(raw.to_string()));
        };

        let state =
            KeyState::parse(state).ok_or_else(|| KeyParseError::UnknownState(raw.to_string()))?;
        if namespace.is_empty() || token.is_empty() {
            return Err(KeyParseError::EmptySegment(raw.to_string()));
        }

        Ok(Self {
            state,
            namespace: namespace.to_string(),
            token: token.to_string(),
            name: name.to_string(),
        })
    }

    /// Same identity in another lifecycle state.
    pub fn with_state(&self, state: KeyState) -> Self {
        Self {
            state,
            ..self.clone()
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.state, self.namespace, self.token, self.name
        )
    }
}

/// Map a caller-supplied namespace hint onto a single safe key segment.
///
/// Empty hints, the reserved `trash` label and dot-only segments become
/// [`DEFAULT_NAMESPACE`]. Slashes, backslashes and control characters are
/// replaced with `_` so the namespace stays one segment.
pub fn normalize_namespace(hint: &str) -> String {
    if matches!(hint, "" | "." | "..") || hint == KeyState::Trash.as_str() {
        return DEFAULT_NAMESPACE.to_string();
    }
    hint.chars()
        .map(|c| if c == '/' || c == '\\' || c.is_control() { '_' } else { c })
        .collect()
}

/// 32 bytes from the OS CSPRNG, URL-safe base64 without padding.
fn random_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
