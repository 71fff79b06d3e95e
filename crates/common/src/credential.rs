//! API credential with a log-safe identifier

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::Secret;

/// Number of trailing characters kept in the log-safe id.
const ID_SUFFIX_LEN: usize = 4;

/// One API key for the generative service.
///
/// Cheap to clone (the secret is shared behind an `Arc`). Equality and
/// hashing use the exact secret value, so two credentials built from the same
/// string are the same credential. `id()` is the only form that may be logged.
#[derive(Clone)]
pub struct Credential {
    secret: Arc<Secret<String>>,
    id: String,
}

impl Credential {
    pub fn new(value: impl Into<String>) -> Self {
        let value: String = value.into();
        let id = safe_id(&value);
        Self {
            secret: Arc::new(Secret::new(value)),
            id,
        }
    }

    /// Log-safe identifier: `...` followed by the last four characters.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Raw key value for the outgoing request.
    pub fn expose(&self) -> &str {
        self.secret.expose_str()
    }
}

fn safe_id(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    let start = chars.len().saturating_sub(ID_SUFFIX_LEN);
    let suffix: String = chars[start..].iter().collect();
    format!("...{suffix}")
}

impl PartialEq for Credential {
    fn eq(&self, other: &Self) -> bool {
        self.expose() == other.expose()
    }
}

impl Eq for Credential {}

impl Hash for Credential {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.expose().hash(state);
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Credential").field(&self.id).finish()
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}
