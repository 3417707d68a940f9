use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A caller's permission class, as named by the upstream auth layer.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(pub String);

impl Role {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Geography a request is scoped to, resolved against the policy's sentinel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Region {
    Unrestricted,
    Named(String),
}

impl Region {
    pub fn resolve(raw: &str, unrestricted_sentinel: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case(unrestricted_sentinel.trim()) {
            Self::Unrestricted
        } else {
            Self::Named(trimmed.to_string())
        }
    }

    pub fn is_unrestricted(&self) -> bool {
        matches!(self, Self::Unrestricted)
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Unrestricted => None,
            Self::Named(name) => Some(name),
        }
    }
}

/// Identity handed to the gateway by the upstream auth layer for one request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallerContext {
    pub user_id: String,
    pub role: Role,
    pub region: String,
    #[serde(default)]
    pub claims: Value,
}

impl CallerContext {
    pub fn new(user_id: impl Into<String>, role: Role, region: impl Into<String>) -> Self {
        Self { user_id: user_id.into(), role, region: region.into(), claims: Value::Null }
    }

    pub fn with_claims(mut self, claims: Value) -> Self {
        self.claims = claims;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::Region;

    #[test]
    fn sentinel_matches_case_insensitively_after_trim() {
        assert_eq!(Region::resolve("  all ", "All"), Region::Unrestricted);
        assert_eq!(Region::resolve("ALL", "All"), Region::Unrestricted);
        assert_eq!(Region::resolve(" India ", "All"), Region::Named("India".to_string()));
    }

    #[test]
    fn empty_region_is_not_unrestricted() {
        let region = Region::resolve("", "All");
        assert!(!region.is_unrestricted());
        assert_eq!(region.name(), Some(""));
    }
}
