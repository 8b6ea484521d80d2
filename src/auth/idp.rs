//! UUID-based identity provider.

use super::key::IdentityProvider;
use crate::Result;

/// Generates UUID v4 key identifiers.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidIdentityProvider;

impl UuidIdentityProvider {
    /// Create a provider.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl IdentityProvider for UuidIdentityProvider {
    fn id(&self) -> Result<String> {
        Ok(uuid::Uuid::new_v4().to_string())
    }
}
