//! Checksums for compiled entity graphs
//!
//! Two compilations of the same schema and configuration serialize to the
//! same bytes, so a SHA256 over the serialized graph is a stable
//! fingerprint of the compiler's output.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::entity::Entity;
use crate::error::Result;

/// SHA256 checksum of a serialized graph
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum(String);

impl Checksum {
    /// Compute checksum from raw bytes
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Self(format!("{:x}", hash))
    }

    /// Checksum of an ordered entity list
    pub fn of_entities(entities: &[Entity]) -> Result<Self> {
        let bytes = serde_json::to_vec(entities)?;
        Ok(Self::from_bytes(&bytes))
    }

    /// Get the hex string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Verify that an entity list matches this checksum
    pub fn verify(&self, entities: &[Entity]) -> Result<bool> {
        Ok(Self::of_entities(entities)? == *self)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Checksum {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_consistency() {
        let entities = vec![Entity::new("Order", "OrderType")];
        let first = Checksum::of_entities(&entities).unwrap();
        let second = Checksum::of_entities(&entities.clone()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.as_str().len(), 64);
    }

    #[test]
    fn test_checksum_different_content() {
        let first = Checksum::of_entities(&[Entity::new("Order", "OrderType")]).unwrap();
        let second = Checksum::of_entities(&[Entity::new("Invoice", "InvoiceType")]).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_checksum_verification() {
        let entities = vec![Entity::new("Order", "OrderType")];
        let checksum = Checksum::of_entities(&entities).unwrap();
        assert!(checksum.verify(&entities).unwrap());
        assert!(!checksum.verify(&[]).unwrap());
    }
}
