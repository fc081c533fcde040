//! Page lookup abstraction layer.
//!
//! The readiness engine never touches a page directly; the host injects a
//! [`DomLookup`]. This enables:
//! - Unit testing without a real page
//! - Simulating targets that render late or never
//! - Isolating selector failures to a single query

mod mock;
mod selector;
mod snapshot;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use mock::MockLookup;
pub use selector::AttributeSelector;
pub use snapshot::{PageElement, PageSnapshot};

/// Errors raised by a page lookup
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("invalid selector '{0}': {1}")]
    InvalidSelector(String, String),
}

/// A located element, handed to the presentation layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementHandle {
    /// Position of the element in document order
    pub index: usize,
    pub tag: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// Read-only query surface over the host page
pub trait DomLookup: Send + Sync {
    /// Locate the first element matching `query`
    fn find(&self, query: &str) -> Result<Option<ElementHandle>, LookupError>;

    /// Check whether an element matching `query` is currently present
    fn exists(&self, query: &str) -> Result<bool, LookupError> {
        Ok(self.find(query)?.is_some())
    }
}
