//! In-memory page model implementing [`DomLookup`].
//!
//! Elements may declare a render delay, so a snapshot can stand in for a page
//! whose widgets mount asynchronously after the tour widget itself.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::Deserialize;

use super::{AttributeSelector, DomLookup, ElementHandle, LookupError};

/// One element on the simulated page
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageElement {
    pub tag: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Milliseconds after mount before the element appears
    #[serde(default)]
    pub render_delay_ms: Option<u64>,
}

impl PageElement {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            attributes: BTreeMap::new(),
            render_delay_ms: None,
        }
    }

    pub fn with_attribute(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_render_delay(mut self, delay: Duration) -> Self {
        self.render_delay_ms = Some(delay.as_millis() as u64);
        self
    }
}

#[derive(Debug, Deserialize)]
struct PageDocument {
    #[serde(default)]
    elements: Vec<PageElement>,
}

/// A page whose clock starts when the snapshot is created
#[derive(Debug, Clone)]
pub struct PageSnapshot {
    elements: Vec<PageElement>,
    mounted_at: Instant,
}

impl PageSnapshot {
    pub fn new(elements: Vec<PageElement>) -> Self {
        Self {
            elements,
            mounted_at: Instant::now(),
        }
    }

    /// Parse a page document of the form `{ "elements": [...] }`
    pub fn from_json(json: &str) -> Result<Self> {
        let document: PageDocument =
            serde_json::from_str(json).context("Failed to parse page snapshot")?;
        Ok(Self::new(document.elements))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read page snapshot {}", path.display()))?;
        Self::from_json(&json)
    }

    pub fn elements(&self) -> &[PageElement] {
        &self.elements
    }

    fn is_rendered(&self, element: &PageElement) -> bool {
        element
            .render_delay_ms
            .is_none_or(|ms| self.mounted_at.elapsed() >= Duration::from_millis(ms))
    }
}

impl DomLookup for PageSnapshot {
    fn find(&self, query: &str) -> Result<Option<ElementHandle>, LookupError> {
        let selector = AttributeSelector::parse(query)?;

        Ok(self
            .elements
            .iter()
            .enumerate()
            .filter(|(_, element)| self.is_rendered(element))
            .find(|(_, element)| selector.matches(&element.tag, &element.attributes))
            .map(|(index, element)| ElementHandle {
                index,
                tag: element.tag.clone(),
                attributes: element.attributes.clone(),
            }))
    }
}
