//! Scriptable [`DomLookup`] for tests and dry runs.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use super::{DomLookup, ElementHandle, LookupError};

/// Mock page lookup.
///
/// Queries are present, absent, failing, or appear once they have been
/// checked a given number of times. Every call is recorded.
#[derive(Debug, Clone, Default)]
pub struct MockLookup {
    present: Arc<Mutex<HashSet<String>>>,
    failing: Arc<Mutex<HashSet<String>>>,
    /// query -> check number (1-based) from which the query is present
    appears_on_check: Arc<Mutex<HashMap<String, usize>>>,
    /// Record of queries checked, in call order
    pub call_log: Arc<Mutex<Vec<String>>>,
}

impl MockLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock where the given queries are present from the start
    pub fn with_present<I, S>(queries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mock = Self::new();
        for query in queries {
            mock.add_present(&query.into());
        }
        mock
    }

    pub fn add_present(&self, query: &str) {
        lock(&self.present).insert(query.to_string());
    }

    /// Make lookups for `query` fail, as a host would on a bad selector
    pub fn fail_on(&self, query: &str) {
        lock(&self.failing).insert(query.to_string());
    }

    /// Make `query` appear on its `check`-th lookup and stay present after
    pub fn appear_on_check(&self, query: &str, check: usize) {
        lock(&self.appears_on_check).insert(query.to_string(), check);
    }

    /// All queries checked so far
    pub fn calls(&self) -> Vec<String> {
        lock(&self.call_log).clone()
    }

    /// Number of times `query` was checked
    pub fn check_count(&self, query: &str) -> usize {
        lock(&self.call_log).iter().filter(|q| *q == query).count()
    }

    fn record(&self, query: &str) -> usize {
        let mut log = lock(&self.call_log);
        log.push(query.to_string());
        log.iter().filter(|q| *q == query).count()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DomLookup for MockLookup {
    fn find(&self, query: &str) -> Result<Option<ElementHandle>, LookupError> {
        let checks = self.record(query);

        if lock(&self.failing).contains(query) {
            return Err(LookupError::InvalidSelector(
                query.to_string(),
                "rejected by mock".to_string(),
            ));
        }

        let appeared = lock(&self.appears_on_check)
            .get(query)
            .is_some_and(|&from| checks >= from);

        if appeared || lock(&self.present).contains(query) {
            Ok(Some(ElementHandle {
                index: 0,
                tag: "div".to_string(),
                attributes: Default::default(),
            }))
        } else {
            Ok(None)
        }
    }
}
