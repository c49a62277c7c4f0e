//! Prepared-statement cache (C2). Maps canonical (`?`-form) SQL text to the
//! text rewritten for the configured [`ParamStyle`]. The cache's guarantee:
//! repeated calls with identical canonical text never re-run the rewrite
//! except after [`StatementCache::invalidate`] (called when the driver
//! detects the pool was reset / reconnected).
//!
//! `sqlx` prepares statements per-connection under the hood; this cache only
//! needs to own the *rewritten text*, which is safe for concurrent use by
//! any number of readers.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::config::ParamStyle;
use crate::driver::paramstyle;

#[derive(Debug)]
pub struct StatementCache {
    style: ParamStyle,
    entries: RwLock<HashMap<&'static str, Arc<str>>>,
}

impl StatementCache {
    pub fn new(style: ParamStyle) -> Self {
        StatementCache { style, entries: RwLock::new(HashMap::new()) }
    }

    /// Returns the rewritten SQL text for `canonical`, computing and caching
    /// it on first use.
    pub fn get(&self, canonical: &'static str) -> Arc<str> {
        if let Some(hit) = self.entries.read().expect("stmt cache poisoned").get(canonical) {
            return hit.clone();
        }
        let rewritten: Arc<str> = paramstyle::rewrite(canonical, self.style).into();
        self.entries
            .write()
            .expect("stmt cache poisoned")
            .entry(canonical)
            .or_insert(rewritten)
            .clone()
    }

    /// Drops every cached entry. Safe to call concurrently with [`get`];
    /// callers racing a `get()` will simply recompute once more.
    pub fn invalidate(&self) {
        self.entries.write().expect("stmt cache poisoned").clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("stmt cache poisoned").len()
    }
}
