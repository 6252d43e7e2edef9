//! Parsed-model cache.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;
use uuid::Uuid;

use model::{ModelError, ProcessModel};

/// What a cached model was parsed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// A deployed definition.
    Process(Uuid),
    /// A running instance's private copy.
    Instance(Uuid),
}

struct Entry {
    content: Arc<str>,
    model: Arc<ProcessModel>,
}

/// Parses model content once per key.
///
/// Entries remember the content they were parsed from; a lookup with
/// different content (an uncommitted or rolled-back mutation, a redeploy)
/// reparses and replaces the entry.
#[derive(Default)]
pub struct ModelCache {
    entries: RwLock<HashMap<CacheKey, Entry>>,
}

impl ModelCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_parse(&self, key: CacheKey, content: &str) -> Result<Arc<ProcessModel>, ModelError> {
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = entries.get(&key) {
                if &*entry.content == content {
                    return Ok(entry.model.clone());
                }
            }
        }

        debug!(?key, "parsing process model");
        let model = Arc::new(ProcessModel::parse(content)?);
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, Entry { content: Arc::from(content), model: model.clone() });
        Ok(model)
    }

    pub fn invalidate(&self, key: &CacheKey) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTENT: &str = r#"{"name":"n","key":"k","nodeConfig":{"nodeName":"s","nodeKey":"s","type":"start"}}"#;

    #[test]
    fn same_content_is_parsed_once() {
        let cache = ModelCache::new();
        let key = CacheKey::Process(Uuid::new_v4());
        let first = cache.get_or_parse(key, CONTENT).expect("parse");
        let second = cache.get_or_parse(key, CONTENT).expect("cached");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn changed_content_replaces_the_entry() {
        let cache = ModelCache::new();
        let key = CacheKey::Instance(Uuid::new_v4());
        let first = cache.get_or_parse(key, CONTENT).expect("parse");
        let other = CONTENT.replace("\"n\"", "\"renamed\"");
        let second = cache.get_or_parse(key, &other).expect("reparse");
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.name, "renamed");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn invalidate_removes_the_entry() {
        let cache = ModelCache::new();
        let key = CacheKey::Process(Uuid::new_v4());
        cache.get_or_parse(key, CONTENT).expect("parse");
        cache.invalidate(&key);
        assert!(!cache.contains(&key));
        assert!(cache.is_empty());
    }

    #[test]
    fn parse_errors_are_not_cached() {
        let cache = ModelCache::new();
        assert!(cache.get_or_parse(CacheKey::Process(Uuid::new_v4()), "").is_err());
        assert!(cache.is_empty());
    }
}
