//! Static registry mapping source names to capabilities.

use crate::error::Error;
use crate::source::Source;
use std::collections::HashMap;
use std::sync::Arc;

/// Maps source names (as written in references) to `Source` instances.
///
/// Populated once before resolution begins and never mutated afterwards:
/// the manager takes ownership of the registry and only reads from it.
#[derive(Default)]
pub struct SourceRegistry {
    sources: HashMap<String, Arc<dyn Source>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source under a name. Registering the same name twice is
    /// an error rather than a silent replacement.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        source: Arc<dyn Source>,
    ) -> Result<(), Error> {
        let name = name.into();
        if self.sources.contains_key(&name) {
            return Err(Error::DuplicateSource(name));
        }
        self.sources.insert(name, source);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Source>> {
        self.sources.get(name)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.sources.keys()).finish()
    }
}
