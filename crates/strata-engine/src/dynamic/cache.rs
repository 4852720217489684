//! Memoized dynamic value declarations per element type

use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::ReentrantMutex;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::decl::{DynamicValueDecl, Schema};
use crate::error::DynamicValueError;

/// One dynamic value an element type declares, with where it came from
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicValueIdentity {
    /// Name, or `{attribute}` when an attribute supplies the name
    pub key: String,
    /// The declaration itself
    pub decl: DynamicValueDecl,
    /// Element type or capability that contributed the declaration
    pub declared_by: String,
}

/// Declarations of one element type, keyed by identity key
pub type Declarations = Arc<IndexMap<String, DynamicValueIdentity>>;

/// Cache of computed declarations
///
/// Lookups take the lock-free fast path. Misses compute under a re-entrant
/// monitor, so computing one type may consult the cache for another, and
/// insert with `entry().or_insert` so every caller gets the same `Arc`.
pub struct DeclarationCache {
    entries: DashMap<String, Declarations>,
    monitor: ReentrantMutex<()>,
}

impl DeclarationCache {
    /// Empty cache
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            monitor: ReentrantMutex::new(()),
        }
    }

    /// Declarations of `element_type`, computed on first request
    pub fn get_or_compute(&self, schema: &Schema, element_type: &str) -> Result<Declarations, DynamicValueError> {
        if let Some(hit) = self.entries.get(element_type) {
            trace!(element_type, "declaration cache hit");
            return Ok(hit.clone());
        }

        let _guard = self.monitor.lock();
        if let Some(hit) = self.entries.get(element_type) {
            return Ok(hit.clone());
        }
        let computed = Arc::new(compute(schema, element_type)?);
        debug!(element_type, count = computed.len(), "computed dynamic value declarations");
        let entry = self
            .entries
            .entry(element_type.to_string())
            .or_insert(computed);
        Ok(entry.clone())
    }

    /// Number of cached element types
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is cached
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry (for schema changes)
    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl Default for DeclarationCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Supertypes from the most general down, then capabilities, then the type's
/// own declarations
fn compute(schema: &Schema, element_type: &str) -> Result<IndexMap<String, DynamicValueIdentity>, DynamicValueError> {
    let lineage = schema.lineage(element_type);
    if lineage.is_empty() {
        return Err(DynamicValueError::UnknownElementType {
            name: element_type.to_string(),
        });
    }

    let mut sources: Vec<(String, &[DynamicValueDecl])> = Vec::new();
    for spec in lineage.iter().skip(1).rev() {
        sources.push((spec.name.clone(), spec.dynamic_values.as_slice()));
    }
    for tag in schema.capabilities_of(element_type) {
        sources.push((tag.name().to_string(), schema.capability_decls(tag)));
    }
    sources.push((lineage[0].name.clone(), lineage[0].dynamic_values.as_slice()));

    let mut declarations = IndexMap::new();
    for (declared_by, decls) in sources {
        for decl in decls {
            let key = decl.identity_key();
            if declarations.contains_key(&key) {
                return Err(DynamicValueError::NameClash {
                    name: key,
                    element_type: element_type.to_string(),
                });
            }
            declarations.insert(
                key.clone(),
                DynamicValueIdentity {
                    key,
                    decl: decl.clone(),
                    declared_by: declared_by.clone(),
                },
            );
        }
    }
    Ok(declarations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decl::{CapabilitySpec, CapabilityTag, ElementSpec};

    fn schema() -> Schema {
        let mut schema = Schema::new();
        schema.register_capability(
            CapabilityTag::WITH_ELEMENT_MODEL,
            CapabilitySpec::default(),
        );
        schema.register(
            ElementSpec::abstract_type("scoped")
                .capability(CapabilityTag::WITH_ELEMENT_MODEL)
                .dynamic_value(DynamicValueDecl::new("source").named_by("source-as")),
        );
        schema.register(
            ElementSpec::new("mapping")
                .extends("scoped")
                .dynamic_value(DynamicValueDecl::new("index")),
        );
        schema.register(
            ElementSpec::new("clashing")
                .extends("scoped")
                .dynamic_value(DynamicValueDecl::new("other").named_by("source-as")),
        );
        schema
    }

    #[test]
    fn test_supertype_declarations_come_first() {
        let cache = DeclarationCache::new();
        let decls = cache.get_or_compute(&schema(), "mapping").unwrap();
        let keys: Vec<_> = decls.keys().cloned().collect();
        assert_eq!(keys, vec!["{source-as}".to_string(), "index".to_string()]);
        assert_eq!(decls["index"].declared_by, "mapping");
        assert_eq!(decls["{source-as}"].declared_by, "scoped");
    }

    #[test]
    fn test_repeated_lookups_share_one_arc() {
        let cache = DeclarationCache::new();
        let schema = schema();
        let a = cache.get_or_compute(&schema, "mapping").unwrap();
        let b = cache.get_or_compute(&schema, "mapping").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_name_clash() {
        let cache = DeclarationCache::new();
        let err = cache.get_or_compute(&schema(), "clashing").unwrap_err();
        assert!(matches!(err, DynamicValueError::NameClash { .. }));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_unknown_type() {
        let cache = DeclarationCache::new();
        let err = cache.get_or_compute(&schema(), "nope").unwrap_err();
        assert_eq!(
            err,
            DynamicValueError::UnknownElementType {
                name: "nope".to_string()
            }
        );
    }

    #[test]
    fn test_concurrent_lookups_agree() {
        let cache = Arc::new(DeclarationCache::new());
        let schema = Arc::new(schema());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                let schema = schema.clone();
                std::thread::spawn(move || cache.get_or_compute(&schema, "mapping").unwrap())
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for r in &results[1..] {
            assert!(Arc::ptr_eq(&results[0], r));
        }
    }
}
