//! Runtime type-identity registry.
//!
//! Native multicast transports address publishes by event type, but a bridge
//! routes messages whose declared types are not compiled into its own
//! process. The registry turns a serialized type descriptor
//! (`"Name[+Nested]*, AssemblyName[, Version=...]"`) into a stable interned
//! [`TypeHandle`]: a small-integer identity with a display name, distinct per
//! normalized descriptor and equal across repeated resolutions.
//!
//! Known types can be pre-registered and are matched version-insensitively,
//! so a locally configured type satisfies descriptors reported by processes
//! built against a different version.

use crate::error::UnforwardableMessage;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Stable interned identity for one type descriptor.
///
/// Equality and hashing use the interned id only; the name is carried for
/// diagnostics and multicast topic naming.
#[derive(Debug, Clone)]
pub struct TypeHandle {
    id: u64,
    name: Arc<str>,
}

impl TypeHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Normalized `"Full.Name, Assembly"` form of the descriptor.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PartialEq for TypeHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeHandle {}

impl std::hash::Hash for TypeHandle {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl std::fmt::Display for TypeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[derive(Default)]
pub struct TypeRegistry {
    // (full name, assembly short name) -> pre-registered handle
    known: DashMap<String, TypeHandle>,
    // normalized descriptor -> synthesized handle
    descriptors: DashMap<String, TypeHandle>,
    // assembly name -> synthesized module id
    modules: DashMap<String, u64>,
    // "<module id>:<nested path>" -> synthesized handle per path segment
    paths: DashMap<String, TypeHandle>,
    next_id: AtomicU64,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-registers a locally meaningful type under its version-insensitive
    /// key, so descriptors naming any build of it resolve to this handle.
    pub fn register_known_type(
        &self,
        full_name: &str,
        assembly_short_name: &str,
    ) -> TypeHandle {
        let key = normalized_key(full_name, assembly_short_name);
        self.known
            .entry(key.clone())
            .or_insert_with(|| TypeHandle {
                id: self.next_id.fetch_add(1, Ordering::Relaxed),
                name: key.into(),
            })
            .clone()
    }

    /// Resolves a descriptor to its handle, synthesizing one on first sight.
    pub fn resolve(&self, descriptor: &str) -> Result<TypeHandle, UnforwardableMessage> {
        let mut parts = descriptor.split(',').map(str::trim).filter(|p| !p.is_empty());
        let (Some(full_name), Some(assembly)) = (parts.next(), parts.next()) else {
            return Err(UnforwardableMessage::new(format!(
                "malformed type descriptor '{descriptor}': expected 'Name, Assembly'"
            )));
        };
        // Any further segments (version, culture, token) are ignored.

        let key = normalized_key(full_name, assembly);
        if let Some(known) = self.known.get(&key) {
            return Ok(known.clone());
        }
        if let Some(cached) = self.descriptors.get(&key) {
            return Ok(cached.clone());
        }

        let module_id = *self
            .modules
            .entry(assembly.to_string())
            .or_insert_with(|| self.next_id.fetch_add(1, Ordering::Relaxed));

        // Walk the nested-type path parent-to-child, interning one handle per
        // segment so "A" and "A+B" stay distinct but shared prefixes are
        // reused. Each cache guards only its own mutation.
        let mut handle = None;
        let mut path = String::new();
        for segment in full_name.split('+').filter(|s| !s.is_empty()) {
            if !path.is_empty() {
                path.push('+');
            }
            path.push_str(segment);
            let path_key = format!("{module_id}:{path}");
            let segment_handle = self
                .paths
                .entry(path_key)
                .or_insert_with(|| TypeHandle {
                    id: self.next_id.fetch_add(1, Ordering::Relaxed),
                    name: normalized_key(&path, assembly).into(),
                })
                .clone();
            handle = Some(segment_handle);
        }

        let Some(handle) = handle else {
            return Err(UnforwardableMessage::new(format!(
                "malformed type descriptor '{descriptor}': empty type name"
            )));
        };

        Ok(self
            .descriptors
            .entry(key)
            .or_insert(handle)
            .clone())
    }
}

fn normalized_key(full_name: &str, assembly: &str) -> String {
    format!("{full_name}, {assembly}")
}
