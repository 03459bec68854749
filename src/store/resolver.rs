//! Identifier resolver
//!
//! Translates between caller-facing property identifiers (small numeric ids
//! or named descriptors) and the store's canonical numeric ids. Both
//! directions batch their backend round trips and feed the per-store
//! `PropCache`, which is insertion-only for the store's lifetime: resolving
//! the same identifiers again never touches the backend.

use std::collections::BTreeMap;

use tracing::debug;

use crate::store::Store;
use crate::sync;
use crate::types::error::{check, Result};
use crate::types::property::{NamedPropId, PropId, ResolvedPropId, NAMED_PROP_ID_MIN};
use crate::types::PropTag;

impl Store {
    /// Resolve caller-supplied property identifiers, order-preserving.
    ///
    /// Numeric ids pass through untouched. Named descriptors hit the cache
    /// first; the misses are deduplicated and resolved in one backend round
    /// trip. A descriptor the store does not recognize yields `None` in its
    /// slot; partial resolution is still success.
    pub fn resolve_prop_inputs(&self, inputs: &[PropId]) -> Result<Vec<Option<ResolvedPropId>>> {
        let mut resolved: Vec<Option<ResolvedPropId>> = vec![None; inputs.len()];
        let mut pending: BTreeMap<NamedPropId, Vec<usize>> = BTreeMap::new();

        {
            let cache = sync::read(&self.prop_cache);
            for (index, input) in inputs.iter().enumerate() {
                match input {
                    PropId::Int(id) => {
                        resolved[index] = Some(ResolvedPropId::numeric(*id));
                    }
                    PropId::Named(descriptor) => match cache.get(descriptor) {
                        Some(id) => {
                            resolved[index] =
                                Some(ResolvedPropId::named(*id, descriptor.clone()));
                        }
                        None => pending.entry(descriptor.clone()).or_default().push(index),
                    },
                }
            }
        }

        if pending.is_empty() {
            return Ok(resolved);
        }

        let names: Vec<NamedPropId> = pending.keys().cloned().collect();
        let assigned = self.backend().resolve_named_props(&names)?;
        check(assigned.len() == names.len(), "named property resolution count mismatch")?;

        let mut cache = sync::write(&self.prop_cache);
        for (name, assigned) in names.iter().zip(assigned) {
            let Some(assigned) = assigned else {
                debug!(?name, "named property not recognized by store");
                continue;
            };
            cache.insert(name.clone(), assigned);
            if let Some(indexes) = pending.get(name) {
                for &index in indexes {
                    resolved[index] = Some(ResolvedPropId::named(assigned, name.clone()));
                }
            }
        }
        Ok(resolved)
    }

    /// Reverse-resolve raw tags back to caller-facing identifiers,
    /// order-preserving. Used when enumerating every property of an object.
    ///
    /// Ids below [`NAMED_PROP_ID_MIN`] are well-known and map directly. Ids
    /// at or above it scan the cache in reverse; the misses go to the backend
    /// in one batch. An id with no named mapping falls back to its numeric
    /// identity rather than disappearing.
    pub fn resolve_prop_tags(&self, tags: &[PropTag]) -> Result<Vec<ResolvedPropId>> {
        let mut resolved: Vec<Option<ResolvedPropId>> = vec![None; tags.len()];
        let mut pending: BTreeMap<u32, Vec<usize>> = BTreeMap::new();

        {
            let cache = sync::read(&self.prop_cache);
            for (index, tag) in tags.iter().enumerate() {
                let prop_id = tag.prop_id();
                if prop_id < NAMED_PROP_ID_MIN {
                    resolved[index] = Some(ResolvedPropId::numeric(prop_id));
                    continue;
                }
                match cache.iter().find(|(_, assigned)| **assigned == prop_id) {
                    Some((descriptor, _)) => {
                        resolved[index] =
                            Some(ResolvedPropId::named(prop_id, descriptor.clone()));
                    }
                    None => pending.entry(prop_id).or_default().push(index),
                }
            }
        }

        if !pending.is_empty() {
            let ids: Vec<u32> = pending.keys().copied().collect();
            let descriptors = self.backend().resolve_prop_ids(&ids)?;
            check(descriptors.len() == ids.len(), "property id resolution count mismatch")?;

            let mut cache = sync::write(&self.prop_cache);
            for (prop_id, descriptor) in ids.iter().zip(descriptors) {
                let Some(descriptor) = descriptor else {
                    continue;
                };
                cache.insert(descriptor.clone(), *prop_id);
                if let Some(indexes) = pending.get(prop_id) {
                    for &index in indexes {
                        resolved[index] =
                            Some(ResolvedPropId::named(*prop_id, descriptor.clone()));
                    }
                }
            }
        }

        Ok(resolved
            .into_iter()
            .enumerate()
            .map(|(index, entry)| {
                entry.unwrap_or_else(|| ResolvedPropId::numeric(tags[index].prop_id()))
            })
            .collect())
    }
}
