//! Unified project configuration from per-module fragments.
//!
//! Fragments are flattened into dotted-path leaves and applied in resolution
//! order. Objects merge by key union, scalars are last-writer-wins, lists
//! append unless the writer asks to replace them. A leaf locked by its writer
//! rejects any later, different value.

use crate::core::error::CoraError;
use crate::core::registry::ConfigFragment;
use crate::core::resolver::ResolvedModuleSet;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigEntry {
    pub value: Value,
    /// Module that last wrote this leaf.
    pub set_by: String,
    pub locked: bool,
}

/// Frozen result of a merge. There is no mutating API.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MergedConfig {
    entries: BTreeMap<String, ConfigEntry>,
}

impl MergedConfig {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key).map(|e| &e.value)
    }

    pub fn provenance(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|e| e.set_by.as_str())
    }

    pub fn is_locked(&self, key: &str) -> bool {
        self.entries.get(key).is_some_and(|e| e.locked)
    }

    pub fn entries(&self) -> &BTreeMap<String, ConfigEntry> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rebuild the nested value tree from the dotted leaves.
    pub fn to_tree(&self) -> Value {
        let mut root = Map::new();
        for (key, entry) in &self.entries {
            let parts: Vec<&str> = key.split('.').collect();
            insert_path(&mut root, &parts, entry.value.clone());
        }
        Value::Object(root)
    }
}

fn insert_path(node: &mut Map<String, Value>, parts: &[&str], value: Value) {
    match parts {
        [] => {}
        [last] => {
            node.insert((*last).to_string(), value);
        }
        [head, rest @ ..] => {
            let child = node
                .entry((*head).to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(map) = child {
                insert_path(map, rest, value);
            }
        }
    }
}

fn flatten(prefix: &str, value: &Value, out: &mut Vec<(String, Value)>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                let key = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{}.{}", prefix, k)
                };
                flatten(&key, v, out);
            }
        }
        other => out.push((prefix.to_string(), other.clone())),
    }
}

fn covers(rule: &str, key: &str) -> bool {
    key == rule || key.starts_with(&format!("{}.", rule))
}

struct MergeState {
    entries: BTreeMap<String, ConfigEntry>,
}

impl MergeState {
    fn check_writable(&self, key: &str, value: &Value, writer: &str) -> Result<(), CoraError> {
        if let Some(existing) = self.entries.get(key) {
            if existing.locked && existing.value != *value && existing.set_by != writer {
                return Err(CoraError::ConfigConflict {
                    key: key.to_string(),
                    locked_by: existing.set_by.clone(),
                    writer: writer.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Leaves that become unreachable when `key` is written: ancestors holding
    /// a scalar, or descendants of a former object.
    fn shadowed_keys(&self, key: &str) -> Vec<String> {
        let child_prefix = format!("{}.", key);
        self.entries
            .keys()
            .filter(|existing| {
                existing.as_str() != key
                    && (existing.starts_with(&child_prefix)
                        || key.starts_with(&format!("{}.", existing)))
            })
            .cloned()
            .collect()
    }

    fn apply(&mut self, module: &str, fragment: &ConfigFragment) -> Result<(), CoraError> {
        let mut leaves = Vec::new();
        flatten("", &Value::Object(fragment.values.clone()), &mut leaves);

        for (key, value) in leaves {
            if key.is_empty() {
                continue;
            }

            for shadowed in self.shadowed_keys(&key) {
                if let Some(entry) = self.entries.get(&shadowed) {
                    if entry.locked && entry.set_by != module {
                        return Err(CoraError::ConfigConflict {
                            key: shadowed,
                            locked_by: entry.set_by.clone(),
                            writer: module.to_string(),
                        });
                    }
                }
            }

            let replace = fragment.replace.iter().any(|r| covers(r, &key));
            let merged_value = match (self.entries.get(&key), &value) {
                (Some(existing), Value::Array(new_items)) if !replace => match &existing.value {
                    Value::Array(old_items) => {
                        let mut combined = old_items.clone();
                        combined.extend(new_items.iter().cloned());
                        Value::Array(combined)
                    }
                    _ => value.clone(),
                },
                _ => value.clone(),
            };

            self.check_writable(&key, &merged_value, module)?;

            for shadowed in self.shadowed_keys(&key) {
                self.entries.remove(&shadowed);
            }

            let keep_lock = self
                .entries
                .get(&key)
                .is_some_and(|e| e.locked && e.value == merged_value);
            let set_by = match self.entries.get(&key) {
                Some(e) if keep_lock => e.set_by.clone(),
                _ => module.to_string(),
            };
            self.entries.insert(
                key,
                ConfigEntry {
                    value: merged_value,
                    set_by,
                    locked: keep_lock,
                },
            );
        }

        for rule in &fragment.locked {
            for (key, entry) in self.entries.iter_mut() {
                if entry.set_by == module && covers(rule, key) {
                    entry.locked = true;
                }
            }
        }
        Ok(())
    }
}

/// Apply each resolved module's fragment in order.
pub fn merge(
    ordered: &ResolvedModuleSet<'_>,
    per_module: &BTreeMap<String, ConfigFragment>,
) -> Result<MergedConfig, CoraError> {
    let mut state = MergeState {
        entries: BTreeMap::new(),
    };

    for module in ordered.modules() {
        let Some(fragment) = per_module.get(&module.name) else {
            continue;
        };
        state.apply(&module.name, fragment)?;
        debug!(module = %module.name, leaves = state.entries.len(), "config fragment applied");
    }

    Ok(MergedConfig {
        entries: state.entries,
    })
}
