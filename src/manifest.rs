//! Manifest graph resolution (spec §3, §4.2).
//!
//! Manifests form a DAG; this module expands that DAG into a flat, ordered
//! `Vec<ManifestItem>` without ever recursing into the (externally supplied,
//! therefore untrusted) include tree — Design Notes §9 calls this out
//! explicitly. The traversal is iterative, backed by an explicit frame
//! stack standing in for the call stack, and bounds depth at `MAX_DEPTH`.

use crate::error::AgentError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const MAX_INCLUDE_DEPTH: usize = 32;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestFile {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub managed_installs: Vec<String>,
    #[serde(default)]
    pub managed_updates: Vec<String>,
    #[serde(default)]
    pub managed_uninstalls: Vec<String>,
    #[serde(default)]
    pub optional_installs: Vec<String>,
    #[serde(default)]
    pub included_manifests: Vec<String>,
    #[serde(default)]
    pub catalogs: Vec<String>,
}

impl ManifestFile {
    pub fn parse(key: &str, yaml: &str) -> Result<Self, AgentError> {
        serde_yaml::from_str(yaml).map_err(|e| AgentError::ParseError {
            file: format!("manifests/{key}.yaml"),
            reason: e.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemCategory {
    Install,
    Update,
    Uninstall,
    Optional,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ManifestItem {
    pub name: String,
    /// Requested version; empty means "latest from catalog" (spec §3).
    pub version: String,
    pub source_manifest: String,
    pub catalogs: Vec<String>,
    pub category: ItemCategory,
}

pub trait ManifestSource {
    fn fetch(&self, key: &str) -> Result<ManifestFile, AgentError>;
}

#[derive(Debug, Default)]
pub struct ExpandedManifest {
    pub items: Vec<ManifestItem>,
    /// Every distinct catalog named anywhere in the tree, first-seen order.
    pub catalogs: Vec<String>,
    /// Non-fatal issues encountered while expanding (surfaced as session
    /// warnings, never abort the run).
    pub warnings: Vec<String>,
}

struct Frame {
    key: String,
    file: ManifestFile,
    child_pos: usize,
}

/// Expands the manifest DAG rooted at `root_key`. Cycles in
/// `included_manifests` are a hard error per spec §3 invariant 3; a fetch
/// failure on a *non-root* included manifest is logged as a warning and
/// that subtree is skipped, while a fetch failure on the root is fatal
/// (spec §4.2).
pub fn expand(root_key: &str, source: &dyn ManifestSource) -> Result<ExpandedManifest, AgentError> {
    let mut out = ExpandedManifest::default();
    let mut seen_catalogs = HashSet::new();
    let mut completed: HashSet<String> = HashSet::new();
    let mut ancestors: HashSet<String> = HashSet::new();

    let root_file = source.fetch(root_key).map_err(|e| {
        AgentError::FetchError(format!("root manifest '{root_key}' unreachable: {e}"))
    })?;
    let mut stack: Vec<Frame> = vec![Frame {
        key: root_key.to_string(),
        file: root_file,
        child_pos: 0,
    }];
    ancestors.insert(root_key.to_string());

    loop {
        let stack_len = stack.len();
        let Some(frame) = stack.last_mut() else {
            break;
        };
        if stack_len > MAX_INCLUDE_DEPTH {
            return Err(AgentError::ResolveError(format!(
                "manifest include depth exceeded {MAX_INCLUDE_DEPTH} at '{}'",
                frame.key
            )));
        }

        if frame.child_pos < frame.file.included_manifests.len() {
            let child_key = frame.file.included_manifests[frame.child_pos].clone();
            frame.child_pos += 1;

            if ancestors.contains(&child_key) {
                return Err(AgentError::ResolveError(format!(
                    "manifest inclusion cycle detected: '{}' -> '{}'",
                    frame.key, child_key
                )));
            }
            if completed.contains(&child_key) {
                // Diamond inclusion: already fully expanded elsewhere, don't
                // duplicate its items.
                continue;
            }
            match source.fetch(&child_key) {
                Ok(child_file) => {
                    ancestors.insert(child_key.clone());
                    stack.push(Frame {
                        key: child_key,
                        file: child_file,
                        child_pos: 0,
                    });
                }
                Err(e) => {
                    out.warnings
                        .push(format!("failed to fetch included manifest '{child_key}': {e}"));
                }
            }
            continue;
        }

        // All children processed (or there were none): emit this
        // manifest's own items, then pop.
        let frame = stack.pop().expect("frame present");
        ancestors.remove(&frame.key);
        completed.insert(frame.key.clone());

        for name in &frame.file.catalogs {
            if seen_catalogs.insert(name.clone()) {
                out.catalogs.push(name.clone());
            }
        }
        emit_items(&frame, &mut out.items);
    }

    Ok(out)
}

fn emit_items(frame: &Frame, items: &mut Vec<ManifestItem>) {
    let push = |items: &mut Vec<ManifestItem>, names: &[String], category: ItemCategory| {
        for name in names {
            items.push(ManifestItem {
                name: name.clone(),
                version: String::new(),
                source_manifest: frame.key.clone(),
                catalogs: frame.file.catalogs.clone(),
                category,
            });
        }
    };
    push(items, &frame.file.managed_installs, ItemCategory::Install);
    push(items, &frame.file.managed_updates, ItemCategory::Update);
    push(items, &frame.file.managed_uninstalls, ItemCategory::Uninstall);
    push(items, &frame.file.optional_installs, ItemCategory::Optional);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakeSource(HashMap<String, ManifestFile>);

    impl ManifestSource for FakeSource {
        fn fetch(&self, key: &str) -> Result<ManifestFile, AgentError> {
            self.0
                .get(key)
                .cloned()
                .ok_or_else(|| AgentError::FetchError(format!("no such manifest {key}")))
        }
    }

    fn mf(installs: &[&str], includes: &[&str], catalogs: &[&str]) -> ManifestFile {
        ManifestFile {
            managed_installs: installs.iter().map(|s| s.to_string()).collect(),
            included_manifests: includes.iter().map(|s| s.to_string()).collect(),
            catalogs: catalogs.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn flattens_includes_depth_first_children_before_own() {
        let mut files = HashMap::new();
        files.insert("root".to_string(), mf(&["Top"], &["base"], &["prod"]));
        files.insert("base".to_string(), mf(&["Firefox"], &[], &["prod"]));
        let source = FakeSource(files);
        let expanded = expand("root", &source).unwrap();
        let names: Vec<_> = expanded.items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["Firefox", "Top"]);
        assert_eq!(expanded.catalogs, vec!["prod"]);
    }

    #[test]
    fn detects_cycles_as_fatal() {
        let mut files = HashMap::new();
        files.insert("a".to_string(), mf(&[], &["b"], &[]));
        files.insert("b".to_string(), mf(&[], &["a"], &[]));
        let source = FakeSource(files);
        let err = expand("a", &source).unwrap_err();
        assert!(matches!(err, AgentError::ResolveError(_)));
    }

    #[test]
    fn missing_included_manifest_is_a_warning_not_fatal() {
        let mut files = HashMap::new();
        files.insert("root".to_string(), mf(&["Top"], &["missing"], &[]));
        let source = FakeSource(files);
        let expanded = expand("root", &source).unwrap();
        assert_eq!(expanded.items.len(), 1);
        assert_eq!(expanded.warnings.len(), 1);
    }

    #[test]
    fn root_unreachable_is_fatal() {
        let source = FakeSource(HashMap::new());
        let err = expand("root", &source).unwrap_err();
        assert!(matches!(err, AgentError::FetchError(_)));
    }

    #[test]
    fn diamond_inclusion_does_not_duplicate_items() {
        let mut files = HashMap::new();
        files.insert("root".to_string(), mf(&[], &["a", "b"], &[]));
        files.insert("a".to_string(), mf(&[], &["shared"], &[]));
        files.insert("b".to_string(), mf(&[], &["shared"], &[]));
        files.insert("shared".to_string(), mf(&["Firefox"], &[], &[]));
        let source = FakeSource(files);
        let expanded = expand("root", &source).unwrap();
        assert_eq!(expanded.items.len(), 1);
    }
}
