//! In-process extension registry.
//!
//! Holds the extensions loaded into the running host, keyed by id, plus the
//! namespace map and the navigation contributions they declared. Loading is
//! one-way: once registered, an extension stays in the process until the
//! host restarts. Deactivation on disk only prevents the next load.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::{ConflictKind, Error, Result};
use crate::extension::manifest::ExtensionManifest;

/// An extension registered with the running host.
#[derive(Debug, Clone)]
pub struct LoadedExtension {
    pub manifest: ExtensionManifest,
    pub install_path: PathBuf,
    pub loaded_at: chrono::DateTime<chrono::Utc>,
}

/// A URL prefix contributed to the host router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteContribution {
    pub extension_id: String,
    pub url_prefix: String,
}

/// A menu entry contributed to the host navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuContribution {
    pub extension_id: String,
    pub label: String,
    pub route: String,
    pub priority: i32,
}

/// Registry of loaded extensions.
pub struct ExtensionRegistry {
    extensions: RwLock<HashMap<String, Arc<LoadedExtension>>>,
    /// namespace label -> owning extension id
    namespaces: RwLock<HashMap<String, String>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self {
            extensions: RwLock::new(HashMap::new()),
            namespaces: RwLock::new(HashMap::new()),
        }
    }

    /// Register an extension with the running host.
    ///
    /// Fails if the id is already registered or the namespace label is
    /// taken by another extension.
    pub async fn register(&self, manifest: ExtensionManifest, install_path: PathBuf) -> Result<()> {
        let id = manifest.id.clone();
        let namespace = manifest.namespace().to_string();

        let mut extensions = self.extensions.write().await;
        let mut namespaces = self.namespaces.write().await;

        if extensions.contains_key(&id) {
            return Err(Error::Load {
                extension_id: id,
                reason: "already registered".into(),
            });
        }
        if let Some(owner) = namespaces.get(&namespace) {
            if owner != &id {
                return Err(Error::conflict(ConflictKind::Namespace, namespace));
            }
        }

        namespaces.insert(namespace, id.clone());
        extensions.insert(
            id,
            Arc::new(LoadedExtension {
                manifest,
                install_path,
                loaded_at: chrono::Utc::now(),
            }),
        );
        Ok(())
    }

    /// Get a loaded extension by id.
    pub async fn get(&self, id: &str) -> Option<Arc<LoadedExtension>> {
        self.extensions.read().await.get(id).cloned()
    }

    /// Check whether an extension is loaded.
    pub async fn contains(&self, id: &str) -> bool {
        self.extensions.read().await.contains_key(id)
    }

    /// Number of loaded extensions.
    pub async fn count(&self) -> usize {
        self.extensions.read().await.len()
    }

    /// Ids of all loaded extensions, sorted.
    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.extensions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Namespace labels currently registered.
    pub async fn registered_namespaces(&self) -> Vec<String> {
        let mut labels: Vec<String> = self.namespaces.read().await.keys().cloned().collect();
        labels.sort();
        labels
    }

    /// URL contributions, ordered by declared priority then extension id.
    pub async fn routes(&self) -> Vec<RouteContribution> {
        let extensions = self.extensions.read().await;
        let mut loaded: Vec<&Arc<LoadedExtension>> = extensions.values().collect();
        sort_by_priority(&mut loaded);
        loaded
            .iter()
            .filter_map(|ext| {
                ext.manifest.url_prefix.as_ref().map(|prefix| RouteContribution {
                    extension_id: ext.manifest.id.clone(),
                    url_prefix: prefix.clone(),
                })
            })
            .collect()
    }

    /// Menu contributions, ordered by declared priority then extension id.
    pub async fn menu(&self) -> Vec<MenuContribution> {
        let extensions = self.extensions.read().await;
        let mut loaded: Vec<&Arc<LoadedExtension>> = extensions.values().collect();
        sort_by_priority(&mut loaded);
        loaded
            .iter()
            .filter_map(|ext| {
                ext.manifest.menu.as_ref().map(|menu| MenuContribution {
                    extension_id: ext.manifest.id.clone(),
                    label: menu.label.clone(),
                    route: menu.route.clone(),
                    priority: menu.priority,
                })
            })
            .collect()
    }
}

fn sort_by_priority(loaded: &mut [&Arc<LoadedExtension>]) {
    loaded.sort_by(|a, b| {
        a.manifest
            .priority()
            .cmp(&b.manifest.priority())
            .then_with(|| a.manifest.id.cmp(&b.manifest.id))
    });
}

impl Default for ExtensionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
