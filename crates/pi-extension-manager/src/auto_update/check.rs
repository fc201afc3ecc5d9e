use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::cache::{MetadataCache, PackageMetadata};
use crate::config::{ManagerOptions, ScopeDirs};
use crate::exec::CommandExecutor;
use crate::packages::metadata::latest_version;
use crate::packages::source::{SourceKind, registry_name};
use crate::packages::{InstalledPackage, list_installed_packages};
use crate::types::Scope;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageUpdate {
    pub name: String,
    pub source: String,
    pub scope: Scope,
    pub installed: String,
    pub latest: String,
}

/// Any difference counts, downgrades included.
pub fn is_update(installed: &str, latest: &str) -> bool {
    installed.trim() != latest.trim()
}

fn update_candidates(packages: Vec<InstalledPackage>) -> Vec<(String, InstalledPackage)> {
    packages
        .into_iter()
        .filter(|package| package.kind() == SourceKind::Registry)
        .filter(|package| package.version.is_some())
        .filter_map(|package| {
            let name = registry_name(&package.source)?;
            Some((name, package))
        })
        .collect()
}

/// Compare every versioned registry package against its latest release.
///
/// Lookups run in groups of `metadata_batch_size`. A failed lookup skips
/// that package. When a cache is given, fetched versions are written back
/// into it, keeping any cached description and size.
pub async fn check_for_updates(
    exec: &dyn CommandExecutor,
    options: &ManagerOptions,
    dirs: &ScopeDirs,
    cache: Option<&MetadataCache>,
) -> Vec<PackageUpdate> {
    let candidates = update_candidates(list_installed_packages(exec, options, dirs).await);
    let mut updates = Vec::new();
    let mut fetched = Vec::new();

    for batch in candidates.chunks(options.metadata_batch_size.max(1)) {
        let results = join_all(
            batch
                .iter()
                .map(|(name, _)| latest_version(exec, options, name)),
        )
        .await;

        for ((name, package), result) in batch.iter().zip(results) {
            let latest = match result {
                Ok(Some(latest)) => latest,
                Ok(None) => continue,
                Err(e) => {
                    tracing::debug!("Update check for {name} failed: {e}");
                    continue;
                }
            };
            let installed = package.version.clone().unwrap_or_default();
            if is_update(&installed, &latest) {
                updates.push(PackageUpdate {
                    name: name.clone(),
                    source: package.source.clone(),
                    scope: package.scope,
                    installed,
                    latest: latest.clone(),
                });
            }
            fetched.push((name.clone(), latest));
        }
    }

    if let Some(cache) = cache {
        let entries = fetched
            .into_iter()
            .map(|(name, latest)| {
                let cached = cache.get(&name);
                let metadata = PackageMetadata {
                    description: cached.as_ref().and_then(|c| c.description.clone()),
                    version: Some(latest),
                    size: cached.and_then(|c| c.size),
                };
                (name, metadata)
            })
            .collect::<Vec<_>>();
        if let Err(e) = cache.set_many(entries).await {
            tracing::warn!("Failed to persist metadata cache: {e}");
        }
    }

    tracing::info!("Update check found {} update(s)", updates.len());
    updates
}
