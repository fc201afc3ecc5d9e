//! Registry lookups (`view`, `search`) backed by the metadata cache.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::{CachedPackage, MetadataCache, PackageMetadata};
use crate::config::ManagerOptions;
use crate::error::ExtMgrError;
use crate::exec::{CommandExecutor, ExecOptions};
use crate::packages::installed::InstalledPackage;
use crate::packages::source::{SourceKind, registry_name};

#[derive(Debug, Default, Deserialize)]
struct RegistryView {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    dist: Option<RegistryDist>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistryDist {
    #[serde(default)]
    unpacked_size: Option<u64>,
}

/// One package in a registry search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryPackage {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl From<CachedPackage> for RegistryPackage {
    fn from(cached: CachedPackage) -> Self {
        Self {
            name: cached.name,
            version: cached.version,
            description: cached.description,
        }
    }
}

/// A package whose metadata could not be fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataError {
    pub name: String,
    pub message: String,
}

/// `view` prints an array when several versions match; the last one is newest.
fn last_if_array(value: Value) -> Value {
    match value {
        Value::Array(mut items) => items.pop().unwrap_or(Value::Null),
        other => other,
    }
}

fn parse_view(stdout: &str) -> Result<PackageMetadata, ExtMgrError> {
    let value = serde_json::from_str::<Value>(stdout)
        .map_err(|e| ExtMgrError::Parse(format!("registry view output: {e}")))?;
    let view = serde_json::from_value::<RegistryView>(last_if_array(value))
        .map_err(|e| ExtMgrError::Parse(format!("registry view output: {e}")))?;
    if view.name.is_none() && view.version.is_none() {
        return Err(ExtMgrError::Parse(
            "registry view output has no name or version".to_string(),
        ));
    }
    Ok(PackageMetadata {
        description: view.description,
        version: view.version,
        size: view.dist.and_then(|d| d.unpacked_size),
    })
}

async fn run_registry(
    exec: &dyn CommandExecutor,
    options: &ManagerOptions,
    args: Vec<String>,
    timeout: std::time::Duration,
) -> Result<String, ExtMgrError> {
    let output = exec
        .exec(
            &options.registry_command,
            &args,
            ExecOptions::with_timeout(timeout),
        )
        .await;
    if !output.success() {
        return Err(ExtMgrError::Subprocess(format!(
            "{} {} failed: {}",
            options.registry_command,
            args.first().map(String::as_str).unwrap_or_default(),
            output.diagnostic()
        )));
    }
    Ok(output.stdout)
}

/// Fetch description, latest version and unpacked size for one package.
pub async fn view_package(
    exec: &dyn CommandExecutor,
    options: &ManagerOptions,
    name: &str,
) -> Result<PackageMetadata, ExtMgrError> {
    let args = vec!["view".to_string(), name.to_string(), "--json".to_string()];
    let stdout = run_registry(exec, options, args, options.view_timeout).await?;
    parse_view(&stdout)
}

/// Latest published version, or `None` when the registry prints nothing.
pub async fn latest_version(
    exec: &dyn CommandExecutor,
    options: &ManagerOptions,
    name: &str,
) -> Result<Option<String>, ExtMgrError> {
    let args = vec![
        "view".to_string(),
        name.to_string(),
        "version".to_string(),
        "--json".to_string(),
    ];
    let stdout = run_registry(exec, options, args, options.view_timeout).await?;
    if stdout.trim().is_empty() {
        return Ok(None);
    }
    let value = serde_json::from_str::<Value>(&stdout)
        .map_err(|e| ExtMgrError::Parse(format!("registry version output: {e}")))?;
    match last_if_array(value) {
        Value::String(version) if !version.is_empty() => Ok(Some(version)),
        Value::Null => Ok(None),
        other => Err(ExtMgrError::Parse(format!(
            "unexpected registry version output: {other}"
        ))),
    }
}

fn fill(package: &mut InstalledPackage, description: Option<String>, size: Option<u64>) {
    if package.description.is_none() {
        package.description = description;
    }
    if size.is_some() {
        package.size = size;
    }
}

/// Fill `description`/`size` for registry packages.
///
/// Cached entries are used as-is; the rest are looked up in groups of
/// `metadata_batch_size` concurrent `view` calls. Every package is attempted;
/// failures are returned, not raised.
pub async fn fetch_package_metadata(
    exec: &dyn CommandExecutor,
    options: &ManagerOptions,
    cache: &MetadataCache,
    packages: &mut [InstalledPackage],
) -> Vec<MetadataError> {
    let mut misses = Vec::<(usize, String)>::new();
    for (index, package) in packages.iter_mut().enumerate() {
        if package.kind() != SourceKind::Registry {
            continue;
        }
        let name = registry_name(&package.source).unwrap_or_else(|| package.name.clone());
        match cache.get(&name) {
            Some(cached) => fill(package, cached.description, cached.size),
            None => misses.push((index, name)),
        }
    }

    let mut errors = Vec::new();
    for batch in misses.chunks(options.metadata_batch_size.max(1)) {
        let results = join_all(
            batch
                .iter()
                .map(|(_, name)| view_package(exec, options, name)),
        )
        .await;

        let mut fetched = Vec::new();
        for ((index, name), result) in batch.iter().zip(results) {
            match result {
                Ok(metadata) => {
                    fill(
                        &mut packages[*index],
                        metadata.description.clone(),
                        metadata.size,
                    );
                    fetched.push((name.clone(), metadata));
                }
                Err(e) => {
                    tracing::debug!("Metadata lookup for {name} failed: {e}");
                    errors.push(MetadataError {
                        name: name.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }
        if let Err(e) = cache.set_many(fetched).await {
            tracing::warn!("Failed to persist metadata cache: {e}");
        }
    }
    errors
}

/// Search the registry, answering from the cached last search when it is fresh.
pub async fn search_registry(
    exec: &dyn CommandExecutor,
    options: &ManagerOptions,
    cache: &MetadataCache,
    query: &str,
) -> Result<Vec<RegistryPackage>, ExtMgrError> {
    if let Some(cached) = cache.get_search(query) {
        tracing::debug!("Search '{query}' answered from cache");
        return Ok(cached.into_iter().map(RegistryPackage::from).collect());
    }

    let args = vec![
        "search".to_string(),
        "--json".to_string(),
        query.to_string(),
    ];
    let stdout = run_registry(exec, options, args, options.search_timeout).await?;
    let raw = serde_json::from_str::<Vec<Value>>(&stdout)
        .map_err(|e| ExtMgrError::Parse(format!("registry search output: {e}")))?;

    let results = raw
        .into_iter()
        .filter_map(|item| serde_json::from_value::<RegistryView>(item).ok())
        .filter_map(|view| {
            let name = view.name?;
            Some(RegistryPackage {
                name,
                version: view.version,
                description: view.description,
            })
        })
        .collect::<Vec<_>>();

    let entries = results
        .iter()
        .map(|result| {
            let size = cache.get(&result.name).and_then(|cached| cached.size);
            (
                result.name.clone(),
                PackageMetadata {
                    description: result.description.clone(),
                    version: result.version.clone(),
                    size,
                },
            )
        })
        .collect::<Vec<_>>();
    let names = results.iter().map(|r| r.name.clone()).collect::<Vec<_>>();
    if let Err(e) = cache.set_many(entries).await {
        tracing::warn!("Failed to persist metadata cache: {e}");
    }
    if let Err(e) = cache.set_search(query, &names).await {
        tracing::warn!("Failed to persist search cache: {e}");
    }
    Ok(results)
}
