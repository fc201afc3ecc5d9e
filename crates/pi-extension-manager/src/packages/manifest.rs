use std::path::Path;

use serde::Deserialize;

pub const MANIFEST_FILE_NAME: &str = "package.json";

/// The subset of `package.json` the manager reads.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub pi: Option<PiManifest>,
}

/// The `pi` block declaring entrypoints and resources.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PiManifest {
    #[serde(default)]
    pub extensions: Option<Vec<String>>,
    #[serde(default)]
    pub skills: Option<Vec<String>>,
    #[serde(default)]
    pub agents: Option<Vec<String>>,
    #[serde(default)]
    pub prompts: Option<Vec<String>>,
    #[serde(default)]
    pub themes: Option<Vec<String>>,
    #[serde(default)]
    pub default_disabled: bool,
}

/// Read `<package_root>/package.json`. Missing or malformed manifests yield `None`.
pub async fn read_manifest(package_root: &Path) -> Option<PackageManifest> {
    let path = package_root.join(MANIFEST_FILE_NAME);
    let content = tokio::fs::read_to_string(&path).await.ok()?;
    match serde_json::from_str::<PackageManifest>(&content) {
        Ok(manifest) => Some(manifest),
        Err(e) => {
            tracing::debug!("Ignoring malformed manifest {}: {e}", path.display());
            None
        }
    }
}
