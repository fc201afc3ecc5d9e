//! Entrypoints and auxiliary resources exposed by installed packages.
//!
//! Paths come from the manifest's `pi` block when declared, otherwise from
//! the conventional layout (`index.{ts,js}`, `skills/`, `prompts/`,
//! `themes/`, `agents/`). Enabled state is never read from the filesystem;
//! it is resolved against the scope's settings markers.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use futures::future::join_all;
use serde::Serialize;

use crate::config::ScopeDirs;
use crate::packages::InstalledPackage;
use crate::packages::manifest::{PiManifest, read_manifest};
use crate::packages::source::{SourceKind, strip_annotations};
use crate::settings::filters::{find_package, normalize_marker_path, resolve_state};
use crate::settings::types::{ResourceKind, Settings};
use crate::types::{ExtensionState, Scope};

const INDEX_FILES: [&str; 2] = ["index.ts", "index.js"];
const SKILL_FILE_NAME: &str = "SKILL.md";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageResourceEntry {
    /// `kind:scope:packageSource:relativePath`
    pub id: String,
    pub kind: ResourceKind,
    pub scope: Scope,
    pub package_source: String,
    pub package_name: String,
    /// Forward-slash path relative to the package root, as stored in markers.
    pub relative_path: String,
    pub absolute_path: PathBuf,
    pub state: ExtensionState,
    /// State of a path no marker mentions.
    pub default_state: ExtensionState,
}

impl PackageResourceEntry {
    pub fn is_entrypoint(&self) -> bool {
        self.kind == ResourceKind::Extensions
    }
}

fn to_posix_string(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn relative_posix(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .map(to_posix_string)
        .unwrap_or_else(|_| to_posix_string(path))
}

fn expand_home(raw: &str) -> Option<PathBuf> {
    let rest = raw.strip_prefix("~/").or_else(|| raw.strip_prefix("~\\"))?;
    dirs::home_dir().map(|home| home.join(rest))
}

/// On-disk root of an installed package.
///
/// The host-reported resolved path wins; local sources are otherwise
/// resolved relative to their scope's base directory.
pub fn package_root(package: &InstalledPackage, dirs: &ScopeDirs) -> Option<PathBuf> {
    if let Some(resolved) = &package.resolved_path {
        return Some(resolved.clone());
    }
    if package.kind() != SourceKind::Local {
        return None;
    }
    let source = strip_annotations(&package.source);
    let raw = source.strip_prefix("file://").unwrap_or(source);
    if let Some(home) = expand_home(raw) {
        return Some(home);
    }
    let path = PathBuf::from(raw);
    if path.is_absolute() {
        Some(path)
    } else {
        Some(dirs.base(package.scope).join(path))
    }
}

fn declared_paths(pi: &PiManifest, kind: ResourceKind) -> Option<&[String]> {
    match kind {
        ResourceKind::Extensions => pi.extensions.as_deref(),
        ResourceKind::Skills => pi.skills.as_deref(),
        ResourceKind::Prompts => pi.prompts.as_deref(),
        ResourceKind::Themes => pi.themes.as_deref(),
        ResourceKind::Agents => pi.agents.as_deref(),
    }
}

fn conventional_dir(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Extensions => "extensions",
        ResourceKind::Skills => "skills",
        ResourceKind::Prompts => "prompts",
        ResourceKind::Themes => "themes",
        ResourceKind::Agents => "agents",
    }
}

fn file_extension(kind: ResourceKind) -> &'static [&'static str] {
    match kind {
        ResourceKind::Extensions => &["ts", "js"],
        ResourceKind::Themes => &["json"],
        ResourceKind::Skills | ResourceKind::Prompts | ResourceKind::Agents => &["md"],
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok_and(|m| m.is_file())
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok_and(|m| m.is_dir())
}

async fn first_index(dir: &Path) -> Option<PathBuf> {
    for index in INDEX_FILES {
        let candidate = dir.join(index);
        if is_file(&candidate).await {
            return Some(candidate);
        }
    }
    None
}

/// Sorted, non-hidden files of `dir` with one of `extensions`; for skills,
/// also `<sub>/SKILL.md`.
async fn collect_directory_files(dir: &Path, kind: ResourceKind) -> Vec<PathBuf> {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return Vec::new();
    };
    let extensions = file_extension(kind);
    let mut files = Vec::<PathBuf>::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        let path = entry.path();
        if is_file(&path).await {
            let matches = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| extensions.iter().any(|e| ext.eq_ignore_ascii_case(e)));
            if matches {
                files.push(path);
            }
        } else if kind == ResourceKind::Skills {
            let skill = path.join(SKILL_FILE_NAME);
            if is_file(&skill).await {
                files.push(skill);
            }
        } else if kind == ResourceKind::Extensions
            && let Some(index) = first_index(&path).await
        {
            files.push(index);
        }
    }
    files.sort_by_key(|path| to_posix_string(path));
    files
}

/// Absolute paths of every resource of `kind` in one package.
async fn collect_resource_paths(
    root: &Path,
    pi: Option<&PiManifest>,
    kind: ResourceKind,
) -> Vec<PathBuf> {
    let Some(declared) = pi.and_then(|pi| declared_paths(pi, kind)) else {
        return match kind {
            ResourceKind::Extensions => match first_index(root).await {
                Some(index) => vec![index],
                None => collect_directory_files(&root.join(conventional_dir(kind)), kind).await,
            },
            _ => collect_directory_files(&root.join(conventional_dir(kind)), kind).await,
        };
    };

    let mut paths = Vec::<PathBuf>::new();
    for entry in declared {
        let relative = normalize_marker_path(entry);
        if relative.is_empty() || entry.trim_start().starts_with(['!', '-']) {
            continue;
        }
        let path = root.join(&relative);
        if is_file(&path).await {
            paths.push(path);
        } else if is_dir(&path).await {
            match kind {
                ResourceKind::Extensions => match first_index(&path).await {
                    Some(index) => paths.push(index),
                    None => paths.extend(collect_directory_files(&path, kind).await),
                },
                _ => paths.extend(collect_directory_files(&path, kind).await),
            }
        } else {
            tracing::debug!("Declared {} path {} not found", kind.label(), path.display());
        }
    }
    paths
}

async fn discover_for_package(
    package: &InstalledPackage,
    dirs: &ScopeDirs,
    settings: Option<&Settings>,
) -> Vec<PackageResourceEntry> {
    let Some(root) = package_root(package, dirs) else {
        return Vec::new();
    };
    if !is_dir(&root).await {
        tracing::debug!("Package root {} is missing", root.display());
        return Vec::new();
    }
    let manifest = read_manifest(&root).await;
    let pi = manifest.as_ref().and_then(|m| m.pi.as_ref());
    let default_disabled = pi.is_some_and(|pi| pi.default_disabled);
    let package_entry = settings.and_then(|s| find_package(s, &package.source));

    let mut entries = Vec::new();
    for kind in ResourceKind::ALL {
        let default_state = if kind == ResourceKind::Extensions && default_disabled {
            ExtensionState::Disabled
        } else {
            ExtensionState::Enabled
        };
        let mut seen = HashSet::<String>::new();
        for path in collect_resource_paths(&root, pi, kind).await {
            let relative_path = relative_posix(&root, &path);
            if !seen.insert(relative_path.clone()) {
                continue;
            }
            entries.push(PackageResourceEntry {
                id: format!(
                    "{}:{}:{}:{}",
                    kind.label(),
                    package.scope,
                    package.source,
                    relative_path
                ),
                kind,
                scope: package.scope,
                package_source: package.source.clone(),
                package_name: package.name.clone(),
                state: resolve_state(package_entry, kind, &relative_path, default_state),
                relative_path,
                absolute_path: path,
                default_state,
            });
        }
    }
    entries
}

/// Resolve every package's entrypoints and resources concurrently.
///
/// `settings` holds one snapshot per scope; a package's state is read from
/// the snapshot of the scope it is installed in.
pub async fn discover_package_resources(
    packages: &[InstalledPackage],
    dirs: &ScopeDirs,
    settings: &HashMap<Scope, Settings>,
) -> Vec<PackageResourceEntry> {
    join_all(
        packages
            .iter()
            .map(|package| discover_for_package(package, dirs, settings.get(&package.scope))),
    )
    .await
    .into_iter()
    .flatten()
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::types::{PackageSource, PackageSourceFilter};

    fn package(source: &str, root: &Path, scope: Scope) -> InstalledPackage {
        InstalledPackage {
            source: source.to_string(),
            name: "demo".to_string(),
            version: Some("1.0.0".to_string()),
            scope,
            resolved_path: Some(root.to_path_buf()),
            description: None,
            size: None,
        }
    }

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn test_declared_and_conventional_resources() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("demo");
        write(
            &root.join("package.json"),
            r#"{"name":"demo","pi":{"extensions":["./src/main.ts","tools"]}}"#,
        );
        write(&root.join("src/main.ts"), "");
        write(&root.join("tools/index.js"), "");
        write(&root.join("index.ts"), "");
        write(&root.join("skills/review.md"), "");
        write(&root.join("skills/deploy/SKILL.md"), "");
        write(&root.join("themes/dark.json"), "{}");
        write(&root.join("themes/readme.txt"), "");

        let dirs = ScopeDirs::new(tmp.path().join("agent"), tmp.path().join("proj"));
        let mut settings = HashMap::new();
        settings.insert(
            Scope::Global,
            Settings {
                packages: Some(vec![PackageSource::Filtered(PackageSourceFilter {
                    source: "npm:demo".to_string(),
                    extensions: Some(vec!["-src/main.ts".to_string()]),
                    ..Default::default()
                })]),
                ..Default::default()
            },
        );

        let found = discover_package_resources(
            &[package("npm:demo", &root, Scope::Global)],
            &dirs,
            &settings,
        )
        .await;
        let summary = found
            .iter()
            .map(|e| (e.kind, e.relative_path.as_str(), e.state))
            .collect::<Vec<_>>();
        assert_eq!(
            summary,
            vec![
                (ResourceKind::Extensions, "src/main.ts", ExtensionState::Disabled),
                (ResourceKind::Extensions, "tools/index.js", ExtensionState::Enabled),
                (ResourceKind::Skills, "skills/deploy/SKILL.md", ExtensionState::Enabled),
                (ResourceKind::Skills, "skills/review.md", ExtensionState::Enabled),
                (ResourceKind::Themes, "themes/dark.json", ExtensionState::Enabled),
            ]
        );
        assert_eq!(found[0].id, "extensions:global:npm:demo:src/main.ts");
        assert_eq!(found[0].absolute_path, root.join("src/main.ts"));
    }

    #[tokio::test]
    async fn test_index_fallback_and_default_disabled() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("pkg");
        write(&root.join("package.json"), r#"{"pi":{"defaultDisabled":true}}"#);
        write(&root.join("index.js"), "");
        write(&root.join("prompts/fix.md"), "");

        let dirs = ScopeDirs::new(tmp.path().join("agent"), tmp.path().join("proj"));
        let found = discover_package_resources(
            &[package("npm:pkg", &root, Scope::Project)],
            &dirs,
            &HashMap::new(),
        )
        .await;
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].relative_path, "index.js");
        assert_eq!(found[0].state, ExtensionState::Disabled);
        assert_eq!(found[0].default_state, ExtensionState::Disabled);
        // defaultDisabled only governs entrypoints.
        assert_eq!(found[1].kind, ResourceKind::Prompts);
        assert_eq!(found[1].state, ExtensionState::Enabled);
    }

    #[tokio::test]
    async fn test_fully_disabled_package_disables_everything() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("pkg");
        write(&root.join("index.ts"), "");
        write(&root.join("skills/a.md"), "");

        let dirs = ScopeDirs::new(tmp.path().join("agent"), tmp.path().join("proj"));
        let mut settings = Settings::default();
        crate::settings::filters::apply_package_disabled(&mut settings, "npm:pkg", true);
        let snapshots = HashMap::from([(Scope::Global, settings)]);

        let found = discover_package_resources(
            &[package("npm:pkg", &root, Scope::Global)],
            &dirs,
            &snapshots,
        )
        .await;
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|e| e.state == ExtensionState::Disabled));
    }

    #[test]
    fn test_local_package_root_resolves_against_scope_base() {
        let dirs = ScopeDirs::new("/home/u/.pi/agent", "/work/proj");
        let mut pkg = package("./vendor/tool", Path::new("/unused"), Scope::Project);
        pkg.resolved_path = None;
        assert_eq!(
            package_root(&pkg, &dirs),
            Some(dirs.base(Scope::Project).join("./vendor/tool"))
        );

        pkg.source = "/opt/tool".to_string();
        assert_eq!(package_root(&pkg, &dirs), Some(PathBuf::from("/opt/tool")));

        pkg.source = "npm:tool".to_string();
        assert_eq!(package_root(&pkg, &dirs), None);
    }
}
