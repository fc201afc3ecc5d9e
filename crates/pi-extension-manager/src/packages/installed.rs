use std::collections::HashSet;
use std::path::PathBuf;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::{ManagerOptions, ScopeDirs};
use crate::exec::{CommandExecutor, ExecOptions};
use crate::packages::manifest::read_manifest;
use crate::packages::source::{
    REGISTRY_PREFIX, SourceKind, VCS_PREFIX, classify, split_registry_spec,
    split_vcs_repo_and_ref, strip_annotations,
};
use crate::types::Scope;

static ENTRY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[-*•]\s*)?((?:npm:|git:|https?://|/|\./|\.\./)\S.*)$")
        .expect("valid entry regex")
});

/// Lines indented at least this far carry the previous entry's resolved path.
const CONTINUATION_INDENT: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledPackage {
    pub source: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub scope: Scope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl InstalledPackage {
    pub fn kind(&self) -> SourceKind {
        classify(&self.source)
    }
}

/// How repeated listings of the same package collapse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupeStrategy {
    /// Byte-identical sources collapse, regardless of scope.
    Source,
    /// Sources collapse, then anything sharing a derived name.
    Name,
    /// Identical sources collapse only within one scope.
    ScopedSource,
}

fn scope_header(line: &str) -> Option<Scope> {
    let lowered = line.trim().trim_end_matches(':').trim().to_ascii_lowercase();
    match lowered.as_str() {
        "global" | "global packages" | "user" | "user packages" => Some(Scope::Global),
        "project" | "project packages" | "local" | "local packages" => Some(Scope::Project),
        _ => None,
    }
}

fn looks_like_path(value: &str) -> bool {
    let bytes = value.as_bytes();
    value.starts_with('/')
        || value.starts_with('~')
        || value.starts_with("\\\\")
        || (bytes.len() >= 3 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':')
}

/// Name and version derived from the source string alone.
pub fn derive_name_and_version(source: &str) -> (String, Option<String>) {
    let source = strip_annotations(source);
    match classify(source) {
        SourceKind::Registry => {
            let spec = split_registry_spec(source.trim_start_matches(REGISTRY_PREFIX));
            (spec.name, spec.version)
        }
        SourceKind::Vcs => {
            let raw = source.strip_prefix(VCS_PREFIX).unwrap_or(source);
            let name = if raw.starts_with("git@") {
                split_vcs_repo_and_ref(raw).repo
            } else {
                raw.split('@').next().unwrap_or(raw).to_string()
            };
            (name, None)
        }
        SourceKind::Local | SourceKind::Unknown => (local_name(source), None),
    }
}

fn local_name(source: &str) -> String {
    let normalized = source.replace('\\', "/");
    let trimmed = normalized.trim_end_matches('/');
    if let Some((_, tail)) = trimmed.rsplit_once("node_modules/")
        && !tail.is_empty()
    {
        return tail.to_string();
    }
    trimmed
        .rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or(trimmed)
        .to_string()
}

/// Parse the host's `list` output. Pure; no manifest hydration.
pub fn parse_installed_packages(output: &str, strategy: DedupeStrategy) -> Vec<InstalledPackage> {
    let mut packages = Vec::<InstalledPackage>::new();
    let mut seen_sources = HashSet::<(Option<Scope>, String)>::new();
    let mut seen_names = HashSet::<String>::new();
    let mut current_scope = Scope::Global;
    let mut pending: Option<usize> = None;

    for line in output.lines() {
        if line.trim().is_empty() {
            continue;
        }

        let indent = line.len() - line.trim_start().len();
        if indent >= CONTINUATION_INDENT {
            let value = line.trim();
            if let Some(index) = pending.take()
                && looks_like_path(value)
            {
                packages[index].resolved_path = Some(PathBuf::from(value));
            }
            continue;
        }
        pending = None;

        let trimmed = line.trim();
        if let Some(scope) = scope_header(trimmed) {
            current_scope = scope;
            continue;
        }

        let Some(source) = ENTRY_RE
            .captures(trimmed)
            .and_then(|cap| cap.get(1))
            .map(|m| strip_annotations(m.as_str()).to_string())
        else {
            continue;
        };

        let source_key = match strategy {
            DedupeStrategy::ScopedSource => (Some(current_scope), source.clone()),
            DedupeStrategy::Source | DedupeStrategy::Name => (None, source.clone()),
        };
        if !seen_sources.insert(source_key) {
            continue;
        }

        let (name, version) = derive_name_and_version(&source);
        if strategy == DedupeStrategy::Name && !seen_names.insert(name.clone()) {
            continue;
        }

        packages.push(InstalledPackage {
            source,
            name,
            version,
            scope: current_scope,
            resolved_path: None,
            description: None,
            size: None,
        });
        pending = Some(packages.len() - 1);
    }

    packages
}

/// Fill name/version/description from `package.json` for entries lacking a version.
pub async fn hydrate_from_manifests(packages: &mut [InstalledPackage]) {
    for package in packages.iter_mut() {
        if package.version.is_some() {
            continue;
        }
        let Some(root) = package.resolved_path.clone() else {
            continue;
        };
        let Some(manifest) = read_manifest(&root).await else {
            continue;
        };
        if let Some(name) = manifest.name.filter(|n| !n.is_empty()) {
            package.name = name;
        }
        package.version = manifest.version;
        if manifest.description.is_some() {
            package.description = manifest.description;
        }
    }
}

async fn run_list(
    exec: &dyn CommandExecutor,
    options: &ManagerOptions,
    dirs: &ScopeDirs,
) -> Option<String> {
    let output = exec
        .exec(
            &options.host_command,
            &["list".to_string()],
            ExecOptions::with_timeout(options.list_timeout).cwd(&dirs.cwd),
        )
        .await;
    if !output.success() {
        tracing::debug!("`{} list` failed: {}", options.host_command, output.diagnostic());
        return None;
    }
    Some(output.stdout)
}

async fn list_with(
    exec: &dyn CommandExecutor,
    options: &ManagerOptions,
    dirs: &ScopeDirs,
    strategy: DedupeStrategy,
) -> Vec<InstalledPackage> {
    let Some(stdout) = run_list(exec, options, dirs).await else {
        return Vec::new();
    };
    let mut packages = parse_installed_packages(&stdout, strategy);
    hydrate_from_manifests(&mut packages).await;
    packages
}

/// Installed packages across both scopes, one record per derived name.
/// A failed listing is reported as no packages.
pub async fn list_installed_packages(
    exec: &dyn CommandExecutor,
    options: &ManagerOptions,
    dirs: &ScopeDirs,
) -> Vec<InstalledPackage> {
    list_with(exec, options, dirs, DedupeStrategy::Name).await
}

/// Like [`list_installed_packages`] but keeps a package listed in both scopes twice.
pub async fn list_installed_packages_all_scopes(
    exec: &dyn CommandExecutor,
    options: &ManagerOptions,
    dirs: &ScopeDirs,
) -> Vec<InstalledPackage> {
    list_with(exec, options, dirs, DedupeStrategy::ScopedSource).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::testing::FakeExecutor;

    #[test]
    fn test_parse_scope_headers() {
        let output = "Global:\n  npm:demo@1.0.0\nProject:\n  ./vendor/demo\n";
        let packages = parse_installed_packages(output, DedupeStrategy::Source);
        assert_eq!(packages.len(), 2);
        assert_eq!(packages[0].source, "npm:demo@1.0.0");
        assert_eq!(packages[0].scope, Scope::Global);
        assert_eq!(packages[0].name, "demo");
        assert_eq!(packages[0].version.as_deref(), Some("1.0.0"));
        assert_eq!(packages[1].source, "./vendor/demo");
        assert_eq!(packages[1].scope, Scope::Project);
        assert_eq!(packages[1].name, "demo");
    }

    #[test]
    fn test_parse_continuation_sets_resolved_path() {
        let output = "User packages:\n  npm:@scope/tool\n    /home/u/.npm/node_modules/@scope/tool\n  git:github.com/org/repo@v2\n";
        let packages = parse_installed_packages(output, DedupeStrategy::Source);
        assert_eq!(packages.len(), 2);
        assert_eq!(packages[0].name, "@scope/tool");
        assert_eq!(
            packages[0].resolved_path,
            Some(PathBuf::from("/home/u/.npm/node_modules/@scope/tool"))
        );
        assert_eq!(packages[1].name, "github.com/org/repo");
        assert!(packages[1].resolved_path.is_none());
    }

    #[test]
    fn test_parse_ignores_noise_and_bullets() {
        let output = "No header line here\n- npm:a (filtered)\n• https://github.com/org/b\nsomething else\n";
        let packages = parse_installed_packages(output, DedupeStrategy::Source);
        let sources = packages.iter().map(|p| p.source.as_str()).collect::<Vec<_>>();
        assert_eq!(sources, vec!["npm:a", "https://github.com/org/b"]);
    }

    #[test]
    fn test_dedupe_strategies() {
        let output = "Global:\n  npm:demo\n  npm:demo\n  /opt/lib/node_modules/demo\nProject:\n  npm:demo\n";

        let by_source = parse_installed_packages(output, DedupeStrategy::Source);
        assert_eq!(by_source.len(), 2);

        let by_name = parse_installed_packages(output, DedupeStrategy::Name);
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].source, "npm:demo");

        let scoped = parse_installed_packages(output, DedupeStrategy::ScopedSource);
        assert_eq!(scoped.len(), 3);
        assert_eq!(scoped[2].scope, Scope::Project);
    }

    #[test]
    fn test_local_name_strips_node_modules() {
        assert_eq!(
            derive_name_and_version("/usr/lib/node_modules/@scope/pkg").0,
            "@scope/pkg"
        );
        assert_eq!(derive_name_and_version("../ext/my-ext/").0, "my-ext");
        assert_eq!(
            derive_name_and_version("git@github.com:org/repo@main").0,
            "git@github.com:org/repo"
        );
    }

    #[tokio::test]
    async fn test_hydrate_reads_manifest_when_version_missing() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("package.json"),
            r#"{"name":"real-name","version":"0.3.1","description":"Does things"}"#,
        )
        .unwrap();
        let mut packages = vec![InstalledPackage {
            source: "./vendor/x".to_string(),
            name: "x".to_string(),
            version: None,
            scope: Scope::Project,
            resolved_path: Some(tmp.path().to_path_buf()),
            description: None,
            size: None,
        }];
        hydrate_from_manifests(&mut packages).await;
        assert_eq!(packages[0].name, "real-name");
        assert_eq!(packages[0].version.as_deref(), Some("0.3.1"));
        assert_eq!(packages[0].description.as_deref(), Some("Does things"));
    }

    #[tokio::test]
    async fn test_list_failure_is_empty() {
        let exec = FakeExecutor::default();
        let packages = list_installed_packages(
            &exec,
            &ManagerOptions::default(),
            &ScopeDirs::new("/agent", "/cwd"),
        )
        .await;
        assert!(packages.is_empty());
        assert_eq!(exec.call_count("pi list"), 1);
    }

    #[tokio::test]
    async fn test_list_all_scopes_keeps_cross_scope_duplicates() {
        let exec = FakeExecutor::default().reply(
            "pi list",
            0,
            "Global:\n  npm:demo@1.0.0\nProject:\n  npm:demo@1.0.0\n",
        );
        let dirs = ScopeDirs::new("/agent", "/cwd");
        let options = ManagerOptions::default();
        assert_eq!(list_installed_packages(&exec, &options, &dirs).await.len(), 1);
        assert_eq!(
            list_installed_packages_all_scopes(&exec, &options, &dirs)
                .await
                .len(),
            2
        );
    }
}
