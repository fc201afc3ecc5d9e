use once_cell::sync::Lazy;
use regex::Regex;

pub const REGISTRY_PREFIX: &str = "npm:";
pub const VCS_PREFIX: &str = "git:";

static SCHEME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.-]*://").expect("valid scheme regex"));
static SCP_VCS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.-]+@[A-Za-z0-9_.-]+:.+$").expect("valid scp regex"));

/// Trailing labels the host appends when listing configured packages.
const SOURCE_ANNOTATIONS: [&str; 2] = [" (filtered)", " (pinned)"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Registry,
    Vcs,
    Local,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrySpec {
    pub name: String,
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VcsSpec {
    pub repo: String,
    pub reference: Option<String>,
}

/// Trim and drop ` (filtered)` / ` (pinned)` suffixes.
pub fn strip_annotations(source: &str) -> &str {
    let mut value = source.trim();
    loop {
        let Some(stripped) = SOURCE_ANNOTATIONS
            .iter()
            .find_map(|suffix| value.strip_suffix(suffix))
        else {
            return value;
        };
        value = stripped.trim_end();
    }
}

pub fn classify(source: &str) -> SourceKind {
    let value = strip_annotations(source);
    if value.starts_with(REGISTRY_PREFIX) {
        return SourceKind::Registry;
    }
    if is_vcs_like(value) {
        return SourceKind::Vcs;
    }
    if is_local_path_like(value) {
        return SourceKind::Local;
    }
    SourceKind::Unknown
}

fn is_vcs_like(value: &str) -> bool {
    if value.starts_with(VCS_PREFIX) {
        return true;
    }
    if value.starts_with("file://") {
        return false;
    }
    SCHEME_RE.is_match(value) || SCP_VCS_RE.is_match(value)
}

fn is_local_path_like(value: &str) -> bool {
    value.starts_with('/')
        || value.starts_with("./")
        || value.starts_with("../")
        || value.starts_with(".\\")
        || value.starts_with("..\\")
        || value == "~"
        || value.starts_with("~/")
        || value.starts_with("file://")
        || is_windows_absolute_path(value)
}

/// Bare names are assumed to be registry packages.
pub fn normalize_for_install(source: &str) -> String {
    let trimmed = source.trim();
    match classify(trimmed) {
        SourceKind::Unknown => format!("{REGISTRY_PREFIX}{trimmed}"),
        _ => trimmed.to_string(),
    }
}

/// Split `name@version`, keeping a leading scope `@` with the name.
pub fn split_registry_spec(spec: &str) -> RegistrySpec {
    let spec = spec.trim();
    match spec.rfind('@') {
        Some(index) if index > 0 => {
            let version = &spec[index + 1..];
            RegistrySpec {
                name: spec[..index].to_string(),
                version: (!version.is_empty()).then(|| version.to_string()),
            }
        }
        _ => RegistrySpec {
            name: spec.to_string(),
            version: None,
        },
    }
}

/// Split `repo@ref`. A candidate ref containing `/` or `:` stays part of the repo.
pub fn split_vcs_repo_and_ref(spec: &str) -> VcsSpec {
    let spec = spec.trim();
    if let Some(index) = spec.rfind('@')
        && index > 0
    {
        let candidate = &spec[index + 1..];
        if !candidate.is_empty() && !candidate.contains('/') && !candidate.contains(':') {
            return VcsSpec {
                repo: spec[..index].to_string(),
                reference: Some(candidate.to_string()),
            };
        }
    }
    VcsSpec {
        repo: spec.to_string(),
        reference: None,
    }
}

/// Package name of an `npm:` source, without version.
pub fn registry_name(source: &str) -> Option<String> {
    let spec = strip_annotations(source).strip_prefix(REGISTRY_PREFIX)?;
    let name = split_registry_spec(spec).name;
    (!name.is_empty()).then_some(name)
}

fn is_windows_absolute_path(path: &str) -> bool {
    let bytes = path.as_bytes();
    let drive_prefixed = bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes[2] == b'\\' || bytes[2] == b'/');
    drive_prefixed || path.starts_with("\\\\")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_kinds() {
        assert_eq!(classify("npm:@scope/pkg@1.0.0"), SourceKind::Registry);
        assert_eq!(classify("git@github.com:org/repo.git"), SourceKind::Vcs);
        assert_eq!(classify("git:github.com/org/repo@v1"), SourceKind::Vcs);
        assert_eq!(classify("https://github.com/org/repo"), SourceKind::Vcs);
        assert_eq!(classify("./vendor/x"), SourceKind::Local);
        assert_eq!(classify("../x"), SourceKind::Local);
        assert_eq!(classify("~/ext"), SourceKind::Local);
        assert_eq!(classify("/opt/ext"), SourceKind::Local);
        assert_eq!(classify("file:///opt/ext"), SourceKind::Local);
        assert_eq!(classify("C:\\ext"), SourceKind::Local);
        assert_eq!(classify("\\\\server\\share"), SourceKind::Local);
        assert_eq!(classify("demo"), SourceKind::Unknown);
    }

    #[test]
    fn test_classify_strips_annotations() {
        assert_eq!(classify("npm:demo (filtered)"), SourceKind::Registry);
        assert_eq!(classify("./local (pinned)"), SourceKind::Local);
        assert_eq!(strip_annotations(" npm:x (filtered) (pinned) "), "npm:x");
    }

    #[test]
    fn test_normalize_for_install() {
        assert_eq!(normalize_for_install("demo"), "npm:demo");
        assert_eq!(normalize_for_install("@scope/demo"), "npm:@scope/demo");
        assert_eq!(normalize_for_install("npm:demo"), "npm:demo");
        assert_eq!(normalize_for_install("./vendor/x"), "./vendor/x");
        assert_eq!(
            normalize_for_install("git@github.com:org/repo"),
            "git@github.com:org/repo"
        );
    }

    #[test]
    fn test_split_registry_spec() {
        assert_eq!(
            split_registry_spec("@scope/name@1.2.3"),
            RegistrySpec {
                name: "@scope/name".to_string(),
                version: Some("1.2.3".to_string())
            }
        );
        assert_eq!(
            split_registry_spec("@scope/name"),
            RegistrySpec {
                name: "@scope/name".to_string(),
                version: None
            }
        );
        assert_eq!(
            split_registry_spec("name@1.2.3"),
            RegistrySpec {
                name: "name".to_string(),
                version: Some("1.2.3".to_string())
            }
        );
        assert_eq!(split_registry_spec("name").version, None);
    }

    #[test]
    fn test_split_vcs_repo_and_ref() {
        let spec = split_vcs_repo_and_ref("github.com/org/repo@v1.2");
        assert_eq!(spec.repo, "github.com/org/repo");
        assert_eq!(spec.reference.as_deref(), Some("v1.2"));

        let ssh = split_vcs_repo_and_ref("git@github.com:org/repo");
        assert_eq!(ssh.repo, "git@github.com:org/repo");
        assert_eq!(ssh.reference, None);

        let ssh_ref = split_vcs_repo_and_ref("git@github.com:org/repo@main");
        assert_eq!(ssh_ref.repo, "git@github.com:org/repo");
        assert_eq!(ssh_ref.reference.as_deref(), Some("main"));

        let slash = split_vcs_repo_and_ref("https://user@host/org/repo");
        assert_eq!(slash.reference, None);
    }

    #[test]
    fn test_registry_name() {
        assert_eq!(
            registry_name("npm:@scope/pkg@2.0.0").as_deref(),
            Some("@scope/pkg")
        );
        assert_eq!(registry_name("./local"), None);
    }
}
