use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The parts of `settings.json` this crate owns. Unknown keys round-trip via `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Installed packages, optionally with resource filters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packages: Option<Vec<PackageSource>>,

    /// Any additional fields not covered above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A `packages` entry: a bare source string, or a source with filter arrays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PackageSource {
    Source(String),
    Filtered(PackageSourceFilter),
}

/// Each array is an ordered log of `+path` / `-path` markers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageSourceFilter {
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skills: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub themes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agents: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Extensions,
    Skills,
    Prompts,
    Themes,
    Agents,
}

impl ResourceKind {
    /// Kinds whose arrays encode the whole-package disabled state.
    pub const CORE: [ResourceKind; 4] = [
        ResourceKind::Extensions,
        ResourceKind::Skills,
        ResourceKind::Prompts,
        ResourceKind::Themes,
    ];

    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::Extensions,
        ResourceKind::Skills,
        ResourceKind::Prompts,
        ResourceKind::Themes,
        ResourceKind::Agents,
    ];

    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "e" | "ext" | "extension" | "extensions" => Some(Self::Extensions),
            "s" | "skill" | "skills" => Some(Self::Skills),
            "p" | "prompt" | "prompts" => Some(Self::Prompts),
            "t" | "theme" | "themes" => Some(Self::Themes),
            "a" | "agent" | "agents" => Some(Self::Agents),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Extensions => "extensions",
            Self::Skills => "skills",
            Self::Prompts => "prompts",
            Self::Themes => "themes",
            Self::Agents => "agents",
        }
    }
}

impl PackageSource {
    pub fn source(&self) -> &str {
        match self {
            Self::Source(source) => source,
            Self::Filtered(filter) => &filter.source,
        }
    }

    /// `None` for a bare source or a kind with no array.
    pub fn markers(&self, kind: ResourceKind) -> Option<&[String]> {
        match self {
            Self::Source(_) => None,
            Self::Filtered(filter) => filter.markers(kind),
        }
    }

    pub fn is_fully_disabled(&self) -> bool {
        match self {
            Self::Source(_) => false,
            Self::Filtered(filter) => filter.is_fully_disabled(),
        }
    }

    /// Convert to the filtered form, keeping existing arrays.
    pub fn into_filter(self) -> PackageSourceFilter {
        match self {
            Self::Source(source) => PackageSourceFilter {
                source,
                ..Default::default()
            },
            Self::Filtered(filter) => filter,
        }
    }
}

impl PackageSourceFilter {
    pub fn markers(&self, kind: ResourceKind) -> Option<&[String]> {
        match kind {
            ResourceKind::Extensions => self.extensions.as_deref(),
            ResourceKind::Skills => self.skills.as_deref(),
            ResourceKind::Prompts => self.prompts.as_deref(),
            ResourceKind::Themes => self.themes.as_deref(),
            ResourceKind::Agents => self.agents.as_deref(),
        }
    }

    pub fn markers_mut(&mut self, kind: ResourceKind) -> &mut Option<Vec<String>> {
        match kind {
            ResourceKind::Extensions => &mut self.extensions,
            ResourceKind::Skills => &mut self.skills,
            ResourceKind::Prompts => &mut self.prompts,
            ResourceKind::Themes => &mut self.themes,
            ResourceKind::Agents => &mut self.agents,
        }
    }

    /// All four core arrays present and empty.
    pub fn is_fully_disabled(&self) -> bool {
        ResourceKind::CORE
            .iter()
            .all(|kind| self.markers(*kind).is_some_and(|m| m.is_empty()))
    }
}
