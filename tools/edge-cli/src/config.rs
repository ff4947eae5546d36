//! Scenario configuration.

use std::collections::BTreeMap;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use edge_core::{RenderConfig, RouteConfig};
use serde::{Deserialize, Serialize};

/// A scenario file: one route, one request, and the accesses to explain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    /// Render mode and diagnostics.
    #[serde(default)]
    pub render: RenderConfig,

    /// Route segment configuration.
    #[serde(default = "default_route")]
    pub route: RouteConfig,

    /// The incoming request.
    #[serde(default)]
    pub request: RequestConfig,

    /// Accesses to run, in order (e.g. `cookies.get:session`).
    #[serde(default = "default_accesses")]
    pub accesses: Vec<String>,

    /// Phases to run the accesses under.
    #[serde(default = "default_phases")]
    pub phases: Vec<PhaseName>,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            render: RenderConfig::default(),
            route: default_route(),
            request: RequestConfig::default(),
            accesses: default_accesses(),
            phases: default_phases(),
        }
    }
}

impl ScenarioConfig {
    /// Load a scenario from a file.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        Self::parse(path, &content)
    }

    /// Parse scenario text, choosing the format from the file name.
    pub fn parse(path: &str, content: &str) -> Result<Self> {
        if path.ends_with(".json") {
            serde_json::from_str(content)
                .with_context(|| format!("Failed to parse JSON config: {}", path))
        } else {
            toml::from_str(content)
                .with_context(|| format!("Failed to parse TOML config: {}", path))
        }
    }
}

fn default_route() -> RouteConfig {
    RouteConfig::new("/")
}

fn default_accesses() -> Vec<String> {
    vec![
        "cookies".to_string(),
        "headers".to_string(),
        "draft".to_string(),
    ]
}

fn default_phases() -> Vec<PhaseName> {
    PhaseName::ALL.to_vec()
}

/// The incoming request of a scenario.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestConfig {
    /// Request headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Request cookies.
    #[serde(default)]
    pub cookies: BTreeMap<String, String>,

    /// Preview id enabling draft mode persistence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_id: Option<String>,

    /// Whether the request is a prefetch.
    #[serde(default)]
    pub prefetch: bool,

    /// Request sub-phase: `render`, `action`, or `after`.
    #[serde(default)]
    pub phase: RequestPhaseName,

    /// Run the request phase inside a development dry run.
    #[serde(default)]
    pub dry_run: bool,

    /// Forward the request's draft mode into cache scopes.
    #[serde(default)]
    pub forward_draft_mode: bool,
}

/// Request sub-phase as written in scenario files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestPhaseName {
    #[default]
    Render,
    Action,
    After,
}

/// Work unit phase as written in scenario files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PhaseName {
    Request,
    Prerender,
    PrerenderClient,
    PrerenderRuntime,
    PrerenderPpr,
    PrerenderLegacy,
    Cache,
    PrivateCache,
    UnstableCache,
}

impl PhaseName {
    pub const ALL: [PhaseName; 9] = [
        PhaseName::Request,
        PhaseName::Prerender,
        PhaseName::PrerenderClient,
        PhaseName::PrerenderRuntime,
        PhaseName::PrerenderPpr,
        PhaseName::PrerenderLegacy,
        PhaseName::Cache,
        PhaseName::PrivateCache,
        PhaseName::UnstableCache,
    ];

    /// Phase name as written in scenario files.
    pub fn as_str(self) -> &'static str {
        match self {
            PhaseName::Request => "request",
            PhaseName::Prerender => "prerender",
            PhaseName::PrerenderClient => "prerender-client",
            PhaseName::PrerenderRuntime => "prerender-runtime",
            PhaseName::PrerenderPpr => "prerender-ppr",
            PhaseName::PrerenderLegacy => "prerender-legacy",
            PhaseName::Cache => "cache",
            PhaseName::PrivateCache => "private-cache",
            PhaseName::UnstableCache => "unstable-cache",
        }
    }
}

impl FromStr for PhaseName {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        PhaseName::ALL
            .into_iter()
            .find(|phase| phase.as_str() == s)
            .ok_or_else(|| anyhow!("Unknown phase: {}", s))
    }
}

/// Generate a default edge.toml scenario file.
pub fn generate_default_config(route: &str) -> String {
    format!(
        r#"# Edge render scenario

# Accesses run in order under every phase:
#   cookies, cookies.get:NAME, cookies.has:NAME, cookies.size, cookies.set:NAME=VALUE
#   headers, headers.get:NAME, headers.has:NAME, headers.keys
#   draft, draft.is-enabled, draft.enable, draft.disable
accesses = ["cookies.get:session", "headers", "draft.is-enabled"]

phases = [
    "request",
    "prerender",
    "prerender-ppr",
    "prerender-legacy",
    "cache",
    "private-cache",
]

[render]
mode = "development"

[route]
path = "{route}"
# dynamic = "auto" | "force-dynamic" | "force-static" | "error"
dynamic = "auto"
revalidate = 60

[request]
phase = "render"
prefetch = false
dry_run = false
forward_draft_mode = false
# preview_id = "preview-secret"

[request.headers]
accept = "text/html"

[request.cookies]
session = "abc123"
"#,
        route = route
    )
}
