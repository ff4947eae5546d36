//! Route segment and render configuration.

use serde::{Deserialize, Serialize};

/// Environment variable consulted by [`RenderConfig::from_env`].
pub const RENDER_MODE_ENV: &str = "EDGE_RENDER_MODE";

/// How a route segment opts in or out of dynamic rendering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DynamicBehavior {
    /// Render statically unless dynamic data is used.
    #[default]
    Auto,
    /// Always render at request time.
    ForceDynamic,
    /// Always render statically; dynamic data reads return empty values.
    ForceStatic,
    /// Fail the static render if dynamic data is used.
    Error,
}

/// Configuration for a single route segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Route pattern (e.g., "/blog/[slug]").
    pub path: String,
    /// Dynamic rendering behavior.
    #[serde(default)]
    pub dynamic: DynamicBehavior,
    /// Revalidation interval in seconds. `None` means never revalidate.
    #[serde(default)]
    pub revalidate: Option<u64>,
}

impl RouteConfig {
    /// Create a new route configuration with default behavior.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            dynamic: DynamicBehavior::Auto,
            revalidate: None,
        }
    }

    /// Set the dynamic behavior.
    pub fn with_dynamic(mut self, dynamic: DynamicBehavior) -> Self {
        self.dynamic = dynamic;
        self
    }

    /// Set the revalidation interval.
    pub fn with_revalidate(mut self, seconds: u64) -> Self {
        self.revalidate = Some(seconds);
        self
    }

    /// Whether dynamic reads should be answered with empty values.
    pub fn force_static(&self) -> bool {
        self.dynamic == DynamicBehavior::ForceStatic
    }

    /// Whether dynamic reads should fail static generation.
    pub fn dynamic_should_error(&self) -> bool {
        self.dynamic == DynamicBehavior::Error
    }
}

/// Whether the server runs with development diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    /// Local development server.
    Development,
    /// Production build or server.
    #[default]
    Production,
}

impl RenderMode {
    /// Parse a mode name. Accepts "development"/"dev" and "production"/"prod".
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Some(Self::Development),
            "production" | "prod" => Some(Self::Production),
            _ => None,
        }
    }
}

/// Render-wide configuration shared by every request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Server mode.
    #[serde(default)]
    pub mode: RenderMode,
    /// Force development diagnostics on or off regardless of mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev_diagnostics: Option<bool>,
}

impl RenderConfig {
    /// Create a configuration for the given mode.
    pub fn new(mode: RenderMode) -> Self {
        Self {
            mode,
            dev_diagnostics: None,
        }
    }

    /// Development configuration.
    pub fn development() -> Self {
        Self::new(RenderMode::Development)
    }

    /// Production configuration.
    pub fn production() -> Self {
        Self::new(RenderMode::Production)
    }

    /// Read the mode from `EDGE_RENDER_MODE`, defaulting to production.
    pub fn from_env() -> Self {
        let mode = std::env::var(RENDER_MODE_ENV)
            .ok()
            .and_then(|v| RenderMode::parse(&v))
            .unwrap_or_default();
        Self::new(mode)
    }

    /// Override whether development diagnostics are enabled.
    pub fn with_dev_diagnostics(mut self, enabled: bool) -> Self {
        self.dev_diagnostics = Some(enabled);
        self
    }

    /// Whether sync-access diagnostics should wrap request handles.
    pub fn dev_diagnostics(&self) -> bool {
        self.dev_diagnostics
            .unwrap_or(self.mode == RenderMode::Development)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_config_flags() {
        let route = RouteConfig::new("/blog/[slug]").with_dynamic(DynamicBehavior::ForceStatic);
        assert!(route.force_static());
        assert!(!route.dynamic_should_error());

        let route = RouteConfig::new("/blog/[slug]").with_dynamic(DynamicBehavior::Error);
        assert!(!route.force_static());
        assert!(route.dynamic_should_error());
    }

    #[test]
    fn test_route_config_from_toml() {
        let route: RouteConfig = toml::from_str(
            r#"
path = "/shop"
dynamic = "force-static"
revalidate = 60
"#,
        )
        .unwrap();

        assert_eq!(route.path, "/shop");
        assert_eq!(route.dynamic, DynamicBehavior::ForceStatic);
        assert_eq!(route.revalidate, Some(60));
    }

    #[test]
    fn test_route_config_defaults() {
        let route: RouteConfig = toml::from_str(r#"path = "/""#).unwrap();
        assert_eq!(route.dynamic, DynamicBehavior::Auto);
        assert_eq!(route.revalidate, None);
    }

    #[test]
    fn test_render_mode_parse() {
        assert_eq!(RenderMode::parse("dev"), Some(RenderMode::Development));
        assert_eq!(RenderMode::parse(" Production "), Some(RenderMode::Production));
        assert_eq!(RenderMode::parse("staging"), None);
    }

    #[test]
    fn test_dev_diagnostics_follow_mode() {
        assert!(RenderConfig::development().dev_diagnostics());
        assert!(!RenderConfig::production().dev_diagnostics());
        assert!(!RenderConfig::development()
            .with_dev_diagnostics(false)
            .dev_diagnostics());
    }
}
