//! Scenario configuration commands.

use std::fs;

use anyhow::{bail, Result};

use super::explain::Access;
use super::{ConfigArgs, ConfigCommand};
use crate::config::{generate_default_config, ScenarioConfig};
use crate::context::Context;

/// Run the config command.
pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Show => show_config(ctx).await,
        ConfigCommand::Init { route, force } => init_config(&route, force, ctx).await,
        ConfigCommand::Validate => validate_config(ctx).await,
    }
}

async fn show_config(ctx: &Context) -> Result<()> {
    if ctx.output.is_json() {
        ctx.output.json(&ctx.config);
        return Ok(());
    }

    let config = &ctx.config;
    ctx.output.header("Current Scenario");
    match &ctx.config_path {
        Some(path) => ctx.output.kv("file", &path.display().to_string()),
        None => ctx.output.kv("file", "(defaults)"),
    }

    ctx.output.info("[render]");
    ctx.output.kv("mode", &format!("{:?}", config.render.mode));
    ctx.output.kv(
        "dev diagnostics",
        &config.render.dev_diagnostics().to_string(),
    );

    ctx.output.info("[route]");
    ctx.output.kv("path", &config.route.path);
    ctx.output.kv("dynamic", &format!("{:?}", config.route.dynamic));
    ctx.output.kv(
        "revalidate",
        &config
            .route
            .revalidate
            .map_or_else(|| "never".to_string(), |s| s.to_string()),
    );

    ctx.output.info("[request]");
    ctx.output.kv("phase", &format!("{:?}", config.request.phase));
    ctx.output.kv("prefetch", &config.request.prefetch.to_string());
    ctx.output.kv("dry run", &config.request.dry_run.to_string());
    if let Some(preview_id) = &config.request.preview_id {
        ctx.output.kv("preview id", preview_id);
    }
    for (name, value) in &config.request.headers {
        ctx.output.kv(&format!("header {}", name), value);
    }
    for (name, value) in &config.request.cookies {
        ctx.output.kv(&format!("cookie {}", name), value);
    }

    ctx.output.info("Accesses:");
    for access in &config.accesses {
        ctx.output.list_item(access);
    }
    ctx.output.info("Phases:");
    for phase in &config.phases {
        ctx.output.list_item(phase.as_str());
    }

    Ok(())
}

async fn init_config(route: &str, force: bool, ctx: &Context) -> Result<()> {
    let config_path = ctx.cwd.join("edge.toml");

    if config_path.exists() && !force {
        bail!(
            "Config file already exists: {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    fs::write(&config_path, generate_default_config(route))?;

    ctx.output.success(&format!("Created: {}", config_path.display()));

    Ok(())
}

async fn validate_config(ctx: &Context) -> Result<()> {
    ctx.output.header("Validating scenario");

    let (errors, warnings) = check_scenario(&ctx.config);

    if errors.is_empty() && warnings.is_empty() {
        ctx.output.success("Scenario is valid");
        return Ok(());
    }

    for error in &errors {
        ctx.output.error(&format!("Error: {}", error));
    }

    for warning in &warnings {
        ctx.output.warn(&format!("Warning: {}", warning));
    }

    if !errors.is_empty() {
        bail!("Scenario has {} error(s)", errors.len());
    }

    ctx.output.success("Scenario is valid (with warnings)");

    Ok(())
}

/// Errors and warnings for a scenario.
fn check_scenario(config: &ScenarioConfig) -> (Vec<String>, Vec<String>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if !config.route.path.starts_with('/') {
        errors.push("route.path must start with '/'".to_string());
    }

    for (i, access) in config.accesses.iter().enumerate() {
        if let Err(e) = access.parse::<Access>() {
            errors.push(format!("accesses[{}]: {}", i, e));
        }
    }

    if config.accesses.is_empty() {
        warnings.push("accesses is empty; explain has nothing to run".to_string());
    }
    if config.phases.is_empty() {
        warnings.push("phases is empty; explain has nothing to run".to_string());
    }
    if config.request.dry_run && !config.render.dev_diagnostics() {
        warnings.push("request.dry_run only matters with development diagnostics".to_string());
    }

    (errors, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_scenario_is_valid() {
        let config = ScenarioConfig::parse("edge.toml", &generate_default_config("/shop")).unwrap();
        let (errors, warnings) = check_scenario(&config);
        assert!(errors.is_empty(), "{:?}", errors);
        assert!(warnings.is_empty(), "{:?}", warnings);
    }

    #[test]
    fn test_invalid_route_and_access_are_errors() {
        let mut config = ScenarioConfig::default();
        config.route.path = "shop".to_string();
        config.accesses = vec!["cookies".to_string(), "cookies.sett:a=b".to_string()];

        let (errors, _) = check_scenario(&config);
        assert_eq!(errors.len(), 2);
        assert!(errors[1].starts_with("accesses[1]"));
    }

    #[test]
    fn test_dry_run_without_diagnostics_warns() {
        let mut config = ScenarioConfig::default();
        config.request.dry_run = true;

        let (errors, warnings) = check_scenario(&config);
        assert!(errors.is_empty());
        assert_eq!(warnings.len(), 1);
    }
}
