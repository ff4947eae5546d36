//! Explain how request data accesses are answered in each phase.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context as _, Result};
use edge_core::{Cookie, MemoryCookies, MemoryHeaders, Method, RequestContext, RequestId};
use edge_observability::{LogFormat, StructuredLogger};
use edge_render::{
    AccessCoordinator, AccessError, AccessScope, CacheUnit, CollectingSink, DiagnosticSink,
    DynamicTracking, HangingHandle, LegacyUnit, LoggerSink, PprUnit, PrerenderUnit,
    PrivateCacheUnit, RenderSignal, RequestPhase, RequestUnit, SyncAccessDiagnostic, WorkContext,
    WorkUnit, WorkUnitContext,
};
use serde::Serialize;

use super::ExplainArgs;
use crate::config::{PhaseName, RequestPhaseName, ScenarioConfig};
use crate::context::Context;
use crate::output::outcome_badge;

/// One access from a scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    Cookies,
    CookiesGet(String),
    CookiesHas(String),
    CookiesSize,
    CookiesSet { name: String, value: String },
    Headers,
    HeadersGet(String),
    HeadersHas(String),
    HeadersKeys,
    Draft,
    DraftIsEnabled,
    DraftEnable,
    DraftDisable,
}

impl FromStr for Access {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (op, arg) = match s.split_once(':') {
            Some((op, arg)) => (op.trim(), Some(arg.trim())),
            None => (s.trim(), None),
        };

        let access = match (op, arg) {
            ("cookies", None) => Access::Cookies,
            ("cookies.get", Some(name)) => Access::CookiesGet(name.to_string()),
            ("cookies.has", Some(name)) => Access::CookiesHas(name.to_string()),
            ("cookies.size", None) => Access::CookiesSize,
            ("cookies.set", Some(pair)) => {
                let (name, value) = pair
                    .split_once('=')
                    .ok_or_else(|| anyhow!("cookies.set expects NAME=VALUE, got: {}", pair))?;
                Access::CookiesSet {
                    name: name.to_string(),
                    value: value.to_string(),
                }
            }
            ("headers", None) => Access::Headers,
            ("headers.get", Some(name)) => Access::HeadersGet(name.to_string()),
            ("headers.has", Some(name)) => Access::HeadersHas(name.to_string()),
            ("headers.keys", None) => Access::HeadersKeys,
            ("draft", None) => Access::Draft,
            ("draft.is-enabled", None) => Access::DraftIsEnabled,
            ("draft.enable", None) => Access::DraftEnable,
            ("draft.disable", None) => Access::DraftDisable,
            _ => bail!("Unknown access: {}", s),
        };

        Ok(access)
    }
}

/// What happened to one access.
#[derive(Debug, Clone, Serialize)]
pub struct AccessReport {
    pub access: String,
    /// `value`, `ok`, `pending`, `postponed`, `bailout`, or `error`.
    pub outcome: &'static str,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
}

impl AccessReport {
    fn value(access: &str, detail: impl Into<String>) -> Self {
        Self {
            access: access.to_string(),
            outcome: "value",
            detail: detail.into(),
            kind: None,
        }
    }

    fn pending(access: &str, window: Duration) -> Self {
        Self {
            access: access.to_string(),
            outcome: "pending",
            detail: format!("still pending after {}ms", window.as_millis()),
            kind: None,
        }
    }

    fn error(access: &str, err: &AccessError) -> Self {
        let outcome = match err {
            AccessError::Postponed(_) => "postponed",
            err if err.is_control_flow() => "bailout",
            _ => "error",
        };
        Self {
            access: access.to_string(),
            outcome,
            detail: err.to_string(),
            kind: Some(err.kind()),
        }
    }
}

/// Everything observed while running a scenario under one phase.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseReport {
    pub phase: &'static str,
    pub accesses: Vec<AccessReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latched_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dynamic_usage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revalidate: Option<String>,
    pub tracked: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_dynamic: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalated: Option<bool>,
    pub handles: usize,
    pub diagnostics: Vec<String>,
}

/// Collects diagnostics for the report and forwards them to the log.
struct ExplainSink {
    collected: CollectingSink,
    log: LoggerSink,
}

impl DiagnosticSink for ExplainSink {
    fn report(&self, diagnostic: &SyncAccessDiagnostic) {
        self.collected.report(diagnostic);
        self.log.report(diagnostic);
    }
}

/// Runs a scenario's accesses under each requested phase.
pub struct Explainer<'a> {
    config: &'a ScenarioConfig,
    coordinator: AccessCoordinator,
    sink: Arc<ExplainSink>,
    window: Duration,
    abort: bool,
}

impl<'a> Explainer<'a> {
    pub fn new(config: &'a ScenarioConfig, window: Duration, abort: bool) -> Self {
        let logger = StructuredLogger::new(RequestId::generate())
            .with_route(config.route.path.clone())
            .with_format(LogFormat::Tracing);
        let sink = Arc::new(ExplainSink {
            collected: CollectingSink::new(),
            log: LoggerSink::new(logger),
        });
        let coordinator = AccessCoordinator::builder(config.render)
            .with_diagnostic_sink(sink.clone())
            .build();

        Self {
            config,
            coordinator,
            sink,
            window,
            abort,
        }
    }

    /// Run every access under `phase` against fresh contexts.
    pub async fn explain(
        &self,
        phase: PhaseName,
        accesses: &[Access],
        labels: &[String],
    ) -> Result<PhaseReport> {
        let request = build_request(self.config)?;
        let tracking = Arc::new(DynamicTracking::new());
        let signal = RenderSignal::new();

        let work = Arc::new(
            WorkContext::from_route_config(&self.config.route)
                .with_prefetch_request(self.config.request.prefetch),
        );
        let unit = Arc::new(WorkUnitContext::new(self.build_unit(
            phase,
            &request,
            &tracking,
            &signal,
        )));
        let scope = AccessScope::new(work.clone(), unit.clone());
        tracing::debug!(phase = phase.as_str(), route = work.route(), "explaining phase");

        let reported_before = self.sink.collected.diagnostics().len();
        let mut reports = Vec::with_capacity(accesses.len());
        let mut pending: Vec<(String, HangingHandle)> = Vec::new();

        for (access, label) in accesses.iter().zip(labels) {
            let (report, hanging) = self.run_access(&scope, access, label).await;
            if let Some(hanging) = hanging {
                if !pending.iter().any(|(l, _)| l == label) {
                    pending.push((label.clone(), hanging));
                }
            }
            reports.push(report);
        }

        if self.abort && !pending.is_empty() {
            signal.abort();
            for (label, hanging) in &pending {
                let err = hanging.rejected().await;
                reports.push(AccessReport::error(&format!("{} (after abort)", label), &err));
            }
        }

        let diagnostics = self.sink.collected.diagnostics()[reported_before..]
            .iter()
            .map(|d| d.message.clone())
            .collect();
        let request_unit = unit.as_request();

        Ok(PhaseReport {
            phase: phase.as_str(),
            accesses: reports,
            latched_error: work.invalid_dynamic_usage_error().map(|e| e.to_string()),
            dynamic_usage: work.dynamic_usage_description(),
            revalidate: unit.as_legacy().map(|legacy| match legacy.revalidate() {
                Some(seconds) => seconds.to_string(),
                None => "never".to_string(),
            }),
            tracked: tracking.accesses().into_iter().map(|a| a.expression).collect(),
            used_dynamic: request_unit.map(|r| r.used_dynamic()),
            escalated: request_unit.map(|r| r.prerender_phase().escalated()),
            handles: unit.handles().len(),
            diagnostics,
        })
    }

    fn build_unit(
        &self,
        phase: PhaseName,
        request: &RequestContext,
        tracking: &Arc<DynamicTracking>,
        signal: &RenderSignal,
    ) -> WorkUnit {
        let prerender = || PrerenderUnit::new(signal.clone()).with_dynamic_tracking(tracking.clone());
        let forwarded = if self.config.request.forward_draft_mode {
            request.draft_mode.clone()
        } else {
            None
        };

        match phase {
            PhaseName::Request => {
                let request_phase = match self.config.request.phase {
                    RequestPhaseName::Render => RequestPhase::Render,
                    RequestPhaseName::Action => RequestPhase::Action,
                    RequestPhaseName::After => RequestPhase::After,
                };
                WorkUnit::Request(
                    RequestUnit::from_request(request)
                        .with_phase(request_phase)
                        .with_prerender_phase(self.config.request.dry_run),
                )
            }
            PhaseName::Prerender => WorkUnit::Prerender(prerender()),
            PhaseName::PrerenderClient => WorkUnit::PrerenderClient(prerender()),
            PhaseName::PrerenderRuntime => WorkUnit::PrerenderRuntime(prerender()),
            PhaseName::PrerenderPpr => WorkUnit::PrerenderPpr(PprUnit::new(tracking.clone())),
            PhaseName::PrerenderLegacy => {
                WorkUnit::PrerenderLegacy(LegacyUnit::new(self.config.route.revalidate))
            }
            PhaseName::Cache => {
                let cache = CacheUnit::new();
                WorkUnit::Cache(match forwarded {
                    Some(provider) => cache.with_forwarded_draft_mode(provider),
                    None => cache,
                })
            }
            PhaseName::PrivateCache => {
                let private =
                    PrivateCacheUnit::new(request.cookies.clone(), request.headers.clone());
                WorkUnit::PrivateCache(match forwarded {
                    Some(provider) => private.with_forwarded_draft_mode(provider),
                    None => private,
                })
            }
            PhaseName::UnstableCache => WorkUnit::UnstableCache,
        }
    }

    async fn run_access(
        &self,
        scope: &AccessScope,
        access: &Access,
        label: &str,
    ) -> (AccessReport, Option<HangingHandle>) {
        let coordinator = &self.coordinator;
        let result = match access {
            Access::Cookies => match coordinator.fetch_cookies(scope) {
                Ok(handle) => {
                    let hanging = handle.hanging_handle().cloned();
                    let report = match tokio::time::timeout(self.window, handle.resolve()).await {
                        Ok(Ok(cookies)) => AccessReport::value(label, cookies.serialize()),
                        Ok(Err(err)) => AccessReport::error(label, &err),
                        Err(_) => AccessReport::pending(label, self.window),
                    };
                    return (report, hanging);
                }
                Err(err) => Err(err),
            },
            Access::Headers => match coordinator.fetch_headers(scope) {
                Ok(handle) => {
                    let hanging = handle.hanging_handle().cloned();
                    let report = match tokio::time::timeout(self.window, handle.resolve()).await {
                        Ok(Ok(headers)) => AccessReport::value(label, headers.keys().join(", ")),
                        Ok(Err(err)) => AccessReport::error(label, &err),
                        Err(_) => AccessReport::pending(label, self.window),
                    };
                    return (report, hanging);
                }
                Err(err) => Err(err),
            },
            Access::Draft => match coordinator.fetch_draft_mode(scope) {
                Ok(handle) => {
                    let hanging = handle.hanging_handle().cloned();
                    let report = match tokio::time::timeout(self.window, handle.resolve()).await {
                        Ok(Ok(draft)) => {
                            AccessReport::value(label, format!("enabled={}", draft.is_enabled()))
                        }
                        Ok(Err(err)) => AccessReport::error(label, &err),
                        Err(_) => AccessReport::pending(label, self.window),
                    };
                    return (report, hanging);
                }
                Err(err) => Err(err),
            },
            Access::CookiesGet(name) => coordinator.fetch_cookies(scope).and_then(|h| {
                h.get(name)
                    .map(|c| c.map_or_else(|| "(none)".to_string(), |c| c.value))
            }),
            Access::CookiesHas(name) => coordinator
                .fetch_cookies(scope)
                .and_then(|h| h.has(name).map(|has| has.to_string())),
            Access::CookiesSize => coordinator
                .fetch_cookies(scope)
                .and_then(|h| h.size().map(|size| size.to_string())),
            Access::CookiesSet { name, value } => coordinator.fetch_cookies(scope).and_then(|h| {
                h.set(Cookie::new(name.clone(), value.clone()))
                    .map(|()| "ok".to_string())
            }),
            Access::HeadersGet(name) => coordinator.fetch_headers(scope).and_then(|h| {
                h.get(name)
                    .map(|v| v.unwrap_or_else(|| "(none)".to_string()))
            }),
            Access::HeadersHas(name) => coordinator
                .fetch_headers(scope)
                .and_then(|h| h.has(name).map(|has| has.to_string())),
            Access::HeadersKeys => coordinator
                .fetch_headers(scope)
                .and_then(|h| h.keys().map(|keys| keys.join(", "))),
            Access::DraftIsEnabled => coordinator
                .fetch_draft_mode(scope)
                .and_then(|h| h.is_enabled().map(|enabled| enabled.to_string())),
            Access::DraftEnable => coordinator
                .fetch_draft_mode(scope)
                .and_then(|h| h.enable().map(|()| "ok".to_string())),
            Access::DraftDisable => coordinator
                .fetch_draft_mode(scope)
                .and_then(|h| h.disable().map(|()| "ok".to_string())),
        };

        let report = match result {
            Ok(detail) => AccessReport::value(label, detail),
            Err(err) => AccessReport::error(label, &err),
        };
        (report, None)
    }
}

fn build_request(config: &ScenarioConfig) -> Result<RequestContext> {
    let method = match config.request.phase {
        RequestPhaseName::Action => Method::Post,
        RequestPhaseName::Render | RequestPhaseName::After => Method::Get,
    };
    let mut request = RequestContext::new(method, config.route.path.clone());

    let pairs = config
        .request
        .headers
        .iter()
        .map(|(name, value)| (name.as_str(), value.as_str()));
    request.headers = Arc::new(MemoryHeaders::from_pairs(pairs).context("Invalid request header")?);

    let cookie_header = config
        .request
        .cookies
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join("; ");
    request.cookies = Arc::new(MemoryCookies::from_header(&cookie_header));

    if let Some(preview_id) = &config.request.preview_id {
        request = request.with_preview_id(preview_id.clone());
    }

    Ok(request)
}

/// Run the explain command.
pub async fn run(args: ExplainArgs, ctx: &Context) -> Result<()> {
    let config = &ctx.config;

    let phases = if args.phase.is_empty() {
        config.phases.clone()
    } else {
        args.phase
            .iter()
            .map(|p| p.parse())
            .collect::<Result<Vec<PhaseName>>>()?
    };
    let labels = if args.access.is_empty() {
        config.accesses.clone()
    } else {
        args.access.clone()
    };
    let accesses = labels
        .iter()
        .map(|a| a.parse())
        .collect::<Result<Vec<Access>>>()?;

    ctx.output.debug(&format!(
        "Explaining {} access(es) under {} phase(s)",
        accesses.len(),
        phases.len()
    ));

    let explainer = Explainer::new(config, Duration::from_millis(args.window_ms), args.abort);
    let mut reports = Vec::with_capacity(phases.len());
    for phase in phases {
        reports.push(explainer.explain(phase, &accesses, &labels).await?);
    }

    if ctx.output.is_json() {
        ctx.output.json(&reports);
        return Ok(());
    }

    ctx.output.header(&format!("Route {}", config.route.path));
    for report in &reports {
        print_report(report, ctx);
    }

    Ok(())
}

fn print_report(report: &PhaseReport, ctx: &Context) {
    let output = &ctx.output;
    output.header(report.phase);

    let width = report
        .accesses
        .iter()
        .map(|a| a.access.len())
        .max()
        .unwrap_or(0);
    for access in &report.accesses {
        let badge = outcome_badge(access.outcome);
        output.table_row(
            &[access.access.as_str(), badge.as_str(), access.detail.as_str()],
            &[width, 9, 0],
        );
    }

    if let Some(error) = &report.latched_error {
        output.kv("latched", error);
    }
    if let Some(usage) = &report.dynamic_usage {
        output.kv("dynamic usage", usage);
    }
    if let Some(revalidate) = &report.revalidate {
        output.kv("revalidate", revalidate);
    }
    if !report.tracked.is_empty() {
        output.kv("tracked", &report.tracked.join(", "));
    }
    if let Some(used) = report.used_dynamic {
        output.kv("used dynamic", &used.to_string());
    }
    if report.escalated == Some(true) {
        output.warn("sync access ended the development dry run");
    }
    output.kv("handles", &report.handles.to_string());
    for diagnostic in &report.diagnostics {
        output.warn(diagnostic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edge_core::{DynamicBehavior, RenderConfig};

    fn parse_accesses(accesses: &[&str]) -> (Vec<Access>, Vec<String>) {
        let labels: Vec<String> = accesses.iter().map(|a| a.to_string()).collect();
        let parsed = labels.iter().map(|a| a.parse::<Access>().unwrap()).collect();
        (parsed, labels)
    }

    fn scenario() -> ScenarioConfig {
        let mut config = ScenarioConfig::default();
        config.route.path = "/blog/[slug]".to_string();
        config.route.revalidate = Some(60);
        config.request.cookies.insert("session".into(), "abc".into());
        config.request.headers.insert("accept".into(), "text/html".into());
        config
    }

    #[test]
    fn test_parse_accesses() {
        assert_eq!("cookies".parse::<Access>().unwrap(), Access::Cookies);
        assert_eq!(
            "cookies.get:session".parse::<Access>().unwrap(),
            Access::CookiesGet("session".into())
        );
        assert_eq!(
            "cookies.set:theme=dark".parse::<Access>().unwrap(),
            Access::CookiesSet {
                name: "theme".into(),
                value: "dark".into()
            }
        );
        assert_eq!("draft.enable".parse::<Access>().unwrap(), Access::DraftEnable);
        assert!("cookies.get".parse::<Access>().is_err());
        assert!("cookies.set:theme".parse::<Access>().is_err());
        assert!("session".parse::<Access>().is_err());
    }

    #[tokio::test]
    async fn test_request_phase_reads_values() {
        let config = scenario();
        let explainer = Explainer::new(&config, Duration::from_millis(5), false);
        let (accesses, labels) = parse_accesses(&["cookies.get:session", "headers", "draft"]);

        let report = explainer
            .explain(PhaseName::Request, &accesses, &labels)
            .await
            .unwrap();
        let outcomes: Vec<_> = report.accesses.iter().map(|a| a.outcome).collect();
        assert_eq!(outcomes, vec!["value", "value", "value"]);
        assert_eq!(report.accesses[0].detail, "abc");
        assert_eq!(report.accesses[1].detail, "accept");
        assert_eq!(report.used_dynamic, Some(true));
        assert_eq!(report.handles, 3);
    }

    #[tokio::test]
    async fn test_dev_sync_access_is_diagnosed_once() {
        let mut config = scenario();
        config.render = RenderConfig::development();
        let explainer = Explainer::new(&config, Duration::from_millis(5), false);
        let (accesses, labels) = parse_accesses(&["cookies.get:session", "cookies.get:session"]);

        let report = explainer
            .explain(PhaseName::Request, &accesses, &labels)
            .await
            .unwrap();
        assert_eq!(report.diagnostics.len(), 1);
        assert!(report.diagnostics[0].starts_with("Route \"/blog/[slug]\" used `cookies().get('session')`"));
        assert!(report.accesses.iter().all(|a| a.detail == "abc"));
    }

    #[tokio::test]
    async fn test_prerender_pending_then_rejected_on_abort() {
        let config = scenario();
        let explainer = Explainer::new(&config, Duration::from_millis(5), true);
        let (accesses, labels) = parse_accesses(&["cookies", "cookies", "headers.keys"]);

        let report = explainer
            .explain(PhaseName::Prerender, &accesses, &labels)
            .await
            .unwrap();
        let outcomes: Vec<_> = report.accesses.iter().map(|a| a.outcome).collect();
        assert_eq!(outcomes, vec!["pending", "pending", "error", "error"]);
        assert_eq!(report.accesses[2].kind, Some("sync-access-unavailable"));
        assert_eq!(report.accesses[3].access, "cookies (after abort)");
        assert_eq!(report.accesses[3].kind, Some("hanging-promise-rejection"));
    }

    #[tokio::test]
    async fn test_legacy_and_cache_phases() {
        let config = scenario();
        let explainer = Explainer::new(&config, Duration::from_millis(5), false);
        let (accesses, labels) = parse_accesses(&["draft.enable"]);
        let legacy = explainer
            .explain(PhaseName::PrerenderLegacy, &accesses, &labels)
            .await
            .unwrap();
        assert_eq!(legacy.accesses[0].outcome, "bailout");
        assert_eq!(legacy.revalidate.as_deref(), Some("0"));
        assert_eq!(legacy.dynamic_usage.as_deref(), Some("draftMode().enable()"));

        let (accesses, labels) = parse_accesses(&["draft.enable", "headers", "headers"]);
        let cache = explainer
            .explain(PhaseName::Cache, &accesses, &labels)
            .await
            .unwrap();
        assert!(cache.accesses.iter().all(|a| a.kind == Some("invalid-dynamic-usage")));
        assert!(cache.latched_error.unwrap().contains("\"draftMode\""));
    }

    #[tokio::test]
    async fn test_ppr_tracks_and_static_error_bails_out() {
        let config = scenario();
        let explainer = Explainer::new(&config, Duration::from_millis(5), false);
        let (accesses, labels) = parse_accesses(&["cookies", "headers"]);

        let ppr = explainer
            .explain(PhaseName::PrerenderPpr, &accesses, &labels)
            .await
            .unwrap();
        assert!(ppr.accesses.iter().all(|a| a.outcome == "postponed"));
        assert_eq!(ppr.tracked, vec!["cookies", "headers"]);

        let mut strict = scenario();
        strict.route.dynamic = DynamicBehavior::Error;
        let explainer = Explainer::new(&strict, Duration::from_millis(5), false);
        let request = explainer
            .explain(PhaseName::Request, &accesses, &labels)
            .await
            .unwrap();
        assert!(request.accesses.iter().all(|a| a.kind == Some("static-bailout")));
    }
}
