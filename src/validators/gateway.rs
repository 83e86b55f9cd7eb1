//! Gateway route discovery.
//!
//! The live gateway is preferred; its listing API pages results and every
//! page is fetched. Infrastructure-as-code route declarations are the
//! fallback, and the report always says which source answered.

use crate::core::config::GatewaySettings;
use crate::core::error::CoraError;
use crate::core::exec;
use crate::core::walk;
use crate::validators::api_tracer::{Endpoint, NAME};
use crate::validators::syntax::line_of;
use regex::Regex;
use rustc_hash::FxHashSet;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Upper bound on pages per listing; a gateway this large is a bug.
const MAX_PAGES: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteSource {
    LiveGateway { api_id: String },
    InfrastructureAsCode { fallback_reason: Option<String> },
}

impl RouteSource {
    pub fn label(&self) -> &'static str {
        match self {
            Self::LiveGateway { .. } => "live-gateway",
            Self::InfrastructureAsCode { .. } => "infrastructure-as-code",
        }
    }

    /// Human note for the report, if the source deserves one.
    pub fn note(&self) -> Option<String> {
        match self {
            Self::LiveGateway { api_id } => Some(format!("routes read from deployed gateway {}", api_id)),
            Self::InfrastructureAsCode {
                fallback_reason: Some(reason),
            } => Some(format!(
                "routes parsed from infrastructure code; live gateway unavailable: {}",
                reason
            )),
            Self::InfrastructureAsCode { fallback_reason: None } => Some(
                "routes parsed from infrastructure code; deployed state was not checked".to_string(),
            ),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RoutePage {
    pub routes: Vec<Endpoint>,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct IntegrationPage {
    /// Integration id -> handler name.
    pub integrations: BTreeMap<String, String>,
    pub next_token: Option<String>,
}

/// One listing call against a live gateway.
pub trait RoutePager: Send + Sync {
    fn api_id(&self) -> &str;

    fn routes_page(&self, token: Option<&str>) -> Result<RoutePage, CoraError>;

    fn integrations_page(&self, _token: Option<&str>) -> Result<IntegrationPage, CoraError> {
        Ok(IntegrationPage::default())
    }
}

/// Follow `next_token` until exhausted. A token seen twice aborts instead
/// of looping forever.
pub fn paginate<T>(
    what: &str,
    mut fetch: impl FnMut(Option<&str>) -> Result<(Vec<T>, Option<String>), CoraError>,
) -> Result<Vec<T>, CoraError> {
    let mut items = Vec::new();
    let mut seen = FxHashSet::default();
    let mut token: Option<String> = None;
    for page in 0..MAX_PAGES {
        let (batch, next) = fetch(token.as_deref())?;
        debug!(what, page, items = batch.len(), "page fetched");
        items.extend(batch);
        match next.filter(|t| !t.is_empty()) {
            None => return Ok(items),
            Some(t) => {
                if !seen.insert(t.clone()) {
                    return Err(CoraError::unavailable(
                        NAME,
                        format!("{} pagination repeated token '{}'", what, t),
                    ));
                }
                token = Some(t);
            }
        }
    }
    Err(CoraError::unavailable(
        NAME,
        format!("{} pagination exceeded {} pages", what, MAX_PAGES),
    ))
}

/// Every route on the live gateway, with integration targets resolved to
/// handler names where possible.
pub fn fetch_all_routes(pager: &dyn RoutePager) -> Result<Vec<Endpoint>, CoraError> {
    let routes = paginate("routes", |t| {
        pager.routes_page(t).map(|p| (p.routes, p.next_token))
    })?;
    let integrations: BTreeMap<String, String> = paginate::<(String, String)>("integrations", |t| {
        pager
            .integrations_page(t)
            .map(|p| (p.integrations.into_iter().collect(), p.next_token))
    })?
    .into_iter()
    .collect();

    Ok(routes
        .into_iter()
        .map(|mut r| {
            if let Some(target) = r.handler.take() {
                let id = target.trim_start_matches("integrations/");
                r.handler = integrations.get(id).cloned();
            }
            r
        })
        .collect())
}

/// `aws apigatewayv2` listing with explicit page tokens.
pub struct AwsCliPager {
    pub api_id: String,
    pub region: Option<String>,
    pub profile: Option<String>,
    pub page_size: u32,
    pub timeout: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AwsRoutes {
    #[serde(default)]
    items: Vec<AwsRoute>,
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AwsRoute {
    route_key: String,
    target: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AwsIntegrations {
    #[serde(default)]
    items: Vec<AwsIntegration>,
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AwsIntegration {
    integration_id: String,
    integration_uri: Option<String>,
}

impl AwsCliPager {
    pub fn from_settings(settings: &GatewaySettings) -> Option<Self> {
        let api_id = settings.api_id.clone().filter(|s| !s.trim().is_empty())?;
        Some(Self {
            api_id,
            region: settings.region.clone(),
            profile: settings.profile.clone(),
            page_size: settings.page_size.clamp(1, 500),
            timeout: Duration::from_secs(settings.timeout_secs.max(1)),
        })
    }

    fn run(&self, subcommand: &str, token: Option<&str>) -> Result<Vec<u8>, CoraError> {
        let mut cmd = Command::new("aws");
        cmd.args(["apigatewayv2", subcommand, "--api-id", self.api_id.as_str()])
            .arg("--no-paginate")
            .args(["--max-results", self.page_size.to_string().as_str()])
            .args(["--output", "json"]);
        if let Some(t) = token {
            cmd.args(["--next-token", t]);
        }
        if let Some(r) = &self.region {
            cmd.args(["--region", r.as_str()]);
        }
        if let Some(p) = &self.profile {
            cmd.args(["--profile", p.as_str()]);
        }
        let output = exec::run_with_timeout(cmd, self.timeout, NAME, "gateway route listing")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CoraError::unavailable(
                NAME,
                format!(
                    "aws {} failed: {}",
                    subcommand,
                    stderr.lines().find(|l| !l.trim().is_empty()).unwrap_or("unknown error")
                ),
            ));
        }
        Ok(output.stdout)
    }
}

/// `GET /orgs/{id}` -> endpoint; `$default` -> catch-all.
pub fn route_key_endpoint(route_key: &str, file: impl Into<PathBuf>, line: Option<usize>) -> Option<Endpoint> {
    let key = route_key.trim();
    if key == "$default" {
        return Some(Endpoint::new("ANY", "/{proxy+}", file, line));
    }
    let (method, path) = key.split_once(' ')?;
    path.starts_with('/')
        .then(|| Endpoint::new(method, path, file, line))
}

/// Function name from a Lambda integration URI or ARN.
pub fn function_from_uri(uri: &str) -> Option<String> {
    let after = uri.split(":function:").nth(1)?;
    let name = after.split(['/', ':']).next()?;
    (!name.is_empty()).then(|| name.to_string())
}

impl RoutePager for AwsCliPager {
    fn api_id(&self) -> &str {
        &self.api_id
    }

    fn routes_page(&self, token: Option<&str>) -> Result<RoutePage, CoraError> {
        let raw: AwsRoutes = serde_json::from_slice(&self.run("get-routes", token)?)?;
        let origin = format!("gateway:{}", self.api_id);
        Ok(RoutePage {
            routes: raw
                .items
                .into_iter()
                .filter_map(|r| {
                    let endpoint = route_key_endpoint(&r.route_key, origin.as_str(), None)?;
                    Some(match r.target {
                        Some(t) => endpoint.with_handler(t),
                        None => endpoint,
                    })
                })
                .collect(),
            next_token: raw.next_token,
        })
    }

    fn integrations_page(&self, token: Option<&str>) -> Result<IntegrationPage, CoraError> {
        let raw: AwsIntegrations = serde_json::from_slice(&self.run("get-integrations", token)?)?;
        Ok(IntegrationPage {
            integrations: raw
                .items
                .into_iter()
                .filter_map(|i| {
                    let name = function_from_uri(i.integration_uri.as_deref()?)?;
                    Some((i.integration_id, name))
                })
                .collect(),
            next_token: raw.next_token,
        })
    }
}

// ---------------------------------------------------------------------------
// Infrastructure as code
// ---------------------------------------------------------------------------

static RESOURCE_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?m)^\s*resource\s+"([\w-]+)"\s+"([\w-]+)""#).unwrap());

static ROUTE_KEY_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"route_key\s*=\s*"([^"]+)""#).unwrap());

static TARGET_INTEGRATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"aws_apigatewayv2_integration\.([\w-]+)").unwrap()
});

static URI_LAMBDA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"integration_uri\s*=\s*(?:aws_lambda_function\.([\w-]+)|"([^"]+)")"#).unwrap()
});

static MAP_METHOD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\bmethod\s*=\s*"([A-Za-z]+)""#).unwrap());

static MAP_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\b(?:path|route)\s*=\s*"(/[^"]*)""#).unwrap());

static MAP_HANDLER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\b(?:integration|handler|lambda|function)\s*=\s*"([^"]+)""#).unwrap()
});

/// Replace braces inside string literals so block scanning only sees
/// structural braces. Byte offsets are preserved.
fn mask_string_braces(src: &str) -> String {
    let mut out = String::with_capacity(src.len());
    let mut in_string = false;
    let mut escaped = false;
    for c in src.chars() {
        let mapped = if in_string {
            if escaped {
                escaped = false;
                c
            } else if c == '\\' {
                escaped = true;
                c
            } else if c == '"' {
                in_string = false;
                c
            } else if c == '{' || c == '}' {
                '\u{1}'
            } else {
                c
            }
        } else {
            if c == '"' {
                in_string = true;
            }
            c
        };
        out.push(mapped);
    }
    out
}

/// Innermost `{ ... }` spans (byte ranges) in masked text.
fn innermost_blocks(masked: &str) -> Vec<(usize, usize)> {
    let mut stack = Vec::new();
    let mut blocks = Vec::new();
    let mut has_child = Vec::new();
    for (i, c) in masked.char_indices() {
        match c {
            '{' => {
                if let Some(parent) = has_child.last_mut() {
                    *parent = true;
                }
                stack.push(i);
                has_child.push(false);
            }
            '}' => {
                if let (Some(start), Some(child)) = (stack.pop(), has_child.pop()) {
                    if !child {
                        blocks.push((start, i + 1));
                    }
                }
            }
            _ => {}
        }
    }
    blocks.sort();
    blocks
}

/// Routes declared in one Terraform/HCL file: `route_key` attributes on
/// route resources, and `{ method, path, integration }` maps.
pub fn parse_infra_routes(file: &Path, content: &str) -> Vec<Endpoint> {
    let mut routes = Vec::new();

    // integration resource name -> lambda resource or function name
    let mut integration_targets: BTreeMap<String, String> = BTreeMap::new();
    let starts: Vec<(usize, String, String)> = RESOURCE_START
        .captures_iter(content)
        .filter_map(|c| {
            Some((
                c.get(0)?.start(),
                c.get(1)?.as_str().to_string(),
                c.get(2)?.as_str().to_string(),
            ))
        })
        .collect();
    let chunks: Vec<(usize, &str, &str, &str)> = starts
        .iter()
        .enumerate()
        .map(|(i, (start, kind, name))| {
            let end = starts.get(i + 1).map(|s| s.0).unwrap_or(content.len());
            (*start, kind.as_str(), name.as_str(), &content[*start..end])
        })
        .collect();

    for (_, kind, name, body) in &chunks {
        if *kind != "aws_apigatewayv2_integration" {
            continue;
        }
        if let Some(c) = URI_LAMBDA.captures(body) {
            let target = c
                .get(1)
                .map(|m| m.as_str().to_string())
                .or_else(|| c.get(2).and_then(|m| function_from_uri(m.as_str())));
            if let Some(target) = target {
                integration_targets.insert(name.to_string(), target);
            }
        }
    }

    for (start, _, _, body) in &chunks {
        for c in ROUTE_KEY_ATTR.captures_iter(body) {
            let Some(key) = c.get(1) else {
                continue;
            };
            let line = line_of(content, start + key.start());
            let Some(mut endpoint) = route_key_endpoint(key.as_str(), file, Some(line)) else {
                continue;
            };
            if let Some(integration) = TARGET_INTEGRATION
                .captures(body)
                .and_then(|t| t.get(1))
                .map(|m| m.as_str())
            {
                let handler = integration_targets
                    .get(integration)
                    .cloned()
                    .unwrap_or_else(|| integration.to_string());
                endpoint = endpoint.with_handler(handler);
            }
            routes.push(endpoint);
        }
    }

    let masked = mask_string_braces(content);
    for (start, end) in innermost_blocks(&masked) {
        let block = &content[start..end];
        if ROUTE_KEY_ATTR.is_match(block) {
            continue;
        }
        let (Some(method), Some(path)) = (
            MAP_METHOD.captures(block).and_then(|c| c.get(1)),
            MAP_PATH.captures(block).and_then(|c| c.get(1)),
        ) else {
            continue;
        };
        let mut endpoint = Endpoint::new(
            method.as_str(),
            path.as_str(),
            file,
            Some(line_of(content, start + path.start())),
        );
        if let Some(h) = MAP_HANDLER.captures(block).and_then(|c| c.get(1)) {
            endpoint = endpoint.with_handler(h.as_str());
        }
        routes.push(endpoint);
    }

    routes.sort_by_key(|r| r.line);
    routes
}

pub fn extract_infra_routes(root: &Path, settings: &GatewaySettings) -> Result<Vec<Endpoint>, CoraError> {
    let dirs: Vec<PathBuf> = if settings.infra_dirs.is_empty() {
        vec![root.to_path_buf()]
    } else {
        settings.infra_dirs.iter().map(|d| root.join(d)).collect()
    };
    let mut routes = Vec::new();
    for dir in dirs {
        for file in walk::collect_with_extensions(&dir, &["tf", "hcl"])? {
            let Some(content) = walk::read_text(&file) else {
                continue;
            };
            routes.extend(parse_infra_routes(&walk::relative(root, &file), &content));
        }
    }
    debug!(routes = routes.len(), "infrastructure routes parsed");
    Ok(routes)
}

/// Live gateway first, infrastructure code second. `pager` is `None` when
/// no gateway identifier is configured.
pub fn extract_gateway_routes(
    root: &Path,
    settings: &GatewaySettings,
    pager: Option<&dyn RoutePager>,
) -> Result<(Vec<Endpoint>, RouteSource), CoraError> {
    let mut fallback_reason = None;
    if let Some(pager) = pager {
        match fetch_all_routes(pager) {
            Ok(routes) => {
                info!(routes = routes.len(), api_id = pager.api_id(), "live gateway routes fetched");
                return Ok((
                    routes,
                    RouteSource::LiveGateway {
                        api_id: pager.api_id().to_string(),
                    },
                ));
            }
            Err(e) => {
                warn!(error = %e, "live gateway query failed, falling back to infrastructure code");
                fallback_reason = Some(e.to_string());
            }
        }
    }

    let routes = extract_infra_routes(root, settings)?;
    if routes.is_empty() {
        let reason = match fallback_reason {
            Some(r) => format!("live gateway failed ({}) and no route declarations found", r),
            None => "no gateway configured and no route declarations found in infrastructure code".to_string(),
        };
        return Err(CoraError::unavailable(NAME, reason));
    }
    Ok((routes, RouteSource::InfrastructureAsCode { fallback_reason }))
}
