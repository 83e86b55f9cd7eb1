//! API contract tracing across frontend calls, gateway routes, and backend
//! handlers.
//!
//! Paths are compared by shape, not by parameter name: `/orgs/{id}` and
//! `/orgs/{providerId}` are the same route.

use crate::core::report::{Location, ValidationFinding, ValidationReport};
use crate::validators::api_sources::BackendHandler;
use crate::validators::gateway::RouteSource;
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

pub const NAME: &str = "api-contract";

pub const PARAM: &str = "{param}";
pub const GREEDY: &str = "{proxy+}";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    /// Upper-case HTTP method or `ANY`.
    pub method: String,
    /// Normalized path (see [`normalize_path`]).
    pub path: String,
    pub file: PathBuf,
    pub line: Option<usize>,
    /// Integration or handler name when the source names one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
}

impl Endpoint {
    pub fn new(method: &str, raw_path: &str, file: impl Into<PathBuf>, line: Option<usize>) -> Self {
        Self {
            method: method.trim().to_ascii_uppercase(),
            path: normalize_path(raw_path),
            file: file.into(),
            line,
            handler: None,
        }
    }

    pub fn with_handler(mut self, handler: impl Into<String>) -> Self {
        self.handler = Some(handler.into());
        self
    }

    pub fn location(&self) -> Location {
        match self.line {
            Some(line) => Location::line(&self.file, line),
            None => Location::file(&self.file),
        }
    }

    pub fn shape(&self) -> RouteShape {
        RouteShape::parse(&self.path)
    }

    /// Method and shape both match.
    pub fn matches(&self, other: &Endpoint) -> bool {
        method_matches(&self.method, &other.method) && self.shape().matches(&other.shape())
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

pub fn method_matches(a: &str, b: &str) -> bool {
    a == b || a == "ANY" || b == "ANY"
}

fn is_param_segment(seg: &str) -> bool {
    seg.contains("${")
        || seg.starts_with(':')
        || (seg.starts_with('{') && seg.ends_with('}'))
        || (seg.starts_with('<') && seg.ends_with('>'))
        || (seg.starts_with('[') && seg.ends_with(']'))
}

/// Canonical path: no origin, no query, no base-URL template prefix, every
/// parameter segment replaced by `{param}`, greedy segments by `{proxy+}`.
pub fn normalize_path(raw: &str) -> String {
    let mut s = raw.trim();

    // `${API_BASE}/orgs` and `${import.meta.env.X}/orgs`
    if s.starts_with("${") {
        if let Some(end) = s.find('}') {
            s = &s[end + 1..];
        }
    }
    for scheme in ["https://", "http://"] {
        if let Some(rest) = s.strip_prefix(scheme) {
            s = rest.find('/').map(|i| &rest[i..]).unwrap_or("/");
        }
    }
    let s = s.split(['?', '#']).next().unwrap_or("");

    let segments: Vec<String> = s
        .split('/')
        .filter(|seg| !seg.is_empty())
        .map(|seg| {
            if seg.starts_with('{') && seg.ends_with("+}") {
                GREEDY.to_string()
            } else if is_param_segment(seg) {
                PARAM.to_string()
            } else {
                seg.to_string()
            }
        })
        .collect();
    format!("/{}", segments.join("/"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Param,
    /// Matches one or more trailing segments.
    Greedy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteShape(pub Vec<Segment>);

impl RouteShape {
    pub fn parse(normalized: &str) -> Self {
        RouteShape(
            normalized
                .split('/')
                .filter(|s| !s.is_empty())
                .map(|s| match s {
                    PARAM => Segment::Param,
                    GREEDY => Segment::Greedy,
                    lit => Segment::Literal(lit.to_string()),
                })
                .collect(),
        )
    }

    pub fn matches(&self, other: &RouteShape) -> bool {
        fn go(a: &[Segment], b: &[Segment]) -> bool {
            match (a.first(), b.first()) {
                (None, None) => true,
                (Some(Segment::Greedy), _) => !b.is_empty(),
                (_, Some(Segment::Greedy)) => !a.is_empty(),
                (None, _) | (_, None) => false,
                (Some(x), Some(y)) => {
                    let same = match (x, y) {
                        (Segment::Literal(l), Segment::Literal(r)) => l == r,
                        _ => true,
                    };
                    same && go(&a[1..], &b[1..])
                }
            }
        }
        go(&self.0, &other.0)
    }
}

/// Handler names compare after folding common naming noise.
pub fn canonical_handler(name: &str) -> String {
    let mut s = name.trim().to_ascii_lowercase().replace('_', "-");
    for prefix in ["lambda-", "fn-"] {
        if let Some(rest) = s.strip_prefix(prefix) {
            s = rest.to_string();
        }
    }
    for suffix in ["-lambda", "-handler", "-function", "-fn"] {
        if let Some(rest) = s.strip_suffix(suffix) {
            s = rest.to_string();
        }
    }
    s
}

enum HandlerMatch {
    Served,
    Unverifiable(String),
    Missing(String),
}

fn match_handler(route: &Endpoint, backend: &[BackendHandler]) -> HandlerMatch {
    if let Some(wanted) = route.handler.as_deref().map(canonical_handler) {
        let Some(handler) = backend
            .iter()
            .find(|h| canonical_handler(h.name()) == wanted)
        else {
            return HandlerMatch::Missing(format!(
                "integration '{}' has no backend handler source",
                wanted
            ));
        };
        if handler.endpoints().is_empty() && !handler.is_dynamic() {
            // Single-purpose handler: serves whatever is routed to it.
            return HandlerMatch::Served;
        }
        if handler.endpoints().iter().any(|e| e.matches(route)) {
            return HandlerMatch::Served;
        }
        return if handler.is_dynamic() {
            HandlerMatch::Unverifiable(format!(
                "handler '{}' dispatches on the request path at runtime",
                handler.name()
            ))
        } else {
            HandlerMatch::Missing(format!(
                "handler '{}' has no branch for {}",
                handler.name(),
                route
            ))
        };
    }

    if backend
        .iter()
        .any(|h| h.endpoints().iter().any(|e| e.matches(route)))
    {
        return HandlerMatch::Served;
    }
    match backend
        .iter()
        .find(|h| h.is_dynamic() && dynamic_handler_covers(h, route))
    {
        Some(dynamic) => HandlerMatch::Unverifiable(format!(
            "no static handler found; '{}' dispatches dynamically and may serve it",
            dynamic.name()
        )),
        None => HandlerMatch::Missing("no backend handler declares this route".to_string()),
    }
}

fn first_literal(shape: &RouteShape) -> Option<&str> {
    shape.0.iter().find_map(|seg| match seg {
        Segment::Literal(l) => Some(l.as_str()),
        _ => None,
    })
}

/// Whether a dynamic handler plausibly serves an unnamed route: its known
/// endpoints or its own name share the route's first literal segment. A
/// route with no literal segment at all is covered by any dynamic handler.
fn dynamic_handler_covers(handler: &BackendHandler, route: &Endpoint) -> bool {
    let shape = route.shape();
    let Some(head) = first_literal(&shape) else {
        return true;
    };
    canonical_handler(handler.name()) == canonical_handler(head)
        || handler
            .endpoints()
            .iter()
            .any(|e| first_literal(&e.shape()) == Some(head))
}

/// Gateway routes wired to `handler`, by integration name or by endpoint.
fn routes_of<'g>(handler: &BackendHandler, gateway: &'g [Endpoint]) -> Vec<&'g Endpoint> {
    let name = canonical_handler(handler.name());
    gateway
        .iter()
        .filter(|r| {
            r.handler.as_deref().map(canonical_handler).as_deref() == Some(name.as_str())
                || handler.endpoints().iter().any(|e| e.matches(r))
        })
        .collect()
}

/// Whether any frontend call reaches `handler`, directly or through one of
/// its gateway routes.
fn handler_has_caller(handler: &BackendHandler, routes: &[&Endpoint], frontend: &[Endpoint]) -> bool {
    frontend.iter().any(|c| {
        handler.endpoints().iter().any(|e| e.matches(c)) || routes.iter().any(|r| r.matches(c))
    })
}

/// Cross-validate the three layers.
pub fn validate(
    frontend: &[Endpoint],
    gateway: &[Endpoint],
    backend: &[BackendHandler],
    source: &RouteSource,
) -> ValidationReport {
    let mut report = ValidationReport::new(NAME);
    report.set_source(source.label());
    if let Some(note) = source.note() {
        report.push(ValidationFinding::info("route-source", Location::file("."), note));
    }

    for call in frontend {
        report.record_check();
        if gateway.iter().any(|r| r.matches(call)) {
            continue;
        }
        report.push(
            ValidationFinding::error(
                "missing-route",
                call.location(),
                format!("frontend calls {} but no gateway route serves it", call),
            )
            .with_fix("add the route to the gateway definition or fix the client path"),
        );
    }

    for route in gateway.iter().filter(|r| r.method != "OPTIONS") {
        report.record_check();
        match match_handler(route, backend) {
            HandlerMatch::Served => {}
            HandlerMatch::Unverifiable(why) => report.push(ValidationFinding::warning(
                "unverifiable-handler",
                route.location(),
                format!("cannot statically confirm a handler for {}: {}", route, why),
            )),
            HandlerMatch::Missing(why) => report.push(
                ValidationFinding::error(
                    "missing-handler",
                    route.location(),
                    format!("gateway route {} has no backend handler: {}", route, why),
                )
                .with_fix("implement the handler branch or remove the route"),
            ),
        }

        if !frontend.iter().any(|c| c.matches(route)) {
            report.push(ValidationFinding::warning(
                "orphaned-route",
                route.location(),
                format!("gateway route {} has no frontend caller (intentional for webhooks?)", route),
            ));
        }
    }

    for handler in backend {
        report.record_check();
        let routes = routes_of(handler, gateway);
        let why = if routes.is_empty() {
            "is not reachable through any gateway route"
        } else if !handler_has_caller(handler, &routes, frontend) {
            "has no frontend caller (intentional for webhooks?)"
        } else {
            continue;
        };
        report.push(ValidationFinding::warning(
            "orphaned-handler",
            Location::file(handler.file()),
            format!("backend handler '{}' {}", handler.name(), why),
        ));
    }

    let report = report.finalize();
    info!(
        frontend = frontend.len(),
        routes = gateway.len(),
        handlers = backend.len(),
        errors = report.error_count(),
        "api trace finished"
    );
    report
}
