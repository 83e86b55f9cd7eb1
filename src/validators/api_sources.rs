//! Static extraction of frontend call sites and backend handler routes.

use crate::core::config::ApiSettings;
use crate::core::error::CoraError;
use crate::core::walk;
use crate::validators::api_tracer::Endpoint;
use crate::validators::syntax::{line_of, matching_close, split_args, template_literal};
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;

const FRONTEND_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs"];
const BACKEND_EXTENSIONS: &[&str] = &["py", "ts", "js", "mjs"];

/// Path components that mark server-side code.
const BACKEND_DIRS: &[&str] = &["backend", "lambdas", "functions", "server"];
/// Path components never treated as application code.
const NON_APP_DIRS: &[&str] = &["infra", "infrastructure", "terraform", "tests", "__tests__", "test"];
/// Directories whose child names a deployable handler.
const HANDLER_CONTAINERS: &[&str] = &["lambdas", "functions"];

static CLIENT_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Za-z_$][\w$]*\s*\.\s*(get|post|put|patch|delete)\s*(?:<[^>()]*>)?\s*\(").unwrap()
});

static FETCH_CALL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bfetch\s*\(").unwrap());

static METHOD_OPTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"method\s*:\s*['"`]([A-Za-z]+)['"`]"#).unwrap()
});

static ROUTE_KEY_LITERAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"['"`](GET|POST|PUT|PATCH|DELETE|OPTIONS|HEAD|ANY) (/[^'"`\s]*)['"`]"#).unwrap()
});

static PATH_COMPARISON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\b(?:path|raw_path|rawPath|resource|route|route_path)\s*===?\s*['"](/[^'"]*)['"]"#).unwrap()
});

static METHOD_COMPARISON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\b(?:method|http_method|httpMethod)\s*===?\s*['"]([A-Za-z]+)['"]"#).unwrap()
});

static DECORATOR_ROUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\b(?:app|router|api|bp|blueprint|server|routes)\s*\.\s*(get|post|put|patch|delete|options|head|all|route)\s*\(\s*['"`](/[^'"`]*)['"`]"#).unwrap()
});

static DECORATOR_METHODS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"methods\s*=\s*\[([^\]]*)\]"#).unwrap()
});

/// Reads the request path or route key at runtime.
static READS_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:\[\s*['"](?:rawPath|path|routeKey|resource)['"]\s*\]|\.get\(\s*['"](?:rawPath|path|routeKey|resource)['"]|event\.(?:rawPath|path|routeKey|resource)\b)"#).unwrap()
});

/// Branching on computed path fragments.
static DISPATCH_SIGNALS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (
            Regex::new(r#"\.(?:startswith|endswith|startsWith|endsWith)\(\s*['"`]/"#).unwrap(),
            "path prefix/suffix dispatch",
        ),
        (
            Regex::new(r#"\.split\(\s*['"`]/['"`]\s*\)"#).unwrap(),
            "path split into segments",
        ),
        (
            Regex::new(r"\bre\.(?:match|search|fullmatch)\(|\.match\(\s*/\^?\\?/").unwrap(),
            "regex path matching",
        ),
        (
            Regex::new(r"\b(?:ROUTES|routes|HANDLERS|handlers|DISPATCH|dispatch\w*|route_map|routeMap)\s*(?:\[|\.get\()").unwrap(),
            "lookup-table dispatch",
        ),
        (Regex::new(r"\bgetattr\(").unwrap(), "reflective dispatch"),
    ]
});

fn scoped_files(
    root: &Path,
    roots: &[String],
    extensions: &[&str],
    keep: impl Fn(&Path) -> bool,
) -> Result<Vec<PathBuf>, CoraError> {
    let mut files = Vec::new();
    if roots.is_empty() {
        files.extend(
            walk::collect_with_extensions(root, extensions)?
                .into_iter()
                .filter(|p| !walk::has_component(root, p, NON_APP_DIRS))
                .filter(|p| keep(p)),
        );
    } else {
        for r in roots {
            files.extend(
                walk::collect_with_extensions(&root.join(r), extensions)?
                    .into_iter()
                    .filter(|p| !walk::has_component(root, p, NON_APP_DIRS)),
            );
        }
        files.sort();
        files.dedup();
    }
    Ok(files)
}

// ---------------------------------------------------------------------------
// Frontend
// ---------------------------------------------------------------------------

/// A path-looking literal: leading `/` or a base-URL template prefix.
fn call_path(arg: &str) -> Option<String> {
    let lit = template_literal(arg)?;
    if lit.starts_with('/') || lit.starts_with("${") || lit.starts_with("http") {
        let normalized_source = lit.trim();
        // `${x}` alone is not a path.
        if normalized_source.starts_with("${") && !normalized_source.contains('/') {
            return None;
        }
        return Some(lit);
    }
    None
}

/// Client call sites in one frontend source file.
pub fn extract_calls_from_source(file: &Path, content: &str) -> Vec<Endpoint> {
    let mut calls = Vec::new();

    for caps in CLIENT_CALL.captures_iter(content) {
        let (Some(whole), Some(method)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let open = whole.end() - 1;
        let Some(close) = matching_close(content, open) else {
            continue;
        };
        let args = split_args(&content[open + 1..close]);
        let Some(path) = args.first().and_then(|a| call_path(a)) else {
            continue;
        };
        calls.push(Endpoint::new(
            method.as_str(),
            &path,
            file,
            Some(line_of(content, whole.start())),
        ));
    }

    for m in FETCH_CALL.find_iter(content) {
        let open = m.end() - 1;
        let Some(close) = matching_close(content, open) else {
            continue;
        };
        let args = split_args(&content[open + 1..close]);
        let Some(path) = args.first().and_then(|a| call_path(a)) else {
            continue;
        };
        let method = args
            .get(1)
            .and_then(|opts| METHOD_OPTION.captures(opts))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_ascii_uppercase())
            .unwrap_or_else(|| "GET".to_string());
        calls.push(Endpoint::new(
            &method,
            &path,
            file,
            Some(line_of(content, m.start())),
        ));
    }

    calls.sort_by_key(|c| c.line);
    calls
}

/// Frontend call sites under the configured roots (default: every non-backend
/// source file in the project).
pub fn extract_frontend_calls(root: &Path, settings: &ApiSettings) -> Result<Vec<Endpoint>, CoraError> {
    let files = scoped_files(root, &settings.frontend_roots, FRONTEND_EXTENSIONS, |p| {
        !walk::has_component(root, p, BACKEND_DIRS)
            && !p.to_string_lossy().ends_with(".d.ts")
    })?;
    let mut calls = Vec::new();
    for file in files {
        let Some(content) = walk::read_text(&file) else {
            continue;
        };
        calls.extend(extract_calls_from_source(&walk::relative(root, &file), &content));
    }
    debug!(calls = calls.len(), "frontend calls extracted");
    Ok(calls)
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendHandler {
    /// Routes fully visible in source.
    Static {
        name: String,
        file: PathBuf,
        endpoints: Vec<Endpoint>,
    },
    /// Picks its endpoint from the request at runtime. `endpoints` holds
    /// whatever could still be read statically.
    Dynamic {
        name: String,
        file: PathBuf,
        endpoints: Vec<Endpoint>,
        signals: Vec<String>,
    },
}

impl BackendHandler {
    pub fn name(&self) -> &str {
        match self {
            Self::Static { name, .. } | Self::Dynamic { name, .. } => name,
        }
    }

    pub fn file(&self) -> &Path {
        match self {
            Self::Static { file, .. } | Self::Dynamic { file, .. } => file,
        }
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        match self {
            Self::Static { endpoints, .. } | Self::Dynamic { endpoints, .. } => endpoints,
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, Self::Dynamic { .. })
    }
}

/// What one backend file reveals.
#[derive(Debug, Default)]
pub struct BackendScan {
    pub endpoints: Vec<Endpoint>,
    pub signals: Vec<String>,
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// Python-style `if path == '/x':` blocks with nested method checks.
fn comparison_endpoints(file: &Path, content: &str, out: &mut Vec<Endpoint>) {
    // (indent, path, line, saw_method)
    let mut open: Vec<(usize, String, usize, bool)> = Vec::new();

    let close_block = |block: (usize, String, usize, bool), out: &mut Vec<Endpoint>| {
        if !block.3 {
            out.push(Endpoint::new("ANY", &block.1, file, Some(block.2)));
        }
    };

    for (idx, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let indent = indent_of(line);
        while open.last().is_some_and(|b| indent <= b.0) {
            if let Some(block) = open.pop() {
                close_block(block, out);
            }
        }

        let path = PATH_COMPARISON.captures(line).and_then(|c| c.get(1));
        let method = METHOD_COMPARISON.captures(line).and_then(|c| c.get(1));
        match (path, method) {
            (Some(p), Some(m)) => {
                out.push(Endpoint::new(m.as_str(), p.as_str(), file, Some(idx + 1)));
            }
            (Some(p), None) => open.push((indent, p.as_str().to_string(), idx + 1, false)),
            (None, Some(m)) => {
                if let Some(block) = open.last_mut() {
                    block.3 = true;
                    out.push(Endpoint::new(m.as_str(), &block.1, file, Some(idx + 1)));
                }
            }
            (None, None) => {}
        }
    }
    while let Some(block) = open.pop() {
        close_block(block, out);
    }
}

fn decorator_endpoints(file: &Path, content: &str, out: &mut Vec<Endpoint>) {
    for caps in DECORATOR_ROUTE.captures_iter(content) {
        let (Some(whole), Some(kind), Some(path)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let line = Some(line_of(content, whole.start()));
        match kind.as_str() {
            "route" => {
                // Flask: methods=[...] within the same call, default GET.
                let rest = &content[whole.end()..];
                let call_tail = rest.split(')').next().unwrap_or("");
                let methods: Vec<String> = DECORATOR_METHODS
                    .captures(call_tail)
                    .and_then(|c| c.get(1))
                    .map(|list| {
                        split_args(list.as_str())
                            .into_iter()
                            .filter_map(template_literal)
                            .collect()
                    })
                    .unwrap_or_else(|| vec!["GET".to_string()]);
                for m in methods {
                    out.push(Endpoint::new(&m, path.as_str(), file, line));
                }
            }
            "all" => out.push(Endpoint::new("ANY", path.as_str(), file, line)),
            method => out.push(Endpoint::new(method, path.as_str(), file, line)),
        }
    }
}

/// Endpoints and dynamic-dispatch signals in one backend file.
pub fn scan_backend_source(file: &Path, content: &str) -> BackendScan {
    let mut scan = BackendScan::default();

    for caps in ROUTE_KEY_LITERAL.captures_iter(content) {
        let (Some(whole), Some(method), Some(path)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        scan.endpoints.push(Endpoint::new(
            method.as_str(),
            path.as_str(),
            file,
            Some(line_of(content, whole.start())),
        ));
    }
    comparison_endpoints(file, content, &mut scan.endpoints);
    decorator_endpoints(file, content, &mut scan.endpoints);

    if READS_PATH.is_match(content) {
        for (re, label) in DISPATCH_SIGNALS.iter() {
            if let Some(m) = re.find(content) {
                scan.signals
                    .push(format!("{} (line {})", label, line_of(content, m.start())));
            }
        }
    }

    scan.endpoints.sort_by(|a, b| (a.line, &a.method, &a.path).cmp(&(b.line, &b.method, &b.path)));
    scan.endpoints.dedup_by(|a, b| a.method == b.method && a.path == b.path);
    scan
}

/// Deployable handler a file belongs to: the directory under `lambdas/`
/// (or `functions/`), else the file stem.
pub fn handler_name(root: &Path, file: &Path) -> String {
    let rel = walk::relative(root, file);
    let parts: Vec<&str> = rel
        .components()
        .filter_map(|c| c.as_os_str().to_str())
        .collect();
    for (i, part) in parts.iter().enumerate() {
        if HANDLER_CONTAINERS.contains(part) {
            if let Some(next) = parts.get(i + 1) {
                let next = next.split('.').next().unwrap_or(next);
                return next.to_string();
            }
        }
    }
    file.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("handler")
        .to_string()
}

/// Backend handlers grouped by deployable unit.
pub fn extract_backend_handlers(root: &Path, settings: &ApiSettings) -> Result<Vec<BackendHandler>, CoraError> {
    let files = scoped_files(root, &settings.backend_roots, BACKEND_EXTENSIONS, |p| {
        walk::has_component(root, p, BACKEND_DIRS)
    })?;

    // name -> (first file, endpoints, signals, entry file with routes)
    let mut grouped: BTreeMap<String, (PathBuf, Vec<Endpoint>, Vec<String>, Option<PathBuf>)> =
        BTreeMap::new();
    for file in files {
        let Some(content) = walk::read_text(&file) else {
            continue;
        };
        let rel = walk::relative(root, &file);
        let scan = scan_backend_source(&rel, &content);
        let entry = grouped
            .entry(handler_name(root, &file))
            .or_insert_with(|| (rel.clone(), Vec::new(), Vec::new(), None));
        if entry.3.is_none() && (!scan.endpoints.is_empty() || !scan.signals.is_empty()) {
            entry.3 = Some(rel.clone());
        }
        entry.1.extend(scan.endpoints);
        entry.2.extend(
            scan.signals
                .into_iter()
                .map(|s| format!("{}: {}", rel.display(), s)),
        );
    }

    let handlers: Vec<BackendHandler> = grouped
        .into_iter()
        .map(|(name, (first, endpoints, signals, entry))| {
            let file = entry.unwrap_or(first);
            if signals.is_empty() {
                BackendHandler::Static { name, file, endpoints }
            } else {
                BackendHandler::Dynamic {
                    name,
                    file,
                    endpoints,
                    signals,
                }
            }
        })
        .collect();
    debug!(
        handlers = handlers.len(),
        dynamic = handlers.iter().filter(|h| h.is_dynamic()).count(),
        "backend handlers extracted"
    );
    Ok(handlers)
}
