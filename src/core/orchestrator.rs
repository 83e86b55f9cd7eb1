//! Compliance orchestration.
//!
//! Validators keep their own calling conventions; one adapter per validator
//! translates `run(target)` into that validator's entry point. A failing,
//! panicking, or late validator becomes an UNAVAILABLE report and the run
//! carries on. Reports are keyed by validator name, so output order never
//! depends on completion order.

use crate::core::certification::CertificationResult;
use crate::core::config::{
    ApiSettings, GatewaySettings, PortabilitySettings, ProjectConfig, SchemaSettings,
    StructureSettings,
};
use crate::core::error::CoraError;
use crate::core::report::ValidationReport;
use crate::validators::gateway::{self, AwsCliPager, RoutePager};
use crate::validators::introspect::ConnectionConfig;
use crate::validators::{api_sources, api_tracer, portability, schema, structure};
use std::collections::{BTreeMap, BTreeSet};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Uniform face of a validator.
pub trait ValidatorAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    fn weight(&self) -> f64 {
        crate::core::certification::default_weight(self.name())
    }

    fn run(&self, target: &Path) -> Result<ValidationReport, CoraError>;
}

pub struct StructureAdapter(pub StructureSettings);

impl ValidatorAdapter for StructureAdapter {
    fn name(&self) -> &'static str {
        structure::NAME
    }

    fn run(&self, target: &Path) -> Result<ValidationReport, CoraError> {
        structure::validate(target, &self.0)
    }
}

pub struct PortabilityAdapter(pub PortabilitySettings);

impl ValidatorAdapter for PortabilityAdapter {
    fn name(&self) -> &'static str {
        portability::NAME
    }

    fn run(&self, target: &Path) -> Result<ValidationReport, CoraError> {
        let patterns = portability::patterns_from_settings(&self.0)?;
        portability::validate(target, &patterns, &self.0)
    }
}

pub struct SchemaAdapter(pub SchemaSettings);

impl ValidatorAdapter for SchemaAdapter {
    fn name(&self) -> &'static str {
        schema::NAME
    }

    fn run(&self, target: &Path) -> Result<ValidationReport, CoraError> {
        let config = ConnectionConfig::from_settings(&self.0, target, |k| std::env::var(k).ok());
        schema::validate(target, &config)
    }
}

pub struct ApiContractAdapter {
    pub api: ApiSettings,
    pub gateway: GatewaySettings,
}

impl ValidatorAdapter for ApiContractAdapter {
    fn name(&self) -> &'static str {
        api_tracer::NAME
    }

    fn run(&self, target: &Path) -> Result<ValidationReport, CoraError> {
        let frontend = api_sources::extract_frontend_calls(target, &self.api)?;
        let backend = api_sources::extract_backend_handlers(target, &self.api)?;
        let pager = AwsCliPager::from_settings(&self.gateway);
        let (routes, source) = gateway::extract_gateway_routes(
            target,
            &self.gateway,
            pager.as_ref().map(|p| p as &dyn RoutePager),
        )?;
        Ok(api_tracer::validate(&frontend, &routes, &backend, &source))
    }
}

/// The four built-in adapters configured from `cora.toml`.
pub fn default_adapters(config: &ProjectConfig) -> Vec<Arc<dyn ValidatorAdapter>> {
    vec![
        Arc::new(StructureAdapter(config.structure.clone())),
        Arc::new(PortabilityAdapter(config.portability.clone())),
        Arc::new(SchemaAdapter(config.schema.clone())),
        Arc::new(ApiContractAdapter {
            api: config.api.clone(),
            gateway: config.gateway.clone(),
        }),
    ]
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Run one adapter, converting errors and panics into UNAVAILABLE.
fn run_guarded(adapter: &dyn ValidatorAdapter, target: &Path) -> ValidationReport {
    let name = adapter.name();
    let started = Instant::now();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| adapter.run(target)));
    let report = match outcome {
        Ok(Ok(report)) => report,
        Ok(Err(e)) => {
            warn!(validator = name, error = %e, "validator unavailable");
            let reason = match e {
                CoraError::ValidatorUnavailable { reason, .. } => reason,
                other => other.to_string(),
            };
            ValidationReport::unavailable(name, reason)
        }
        Err(payload) => {
            let msg = panic_message(payload.as_ref());
            warn!(validator = name, panic = %msg, "validator panicked");
            ValidationReport::unavailable(name, format!("validator panicked: {}", msg))
        }
    };
    debug!(
        validator = name,
        elapsed_ms = started.elapsed().as_millis() as u64,
        available = report.is_available(),
        "validator finished"
    );
    report
}

pub struct Orchestrator {
    adapters: Vec<Arc<dyn ValidatorAdapter>>,
    weights: BTreeMap<String, f64>,
    timeout: Duration,
    parallel: bool,
    deterministic: bool,
}

impl Orchestrator {
    pub fn new(adapters: Vec<Arc<dyn ValidatorAdapter>>) -> Self {
        Self {
            adapters,
            weights: BTreeMap::new(),
            timeout: Duration::from_secs(300),
            parallel: true,
            deterministic: false,
        }
    }

    pub fn from_config(config: &ProjectConfig) -> Self {
        Self::new(default_adapters(config))
            .with_weights(config.validate.weights.clone())
            .with_timeout(config.validate_timeout())
            .parallel(config.validate.parallel)
    }

    pub fn with_weights(mut self, weights: BTreeMap<String, f64>) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Omit the run id so identical inputs render identical output.
    pub fn deterministic(mut self, deterministic: bool) -> Self {
        self.deterministic = deterministic;
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.adapters.iter().map(|a| a.name()).collect()
    }

    fn select(&self, selected: &BTreeSet<String>) -> Result<Vec<Arc<dyn ValidatorAdapter>>, CoraError> {
        if selected.is_empty() {
            return Ok(self.adapters.clone());
        }
        let known: BTreeSet<&str> = self.adapters.iter().map(|a| a.name()).collect();
        if let Some(unknown) = selected.iter().find(|s| !known.contains(s.as_str())) {
            return Err(CoraError::ConfigError(format!(
                "unknown validator '{}' (available: {})",
                unknown,
                known.into_iter().collect::<Vec<_>>().join(", ")
            )));
        }
        Ok(self
            .adapters
            .iter()
            .filter(|a| selected.contains(a.name()))
            .cloned()
            .collect())
    }

    /// Effective weights: configuration first, then each adapter's default.
    fn effective_weights(&self) -> BTreeMap<String, f64> {
        self.adapters
            .iter()
            .map(|a| {
                let w = self.weights.get(a.name()).copied().unwrap_or_else(|| a.weight());
                (a.name().to_string(), w)
            })
            .collect()
    }

    pub fn run_all(
        &self,
        target: &Path,
        selected: &BTreeSet<String>,
    ) -> Result<CertificationResult, CoraError> {
        if !target.is_dir() {
            return Err(CoraError::ValidationError(format!(
                "target {} is not a directory",
                target.display()
            )));
        }
        let adapters = self.select(selected)?;
        info!(
            target = %target.display(),
            validators = adapters.len(),
            parallel = self.parallel,
            timeout_secs = self.timeout.as_secs(),
            "validation run starting"
        );

        let reports = if self.parallel {
            self.run_parallel(&adapters, target)
        } else {
            self.run_sequential(&adapters, target)
        };

        let run_id = (!self.deterministic).then(|| ulid::Ulid::new().to_string());
        let result = CertificationResult::new(
            run_id,
            target.to_path_buf(),
            reports,
            &self.effective_weights(),
        );
        info!(
            level = %result.level,
            score = result.overall_score.unwrap_or(0.0),
            unavailable = result.unavailable().len(),
            "validation run finished"
        );
        Ok(result)
    }

    /// One validator at a time, each still bounded by the shared deadline.
    fn run_sequential(
        &self,
        adapters: &[Arc<dyn ValidatorAdapter>],
        target: &Path,
    ) -> BTreeMap<String, ValidationReport> {
        let deadline = Instant::now() + self.timeout;
        let mut reports = BTreeMap::new();
        for adapter in adapters {
            let name = adapter.name().to_string();
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                reports.insert(name.clone(), self.timed_out(&name));
                continue;
            }

            let (tx, rx) = mpsc::channel::<(String, ValidationReport)>();
            spawn_guarded(adapter, target, tx);
            let report = match rx.recv_timeout(remaining) {
                Ok((_, report)) => report,
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    warn!(validator = %name, "validation deadline reached");
                    self.timed_out(&name)
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    ValidationReport::unavailable(&name, "validator thread could not be started")
                }
            };
            reports.insert(name, report);
        }
        reports
    }

    fn run_parallel(
        &self,
        adapters: &[Arc<dyn ValidatorAdapter>],
        target: &Path,
    ) -> BTreeMap<String, ValidationReport> {
        let deadline = Instant::now() + self.timeout;
        let (tx, rx) = mpsc::channel::<(String, ValidationReport)>();
        let mut pending: BTreeSet<String> = BTreeSet::new();

        for adapter in adapters {
            pending.insert(adapter.name().to_string());
            spawn_guarded(adapter, target, tx.clone());
        }
        drop(tx);

        let mut reports = BTreeMap::new();
        while !pending.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok((name, report)) => {
                    pending.remove(&name);
                    reports.insert(name, report);
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    warn!(pending = pending.len(), "validation deadline reached");
                    break;
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }

        // Late or never-started validators. Their threads are left to finish
        // on their own; they only read.
        for name in pending {
            let report = self.timed_out(&name);
            reports.insert(name, report);
        }
        reports
    }

    fn timed_out(&self, name: &str) -> ValidationReport {
        ValidationReport::unavailable(
            name,
            format!("did not finish within {}s", self.timeout.as_secs()),
        )
    }
}

/// Runs `adapter` on its own thread and sends the guarded report on `tx`.
/// A late report is simply dropped by the receiver.
fn spawn_guarded(
    adapter: &Arc<dyn ValidatorAdapter>,
    target: &Path,
    tx: mpsc::Sender<(String, ValidationReport)>,
) {
    let adapter = Arc::clone(adapter);
    let target: PathBuf = target.to_path_buf();
    let name = adapter.name().to_string();
    let spawned = thread::Builder::new()
        .name(format!("cora-{}", name))
        .spawn(move || {
            let report = run_guarded(adapter.as_ref(), &target);
            let _ = tx.send((adapter.name().to_string(), report));
        });
    if let Err(e) = spawned {
        warn!(validator = %name, error = %e, "could not spawn validator thread");
    }
}
