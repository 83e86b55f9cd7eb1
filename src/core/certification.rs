//! Certification levels and the aggregate result of a validation run.
//!
//! Levels depend on error counts only:
//! - BRONZE: structure ran with zero errors
//! - SILVER: BRONZE, and schema plus api-contract ran with zero errors
//! - GOLD: SILVER, and portability ran with zero errors
//!
//! A validator that was not selected or was UNAVAILABLE cannot vouch for
//! its level, so partial runs cap the achievable level.

use crate::core::report::{ValidationReport, round3};
use crate::validators::{api_tracer, portability, schema, structure};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, clap::ValueEnum,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    None,
    Bronze,
    Silver,
    Gold,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "NONE",
            Self::Bronze => "BRONZE",
            Self::Silver => "SILVER",
            Self::Gold => "GOLD",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "bronze" => Ok(Self::Bronze),
            "silver" => Ok(Self::Silver),
            "gold" => Ok(Self::Gold),
            other => Err(format!("unknown certification level '{}'", other)),
        }
    }
}

/// Weight used when `cora.toml` does not set one. Validators that gate
/// deployability count double.
pub fn default_weight(validator: &str) -> f64 {
    match validator {
        structure::NAME | api_tracer::NAME => 2.0,
        _ => 1.0,
    }
}

pub fn derive_level(reports: &BTreeMap<String, ValidationReport>) -> Level {
    let passed = |name: &str| reports.get(name).is_some_and(|r| r.passed());

    if !passed(structure::NAME) {
        return Level::None;
    }
    if !(passed(schema::NAME) && passed(api_tracer::NAME)) {
        return Level::Bronze;
    }
    let all_clean = reports
        .values()
        .all(|r| !r.is_available() || r.error_count() == 0);
    if !(passed(portability::NAME) && all_clean) {
        return Level::Silver;
    }
    Level::Gold
}

/// `Σ(score × weight) / Σ(weight)` over available reports only.
pub fn weighted_score(
    reports: &BTreeMap<String, ValidationReport>,
    weights: &BTreeMap<String, f64>,
) -> Option<f64> {
    let (sum, total) = reports
        .values()
        .filter_map(|r| {
            let score = r.score()?;
            let w = weights
                .get(r.validator())
                .copied()
                .unwrap_or_else(|| default_weight(r.validator()));
            (w > 0.0).then_some((score * w, w))
        })
        .fold((0.0, 0.0), |(s, t), (sw, w)| (s + sw, t + w));
    (total > 0.0).then(|| sum / total)
}

#[derive(Debug, Clone)]
pub struct CertificationResult {
    pub run_id: Option<String>,
    pub target: PathBuf,
    pub reports: BTreeMap<String, ValidationReport>,
    pub overall_score: Option<f64>,
    pub level: Level,
}

impl CertificationResult {
    pub fn new(
        run_id: Option<String>,
        target: PathBuf,
        reports: BTreeMap<String, ValidationReport>,
        weights: &BTreeMap<String, f64>,
    ) -> Self {
        let overall_score = weighted_score(&reports, weights);
        let level = derive_level(&reports);
        Self {
            run_id,
            target,
            reports,
            overall_score,
            level,
        }
    }

    /// `(validator, reason)` for every UNAVAILABLE report.
    pub fn unavailable(&self) -> Vec<(&str, &str)> {
        self.reports
            .values()
            .filter(|r| !r.is_available())
            .map(|r| (r.validator(), r.unavailable_reason().unwrap_or("unknown")))
            .collect()
    }

    pub fn is_partial(&self) -> bool {
        !self.unavailable().is_empty()
    }

    pub fn meets(&self, minimum: Level) -> bool {
        self.level >= minimum
    }

    pub fn total_errors(&self) -> usize {
        self.reports.values().map(|r| r.error_count()).sum()
    }
}

#[derive(Serialize)]
struct UnavailableView<'a> {
    validator: &'a str,
    reason: &'a str,
}

#[derive(Serialize)]
struct CertificationView<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    run_id: Option<&'a str>,
    target: &'a PathBuf,
    level: Level,
    overall_score: Option<f64>,
    reports: &'a BTreeMap<String, ValidationReport>,
    unavailable: Vec<UnavailableView<'a>>,
}

impl Serialize for CertificationResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        CertificationView {
            run_id: self.run_id.as_deref(),
            target: &self.target,
            level: self.level,
            overall_score: self.overall_score.map(round3),
            reports: &self.reports,
            unavailable: self
                .unavailable()
                .into_iter()
                .map(|(validator, reason)| UnavailableView { validator, reason })
                .collect(),
        }
        .serialize(serializer)
    }
}
