//! Core domain model for the TJM rate aggregator.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "tjm-core";

pub const DEFAULT_CURRENCY: &str = "EUR";
pub const DEFAULT_COUNTRY: &str = "France";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} `{}`", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractType {
    #[default]
    Freelance,
    Cdi,
    Cdd,
    Stage,
    Apprentissage,
}

impl ContractType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Freelance => "freelance",
            Self::Cdi => "cdi",
            Self::Cdd => "cdd",
            Self::Stage => "stage",
            Self::Apprentissage => "apprentissage",
        }
    }
}

impl FromStr for ContractType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "freelance" => Ok(Self::Freelance),
            "cdi" => Ok(Self::Cdi),
            "cdd" => Ok(Self::Cdd),
            "stage" => Ok(Self::Stage),
            "apprentissage" => Ok(Self::Apprentissage),
            other => Err(UnknownVariant {
                kind: "contract type",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemotePolicy {
    OnSite,
    Remote,
    Hybrid,
    Negotiable,
}

impl RemotePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OnSite => "on_site",
            Self::Remote => "remote",
            Self::Hybrid => "hybrid",
            Self::Negotiable => "negotiable",
        }
    }
}

impl FromStr for RemotePolicy {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on_site" => Ok(Self::OnSite),
            "remote" => Ok(Self::Remote),
            "hybrid" => Ok(Self::Hybrid),
            "negotiable" => Ok(Self::Negotiable),
            other => Err(UnknownVariant {
                kind: "remote policy",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeniorityLevel {
    Junior,
    Middle,
    Senior,
    Lead,
    Expert,
}

impl SeniorityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Junior => "junior",
            Self::Middle => "middle",
            Self::Senior => "senior",
            Self::Lead => "lead",
            Self::Expert => "expert",
        }
    }
}

impl FromStr for SeniorityLevel {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "junior" => Ok(Self::Junior),
            "middle" => Ok(Self::Middle),
            "senior" => Ok(Self::Senior),
            "lead" => Ok(Self::Lead),
            "expert" => Ok(Self::Expert),
            other => Err(UnknownVariant {
                kind: "seniority level",
                value: other.to_string(),
            }),
        }
    }
}

/// Daily rate bounds as scraped. Either bound may be missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRate {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub currency: String,
}

impl DailyRate {
    pub fn new(min: Option<f64>, max: Option<f64>, currency: impl Into<String>) -> Self {
        Self {
            min,
            max,
            currency: currency.into(),
        }
    }

    pub fn is_present(&self) -> bool {
        self.min.is_some() || self.max.is_some()
    }

    /// False only when both bounds exist and min > max.
    pub fn is_ordered(&self) -> bool {
        match (self.min, self.max) {
            (Some(min), Some(max)) => min <= max,
            _ => true,
        }
    }

    pub fn is_valid(&self) -> bool {
        let positive = |v: Option<f64>| v.map_or(true, |v| v > 0.0);
        self.is_present() && positive(self.min) && positive(self.max) && self.is_ordered()
    }

    pub fn average(&self) -> Option<f64> {
        match (self.min, self.max) {
            (Some(min), Some(max)) => Some((min + max) / 2.0),
            (Some(v), None) | (None, Some(v)) => Some(v),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub city: Option<String>,
    pub region: Option<String>,
    pub country: String,
    pub raw: String,
}

impl Location {
    /// "City, Region, Country" with missing parts skipped.
    pub fn display_name(&self) -> String {
        [self.city.as_deref(), self.region.as_deref(), Some(self.country.as_str())]
            .into_iter()
            .flatten()
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Derived quality scores; only `overall` is persisted.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub completeness: f64,
    pub accuracy: f64,
    pub consistency: f64,
    pub overall: f64,
    pub missing_fields: Vec<String>,
    pub issues: Vec<String>,
}

impl QualityMetrics {
    pub fn from_overall(overall: f64) -> Self {
        Self {
            overall,
            ..Self::default()
        }
    }
}

/// Natural key of an offer: the scraping source plus its source-local id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OfferKey {
    pub source: String,
    pub source_id: String,
}

impl OfferKey {
    pub fn new(source: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            source_id: source_id.into(),
        }
    }

    /// Deterministic row id, stable across reloads of the same offer.
    pub fn record_id(&self) -> Uuid {
        Uuid::new_v5(&Uuid::NAMESPACE_URL, self.to_string().as_bytes())
    }
}

impl fmt::Display for OfferKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.source_id)
    }
}

/// Canonical normalized offer, the unit the loader persists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOffer {
    pub source: String,
    pub source_id: String,
    pub url: Option<String>,
    pub title: String,
    pub company: Option<String>,
    pub description: Option<String>,
    pub rate: Option<DailyRate>,
    pub technologies: Vec<String>,
    pub seniority: Option<SeniorityLevel>,
    pub location: Option<Location>,
    pub remote_policy: Option<RemotePolicy>,
    pub contract_type: ContractType,
    pub scraped_at: Option<DateTime<Utc>>,
    pub processed_at: DateTime<Utc>,
    pub quality: QualityMetrics,
}

impl JobOffer {
    pub fn key(&self) -> OfferKey {
        OfferKey::new(self.source.clone(), self.source_id.clone())
    }

    pub fn has_required_fields(&self) -> bool {
        !self.source.trim().is_empty()
            && !self.source_id.trim().is_empty()
            && !self.title.trim().is_empty()
    }

    pub fn quality_score(&self) -> f64 {
        self.quality.overall
    }

    pub fn rate_min(&self) -> Option<f64> {
        self.rate.as_ref().and_then(|r| r.min)
    }

    pub fn rate_max(&self) -> Option<f64> {
        self.rate.as_ref().and_then(|r| r.max)
    }

    pub fn currency(&self) -> &str {
        self.rate
            .as_ref()
            .map(|r| r.currency.as_str())
            .unwrap_or(DEFAULT_CURRENCY)
    }

    pub fn rate_is_ordered(&self) -> bool {
        self.rate.as_ref().map_or(true, DailyRate::is_ordered)
    }
}
