//! Source extractors: read scraper NDJSON output into raw offer records.

pub mod rates;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;
use tjm_core::OfferKey;
use tracing::{debug, info, warn};

pub use rates::{currency_code, parse_rate_text, parse_rate_value, ParsedRate};

pub const CRATE_NAME: &str = "tjm-adapters";

pub const REQUIRED_FIELDS: [&str; 3] = ["source", "source_id", "title"];

/// One scraped posting before normalization. Loosely typed on purpose: scrapers
/// emit ids and rates as either numbers or strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawOfferRecord {
    pub source: Option<String>,
    pub source_id: Option<JsonValue>,
    pub url: Option<String>,
    pub title: Option<String>,
    pub company: Option<String>,
    pub description: Option<String>,
    pub tjm_min: Option<JsonValue>,
    pub tjm_max: Option<JsonValue>,
    pub tjm_currency: Option<String>,
    #[serde(alias = "tjm", alias = "rate_text")]
    pub tjm_text: Option<JsonValue>,
    pub technologies: Option<JsonValue>,
    pub location: Option<String>,
    pub remote_policy: Option<String>,
    pub contract_type: Option<String>,
    pub seniority_level: Option<String>,
    pub scraped_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl RawOfferRecord {
    pub fn source_text(&self) -> Option<&str> {
        non_blank(self.source.as_deref())
    }

    pub fn source_id_text(&self) -> Option<String> {
        match self.source_id.as_ref()? {
            JsonValue::String(s) => non_blank(Some(s)).map(ToString::to_string),
            JsonValue::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn title_text(&self) -> Option<&str> {
        non_blank(self.title.as_deref())
    }

    pub fn key(&self) -> Option<OfferKey> {
        Some(OfferKey::new(self.source_text()?, self.source_id_text()?))
    }

    pub fn missing_required_field(&self) -> Option<&'static str> {
        if self.source_text().is_none() {
            Some("source")
        } else if self.source_id_text().is_none() {
            Some("source_id")
        } else if self.title_text().is_none() {
            Some("title")
        } else {
            None
        }
    }

    /// Free-form rate text, if the scraper captured one.
    pub fn rate_text(&self) -> Option<String> {
        match self.tjm_text.as_ref()? {
            JsonValue::String(s) => non_blank(Some(s)).map(ToString::to_string),
            JsonValue::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Technology keywords as scraped: an array of strings or one delimited string.
    pub fn technology_keywords(&self) -> Vec<String> {
        match self.technologies.as_ref() {
            Some(JsonValue::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str())
                .filter_map(|s| non_blank(Some(s)))
                .map(ToString::to_string)
                .collect(),
            Some(JsonValue::String(s)) => split_keywords(s),
            _ => Vec::new(),
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

fn split_keywords(text: &str) -> Vec<String> {
    text.split([',', ';', '|', '/'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("record source `{found}` does not match extractor source `{expected}`")]
    SourceMismatch { expected: &'static str, found: String },
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("source directory {} does not exist", .0.display())]
    SourceDirMissing(PathBuf),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedLine {
    pub line: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractedFile {
    pub origin: String,
    pub extractor: &'static str,
    pub lines_read: usize,
    pub records: Vec<RawOfferRecord>,
    pub rejected: Vec<RejectedLine>,
}

pub trait SourceExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    fn validate(&self, record: &RawOfferRecord) -> Result<(), ExtractError> {
        match record.missing_required_field() {
            Some(field) => Err(ExtractError::MissingField(field)),
            None => Ok(()),
        }
    }

    /// Source-specific cleanup applied to records that passed validation.
    fn prepare(&self, record: RawOfferRecord) -> RawOfferRecord {
        record
    }

    /// Parse NDJSON text. Bad lines are collected, never fatal.
    fn extract_str(&self, origin: &str, text: &str) -> ExtractedFile {
        let mut out = ExtractedFile {
            origin: origin.to_string(),
            extractor: self.name(),
            lines_read: 0,
            records: Vec::new(),
            rejected: Vec::new(),
        };

        for (idx, line) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            out.lines_read += 1;

            let parsed = serde_json::from_str::<RawOfferRecord>(line)
                .map_err(ExtractError::from)
                .and_then(|record| self.validate(&record).map(|()| record));

            match parsed {
                Ok(record) => out.records.push(self.prepare(record)),
                Err(err) => {
                    warn!(origin, line = line_no, error = %err, "skipping scraped record");
                    out.rejected.push(RejectedLine {
                        line: line_no,
                        reason: err.to_string(),
                    });
                }
            }
        }

        debug!(
            origin,
            extractor = self.name(),
            records = out.records.len(),
            rejected = out.rejected.len(),
            "extracted source file"
        );
        out
    }

    /// Invalid UTF-8 is replaced rather than failing the whole file.
    fn extract_bytes(&self, origin: &str, bytes: &[u8]) -> ExtractedFile {
        self.extract_str(origin, &String::from_utf8_lossy(bytes))
    }

    fn extract_file(&self, path: &Path) -> Result<ExtractedFile> {
        let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        Ok(self.extract_bytes(&path.display().to_string(), &bytes))
    }
}

/// Generic extractor for any scraper's NDJSON output.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonlExtractor;

impl SourceExtractor for JsonlExtractor {
    fn name(&self) -> &'static str {
        "jsonl"
    }
}

/// FreeWork exports: the source must be `freework`, technologies sometimes
/// arrive as a single string and empty rate strings mean "unknown".
#[derive(Debug, Default, Clone, Copy)]
pub struct FreeWorkExtractor;

impl FreeWorkExtractor {
    pub const SOURCE: &'static str = "freework";
}

impl SourceExtractor for FreeWorkExtractor {
    fn name(&self) -> &'static str {
        Self::SOURCE
    }

    fn validate(&self, record: &RawOfferRecord) -> Result<(), ExtractError> {
        JsonlExtractor.validate(record)?;
        match record.source_text() {
            Some(Self::SOURCE) => Ok(()),
            other => Err(ExtractError::SourceMismatch {
                expected: Self::SOURCE,
                found: other.unwrap_or_default().to_string(),
            }),
        }
    }

    fn prepare(&self, mut record: RawOfferRecord) -> RawOfferRecord {
        if let Some(JsonValue::String(s)) = &record.technologies {
            let items = split_keywords(s).into_iter().map(JsonValue::String).collect();
            record.technologies = Some(JsonValue::Array(items));
        }
        for field in [&mut record.tjm_min, &mut record.tjm_max] {
            if matches!(field, Some(JsonValue::String(s)) if s.trim().is_empty()) {
                *field = None;
            }
        }
        if record.scraped_at.is_none() {
            record.scraped_at = Some(Utc::now().to_rfc3339());
        }
        record
    }
}

pub fn extractor_for_file(path: &Path) -> Option<Box<dyn SourceExtractor>> {
    let name = path.file_name()?.to_string_lossy().to_lowercase();
    if name.contains(FreeWorkExtractor::SOURCE) {
        Some(Box::new(FreeWorkExtractor))
    } else if name.ends_with(".jsonl") || name.ends_with(".ndjson") {
        Some(Box::new(JsonlExtractor))
    } else {
        None
    }
}

/// Files in `dir` whose name matches `pattern` (`*` and `?` wildcards), sorted by name.
pub fn discover_source_files(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>, ExtractError> {
    if !dir.is_dir() {
        return Err(ExtractError::SourceDirMissing(dir.to_path_buf()));
    }

    let mut files = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|ft| ft.is_file()).unwrap_or(false))
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .map(|n| wildcard_match(pattern, &n.to_string_lossy()))
                .unwrap_or(false)
        })
        .collect::<Vec<_>>();
    files.sort();

    if files.is_empty() {
        warn!(dir = %dir.display(), pattern, "no source files matched");
    } else {
        info!(dir = %dir.display(), pattern, files = files.len(), "discovered source files");
    }
    Ok(files)
}

pub fn wildcard_match(pattern: &str, name: &str) -> bool {
    let p = pattern.chars().collect::<Vec<_>>();
    let n = name.chars().collect::<Vec<_>>();
    let (mut pi, mut ni) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while ni < n.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == n[ni]) {
            pi += 1;
            ni += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ni));
            pi += 1;
        } else if let Some((star_pi, star_ni)) = star {
            pi = star_pi + 1;
            ni = star_ni + 1;
            star = Some((star_pi, star_ni + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|c| *c == '*')
}
