//! Raw scraper record -> scored `JobOffer`.

use anyhow::Result;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use thiserror::Error;
use tjm_adapters::{currency_code, parse_rate_text, parse_rate_value, RawOfferRecord};
use tjm_core::{DailyRate, JobOffer, QualityMetrics, RemotePolicy, DEFAULT_CURRENCY};
use tracing::debug;

use crate::normalize::{
    collapse_whitespace, parse_contract_type, parse_remote_policy, parse_seniority,
    LocationParser, ParsedLocation, TechnologyNormalizer,
};
use crate::quality::QualityScorer;

#[derive(Debug, Error, PartialEq)]
pub enum TransformError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("unparseable scraped_at `{0}`")]
    InvalidTimestamp(String),
}

/// Parse RFC 3339, or a naive ISO timestamp / date taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn cleaned(value: Option<&str>) -> Option<String> {
    value
        .map(collapse_whitespace)
        .filter(|v| !v.is_empty())
}

pub struct StandardTransformer {
    technologies: TechnologyNormalizer,
    locations: LocationParser,
    scorer: QualityScorer,
}

impl StandardTransformer {
    pub fn new(
        technologies: TechnologyNormalizer,
        locations: LocationParser,
        scorer: QualityScorer,
    ) -> Self {
        Self {
            technologies,
            locations,
            scorer,
        }
    }

    /// Embedded reference tables and default weights.
    pub fn builtin() -> Result<Self> {
        Ok(Self::new(
            TechnologyNormalizer::builtin()?,
            LocationParser::builtin()?,
            QualityScorer::default(),
        ))
    }

    pub fn technologies(&self) -> &TechnologyNormalizer {
        &self.technologies
    }

    pub fn transform(
        &self,
        raw: &RawOfferRecord,
        processed_at: DateTime<Utc>,
    ) -> Result<JobOffer, TransformError> {
        let source = raw
            .source_text()
            .ok_or(TransformError::MissingField("source"))?
            .to_string();
        let source_id = raw
            .source_id_text()
            .ok_or(TransformError::MissingField("source_id"))?;
        let title = raw
            .title_text()
            .map(collapse_whitespace)
            .ok_or(TransformError::MissingField("title"))?;

        let scraped_at = match raw.scraped_at.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(text) => Some(
                parse_timestamp(text)
                    .ok_or_else(|| TransformError::InvalidTimestamp(text.to_string()))?,
            ),
        };

        let description = cleaned(raw.description.as_deref());

        let mut remote_policy = raw.remote_policy.as_deref().and_then(parse_remote_policy);
        let location = match raw.location.as_deref().map(|l| self.locations.parse(l)) {
            Some(ParsedLocation::Place(location)) => Some(location),
            Some(ParsedLocation::RemoteOnly) => {
                remote_policy.get_or_insert(RemotePolicy::Remote);
                None
            }
            Some(ParsedLocation::Empty) | None => None,
        };

        let keywords = raw.technology_keywords();
        let technologies = if keywords.is_empty() {
            let text = format!("{title} {}", description.as_deref().unwrap_or_default());
            self.technologies.scan_text(&text)
        } else {
            self.technologies.normalize(&keywords)
        };

        let mut offer = JobOffer {
            rate: resolve_rate(raw, &title, description.as_deref()),
            source,
            source_id,
            url: cleaned(raw.url.as_deref()),
            title,
            company: cleaned(raw.company.as_deref()),
            description,
            technologies,
            seniority: raw.seniority_level.as_deref().and_then(parse_seniority),
            location,
            remote_policy,
            contract_type: parse_contract_type(raw.contract_type.as_deref()),
            scraped_at,
            processed_at,
            quality: QualityMetrics::default(),
        };
        offer.quality = self.scorer.score(&offer);

        debug!(
            key = %offer.key(),
            quality = offer.quality.overall,
            issues = offer.quality.issues.len(),
            "transformed offer"
        );
        Ok(offer)
    }
}

/// Explicit bounds, then the scraped rate text, then title + description.
fn resolve_rate(raw: &RawOfferRecord, title: &str, description: Option<&str>) -> Option<DailyRate> {
    let record_currency = raw.tjm_currency.as_deref().and_then(currency_code);

    let min = raw.tjm_min.as_ref().and_then(parse_rate_value);
    let max = raw.tjm_max.as_ref().and_then(parse_rate_value);
    if min.is_some() || max.is_some() {
        return Some(DailyRate::new(
            min,
            max,
            record_currency.unwrap_or(DEFAULT_CURRENCY),
        ));
    }

    // The dedicated field is known to hold a rate, so bare numbers count.
    let from_field = raw
        .rate_text()
        .and_then(|text| parse_rate_text(&text).or_else(|| parse_rate_text(&format!("tjm {text}"))));
    let parsed = from_field.or_else(|| {
        parse_rate_text(&format!("{title} {}", description.unwrap_or_default()))
    })?;

    Some(DailyRate::new(
        Some(parsed.min),
        Some(parsed.max),
        parsed
            .currency
            .or(record_currency)
            .unwrap_or(DEFAULT_CURRENCY),
    ))
}
