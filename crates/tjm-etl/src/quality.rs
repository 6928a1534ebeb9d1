//! Rule-based quality scoring of normalized offers.

use std::collections::BTreeSet;

use tjm_core::{JobOffer, QualityMetrics};

pub const ISSUE_SHORT_TITLE: &str = "short_title";
pub const ISSUE_UNREALISTIC_RATE: &str = "unrealistic_rate";
pub const ISSUE_REVERSED_RATE: &str = "reversed_rate";
pub const ISSUE_TOO_MANY_TECHNOLOGIES: &str = "too_many_technologies";
pub const ISSUE_DUPLICATE_TECHNOLOGIES: &str = "duplicate_technologies";
pub const ISSUE_SHORT_COMPANY: &str = "short_company";
pub const ISSUE_FUTURE_SCRAPED_AT: &str = "future_scraped_at";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityWeights {
    pub completeness: f64,
    pub accuracy: f64,
    pub consistency: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            completeness: 0.4,
            accuracy: 0.4,
            consistency: 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QualityScorer {
    weights: QualityWeights,
}

impl QualityScorer {
    pub fn new(weights: QualityWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> QualityWeights {
        self.weights
    }

    /// Deterministic: depends only on the offer, including its `processed_at`.
    pub fn score(&self, offer: &JobOffer) -> QualityMetrics {
        let completeness = completeness(offer);
        let accuracy = accuracy(offer);
        let consistency = consistency(offer);

        let weighted = self.weights.completeness * completeness
            + self.weights.accuracy * accuracy
            + self.weights.consistency * consistency;
        let overall = if weighted.is_finite() {
            weighted.clamp(0.0, 1.0)
        } else {
            0.0
        };

        QualityMetrics {
            completeness,
            accuracy,
            consistency,
            overall,
            missing_fields: missing_fields(offer),
            issues: issues(offer),
        }
    }
}

fn present(value: Option<&str>) -> bool {
    value.is_some_and(|v| !v.trim().is_empty())
}

fn share(flags: &[bool]) -> f64 {
    flags.iter().filter(|f| **f).count() as f64 / flags.len() as f64
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn completeness(offer: &JobOffer) -> f64 {
    let core = share(&[
        present(Some(&offer.source)),
        present(Some(&offer.source_id)),
        present(Some(&offer.title)),
        present(offer.url.as_deref()),
    ]);
    let important = share(&[
        present(offer.company.as_deref()),
        offer.rate.as_ref().is_some_and(|r| r.is_valid()),
        !offer.technologies.is_empty(),
        offer.location.is_some(),
    ]);
    let optional = share(&[
        present(offer.description.as_deref()),
        offer.seniority.is_some(),
        offer.remote_policy.is_some(),
    ]);
    0.4 * core + 0.4 * important + 0.2 * optional
}

fn title_is_meaningful(title: &str) -> bool {
    let title = title.trim();
    title.chars().count() > 10
        && title
            .chars()
            .any(|c| !(c.is_ascii_digit() || c.is_whitespace() || c.is_ascii_punctuation()))
}

fn accuracy(offer: &JobOffer) -> f64 {
    let title = if title_is_meaningful(&offer.title) { 1.0 } else { 0.0 };

    let rate = match offer
        .rate
        .as_ref()
        .filter(|r| r.is_valid())
        .and_then(|r| r.average())
    {
        Some(avg) if (100.0..=2000.0).contains(&avg) => 1.0,
        Some(_) => 0.5,
        None => 0.7,
    };

    let technologies = match offer.technologies.len() {
        0 => 0.7,
        1..=15 => 1.0,
        _ => 0.5,
    };

    let company = match offer.company.as_deref().map(str::trim) {
        None | Some("") => 0.7,
        Some(name) if name.chars().count() > 2 && !name.eq_ignore_ascii_case("n/a") => 1.0,
        Some(_) => 0.0,
    };

    mean(&[title, rate, technologies, company])
}

fn duplicate_technologies(offer: &JobOffer) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut dups = BTreeSet::new();
    for tech in &offer.technologies {
        let key = tech.to_lowercase();
        if !seen.insert(key.clone()) {
            dups.insert(key);
        }
    }
    dups.into_iter().collect()
}

fn consistency(offer: &JobOffer) -> f64 {
    let mut checks = Vec::with_capacity(3);

    if let Some(rate) = &offer.rate {
        match (rate.min, rate.max) {
            (Some(_), Some(_)) => checks.push(if rate.is_ordered() { 1.0 } else { 0.0 }),
            (Some(_), None) | (None, Some(_)) => checks.push(0.8),
            (None, None) => {}
        }
    }

    if !offer.technologies.is_empty() {
        checks.push(if duplicate_technologies(offer).is_empty() { 1.0 } else { 0.5 });
    }

    checks.push(match offer.scraped_at {
        Some(scraped) if scraped <= offer.processed_at => 1.0,
        Some(_) => 0.0,
        None => 0.8,
    });

    mean(&checks)
}

fn missing_fields(offer: &JobOffer) -> Vec<String> {
    let mut missing = Vec::new();
    if !present(offer.company.as_deref()) {
        missing.push("company");
    }
    if !offer.rate.as_ref().is_some_and(|r| r.is_present()) {
        missing.push("rate");
    }
    if offer.technologies.is_empty() {
        missing.push("technologies");
    }
    if offer.location.is_none() {
        missing.push("location");
    }
    if !present(offer.description.as_deref()) {
        missing.push("description");
    }
    missing.into_iter().map(ToString::to_string).collect()
}

/// Issue strings are `kind: detail`; reports group by `kind`.
fn issues(offer: &JobOffer) -> Vec<String> {
    let mut issues = Vec::new();

    let title_len = offer.title.trim().chars().count();
    if title_len < 5 {
        issues.push(format!("{ISSUE_SHORT_TITLE}: {title_len} chars"));
    }

    if let Some(rate) = &offer.rate {
        if let Some(avg) = rate.average() {
            if !(50.0..=3000.0).contains(&avg) {
                issues.push(format!("{ISSUE_UNREALISTIC_RATE}: average {avg:.0} {}", rate.currency));
            }
        }
        if let (Some(min), Some(max)) = (rate.min, rate.max) {
            if min > max {
                issues.push(format!("{ISSUE_REVERSED_RATE}: min {min:.0} > max {max:.0}"));
            }
        }
    }

    if offer.technologies.len() > 20 {
        issues.push(format!(
            "{ISSUE_TOO_MANY_TECHNOLOGIES}: {}",
            offer.technologies.len()
        ));
    }

    let dups = duplicate_technologies(offer);
    if !dups.is_empty() {
        issues.push(format!("{ISSUE_DUPLICATE_TECHNOLOGIES}: {}", dups.join(", ")));
    }

    if let Some(company) = offer.company.as_deref().map(str::trim) {
        if !company.is_empty() && company.chars().count() < 3 {
            issues.push(format!("{ISSUE_SHORT_COMPANY}: `{company}`"));
        }
    }

    if let Some(scraped) = offer.scraped_at {
        if scraped > offer.processed_at {
            issues.push(format!(
                "{ISSUE_FUTURE_SCRAPED_AT}: {}",
                scraped.to_rfc3339()
            ));
        }
    }

    issues
}

/// Group key of an issue string.
pub fn issue_kind(issue: &str) -> &str {
    issue.split_once(':').map_or(issue, |(kind, _)| kind.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use tjm_core::{ContractType, DailyRate, Location, RemotePolicy, SeniorityLevel};

    fn complete_offer() -> JobOffer {
        let processed_at = Utc.with_ymd_and_hms(2024, 3, 2, 12, 0, 0).single().unwrap();
        JobOffer {
            source: "freework".into(),
            source_id: "fw-1".into(),
            url: Some("https://example.test/fw-1".into()),
            title: "Développeur Rust senior".into(),
            company: Some("Octo".into()),
            description: Some("Mission longue".into()),
            rate: Some(DailyRate::new(Some(500.0), Some(650.0), "EUR")),
            technologies: vec!["PostgreSQL".into(), "Rust".into()],
            seniority: Some(SeniorityLevel::Senior),
            location: Some(Location {
                city: Some("Paris".into()),
                region: Some("Île-de-France".into()),
                country: "France".into(),
                raw: "Paris".into(),
            }),
            remote_policy: Some(RemotePolicy::Hybrid),
            contract_type: ContractType::Freelance,
            scraped_at: Some(processed_at - Duration::hours(3)),
            processed_at,
            quality: QualityMetrics::default(),
        }
    }

    fn bare_offer() -> JobOffer {
        JobOffer {
            url: None,
            company: None,
            description: None,
            rate: None,
            technologies: Vec::new(),
            seniority: None,
            location: None,
            remote_policy: None,
            scraped_at: None,
            ..complete_offer()
        }
    }

    #[test]
    fn complete_offer_scores_one() {
        let metrics = QualityScorer::default().score(&complete_offer());
        assert!((metrics.completeness - 1.0).abs() < 1e-9);
        assert_eq!(metrics.accuracy, 1.0);
        assert_eq!(metrics.consistency, 1.0);
        assert!((metrics.overall - 1.0).abs() < 1e-9);
        assert!(metrics.missing_fields.is_empty());
        assert!(metrics.issues.is_empty());
    }

    #[test]
    fn bare_offer_uses_neutral_defaults() {
        let metrics = QualityScorer::default().score(&bare_offer());
        // core 3/4, important 0, optional 0
        assert!((metrics.completeness - 0.3).abs() < 1e-9);
        // title 1, rate 0.7, technologies 0.7, company 0.7
        assert!((metrics.accuracy - 0.775).abs() < 1e-9);
        // only the unknown scraped_at check applies
        assert!((metrics.consistency - 0.8).abs() < 1e-9);
        assert!((metrics.overall - (0.4 * 0.3 + 0.4 * 0.775 + 0.2 * 0.8)).abs() < 1e-9);
        assert_eq!(
            metrics.missing_fields,
            vec!["company", "rate", "technologies", "location", "description"]
        );
    }

    #[test]
    fn reversed_range_is_flagged_and_penalized() {
        let mut offer = complete_offer();
        offer.rate = Some(DailyRate::new(Some(900.0), Some(700.0), "EUR"));
        let metrics = QualityScorer::default().score(&offer);

        assert!(metrics.issues.iter().any(|i| issue_kind(i) == ISSUE_REVERSED_RATE));
        assert!((metrics.consistency - 2.0 / 3.0).abs() < 1e-9);
        assert!(metrics.completeness < 1.0, "a reversed rate is not a valid rate");
        // the rate check falls back to the neutral 0.7, like a missing rate
        assert!((metrics.accuracy - (1.0 + 0.7 + 1.0 + 1.0) / 4.0).abs() < 1e-9);
    }

    #[test]
    fn detects_each_issue_kind() {
        let mut offer = complete_offer();
        offer.title = "Dev".into();
        offer.company = Some("X".into());
        offer.rate = Some(DailyRate::new(Some(10.0), Some(20.0), "EUR"));
        offer.technologies = (0..21).map(|i| format!("Tech{i}")).collect();
        offer.technologies.push("tech0".into());
        offer.scraped_at = Some(offer.processed_at + Duration::days(1));

        let metrics = QualityScorer::default().score(&offer);
        let kinds = metrics.issues.iter().map(|i| issue_kind(i)).collect::<Vec<_>>();
        assert_eq!(
            kinds,
            vec![
                ISSUE_SHORT_TITLE,
                ISSUE_UNREALISTIC_RATE,
                ISSUE_TOO_MANY_TECHNOLOGIES,
                ISSUE_DUPLICATE_TECHNOLOGIES,
                ISSUE_SHORT_COMPANY,
                ISSUE_FUTURE_SCRAPED_AT,
            ]
        );
    }

    #[test]
    fn placeholder_company_scores_zero_accuracy_component() {
        let mut offer = complete_offer();
        offer.company = Some("N/A".into());
        let metrics = QualityScorer::default().score(&offer);
        assert!((metrics.accuracy - 0.75).abs() < 1e-9);
    }

    #[test]
    fn overall_stays_in_unit_interval() {
        let scorer = QualityScorer::default();
        let rates = [
            None,
            Some(DailyRate::new(Some(1.0), Some(1_000_000.0), "EUR")),
            Some(DailyRate::new(Some(5000.0), Some(1.0), "USD")),
            Some(DailyRate::new(None, Some(450.0), "EUR")),
            Some(DailyRate::new(Some(f64::MAX), Some(f64::MAX), "EUR")),
        ];
        let titles = ["", "   ", "12345-67890", "Développeur Rust senior"];
        for base in [complete_offer(), bare_offer()] {
            for rate in &rates {
                for title in titles {
                    let mut offer = base.clone();
                    offer.rate = rate.clone();
                    offer.title = title.into();
                    let overall = scorer.score(&offer).overall;
                    assert!((0.0..=1.0).contains(&overall), "{title:?} {rate:?} -> {overall}");
                }
            }
        }
    }

    #[test]
    fn digits_and_separators_are_not_a_meaningful_title() {
        assert!(!title_is_meaningful("12345-67890"));
        assert!(!title_is_meaningful("Short"));
        assert!(title_is_meaningful("Ingénieur DevOps"));
    }
}
