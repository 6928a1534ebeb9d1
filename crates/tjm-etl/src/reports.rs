//! Per-batch artifacts: quality report, offers delta and Parquet snapshots.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{Float64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use parquet::arrow::ArrowWriter;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tjm_core::JobOffer;
use tokio::fs;

use crate::normalize::TechnologyNormalizer;
use crate::quality::issue_kind;

pub const QUALITY_REPORT_FILE: &str = "quality_report.md";
pub const OFFERS_DELTA_FILE: &str = "offers_delta.json";

const SCORE_BUCKETS: [(f64, f64, &str); 5] = [
    (0.0, 0.2, "0.0-0.2"),
    (0.2, 0.4, "0.2-0.4"),
    (0.4, 0.6, "0.4-0.6"),
    (0.6, 0.8, "0.6-0.8"),
    (0.8, f64::INFINITY, "0.8-1.0"),
];

#[derive(Debug, Clone, Serialize)]
pub struct ParquetManifest {
    pub schema_version: u32,
    pub batch_id: String,
    pub files: Vec<ParquetManifestFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParquetManifestFile {
    pub name: String,
    pub path: String,
    pub rows: usize,
    pub sha256: String,
    pub bytes: u64,
}

/// Offers that pass the load gate.
pub fn is_loadable(offer: &JobOffer, min_quality: f64) -> bool {
    offer.quality.overall >= min_quality && offer.rate_is_ordered()
}

#[derive(Debug, Default)]
struct RateAccumulator {
    offers: usize,
    sum: f64,
}

impl RateAccumulator {
    fn add(&mut self, value: f64) {
        self.offers += 1;
        self.sum += value;
    }

    fn average(&self) -> f64 {
        self.sum / self.offers.max(1) as f64
    }
}

fn average_of(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    (count > 0).then(|| sum / count as f64)
}

fn ranked(map: BTreeMap<String, RateAccumulator>, limit: usize) -> Vec<(String, RateAccumulator)> {
    let mut rows = map.into_iter().collect::<Vec<_>>();
    rows.sort_by(|a, b| b.1.offers.cmp(&a.1.offers).then_with(|| a.0.cmp(&b.0)));
    rows.truncate(limit);
    rows
}

/// Markdown summary of scored offers. `header` lines are emitted verbatim
/// under the title.
pub fn render_quality_report(
    title: &str,
    header: &[String],
    scored: &[JobOffer],
    min_quality: f64,
) -> String {
    let mut lines = vec![format!("# {title}"), String::new()];
    lines.extend(header.iter().map(|h| format!("- {h}")));

    let loadable = scored.iter().filter(|o| is_loadable(o, min_quality)).count();
    lines.push(format!("- Offers scored: {}", scored.len()));
    lines.push(format!(
        "- Passing the gate (quality >= {min_quality:.2}, ordered rate): {loadable}"
    ));
    lines.push(format!("- Rejected: {}", scored.len() - loadable));

    if scored.is_empty() {
        lines.push(String::new());
        lines.push("No offers were scored.".to_string());
        lines.push(String::new());
        return lines.join("\n");
    }

    let avg = |f: fn(&JobOffer) -> f64| average_of(scored.iter().map(f)).unwrap_or(0.0);
    lines.push(String::new());
    lines.push("## Scores".to_string());
    lines.push("| metric | average |".to_string());
    lines.push("|---|---|".to_string());
    lines.push(format!("| overall | {:.3} |", avg(|o| o.quality.overall)));
    lines.push(format!("| completeness | {:.3} |", avg(|o| o.quality.completeness)));
    lines.push(format!("| accuracy | {:.3} |", avg(|o| o.quality.accuracy)));
    lines.push(format!("| consistency | {:.3} |", avg(|o| o.quality.consistency)));

    lines.push(String::new());
    lines.push("## Score distribution".to_string());
    for (low, high, label) in SCORE_BUCKETS {
        let count = scored
            .iter()
            .filter(|o| o.quality.overall >= low && o.quality.overall < high)
            .count();
        lines.push(format!("- {label}: {count}"));
    }

    let mut issue_counts: BTreeMap<&str, usize> = BTreeMap::new();
    let mut missing_counts: BTreeMap<&str, usize> = BTreeMap::new();
    for offer in scored {
        for issue in &offer.quality.issues {
            *issue_counts.entry(issue_kind(issue)).or_default() += 1;
        }
        for field in &offer.quality.missing_fields {
            *missing_counts.entry(field.as_str()).or_default() += 1;
        }
    }

    lines.push(String::new());
    lines.push("## Issues".to_string());
    if issue_counts.is_empty() {
        lines.push("- none".to_string());
    }
    let mut issues = issue_counts.into_iter().collect::<Vec<_>>();
    issues.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    lines.extend(issues.iter().map(|(kind, n)| format!("- {kind}: {n}")));

    lines.push(String::new());
    lines.push("## Missing fields".to_string());
    if missing_counts.is_empty() {
        lines.push("- none".to_string());
    }
    lines.extend(missing_counts.iter().map(|(field, n)| format!("- {field}: {n}")));

    let mut by_tech: BTreeMap<String, RateAccumulator> = BTreeMap::new();
    let mut by_region: BTreeMap<String, RateAccumulator> = BTreeMap::new();
    for offer in scored.iter().filter(|o| is_loadable(o, min_quality)) {
        let Some(avg) = offer.rate.as_ref().and_then(|r| r.average()) else {
            continue;
        };
        for tech in &offer.technologies {
            by_tech.entry(tech.clone()).or_default().add(avg);
        }
        if let Some(region) = offer.location.as_ref().and_then(|l| l.region.clone()) {
            by_region.entry(region).or_default().add(avg);
        }
    }

    for (heading, table) in [("technology", by_tech), ("region", by_region)] {
        lines.push(String::new());
        lines.push(format!("## Average daily rate by {heading}"));
        if table.is_empty() {
            lines.push("- no rated offers".to_string());
            continue;
        }
        lines.push(format!("| {heading} | offers | average |"));
        lines.push("|---|---|---|".to_string());
        for (name, acc) in ranked(table, 15) {
            lines.push(format!("| {name} | {} | {:.0} |", acc.offers, acc.average()));
        }
    }

    lines.push(String::new());
    lines.join("\n")
}

/// Write `quality_report.md` and `offers_delta.json` into `reports_dir`.
pub async fn write_reports<B: Serialize>(
    reports_dir: &Path,
    report_markdown: &str,
    batch: &B,
    loaded: &[JobOffer],
) -> Result<()> {
    fs::create_dir_all(reports_dir)
        .await
        .with_context(|| format!("creating {}", reports_dir.display()))?;

    fs::write(reports_dir.join(QUALITY_REPORT_FILE), report_markdown)
        .await
        .with_context(|| format!("writing {QUALITY_REPORT_FILE}"))?;

    let delta_json = serde_json::to_vec_pretty(&serde_json::json!({
        "batch": batch,
        "offers": loaded,
    }))
    .context("serializing offers delta")?;
    fs::write(reports_dir.join(OFFERS_DELTA_FILE), delta_json)
        .await
        .with_context(|| format!("writing {OFFERS_DELTA_FILE}"))?;

    Ok(())
}

/// Columnar snapshot of the loaded offers plus a sha256 manifest.
pub async fn export_parquet_snapshots(
    reports_dir: &Path,
    batch_id: &str,
    loaded: &[JobOffer],
    technologies: &TechnologyNormalizer,
) -> Result<PathBuf> {
    let snapshot_dir = reports_dir.join("snapshots");
    fs::create_dir_all(&snapshot_dir)
        .await
        .with_context(|| format!("creating {}", snapshot_dir.display()))?;

    let offers_path = snapshot_dir.join("offers.parquet");
    let tech_path = snapshot_dir.join("offer_technologies.parquet");

    let offer_rows = write_offers_parquet(&offers_path, loaded)?;
    let tech_rows = write_offer_technologies_parquet(&tech_path, loaded, technologies)?;

    let manifest = ParquetManifest {
        schema_version: 1,
        batch_id: batch_id.to_string(),
        files: vec![
            manifest_entry("offers", reports_dir, &offers_path, offer_rows)?,
            manifest_entry("offer_technologies", reports_dir, &tech_path, tech_rows)?,
        ],
    };

    let manifest_path = snapshot_dir.join("manifest.json");
    let bytes = serde_json::to_vec_pretty(&manifest).context("serializing parquet manifest")?;
    fs::write(&manifest_path, bytes)
        .await
        .with_context(|| format!("writing {}", manifest_path.display()))?;
    Ok(manifest_path)
}

fn write_parquet(path: &Path, batch: RecordBatch) -> Result<usize> {
    let rows = batch.num_rows();
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(rows)
}

fn strings<'a>(offers: &'a [JobOffer], f: impl Fn(&'a JobOffer) -> Option<&'a str>) -> StringArray {
    StringArray::from(offers.iter().map(f).collect::<Vec<_>>())
}

fn write_offers_parquet(path: &Path, offers: &[JobOffer]) -> Result<usize> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("source", DataType::Utf8, false),
        ArrowField::new("source_id", DataType::Utf8, false),
        ArrowField::new("title", DataType::Utf8, false),
        ArrowField::new("company", DataType::Utf8, true),
        ArrowField::new("tjm_min", DataType::Float64, true),
        ArrowField::new("tjm_max", DataType::Float64, true),
        ArrowField::new("tjm_currency", DataType::Utf8, false),
        ArrowField::new("city", DataType::Utf8, true),
        ArrowField::new("region", DataType::Utf8, true),
        ArrowField::new("seniority_level", DataType::Utf8, true),
        ArrowField::new("remote_policy", DataType::Utf8, true),
        ArrowField::new("contract_type", DataType::Utf8, false),
        ArrowField::new("quality_score", DataType::Float64, false),
        ArrowField::new("normalized_at", DataType::Utf8, false),
    ]));

    let normalized_at = StringArray::from(
        offers
            .iter()
            .map(|o| Some(o.processed_at.to_rfc3339()))
            .collect::<Vec<_>>(),
    );

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(strings(offers, |o| Some(o.source.as_str()))),
            Arc::new(strings(offers, |o| Some(o.source_id.as_str()))),
            Arc::new(strings(offers, |o| Some(o.title.as_str()))),
            Arc::new(strings(offers, |o| o.company.as_deref())),
            Arc::new(Float64Array::from(offers.iter().map(|o| o.rate_min()).collect::<Vec<_>>())),
            Arc::new(Float64Array::from(offers.iter().map(|o| o.rate_max()).collect::<Vec<_>>())),
            Arc::new(strings(offers, |o| Some(o.currency()))),
            Arc::new(strings(offers, |o| o.location.as_ref().and_then(|l| l.city.as_deref()))),
            Arc::new(strings(offers, |o| o.location.as_ref().and_then(|l| l.region.as_deref()))),
            Arc::new(strings(offers, |o| o.seniority.map(|s| s.as_str()))),
            Arc::new(strings(offers, |o| o.remote_policy.map(|p| p.as_str()))),
            Arc::new(strings(offers, |o| Some(o.contract_type.as_str()))),
            Arc::new(Float64Array::from(
                offers.iter().map(|o| o.quality.overall).collect::<Vec<_>>(),
            )),
            Arc::new(normalized_at),
        ],
    )
    .context("building offers record batch")?;
    write_parquet(path, batch)
}

fn write_offer_technologies_parquet(
    path: &Path,
    offers: &[JobOffer],
    technologies: &TechnologyNormalizer,
) -> Result<usize> {
    let rows = offers
        .iter()
        .flat_map(|o| {
            o.technologies.iter().map(move |tech| {
                (
                    o.source.as_str(),
                    o.source_id.as_str(),
                    tech.as_str(),
                    technologies.category_of(tech),
                )
            })
        })
        .collect::<Vec<_>>();

    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("source", DataType::Utf8, false),
        ArrowField::new("source_id", DataType::Utf8, false),
        ArrowField::new("technology", DataType::Utf8, false),
        ArrowField::new("category", DataType::Utf8, true),
    ]));
    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(StringArray::from(rows.iter().map(|r| Some(r.0)).collect::<Vec<_>>())),
            Arc::new(StringArray::from(rows.iter().map(|r| Some(r.1)).collect::<Vec<_>>())),
            Arc::new(StringArray::from(rows.iter().map(|r| Some(r.2)).collect::<Vec<_>>())),
            Arc::new(StringArray::from(rows.iter().map(|r| r.3).collect::<Vec<_>>())),
        ],
    )
    .context("building offer_technologies record batch")?;
    write_parquet(path, batch)
}

fn manifest_entry(
    name: &str,
    reports_dir: &Path,
    path: &Path,
    rows: usize,
) -> Result<ParquetManifestFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let rel = path
        .strip_prefix(reports_dir)
        .unwrap_or(path)
        .display()
        .to_string();
    Ok(ParquetManifestFile {
        name: name.to_string(),
        path: rel,
        rows,
        sha256: hex::encode(Sha256::digest(&bytes)),
        bytes: bytes.len() as u64,
    })
}
