//! Offer persistence (Postgres + in-memory) and the content-addressed raw archive.

mod memory;
mod postgres;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tjm_core::{JobOffer, OfferKey};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

pub use memory::InMemoryOfferStore;
pub use postgres::PgOfferStore;

pub const CRATE_NAME: &str = "tjm-storage";

pub const DEFAULT_QUERY_LIMIT: usize = 50;
pub const MAX_QUERY_LIMIT: usize = 500;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database unavailable: {0}")]
    Unavailable(#[source] sqlx::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("offer {key} rejected: {reason}")]
    InvalidOffer { key: OfferKey, reason: String },
}

impl StoreError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Read-side filter shared by the API and the stores.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OfferFilter {
    /// Canonical technology name, compared case-insensitively.
    pub technology: Option<String>,
    /// Case-insensitive substring of city, region or raw location.
    pub location: Option<String>,
    pub source: Option<String>,
    pub min_quality: Option<f64>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl OfferFilter {
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_QUERY_LIMIT).clamp(1, MAX_QUERY_LIMIT)
    }

    pub fn matches(&self, offer: &JobOffer) -> bool {
        if let Some(tech) = &self.technology {
            if !offer.technologies.iter().any(|t| t.eq_ignore_ascii_case(tech)) {
                return false;
            }
        }
        if let Some(needle) = &self.location {
            let needle = needle.to_lowercase();
            let hit = offer.location.as_ref().is_some_and(|loc| {
                [loc.city.as_deref(), loc.region.as_deref(), Some(loc.raw.as_str())]
                    .into_iter()
                    .flatten()
                    .any(|part| part.to_lowercase().contains(&needle))
            });
            if !hit {
                return false;
            }
        }
        if let Some(source) = &self.source {
            if &offer.source != source {
                return false;
            }
        }
        if let Some(min) = self.min_quality {
            if offer.quality.overall < min {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertSummary {
    pub inserted: usize,
    pub updated: usize,
}

impl UpsertSummary {
    pub fn written(&self) -> usize {
        self.inserted + self.updated
    }

    pub fn absorb(&mut self, other: UpsertSummary) {
        self.inserted += other.inserted;
        self.updated += other.updated;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStats {
    pub total_offers: u64,
    pub by_source: BTreeMap<String, u64>,
    pub average_quality: Option<f64>,
    pub last_normalized_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait OfferStore: Send + Sync {
    fn backend(&self) -> &'static str;

    async fn health_check(&self) -> Result<(), StoreError>;

    /// Insert or overwrite by `(source, source_id)`; the last write wins.
    async fn upsert_offers(&self, offers: &[JobOffer]) -> Result<UpsertSummary, StoreError>;

    async fn query_offers(&self, filter: &OfferFilter) -> Result<Vec<JobOffer>, StoreError>;

    async fn stats(&self) -> Result<StoreStats, StoreError>;
}

/// Rows the relational schema would refuse.
pub(crate) fn check_storable(offer: &JobOffer) -> Result<(), StoreError> {
    let reason = if !offer.has_required_fields() {
        Some("missing source, source_id or title".to_string())
    } else if !offer.rate_is_ordered() {
        Some(format!(
            "rate_min {:?} exceeds rate_max {:?}",
            offer.rate_min(),
            offer.rate_max()
        ))
    } else if !(0.0..=1.0).contains(&offer.quality.overall) {
        Some(format!("quality score {} outside [0, 1]", offer.quality.overall))
    } else {
        None
    };
    match reason {
        Some(reason) => Err(StoreError::InvalidOffer {
            key: offer.key(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Best-first ordering used by every store.
pub(crate) fn sort_best_first(offers: &mut [JobOffer]) {
    offers.sort_by(|a, b| {
        b.quality
            .overall
            .total_cmp(&a.quality.overall)
            .then_with(|| b.processed_at.cmp(&a.processed_at))
            .then_with(|| a.key().cmp(&b.key()))
    });
}

#[derive(Debug, Clone)]
pub struct ArchivedFile {
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
    /// True when identical bytes were already archived for this day and source.
    pub already_archived: bool,
}

/// Immutable, hash-addressed copies of the scraper files each batch consumed.
#[derive(Debug, Clone)]
pub struct RawArchive {
    root: PathBuf,
}

impl RawArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    /// `YYYYMMDD/<source_name>/<sha256>.<ext>`
    pub fn relative_path_for(
        batch_started_at: DateTime<Utc>,
        source_name: &str,
        content_hash: &str,
        extension: &str,
    ) -> PathBuf {
        let ext = match extension.trim_start_matches('.').trim() {
            "" => "bin",
            other => other,
        };
        PathBuf::from(batch_started_at.format("%Y%m%d").to_string())
            .join(source_name)
            .join(format!("{content_hash}.{ext}"))
    }

    pub async fn archive(
        &self,
        batch_started_at: DateTime<Utc>,
        source_name: &str,
        extension: &str,
        bytes: &[u8],
    ) -> anyhow::Result<ArchivedFile> {
        let content_hash = Self::sha256_hex(bytes);
        let relative_path =
            Self::relative_path_for(batch_started_at, source_name, &content_hash, extension);
        let absolute_path = self.root.join(&relative_path);
        let created = write_once(&absolute_path, bytes).await?;

        Ok(ArchivedFile {
            content_hash,
            relative_path,
            absolute_path,
            byte_size: bytes.len(),
            already_archived: !created,
        })
    }
}

/// Write `bytes` to `path` through a temp file + rename unless `path` exists.
/// Returns whether the file was created.
async fn write_once(path: &Path, bytes: &[u8]) -> anyhow::Result<bool> {
    let parent = path
        .parent()
        .with_context(|| format!("archive path {} has no parent", path.display()))?;
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("creating archive directory {}", parent.display()))?;

    if fs::try_exists(path)
        .await
        .with_context(|| format!("checking archive path {}", path.display()))?
    {
        return Ok(false);
    }

    let temp_path = parent.join(format!(".{}.partial", Uuid::new_v4()));
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await
        .with_context(|| format!("opening {}", temp_path.display()))?;
    file.write_all(bytes)
        .await
        .with_context(|| format!("writing {}", temp_path.display()))?;
    file.flush()
        .await
        .with_context(|| format!("flushing {}", temp_path.display()))?;
    drop(file);

    match fs::rename(&temp_path, path).await {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
            let _ = fs::remove_file(&temp_path).await;
            Ok(false)
        }
        Err(err) => {
            let _ = fs::remove_file(&temp_path).await;
            Err(err).with_context(|| {
                format!("renaming {} -> {}", temp_path.display(), path.display())
            })
        }
    }
}
