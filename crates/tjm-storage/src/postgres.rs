use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tjm_core::{
    ContractType, DailyRate, JobOffer, Location, QualityMetrics, RemotePolicy, SeniorityLevel,
    DEFAULT_COUNTRY, DEFAULT_CURRENCY,
};
use tracing::{debug, info, warn};

use crate::{check_storable, OfferFilter, OfferStore, StoreError, StoreStats, UpsertSummary};

const UPSERT_OFFER_SQL: &str = r#"
INSERT INTO offers (
    id, source, source_id, url, title, company, description,
    tjm_min, tjm_max, tjm_currency, technologies, seniority_level,
    city, region, country, location, remote_policy, contract_type,
    quality_score, scraped_at, normalized_at
) VALUES (
    $1, $2, $3, $4, $5, $6, $7,
    $8, $9, $10, $11, $12,
    $13, $14, $15, $16, $17, $18,
    $19, $20, $21
)
ON CONFLICT (source, source_id) DO UPDATE SET
    url = EXCLUDED.url,
    title = EXCLUDED.title,
    company = EXCLUDED.company,
    description = EXCLUDED.description,
    tjm_min = EXCLUDED.tjm_min,
    tjm_max = EXCLUDED.tjm_max,
    tjm_currency = EXCLUDED.tjm_currency,
    technologies = EXCLUDED.technologies,
    seniority_level = EXCLUDED.seniority_level,
    city = EXCLUDED.city,
    region = EXCLUDED.region,
    country = EXCLUDED.country,
    location = EXCLUDED.location,
    remote_policy = EXCLUDED.remote_policy,
    contract_type = EXCLUDED.contract_type,
    quality_score = EXCLUDED.quality_score,
    scraped_at = EXCLUDED.scraped_at,
    normalized_at = EXCLUDED.normalized_at,
    updated_at = NOW()
RETURNING (xmax = 0) AS inserted
"#;

const SELECT_OFFERS_SQL: &str = r#"
SELECT
    source, source_id, url, title, company, description,
    tjm_min, tjm_max, tjm_currency, technologies, seniority_level,
    city, region, country, location, remote_policy, contract_type,
    quality_score, scraped_at, normalized_at
FROM offers
WHERE ($1::text IS NULL OR EXISTS (
        SELECT 1 FROM unnest(technologies) AS tech WHERE lower(tech) = lower($1)
      ))
  AND ($2::text IS NULL
        OR city ILIKE $2 ESCAPE '\'
        OR region ILIKE $2 ESCAPE '\'
        OR location ILIKE $2 ESCAPE '\')
  AND ($3::text IS NULL OR source = $3)
  AND ($4::float8 IS NULL OR quality_score >= $4)
ORDER BY quality_score DESC, normalized_at DESC, source, source_id
LIMIT $5 OFFSET $6
"#;

/// Postgres-backed offer table, keyed by `(source, source_id)`.
#[derive(Debug, Clone)]
pub struct PgOfferStore {
    pool: PgPool,
}

impl PgOfferStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(StoreError::Unavailable)?;
        info!(max_connections, "connected to postgres");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("database migrations applied");
        Ok(())
    }
}

fn classify(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => StoreError::Unavailable(err),
        other => StoreError::Database(other),
    }
}

fn like_pattern(needle: &str) -> String {
    let escaped = needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

/// LIMIT/OFFSET binding; values past `i64::MAX` saturate instead of wrapping.
fn sql_count(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[async_trait]
impl OfferStore for PgOfferStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(StoreError::Unavailable)?;
        Ok(())
    }

    async fn upsert_offers(&self, offers: &[JobOffer]) -> Result<UpsertSummary, StoreError> {
        for offer in offers {
            check_storable(offer)?;
        }
        if offers.is_empty() {
            return Ok(UpsertSummary::default());
        }

        let mut tx = self.pool.begin().await.map_err(classify)?;
        let mut summary = UpsertSummary::default();
        for offer in offers {
            let location = offer.location.as_ref();
            let row = sqlx::query(UPSERT_OFFER_SQL)
                .bind(offer.key().record_id())
                .bind(&offer.source)
                .bind(&offer.source_id)
                .bind(offer.url.as_deref())
                .bind(&offer.title)
                .bind(offer.company.as_deref())
                .bind(offer.description.as_deref())
                .bind(offer.rate_min())
                .bind(offer.rate_max())
                .bind(offer.currency())
                .bind(&offer.technologies)
                .bind(offer.seniority.map(|s| s.as_str()))
                .bind(location.and_then(|l| l.city.as_deref()))
                .bind(location.and_then(|l| l.region.as_deref()))
                .bind(location.map(|l| l.country.as_str()))
                .bind(location.map(|l| l.raw.as_str()))
                .bind(offer.remote_policy.map(|p| p.as_str()))
                .bind(offer.contract_type.as_str())
                .bind(offer.quality.overall)
                .bind(offer.scraped_at)
                .bind(offer.processed_at)
                .fetch_one(&mut *tx)
                .await
                .map_err(classify)?;

            let inserted: bool = row.try_get("inserted").map_err(classify)?;
            if inserted {
                summary.inserted += 1;
            } else {
                summary.updated += 1;
            }
        }
        tx.commit().await.map_err(classify)?;

        debug!(
            inserted = summary.inserted,
            updated = summary.updated,
            "committed offer chunk"
        );
        Ok(summary)
    }

    async fn query_offers(&self, filter: &OfferFilter) -> Result<Vec<JobOffer>, StoreError> {
        let rows = sqlx::query(SELECT_OFFERS_SQL)
            .bind(filter.technology.as_deref())
            .bind(filter.location.as_deref().map(like_pattern))
            .bind(filter.source.as_deref())
            .bind(filter.min_quality)
            .bind(sql_count(filter.effective_limit()))
            .bind(sql_count(filter.offset))
            .fetch_all(&self.pool)
            .await
            .map_err(classify)?;

        rows.iter()
            .map(|row| offer_from_row(row).map_err(classify))
            .collect()
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let totals = sqlx::query(
            r#"
            SELECT COUNT(*) AS total,
                   AVG(quality_score) AS average_quality,
                   MAX(normalized_at) AS last_normalized_at
            FROM offers
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(classify)?;

        let total: i64 = totals.try_get("total").map_err(classify)?;
        let mut stats = StoreStats {
            total_offers: total.max(0) as u64,
            average_quality: totals.try_get("average_quality").map_err(classify)?,
            last_normalized_at: totals.try_get("last_normalized_at").map_err(classify)?,
            ..StoreStats::default()
        };

        let per_source = sqlx::query(
            "SELECT source, COUNT(*) AS offers FROM offers GROUP BY source ORDER BY source",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;
        for row in per_source {
            let source: String = row.try_get("source").map_err(classify)?;
            let count: i64 = row.try_get("offers").map_err(classify)?;
            stats.by_source.insert(source, count.max(0) as u64);
        }

        Ok(stats)
    }
}

fn parse_column<T: std::str::FromStr>(raw: Option<String>, column: &str) -> Option<T> {
    let raw = raw?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(column, value = %raw, "ignoring unrecognised enum value");
            None
        }
    }
}

fn offer_from_row(row: &PgRow) -> Result<JobOffer, sqlx::Error> {
    let tjm_min: Option<f64> = row.try_get("tjm_min")?;
    let tjm_max: Option<f64> = row.try_get("tjm_max")?;
    let currency: Option<String> = row.try_get("tjm_currency")?;
    let rate = (tjm_min.is_some() || tjm_max.is_some()).then(|| {
        DailyRate::new(
            tjm_min,
            tjm_max,
            currency.unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
        )
    });

    let city: Option<String> = row.try_get("city")?;
    let region: Option<String> = row.try_get("region")?;
    let raw_location: Option<String> = row.try_get("location")?;
    let country: Option<String> = row.try_get("country")?;
    let location = (city.is_some() || region.is_some() || raw_location.is_some()).then(|| {
        Location {
            city,
            region,
            country: country.unwrap_or_else(|| DEFAULT_COUNTRY.to_string()),
            raw: raw_location.unwrap_or_default(),
        }
    });

    let scraped_at: Option<DateTime<Utc>> = row.try_get("scraped_at")?;
    let processed_at: DateTime<Utc> = row.try_get("normalized_at")?;
    let quality_score: f64 = row.try_get("quality_score")?;

    Ok(JobOffer {
        source: row.try_get("source")?,
        source_id: row.try_get("source_id")?,
        url: row.try_get("url")?,
        title: row.try_get("title")?,
        company: row.try_get("company")?,
        description: row.try_get("description")?,
        rate,
        technologies: row.try_get("technologies")?,
        seniority: parse_column::<SeniorityLevel>(row.try_get("seniority_level")?, "seniority_level"),
        location,
        remote_policy: parse_column::<RemotePolicy>(row.try_get("remote_policy")?, "remote_policy"),
        contract_type: parse_column::<ContractType>(row.try_get("contract_type")?, "contract_type")
            .unwrap_or_default(),
        scraped_at,
        processed_at,
        quality: QualityMetrics::from_overall(quality_score),
    })
}
