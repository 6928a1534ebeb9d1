//! Axum JSON API over the offer store.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tjm_core::JobOffer;
use tjm_etl::TechnologyNormalizer;
use tjm_storage::{OfferFilter, OfferStore, StoreError};
use tokio::net::TcpListener;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "tjm-web";

pub const DEFAULT_PORT: u16 = 8001;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn OfferStore>,
    pub technologies: Arc<TechnologyNormalizer>,
}

impl AppState {
    pub fn new(store: Arc<dyn OfferStore>, technologies: TechnologyNormalizer) -> Self {
        Self {
            store,
            technologies: Arc::new(technologies),
        }
    }

    pub fn with_builtin_catalog(store: Arc<dyn OfferStore>) -> anyhow::Result<Self> {
        Ok(Self::new(store, TechnologyNormalizer::builtin()?))
    }
}

pub fn port_from_env() -> u16 {
    std::env::var("TJM_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_PORT)
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/offers", get(offers_handler))
        .route("/offers/stats", get(stats_handler))
        .route("/technologies", get(technologies_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(port: u16, state: AppState) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, store = state.store.backend(), "serving offer API");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

struct ApiError(StoreError);

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_unavailable() {
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        warn!(status = status.as_u16(), error = %self.0, "request failed");
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct OffersQuery {
    tech: Option<String>,
    location: Option<String>,
    source: Option<String>,
    min_quality: Option<f64>,
    limit: Option<usize>,
    offset: Option<usize>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl OffersQuery {
    fn into_filter(self, technologies: &TechnologyNormalizer) -> OfferFilter {
        OfferFilter {
            technology: non_blank(self.tech).and_then(|t| technologies.normalize_one(&t)),
            location: non_blank(self.location),
            source: non_blank(self.source),
            min_quality: self.min_quality,
            limit: self.limit,
            offset: self.offset.unwrap_or(0),
        }
    }
}

/// Flat row shape of an offer, as stored.
#[derive(Debug, Clone, Serialize)]
struct OfferView {
    source: String,
    source_id: String,
    url: Option<String>,
    title: String,
    company: Option<String>,
    tjm_min: Option<f64>,
    tjm_max: Option<f64>,
    tjm_currency: String,
    technologies: Vec<String>,
    seniority_level: Option<&'static str>,
    city: Option<String>,
    region: Option<String>,
    country: Option<String>,
    remote_policy: Option<&'static str>,
    contract_type: &'static str,
    quality_score: f64,
    scraped_at: Option<DateTime<Utc>>,
    normalized_at: DateTime<Utc>,
}

impl From<JobOffer> for OfferView {
    fn from(offer: JobOffer) -> Self {
        let tjm_min = offer.rate_min();
        let tjm_max = offer.rate_max();
        let tjm_currency = offer.currency().to_string();
        let (city, region, country) = match offer.location {
            Some(loc) => (loc.city, loc.region, Some(loc.country)),
            None => (None, None, None),
        };
        Self {
            source: offer.source,
            source_id: offer.source_id,
            url: offer.url,
            title: offer.title,
            company: offer.company,
            tjm_min,
            tjm_max,
            tjm_currency,
            technologies: offer.technologies,
            seniority_level: offer.seniority.map(|s| s.as_str()),
            city,
            region,
            country,
            remote_policy: offer.remote_policy.map(|p| p.as_str()),
            contract_type: offer.contract_type.as_str(),
            quality_score: offer.quality.overall,
            scraped_at: offer.scraped_at,
            normalized_at: offer.processed_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct OffersResponse {
    count: usize,
    offers: Vec<OfferView>,
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.store.health_check().await {
        Ok(()) => Json(serde_json::json!({
            "status": "ok",
            "store": state.store.backend(),
        }))
        .into_response(),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "unavailable",
                "store": state.store.backend(),
                "error": err.to_string(),
            })),
        )
            .into_response(),
    }
}

async fn offers_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<OffersQuery>,
) -> Result<Json<OffersResponse>, ApiError> {
    let filter = query.into_filter(&state.technologies);
    let offers = state.store.query_offers(&filter).await?;
    Ok(Json(OffersResponse {
        count: offers.len(),
        offers: offers.into_iter().map(OfferView::from).collect(),
    }))
}

async fn stats_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<tjm_storage::StoreStats>, ApiError> {
    Ok(Json(state.store.stats().await?))
}

async fn technologies_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let catalog = state.technologies.catalog();
    Json(serde_json::json!({
        "count": catalog.len(),
        "technologies": catalog
            .iter()
            .map(|entry| serde_json::json!({
                "name": entry.canonical,
                "category": entry.category,
                "aliases": entry.aliases,
            }))
            .collect::<Vec<_>>(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use chrono::TimeZone;
    use http_body_util::BodyExt;
    use tjm_core::{ContractType, DailyRate, Location, QualityMetrics, RemotePolicy};
    use tjm_storage::{InMemoryOfferStore, StoreStats, UpsertSummary};
    use tower::ServiceExt;

    fn offer(source_id: &str, techs: &[&str], city: &str, region: &str, quality: f64) -> JobOffer {
        JobOffer {
            source: "freework".into(),
            source_id: source_id.into(),
            url: Some(format!("https://example.test/{source_id}")),
            title: format!("Mission {source_id}"),
            company: Some("Acme".into()),
            description: None,
            rate: Some(DailyRate::new(Some(500.0), Some(600.0), "EUR")),
            technologies: techs.iter().map(|t| t.to_string()).collect(),
            seniority: None,
            location: Some(Location {
                city: Some(city.into()),
                region: Some(region.into()),
                country: "France".into(),
                raw: city.into(),
            }),
            remote_policy: Some(RemotePolicy::Hybrid),
            contract_type: ContractType::Freelance,
            scraped_at: None,
            processed_at: Utc.with_ymd_and_hms(2024, 3, 5, 9, 0, 0).single().unwrap(),
            quality: QualityMetrics::from_overall(quality),
        }
    }

    async fn seeded_app() -> Router {
        let store = Arc::new(InMemoryOfferStore::new());
        store
            .upsert_offers(&[
                offer("1", &["React", "TypeScript"], "Paris", "Île-de-France", 0.9),
                offer("2", &["React"], "Lyon", "Auvergne-Rhône-Alpes", 0.7),
                offer("3", &["Python"], "Lyon", "Auvergne-Rhône-Alpes", 0.8),
            ])
            .await
            .unwrap();
        app(AppState::with_builtin_catalog(store).unwrap())
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let resp = app
            .oneshot(axum::http::Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn offers_filter_by_normalized_technology() {
        let app = seeded_app().await;
        for tech in ["reactjs", "REACT", "react"] {
            let (status, body) = get_json(app.clone(), &format!("/offers?tech={tech}")).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["count"], 2, "{tech}");
            assert_eq!(body["offers"][0]["source_id"], "1");
            assert_eq!(body["offers"][0]["tjm_min"], 500.0);
            assert_eq!(body["offers"][0]["remote_policy"], "hybrid");
        }
    }

    #[tokio::test]
    async fn offers_combine_technology_and_location() {
        let app = seeded_app().await;
        let (status, body) = get_json(app.clone(), "/offers?tech=react&location=lyon").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);
        assert_eq!(body["offers"][0]["source_id"], "2");
        assert_eq!(body["offers"][0]["region"], "Auvergne-Rhône-Alpes");

        let (_, body) = get_json(app.clone(), "/offers?min_quality=0.75&limit=1").await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["offers"][0]["source_id"], "1");

        let (status, body) = get_json(app.clone(), "/offers?offset=18446744073709551615").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 0);

        let (status, _) = get_json(app, "/offers?min_quality=high").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn stats_technologies_and_health() {
        let app = seeded_app().await;

        let (status, stats) = get_json(app.clone(), "/offers/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["total_offers"], 3);
        assert_eq!(stats["by_source"]["freework"], 3);

        let (status, catalog) = get_json(app.clone(), "/technologies").await;
        assert_eq!(status, StatusCode::OK);
        let names = catalog["technologies"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap().to_string())
            .collect::<Vec<_>>();
        assert!(names.contains(&"PostgreSQL".to_string()));

        let (status, health) = get_json(app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(health["store"], "memory");
    }

    struct DownStore;

    #[async_trait]
    impl OfferStore for DownStore {
        fn backend(&self) -> &'static str {
            "down"
        }

        async fn health_check(&self) -> Result<(), StoreError> {
            Err(StoreError::Unavailable(sqlx::Error::PoolTimedOut))
        }

        async fn upsert_offers(&self, _offers: &[JobOffer]) -> Result<UpsertSummary, StoreError> {
            Err(StoreError::Unavailable(sqlx::Error::PoolTimedOut))
        }

        async fn query_offers(&self, _filter: &OfferFilter) -> Result<Vec<JobOffer>, StoreError> {
            Err(StoreError::Unavailable(sqlx::Error::PoolTimedOut))
        }

        async fn stats(&self) -> Result<StoreStats, StoreError> {
            Err(StoreError::Database(sqlx::Error::RowNotFound))
        }
    }

    #[tokio::test]
    async fn store_failures_map_to_status_codes() {
        let app = app(AppState::with_builtin_catalog(Arc::new(DownStore)).unwrap());

        let (status, body) = get_json(app.clone(), "/offers").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["error"].as_str().unwrap().contains("unavailable"));

        let (status, _) = get_json(app.clone(), "/offers/stats").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

        let (status, health) = get_json(app, "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(health["status"], "unavailable");
    }
}
