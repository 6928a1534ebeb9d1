use std::collections::BTreeMap;

use async_trait::async_trait;
use tjm_core::{JobOffer, OfferKey};
use tokio::sync::Mutex;

use crate::{
    check_storable, sort_best_first, OfferFilter, OfferStore, StoreError, StoreStats,
    UpsertSummary,
};

/// Process-local store used for dry runs and tests.
#[derive(Debug, Default)]
pub struct InMemoryOfferStore {
    offers: Mutex<BTreeMap<OfferKey, JobOffer>>,
}

impl InMemoryOfferStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.offers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.offers.lock().await.is_empty()
    }

    pub async fn get(&self, key: &OfferKey) -> Option<JobOffer> {
        self.offers.lock().await.get(key).cloned()
    }
}

#[async_trait]
impl OfferStore for InMemoryOfferStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn upsert_offers(&self, offers: &[JobOffer]) -> Result<UpsertSummary, StoreError> {
        for offer in offers {
            check_storable(offer)?;
        }

        let mut guard = self.offers.lock().await;
        let mut summary = UpsertSummary::default();
        for offer in offers {
            match guard.insert(offer.key(), offer.clone()) {
                Some(_) => summary.updated += 1,
                None => summary.inserted += 1,
            }
        }
        Ok(summary)
    }

    async fn query_offers(&self, filter: &OfferFilter) -> Result<Vec<JobOffer>, StoreError> {
        let mut matched = {
            let guard = self.offers.lock().await;
            guard
                .values()
                .filter(|offer| filter.matches(offer))
                .cloned()
                .collect::<Vec<_>>()
        };
        sort_best_first(&mut matched);
        Ok(matched
            .into_iter()
            .skip(filter.offset)
            .take(filter.effective_limit())
            .collect())
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let guard = self.offers.lock().await;
        let mut stats = StoreStats {
            total_offers: guard.len() as u64,
            ..StoreStats::default()
        };
        let mut quality_sum = 0.0;
        for offer in guard.values() {
            *stats.by_source.entry(offer.source.clone()).or_default() += 1;
            quality_sum += offer.quality.overall;
            if stats
                .last_normalized_at
                .map_or(true, |seen| offer.processed_at > seen)
            {
                stats.last_normalized_at = Some(offer.processed_at);
            }
        }
        if !guard.is_empty() {
            stats.average_quality = Some(quality_sum / guard.len() as f64);
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::offer;
    use tjm_core::QualityMetrics;

    #[tokio::test]
    async fn upsert_overwrites_by_natural_key() {
        let store = InMemoryOfferStore::new();
        let first = offer("malt", "42", "Rust developer");
        let mut second = offer("malt", "42", "Senior Rust developer");
        second.quality = QualityMetrics::from_overall(0.95);

        let summary = store.upsert_offers(&[first]).await.unwrap();
        assert_eq!(summary, UpsertSummary { inserted: 1, updated: 0 });

        let summary = store.upsert_offers(&[second.clone()]).await.unwrap();
        assert_eq!(summary, UpsertSummary { inserted: 0, updated: 1 });

        assert_eq!(store.len().await, 1);
        let stored = store.get(&second.key()).await.unwrap();
        assert_eq!(stored.title, "Senior Rust developer");
    }

    #[tokio::test]
    async fn invalid_offers_abort_the_whole_batch() {
        let store = InMemoryOfferStore::new();
        let good = offer("malt", "1", "Rust developer");
        let mut bad = offer("malt", "2", "Go developer");
        bad.title = "  ".into();

        let err = store.upsert_offers(&[good, bad]).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidOffer { .. }));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn query_orders_best_first_and_paginates() {
        let store = InMemoryOfferStore::new();
        let mut offers = Vec::new();
        for (idx, score) in [0.65, 0.9, 0.75].into_iter().enumerate() {
            let mut o = offer("freework", &format!("fw-{idx}"), "Data engineer Python");
            o.quality = QualityMetrics::from_overall(score);
            offers.push(o);
        }
        store.upsert_offers(&offers).await.unwrap();

        let all = store.query_offers(&OfferFilter::default()).await.unwrap();
        let scores = all.iter().map(|o| o.quality.overall).collect::<Vec<_>>();
        assert_eq!(scores, vec![0.9, 0.75, 0.65]);

        let page = store
            .query_offers(&OfferFilter {
                limit: Some(1),
                offset: 1,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].source_id, "fw-2");
    }

    #[tokio::test]
    async fn stats_group_by_source() {
        let store = InMemoryOfferStore::new();
        store
            .upsert_offers(&[
                offer("malt", "1", "Rust developer"),
                offer("malt", "2", "Rust developer"),
                offer("freework", "1", "Rust developer"),
            ])
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_offers, 3);
        assert_eq!(stats.by_source.get("malt"), Some(&2));
        assert_eq!(stats.by_source.get("freework"), Some(&1));
        assert!((stats.average_quality.unwrap() - 0.8).abs() < 1e-9);
    }
}
