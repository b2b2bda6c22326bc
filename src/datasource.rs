//! Historical order/inventory data for a shop.
//!
//! Two interchangeable implementations behind one trait, selected at
//! construction time: a synthetic generator for demo mode and a live
//! connector for production. Stage logic never branches on which one it got.

use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::warn;

use crate::errors::DataSourceError;
use crate::models::{SeriesPoint, TimeSeries};

/// Current on-hand inventory for one product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockLevel {
    pub product: String,
    pub units_on_hand: f64,
}

/// One customer's lifetime order history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerRecord {
    pub email: String,
    pub order_count: u32,
    pub total_spent: f64,
}

/// Read-only access to a shop's history. Implementations must support
/// concurrent reads; nothing in the pipeline writes through this trait.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Daily observations for one metric (a product's unit sales), spanning
    /// `lookback_days`. Fails with `DataUnavailable` when the shop/metric
    /// combination has no history.
    async fn fetch_series(
        &self,
        shop: &str,
        metric: &str,
        lookback_days: u32,
    ) -> Result<TimeSeries, DataSourceError>;

    /// Current stock levels across the shop's catalog.
    async fn fetch_stock_levels(&self, shop: &str) -> Result<Vec<StockLevel>, DataSourceError>;

    /// Per-customer order history across the shop's customer base.
    async fn fetch_customers(&self, shop: &str) -> Result<Vec<CustomerRecord>, DataSourceError>;
}

struct CatalogItem {
    name: &'static str,
    base_daily_units: f64,
    units_on_hand: f64,
}

/// Fixed demo catalog with per-product base velocities.
const CATALOG: &[CatalogItem] = &[
    CatalogItem { name: "Blue T-Shirt", base_daily_units: 8.0, units_on_hand: 45.0 },
    CatalogItem { name: "Red Hoodie", base_daily_units: 5.0, units_on_hand: 120.0 },
    CatalogItem { name: "Black Jeans", base_daily_units: 12.0, units_on_hand: 15.0 },
    CatalogItem { name: "White Sneakers", base_daily_units: 10.0, units_on_hand: 8.0 },
    CatalogItem { name: "Green Cap", base_daily_units: 3.0, units_on_hand: 200.0 },
];

/// Fixed demo customer base. One single-order customer so repeat-purchaser
/// filtering is observable in demo answers.
const CUSTOMERS: &[(&str, u32, f64)] = &[
    ("john.smith@example.com", 5, 450.00),
    ("sarah.jones@example.com", 3, 280.00),
    ("mike.brown@example.com", 7, 620.00),
    ("emma.davis@example.com", 4, 380.00),
    ("alex.wilson@example.com", 2, 190.00),
    ("lisa.taylor@example.com", 1, 85.00),
];

const TREND_PER_DAY: f64 = 0.01;
const NOISE_BOUND: f64 = 2.0;

/// Demo-mode generator: deterministic shape (base level plus linear trend)
/// with bounded noise. Always returns exactly `lookback_days` consecutive
/// daily points.
pub struct SyntheticDataSource {
    rng: Mutex<StdRng>,
}

impl SyntheticDataSource {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Seeded variant for reproducible tests and demos.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn product_names() -> Vec<&'static str> {
        CATALOG.iter().map(|item| item.name).collect()
    }
}

impl Default for SyntheticDataSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataSource for SyntheticDataSource {
    async fn fetch_series(
        &self,
        shop: &str,
        metric: &str,
        lookback_days: u32,
    ) -> Result<TimeSeries, DataSourceError> {
        let item = CATALOG
            .iter()
            .find(|item| item.name.eq_ignore_ascii_case(metric))
            .ok_or_else(|| DataSourceError::DataUnavailable {
                shop: shop.to_string(),
                metric: metric.to_string(),
            })?;

        let today = Utc::now().date_naive();
        let start = today - chrono::Days::new(u64::from(lookback_days.saturating_sub(1)));

        let mut rng = self.rng.lock().expect("rng lock poisoned");
        let points: Vec<SeriesPoint> = (0..lookback_days)
            .map(|i| {
                let trend = TREND_PER_DAY * f64::from(i);
                let noise: f64 = rng.gen_range(-NOISE_BOUND..=NOISE_BOUND);
                SeriesPoint {
                    date: start + chrono::Days::new(u64::from(i)),
                    value: (item.base_daily_units + trend + noise).max(0.0),
                }
            })
            .collect();
        drop(rng);

        TimeSeries::from_points(metric, points)
            .map_err(|e| DataSourceError::Transport(e.to_string()))
    }

    async fn fetch_stock_levels(&self, _shop: &str) -> Result<Vec<StockLevel>, DataSourceError> {
        Ok(CATALOG
            .iter()
            .map(|item| StockLevel {
                product: item.name.to_string(),
                units_on_hand: item.units_on_hand,
            })
            .collect())
    }

    async fn fetch_customers(&self, _shop: &str) -> Result<Vec<CustomerRecord>, DataSourceError> {
        Ok(CUSTOMERS
            .iter()
            .map(|(email, order_count, total_spent)| CustomerRecord {
                email: email.to_string(),
                order_count: *order_count,
                total_spent: *total_spent,
            })
            .collect())
    }
}

/// Production connector delegating to the external analytics platform.
/// The platform integration itself lives outside this crate; until wired up,
/// every fetch reports the data as unavailable so forecasting questions
/// degrade instead of crashing.
pub struct LiveDataSource;

impl LiveDataSource {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LiveDataSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataSource for LiveDataSource {
    async fn fetch_series(
        &self,
        shop: &str,
        metric: &str,
        _lookback_days: u32,
    ) -> Result<TimeSeries, DataSourceError> {
        warn!(shop, metric, "live analytics connector not configured");
        Err(DataSourceError::DataUnavailable {
            shop: shop.to_string(),
            metric: metric.to_string(),
        })
    }

    async fn fetch_stock_levels(&self, shop: &str) -> Result<Vec<StockLevel>, DataSourceError> {
        warn!(shop, "live analytics connector not configured");
        Err(DataSourceError::DataUnavailable {
            shop: shop.to_string(),
            metric: "stock_levels".to_string(),
        })
    }

    async fn fetch_customers(&self, shop: &str) -> Result<Vec<CustomerRecord>, DataSourceError> {
        warn!(shop, "live analytics connector not configured");
        Err(DataSourceError::DataUnavailable {
            shop: shop.to_string(),
            metric: "customers".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn synthetic_series_has_exactly_lookback_points() {
        let source = SyntheticDataSource::with_seed(7);
        let series = source
            .fetch_series("demo.myshopify.com", "Blue T-Shirt", 90)
            .await
            .unwrap();
        assert_eq!(series.len(), 90);

        let points = series.points();
        for pair in points.windows(2) {
            assert_eq!(
                (pair[1].date - pair[0].date).num_days(),
                1,
                "points must be consecutive daily observations"
            );
        }
    }

    #[tokio::test]
    async fn synthetic_values_stay_near_base_level() {
        let source = SyntheticDataSource::with_seed(7);
        let series = source
            .fetch_series("demo.myshopify.com", "Blue T-Shirt", 90)
            .await
            .unwrap();
        let mean: f64 =
            series.points().iter().map(|p| p.value).sum::<f64>() / series.len() as f64;
        // Base 8, trend adds ~0.45 on average, noise is zero-mean and bounded.
        assert!(mean > 6.0 && mean < 11.0, "mean {mean} out of range");
        assert!(series.points().iter().all(|p| p.value >= 0.0));
    }

    #[tokio::test]
    async fn customer_base_includes_a_single_order_customer() {
        let source = SyntheticDataSource::with_seed(7);
        let customers = source.fetch_customers("demo.myshopify.com").await.unwrap();
        assert_eq!(customers.len(), 6);
        assert!(customers.iter().any(|c| c.order_count == 1));
        assert!(customers.iter().all(|c| c.total_spent > 0.0));
    }

    #[tokio::test]
    async fn unknown_product_is_data_unavailable() {
        let source = SyntheticDataSource::with_seed(7);
        let err = source
            .fetch_series("demo.myshopify.com", "Purple Scarf", 30)
            .await
            .unwrap_err();
        assert!(matches!(err, DataSourceError::DataUnavailable { .. }));
    }

    #[tokio::test]
    async fn live_source_reports_unavailable_until_configured() {
        let source = LiveDataSource::new();
        let err = source
            .fetch_series("shop.example.com", "Blue T-Shirt", 30)
            .await
            .unwrap_err();
        assert!(matches!(err, DataSourceError::DataUnavailable { .. }));
    }
}
