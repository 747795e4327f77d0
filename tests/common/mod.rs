// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use floatbook::application::{
    BalanceProjector, ReconciliationEngine, SavingsService, SchedulerDriver,
};
use floatbook::clients::{
    AccrualDistributor, Cache, ConfigSource, InMemoryCache, RecordingPublisher,
    StaticConfigSource,
};
use floatbook::domain::{Account, FloatConfig, MoneyAmount, Unit};
use floatbook::storage::Repository;
use tempfile::TempDir;
use uuid::Uuid;

pub const CLIENT_ID: &str = "some_saving_co";
pub const FLOAT_ID: &str = "zar_cash_float";
pub const CURRENCY: &str = "ZAR";

/// Standard float: 730 bps annual, 10% bonus pool, 5% client share.
pub fn zar_float_config() -> FloatConfig {
    FloatConfig {
        client_id: CLIENT_ID.into(),
        float_id: FLOAT_ID.into(),
        currency: CURRENCY.into(),
        accrual_rate_annual_bps: 730,
        bonus_pool_share_of_accrual: "0.1".parse().unwrap(),
        client_share_of_accrual: "0.05".parse().unwrap(),
        prudential_factor: "0".parse().unwrap(),
        default_timezone: "Africa/Johannesburg".into(),
        bonus_pool_tracker: "zar_bonus_pool".into(),
        client_share_tracker: "zar_client_share".into(),
        comparator_rates: None,
    }
}

/// Everything a scenario needs, wired against a temporary database.
pub struct TestHarness {
    pub repo: Arc<Repository>,
    pub config_source: Arc<StaticConfigSource>,
    pub cache: Arc<InMemoryCache>,
    pub publisher: Arc<RecordingPublisher>,
    pub service: SavingsService,
    pub temp_dir: TempDir,
}

impl TestHarness {
    pub fn projector(&self) -> BalanceProjector {
        BalanceProjector::new(
            self.repo.clone(),
            self.config_source.clone() as Arc<dyn ConfigSource>,
            self.cache.clone() as Arc<dyn Cache>,
        )
    }

    pub fn projector_with_cache(&self, cache: Arc<dyn Cache>) -> BalanceProjector {
        BalanceProjector::new(
            self.repo.clone(),
            self.config_source.clone() as Arc<dyn ConfigSource>,
            cache,
        )
    }

    pub fn reconciliation(&self) -> Arc<ReconciliationEngine> {
        Arc::new(ReconciliationEngine::new(self.repo.clone()))
    }

    pub fn scheduler(&self, distributor: Arc<dyn AccrualDistributor>) -> SchedulerDriver {
        SchedulerDriver::new(
            self.repo.clone(),
            self.config_source.clone() as Arc<dyn ConfigSource>,
            distributor,
            self.publisher.clone(),
            self.reconciliation(),
        )
    }

    pub async fn create_account(&self) -> Result<Account> {
        Ok(self
            .service
            .create_account(Uuid::new_v4(), CLIENT_ID, FLOAT_ID)
            .await?)
    }

    /// Record an immediately-settled saving event in hundredth-cents.
    pub async fn settled_save(&self, account: &Account, amount: i64) -> Result<Uuid> {
        let result = self
            .service
            .record_saving_event(
                account.account_id,
                MoneyAmount::new(amount, Unit::HundredthCent, CURRENCY),
                None,
                Some(Utc::now()),
            )
            .await?;
        Ok(result.account_tx_id)
    }
}

/// Build a harness with the default single ZAR float.
pub async fn test_harness() -> Result<TestHarness> {
    harness_with_configs(vec![zar_float_config()]).await
}

/// Build a harness over the given float configurations.
pub async fn harness_with_configs(configs: Vec<FloatConfig>) -> Result<TestHarness> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());
    let repo = Arc::new(Repository::init(&db_url).await?);

    let config_source = Arc::new(StaticConfigSource::new(configs));
    let cache = Arc::new(InMemoryCache::new());
    let publisher = Arc::new(RecordingPublisher::new());

    let service = SavingsService::new(
        repo.clone(),
        config_source.clone() as Arc<dyn ConfigSource>,
        publisher.clone(),
    );

    Ok(TestHarness {
        repo,
        config_source,
        cache,
        publisher,
        service,
        temp_dir,
    })
}
