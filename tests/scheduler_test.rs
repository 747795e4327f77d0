mod common;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use common::{
    harness_with_configs, test_harness, zar_float_config, CLIENT_ID, CURRENCY, FLOAT_ID,
};
use floatbook::clients::{AccrualDistributor, FailingDistributor, LogDistributor};
use floatbook::domain::{
    AccrualInstruction, Boost, BoostStatus, DistributionResult, FloatConfig, FloatLogType,
    MoneyAmount, SettlementStatus, Unit,
};
use floatbook::io::Exporter;
use uuid::Uuid;

fn usd_float_config() -> FloatConfig {
    FloatConfig {
        client_id: "other_saving_co".into(),
        float_id: "usd_cash_float".into(),
        currency: "USD".into(),
        ..zar_float_config()
    }
}

/// Fails distribution for one client only.
struct SelectiveDistributor {
    failing_client: String,
}

#[async_trait]
impl AccrualDistributor for SelectiveDistributor {
    async fn distribute(&self, instruction: &AccrualInstruction) -> Result<DistributionResult> {
        if instruction.client_id == self.failing_client {
            anyhow::bail!("distribution endpoint unreachable");
        }
        Ok(DistributionResult {
            entity_allocation_ids: Vec::new(),
            user_allocation_count: 0,
        })
    }
}

#[tokio::test]
async fn test_one_floats_failure_does_not_abort_the_others() -> Result<()> {
    let harness =
        harness_with_configs(vec![zar_float_config(), usd_float_config()]).await?;

    // give both floats history so their accruals reach the distributor
    let account = harness.create_account().await?;
    harness.settled_save(&account, 1_000_000).await?;
    let usd_account = harness
        .service
        .create_account(Uuid::new_v4(), "other_saving_co", "usd_cash_float")
        .await?;
    harness
        .service
        .record_saving_event(
            usd_account.account_id,
            MoneyAmount::new(500_000, Unit::HundredthCent, "USD"),
            None,
            Some(Utc::now()),
        )
        .await?;

    let scheduler = harness.scheduler(Arc::new(SelectiveDistributor {
        failing_client: "other_saving_co".into(),
    }));
    let outcomes = scheduler.run_nightly().await?;
    assert_eq!(outcomes.len(), 2);

    let healthy = outcomes
        .iter()
        .find(|o| o.client_id == CLIENT_ID)
        .expect("healthy float should report");
    assert!(healthy.accrual.is_ok());
    assert!(healthy.expired_transactions.is_ok());
    assert!(healthy.reconciliation.is_ok());

    // the failing float reports its accrual error and still ran the rest
    let failing = outcomes
        .iter()
        .find(|o| o.client_id == "other_saving_co")
        .expect("failing float should report");
    assert!(failing.accrual.is_err());
    assert!(failing.expired_transactions.is_ok());
    assert!(failing.reconciliation.is_ok());
    Ok(())
}

#[tokio::test]
async fn test_failed_distribution_leaves_no_accrual_log() -> Result<()> {
    let harness = test_harness().await?;
    let account = harness.create_account().await?;
    harness.settled_save(&account, 1_000_000).await?;

    let scheduler = harness.scheduler(Arc::new(FailingDistributor));
    let outcomes = scheduler.run_nightly().await?;
    assert!(outcomes[0].accrual.is_err());

    // the reference time must not advance past a failed hand-off
    let logs = harness
        .repo
        .list_float_logs(CLIENT_ID, FLOAT_ID, Some(&[FloatLogType::WholeFloatAccrual]))
        .await?;
    assert!(logs.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_hanging_transactions_expire() -> Result<()> {
    let harness = test_harness().await?;
    let account = harness.create_account().await?;

    let hanging = harness
        .service
        .record_saving_event(
            account.account_id,
            MoneyAmount::new(10_000, Unit::HundredthCent, CURRENCY),
            None,
            None,
        )
        .await?;
    let settled_tx = harness.settled_save(&account, 25_000).await?;

    // cutoff of "now" sweeps every hanging entry regardless of age
    let scheduler = harness
        .scheduler(Arc::new(LogDistributor))
        .with_expiry_days_back(0);
    let outcomes = scheduler.run_nightly().await?;
    assert_eq!(*outcomes[0].expired_transactions.as_ref().unwrap(), 1);

    let expired = harness
        .repo
        .get_account_transaction(hanging.account_tx_id)
        .await?
        .expect("entry should still exist");
    assert_eq!(expired.settlement_status, SettlementStatus::Expired);

    // settled entries are untouched and the expired one never counts
    let settled = harness
        .repo
        .get_account_transaction(settled_tx)
        .await?
        .expect("settled entry should exist");
    assert_eq!(settled.settlement_status, SettlementStatus::Settled);
    let balance = harness
        .repo
        .sum_account_balance(account.account_id, CURRENCY, Utc::now())
        .await?;
    assert_eq!(balance.amount.amount, 25_000);

    let pending = harness
        .repo
        .pending_account_transactions(account.account_id, CURRENCY)
        .await?;
    assert!(pending.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_elapsed_boosts_expire_and_notify() -> Result<()> {
    let harness = test_harness().await?;
    let account = harness.create_account().await?;
    harness.settled_save(&account, 50_000).await?;

    harness
        .repo
        .create_boost(&Boost {
            boost_id: Uuid::new_v4(),
            account_id: account.account_id,
            boost_status: BoostStatus::Active,
            expiry_time: Utc::now() - Duration::hours(1),
            creation_time: Utc::now() - Duration::days(2),
        })
        .await?;
    harness
        .repo
        .create_boost(&Boost {
            boost_id: Uuid::new_v4(),
            account_id: account.account_id,
            boost_status: BoostStatus::Active,
            expiry_time: Utc::now() + Duration::days(2),
            creation_time: Utc::now(),
        })
        .await?;

    let scheduler = harness.scheduler(Arc::new(LogDistributor));
    let outcomes = scheduler.run_nightly().await?;
    assert_eq!(*outcomes[0].expired_boosts.as_ref().unwrap(), 1);

    // only the unexpired boost remains available
    let count = harness
        .repo
        .available_boost_count(account.account_id, Utc::now())
        .await?;
    assert_eq!(count, 1);

    let events = harness.publisher.events.lock().await;
    let boost_events: Vec<_> = events
        .iter()
        .filter(|(_, event_type, _)| event_type == "BOOST_EXPIRED")
        .collect();
    assert_eq!(boost_events.len(), 1);
    assert_eq!(boost_events[0].0, account.owner_user_id);
    Ok(())
}

#[tokio::test]
async fn test_nightly_report_exports_to_csv() -> Result<()> {
    let harness = test_harness().await?;
    let account = harness.create_account().await?;
    harness.settled_save(&account, 1_000_000).await?;

    let scheduler = harness.scheduler(Arc::new(LogDistributor));
    let outcomes = scheduler.run_nightly().await?;

    let mut buffer = Vec::new();
    let exported = Exporter::export_nightly_csv(&mut buffer, &outcomes)?;
    assert_eq!(exported, 1);

    let report = String::from_utf8(buffer)?;
    assert!(report.starts_with("client_id,float_id,accrual_amount"));
    assert!(report.contains(CLIENT_ID));
    assert!(report.contains(FLOAT_ID));
    Ok(())
}
