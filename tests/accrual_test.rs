mod common;

use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};
use common::{test_harness, CLIENT_ID, CURRENCY, FLOAT_ID};
use floatbook::clients::LogDistributor;
use floatbook::domain::{FloatLog, FloatLogType};
use uuid::Uuid;

/// Pin the last-accrual reference time by writing an accrual log directly.
async fn backdate_last_accrual(
    harness: &common::TestHarness,
    hours_ago: i64,
) -> Result<()> {
    let reference_time = Utc::now() - Duration::hours(hours_ago);
    let log = FloatLog {
        log_id: Uuid::new_v4(),
        client_id: CLIENT_ID.into(),
        float_id: FLOAT_ID.into(),
        log_type: FloatLogType::WholeFloatAccrual,
        log_context: serde_json::json!({}),
        reference_time,
        creation_time: reference_time,
        resolved: false,
    };
    harness.repo.insert_float_log(&log).await?;
    Ok(())
}

#[tokio::test]
async fn test_one_day_accrual_on_million_balance() -> Result<()> {
    let harness = test_harness().await?;
    let account = harness.create_account().await?;
    harness.settled_save(&account, 1_000_000).await?;
    backdate_last_accrual(&harness, 24).await?;

    let scheduler = harness.scheduler(Arc::new(LogDistributor));
    let outcomes = scheduler.run_nightly().await?;
    assert_eq!(outcomes.len(), 1);

    // 730 bps over 365 days on 1,000,000 for one day: 200 hundredth-cents
    let accrual = outcomes[0].accrual.as_ref().expect("accrual should succeed");
    assert_eq!(accrual.accrual_amount, 200);
    assert!(accrual.distributed);

    // the accrual landed on the float and its log advanced the reference time
    let float_balances = harness
        .repo
        .float_balance_and_flows(&[FLOAT_ID.to_string()], None, None)
        .await?;
    assert_eq!(float_balances[FLOAT_ID][CURRENCY].amount, 1_000_200);

    let last = harness
        .repo
        .last_float_accrual_time(CLIENT_ID, FLOAT_ID)
        .await?
        .expect("accrual log should exist");
    assert!(last > Utc::now() - Duration::minutes(1));
    Ok(())
}

#[tokio::test]
async fn test_accrual_reference_time_strictly_advances() -> Result<()> {
    let harness = test_harness().await?;
    let account = harness.create_account().await?;
    harness.settled_save(&account, 1_000_000).await?;
    backdate_last_accrual(&harness, 24).await?;

    let scheduler = harness.scheduler(Arc::new(LogDistributor));
    scheduler.run_nightly().await?;
    let first = harness
        .repo
        .last_float_accrual_time(CLIENT_ID, FLOAT_ID)
        .await?
        .expect("first run should log");

    scheduler.run_nightly().await?;
    let second = harness
        .repo
        .last_float_accrual_time(CLIENT_ID, FLOAT_ID)
        .await?
        .expect("second run should log");
    assert!(second > first);
    Ok(())
}

#[tokio::test]
async fn test_zero_balance_accrues_zero_but_still_logs() -> Result<()> {
    let harness = test_harness().await?;
    let account = harness.create_account().await?;
    // in and fully back out: zero float balance, but the float has history
    harness.settled_save(&account, 40_000).await?;
    harness.settled_save(&account, -40_000).await?;
    backdate_last_accrual(&harness, 24).await?;

    let scheduler = harness.scheduler(Arc::new(LogDistributor));
    let outcomes = scheduler.run_nightly().await?;
    let accrual = outcomes[0].accrual.as_ref().expect("accrual should succeed");
    assert_eq!(accrual.accrual_amount, 0);
    assert!(accrual.distributed);

    // the log still advanced, so the gap is not re-accrued later
    let logs = harness
        .repo
        .list_float_logs(CLIENT_ID, FLOAT_ID, Some(&[FloatLogType::WholeFloatAccrual]))
        .await?;
    assert_eq!(logs.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_float_without_history_is_skipped() -> Result<()> {
    let harness = test_harness().await?;

    let scheduler = harness.scheduler(Arc::new(LogDistributor));
    let outcomes = scheduler.run_nightly().await?;
    let accrual = outcomes[0].accrual.as_ref().expect("skip is not a failure");
    assert_eq!(accrual.accrual_amount, 0);
    assert!(!accrual.distributed);

    let logs = harness
        .repo
        .list_float_logs(CLIENT_ID, FLOAT_ID, Some(&[FloatLogType::WholeFloatAccrual]))
        .await?;
    assert!(logs.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_first_accrual_falls_back_to_first_float_entry() -> Result<()> {
    let harness = test_harness().await?;
    let account = harness.create_account().await?;
    harness.settled_save(&account, 1_000_000).await?;

    // no accrual log yet: the basis is the first float entry's creation time
    let basis = harness
        .repo
        .last_float_accrual_time(CLIENT_ID, FLOAT_ID)
        .await?
        .expect("first float entry provides the basis");
    assert!(Utc::now() - basis < Duration::minutes(1));

    let scheduler = harness.scheduler(Arc::new(LogDistributor));
    let outcomes = scheduler.run_nightly().await?;
    // moments after the save, the accrued amount is zero but the run logs
    let accrual = outcomes[0].accrual.as_ref().expect("accrual should succeed");
    assert_eq!(accrual.accrual_amount, 0);
    assert!(accrual.distributed);
    Ok(())
}

#[tokio::test]
async fn test_missed_days_accrue_in_one_shot() -> Result<()> {
    let harness = test_harness().await?;
    let account = harness.create_account().await?;
    harness.settled_save(&account, 1_000_000).await?;
    backdate_last_accrual(&harness, 72).await?;

    let scheduler = harness.scheduler(Arc::new(LogDistributor));
    let outcomes = scheduler.run_nightly().await?;
    let accrual = outcomes[0].accrual.as_ref().expect("accrual should succeed");
    // three missed days accrue linearly, not compounded
    assert_eq!(accrual.accrual_amount, 600);
    Ok(())
}
