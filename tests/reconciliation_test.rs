mod common;

use anyhow::Result;
use common::{test_harness, CLIENT_ID, CURRENCY, FLOAT_ID};
use floatbook::application::{AllocationRequest, ReconciliationResult};
use floatbook::domain::{
    AllocatedToType, FloatLogType, FlowSign, MoneyAmount, TransactionType, Unit,
};
use floatbook::io::Exporter;

/// Nudge the float's own balance without a matching allocation, creating
/// drift between the two independently derived totals.
async fn add_unallocated_to_float(
    harness: &common::TestHarness,
    amount: i64,
    currency: &str,
) -> Result<()> {
    harness
        .service
        .allocate_float(
            CLIENT_ID,
            FLOAT_ID,
            vec![AllocationRequest {
                amount: MoneyAmount::new(amount, Unit::HundredthCent, currency),
                allocated_to_type: AllocatedToType::FloatItself,
                allocated_to_id: FLOAT_ID.to_string(),
                transaction_type: TransactionType::Capitalization,
                related_entity_type: None,
                related_entity_id: None,
            }],
        )
        .await?;
    Ok(())
}

#[tokio::test]
async fn test_balance_mismatch_detected_once_per_window() -> Result<()> {
    let harness = test_harness().await?;
    let account = harness.create_account().await?;
    // balanced so far: float 99,000, allocations 99,000
    harness.settled_save(&account, 99_000).await?;
    // push float balance to 100,000 with nothing allocated against it
    add_unallocated_to_float(&harness, 1_000, CURRENCY).await?;

    let engine = harness.reconciliation();
    let outcome = engine.check_float(CLIENT_ID, FLOAT_ID).await?;
    assert_eq!(outcome.result, ReconciliationResult::AnomaliesFound);
    assert_eq!(outcome.anomalies.len(), 1);

    let anomaly = &outcome.anomalies[0];
    assert_eq!(anomaly.log_type, FloatLogType::BalanceMismatch);
    assert_eq!(anomaly.log_context["mismatch"], 1_000);
    assert_eq!(anomaly.log_context["float_balance"], 100_000);
    assert_eq!(anomaly.log_context["float_allocations"], 99_000);
    assert_eq!(anomaly.log_context["unit"], "HUNDREDTH_CENT");

    // identical re-check inside the 24h window is suppressed, even though
    // the underlying mismatch still exists
    let second = engine.check_float(CLIENT_ID, FLOAT_ID).await?;
    assert_eq!(second.result, ReconciliationResult::NoAnomalies);
    assert!(second.anomalies.is_empty());

    let logged = harness
        .repo
        .list_float_logs(CLIENT_ID, FLOAT_ID, Some(&[FloatLogType::BalanceMismatch]))
        .await?;
    assert_eq!(logged.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_balanced_float_has_no_anomalies() -> Result<()> {
    let harness = test_harness().await?;
    let account = harness.create_account().await?;
    harness.settled_save(&account, 250_000).await?;

    let engine = harness.reconciliation();
    let outcome = engine.check_float(CLIENT_ID, FLOAT_ID).await?;
    assert_eq!(outcome.result, ReconciliationResult::NoAnomalies);
    assert!(outcome.anomalies.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_allocation_total_mismatch_detected() -> Result<()> {
    let harness = test_harness().await?;
    let account = harness.create_account().await?;
    harness.settled_save(&account, 50_000).await?;

    // allocate 5,000 more to the account than its ledger settled, keeping
    // the float's own balance consistent so only one anomaly type fires
    harness
        .service
        .allocate_float(
            CLIENT_ID,
            FLOAT_ID,
            vec![
                AllocationRequest {
                    amount: MoneyAmount::new(5_000, Unit::HundredthCent, CURRENCY),
                    allocated_to_type: AllocatedToType::FloatItself,
                    allocated_to_id: FLOAT_ID.to_string(),
                    transaction_type: TransactionType::Capitalization,
                    related_entity_type: None,
                    related_entity_id: None,
                },
                AllocationRequest {
                    amount: MoneyAmount::new(5_000, Unit::HundredthCent, CURRENCY),
                    allocated_to_type: AllocatedToType::EndUserAccount,
                    allocated_to_id: account.account_id.to_string(),
                    transaction_type: TransactionType::Allocation,
                    related_entity_type: None,
                    related_entity_id: None,
                },
            ],
        )
        .await?;

    let engine = harness.reconciliation();
    let outcome = engine.check_float(CLIENT_ID, FLOAT_ID).await?;
    assert_eq!(outcome.result, ReconciliationResult::AnomaliesFound);
    assert_eq!(outcome.anomalies.len(), 1);
    assert_eq!(
        outcome.anomalies[0].log_type,
        FloatLogType::AllocationTotalMismatch
    );
    assert_eq!(outcome.anomalies[0].log_context["mismatch"], 5_000);
    Ok(())
}

#[tokio::test]
async fn test_currency_present_on_one_side_only_counts_as_zero() -> Result<()> {
    let harness = test_harness().await?;
    let account = harness.create_account().await?;
    harness.settled_save(&account, 100_000).await?;

    // a USD addition to the float with no USD allocations anywhere
    add_unallocated_to_float(&harness, 7_000, "USD").await?;

    let engine = harness.reconciliation();
    let outcome = engine.check_float(CLIENT_ID, FLOAT_ID).await?;
    assert_eq!(outcome.result, ReconciliationResult::AnomaliesFound);

    let usd: Vec<_> = outcome
        .anomalies
        .iter()
        .filter(|log| log.log_context["currency"] == "USD")
        .collect();
    assert_eq!(usd.len(), 1);
    assert_eq!(usd[0].log_context["mismatch"], 7_000);
    assert_eq!(usd[0].log_context["float_allocations"], 0);
    Ok(())
}

#[tokio::test]
async fn test_bonus_pool_flows_filtered_by_sign() -> Result<()> {
    let harness = test_harness().await?;
    let tracker = "zar_bonus_pool".to_string();

    // two credits into the bonus pool and one redemption out of it
    let request = |amount: i64, t_type| AllocationRequest {
        amount: MoneyAmount::new(amount, Unit::HundredthCent, CURRENCY),
        allocated_to_type: AllocatedToType::BonusPool,
        allocated_to_id: tracker.clone(),
        transaction_type: t_type,
        related_entity_type: None,
        related_entity_id: None,
    };
    harness
        .service
        .allocate_float(
            CLIENT_ID,
            FLOAT_ID,
            vec![
                request(4_000, TransactionType::Accrual),
                request(2_000, TransactionType::Accrual),
                request(-1_500, TransactionType::BoostRedemption),
            ],
        )
        .await?;

    let float_ids = vec![FLOAT_ID.to_string()];
    let inflows = harness
        .repo
        .bonus_pool_balance_and_flows(&float_ids, None, None, FlowSign::Inflow)
        .await?;
    assert_eq!(inflows[FLOAT_ID][&tracker][CURRENCY].amount, 6_000);

    let outflows = harness
        .repo
        .bonus_pool_balance_and_flows(&float_ids, None, None, FlowSign::Outflow)
        .await?;
    assert_eq!(outflows[FLOAT_ID][&tracker][CURRENCY].amount, -1_500);

    let net = harness
        .repo
        .bonus_pool_balance_and_flows(&float_ids, None, None, FlowSign::Both)
        .await?;
    assert_eq!(net[FLOAT_ID][&tracker][CURRENCY].amount, 4_500);
    Ok(())
}

#[tokio::test]
async fn test_anomalies_export_to_csv() -> Result<()> {
    let harness = test_harness().await?;
    let account = harness.create_account().await?;
    harness.settled_save(&account, 99_000).await?;
    add_unallocated_to_float(&harness, 1_000, CURRENCY).await?;

    let engine = harness.reconciliation();
    let outcome = engine.check_float(CLIENT_ID, FLOAT_ID).await?;

    let mut buffer = Vec::new();
    let exported = Exporter::export_anomalies_csv(&mut buffer, &outcome.anomalies)?;
    assert_eq!(exported, 1);
    let report = String::from_utf8(buffer)?;
    assert!(report.starts_with("log_id,client_id,float_id,log_type"));
    assert!(report.contains("BALANCE_MISMATCH"));
    Ok(())
}

#[tokio::test]
async fn test_different_anomaly_types_not_suppressed_by_each_other() -> Result<()> {
    let harness = test_harness().await?;
    let account = harness.create_account().await?;
    harness.settled_save(&account, 50_000).await?;

    // first check logs a balance mismatch
    add_unallocated_to_float(&harness, 2_000, CURRENCY).await?;
    let engine = harness.reconciliation();
    let first = engine.check_float(CLIENT_ID, FLOAT_ID).await?;
    assert_eq!(first.anomalies.len(), 1);
    assert_eq!(first.anomalies[0].log_type, FloatLogType::BalanceMismatch);

    // a new allocation drift fires the other type despite the window
    harness
        .service
        .allocate_float(
            CLIENT_ID,
            FLOAT_ID,
            vec![AllocationRequest {
                amount: MoneyAmount::new(2_000, Unit::HundredthCent, CURRENCY),
                allocated_to_type: AllocatedToType::EndUserAccount,
                allocated_to_id: account.account_id.to_string(),
                transaction_type: TransactionType::Allocation,
                related_entity_type: None,
                related_entity_id: None,
            }],
        )
        .await?;
    let second = engine.check_float(CLIENT_ID, FLOAT_ID).await?;
    assert_eq!(second.result, ReconciliationResult::AnomaliesFound);
    assert_eq!(second.anomalies.len(), 1);
    assert_eq!(
        second.anomalies[0].log_type,
        FloatLogType::AllocationTotalMismatch
    );
    Ok(())
}
