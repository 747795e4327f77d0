use std::io::Write;

use anyhow::Result;

use crate::application::FloatRunOutcome;
use crate::domain::FloatLog;

/// Writes ops-facing CSV reports of anomaly logs and nightly run results.
pub struct Exporter;

impl Exporter {
    /// Export float anomaly logs to CSV.
    pub fn export_anomalies_csv<W: Write>(writer: W, logs: &[FloatLog]) -> Result<usize> {
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "log_id",
            "client_id",
            "float_id",
            "log_type",
            "reference_time",
            "resolved",
            "context",
        ])?;

        for log in logs {
            csv_writer.write_record([
                log.log_id.to_string(),
                log.client_id.clone(),
                log.float_id.clone(),
                log.log_type.to_string(),
                log.reference_time.to_rfc3339(),
                log.resolved.to_string(),
                log.log_context.to_string(),
            ])?;
        }

        csv_writer.flush()?;
        Ok(logs.len())
    }

    /// Export nightly run outcomes to CSV, one row per float. Failed steps
    /// appear as "ERROR: ..." in their column rather than aborting the
    /// report.
    pub fn export_nightly_csv<W: Write>(
        writer: W,
        outcomes: &[FloatRunOutcome],
    ) -> Result<usize> {
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "client_id",
            "float_id",
            "accrual_amount",
            "accrual_distributed",
            "expired_transactions",
            "expired_boosts",
            "reconciliation",
            "anomaly_count",
        ])?;

        for outcome in outcomes {
            let (accrual_amount, distributed) = match &outcome.accrual {
                Ok(accrual) => (
                    accrual.accrual_amount.to_string(),
                    accrual.distributed.to_string(),
                ),
                Err(err) => (format!("ERROR: {err}"), "false".to_string()),
            };
            let (recon_result, anomaly_count) = match &outcome.reconciliation {
                Ok(summary) => (
                    format!("{:?}", summary.result),
                    summary.anomaly_count.to_string(),
                ),
                Err(err) => (format!("ERROR: {err}"), String::new()),
            };

            csv_writer.write_record([
                outcome.client_id.clone(),
                outcome.float_id.clone(),
                accrual_amount,
                distributed,
                step_count(&outcome.expired_transactions),
                step_count(&outcome.expired_boosts),
                recon_result,
                anomaly_count,
            ])?;
        }

        csv_writer.flush()?;
        Ok(outcomes.len())
    }
}

fn step_count(step: &Result<usize, String>) -> String {
    match step {
        Ok(count) => count.to_string(),
        Err(err) => format!("ERROR: {err}"),
    }
}
