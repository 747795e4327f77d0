use anyhow::Result;
use async_trait::async_trait;

use crate::domain::{AccrualInstruction, DistributionResult};

/// Synchronous hand-off of a computed gross accrual to the downstream
/// distributor, which splits it between bonus pool, client fee and user
/// share. Unlike event publication this is request/response: only a
/// successful distribution lets the accrual log be written.
#[async_trait]
pub trait AccrualDistributor: Send + Sync {
    async fn distribute(&self, instruction: &AccrualInstruction) -> Result<DistributionResult>;
}

/// Default distributor: acknowledges the instruction and logs it. Stands in
/// for the real split-and-allocate service in local runs.
pub struct LogDistributor;

#[async_trait]
impl AccrualDistributor for LogDistributor {
    async fn distribute(&self, instruction: &AccrualInstruction) -> Result<DistributionResult> {
        tracing::info!(
            client_id = %instruction.client_id,
            float_id = %instruction.float_id,
            accrual_amount = instruction.accrual_amount,
            currency = %instruction.currency,
            backing_entity = %instruction.backing_entity_identifier,
            "acknowledged accrual instruction"
        );
        Ok(DistributionResult {
            entity_allocation_ids: Vec::new(),
            user_allocation_count: 0,
        })
    }
}

/// Distributor that always fails; used to exercise per-float isolation in
/// the nightly run.
pub struct FailingDistributor;

#[async_trait]
impl AccrualDistributor for FailingDistributor {
    async fn distribute(&self, _instruction: &AccrualInstruction) -> Result<DistributionResult> {
        anyhow::bail!("distribution endpoint unreachable")
    }
}
