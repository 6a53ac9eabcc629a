//! Fill transaction assembly.
//!
//! A fill transaction is a v0 message made of two compute budget
//! instructions followed by the protocol's fill instructions:
//!
//! 1. Simulate with the maximum compute limit to measure consumption.
//! 2. Set the limit to `consumed * multiplier`, never below the floor.
//! 3. Price compute from a percentile of recent prioritization fees.
//! 4. Refuse to sign when the projected fee exceeds the ceiling.

use std::sync::Arc;

use fill_core::{FillInstructions, SkipReason};
use fill_ledger::LedgerRpc;
use fill_telemetry::Metrics;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use solana_sdk::compute_budget::ComputeBudgetInstruction;
use solana_sdk::hash::Hash;
use solana_sdk::instruction::Instruction;
use solana_sdk::message::{v0, VersionedMessage};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Keypair;
use solana_sdk::signer::Signer;
use solana_sdk::transaction::VersionedTransaction;
use tracing::{debug, warn};

use crate::error::{FillError, FillResult};

/// Lamports charged per signature.
pub const LAMPORTS_PER_SIGNATURE: u64 = 5_000;

/// Compute limit used while simulating.
const MAX_COMPUTE_UNITS: u32 = 1_400_000;

/// Accounts passed to the prioritization fee query.
const MAX_FEE_ACCOUNTS: usize = 128;

#[derive(Debug, Clone)]
pub struct TransactionConfig {
    /// Multiplier applied to simulated compute consumption.
    pub compute_unit_multiplier: Decimal,
    /// Floor and fallback compute limit.
    pub min_compute_units: u32,
    /// Percentile (0-100) of recent prioritization fees to pay.
    pub priority_fee_percentile: u8,
    /// Minimum compute unit price in micro-lamports.
    pub min_priority_fee: u64,
    /// Maximum total fee for one fill transaction, in lamports.
    pub fee_ceiling_lamports: u64,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            compute_unit_multiplier: Decimal::new(15, 1),
            min_compute_units: 200_000,
            priority_fee_percentile: 75,
            min_priority_fee: 1_000,
            fee_ceiling_lamports: 5_000_000,
        }
    }
}

/// Signed transaction ready for submission.
#[derive(Debug, Clone)]
pub struct PreparedTransaction {
    pub transaction: VersionedTransaction,
    pub last_valid_block_height: u64,
    pub compute_units: u32,
    /// Compute unit price in micro-lamports.
    pub priority_fee: u64,
    pub projected_fee_lamports: u64,
}

/// Result of assembling a fill transaction.
#[derive(Debug, Clone)]
pub enum BuildOutcome {
    Ready(PreparedTransaction),
    /// Projected fee exceeds the ceiling; nothing was signed.
    Skipped(SkipReason),
}

/// Compute limit from a simulation result.
#[must_use]
pub fn compute_unit_limit(
    units_consumed: Option<u64>,
    multiplier: Decimal,
    min_compute_units: u32,
) -> u32 {
    let scaled = units_consumed
        .and_then(|units| (Decimal::from(units) * multiplier).ceil().to_u32())
        .unwrap_or(min_compute_units);
    scaled.clamp(min_compute_units, MAX_COMPUTE_UNITS.max(min_compute_units))
}

/// Percentile of `fees`, at least `min_fee`. Zero fees yield `min_fee`.
#[must_use]
pub fn priority_fee_from_samples(mut fees: Vec<u64>, percentile: u8, min_fee: u64) -> u64 {
    if fees.is_empty() {
        return min_fee;
    }
    fees.sort_unstable();
    let percentile = usize::from(percentile.min(100));
    let index = (fees.len() - 1) * percentile / 100;
    fees[index].max(min_fee)
}

/// Total fee: base signature fee plus `compute_units * price` micro-lamports.
#[must_use]
pub fn projected_fee(signatures: u8, compute_units: u32, priority_fee: u64) -> u64 {
    let priority = (u128::from(compute_units) * u128::from(priority_fee)).div_ceil(1_000_000);
    LAMPORTS_PER_SIGNATURE
        .saturating_mul(u64::from(signatures))
        .saturating_add(u64::try_from(priority).unwrap_or(u64::MAX))
}

/// Writable accounts touched by `instructions`, deduplicated.
fn writable_accounts(instructions: &[Instruction]) -> Vec<Pubkey> {
    let mut accounts: Vec<Pubkey> = Vec::new();
    for meta in instructions.iter().flat_map(|ix| ix.accounts.iter()) {
        if meta.is_writable && !accounts.contains(&meta.pubkey) {
            accounts.push(meta.pubkey);
        }
    }
    accounts.truncate(MAX_FEE_ACCOUNTS);
    accounts
}

/// Builds, prices and signs fill transactions.
pub struct TransactionBuilder {
    ledger: Arc<dyn LedgerRpc>,
    config: TransactionConfig,
}

impl TransactionBuilder {
    pub fn new(ledger: Arc<dyn LedgerRpc>, config: TransactionConfig) -> Self {
        Self { ledger, config }
    }

    pub fn config(&self) -> &TransactionConfig {
        &self.config
    }

    /// Assemble and sign a transaction carrying `fill`, paid by `payer`.
    pub async fn build(
        &self,
        payer: &Keypair,
        fill: &FillInstructions,
    ) -> FillResult<BuildOutcome> {
        let blockhash = self.ledger.get_latest_blockhash().await?;
        let priority_fee = self.priority_fee(&fill.instructions).await;

        let probe = self.sign(payer, fill, MAX_COMPUTE_UNITS, priority_fee, blockhash.blockhash)?;
        let units_consumed = match self.ledger.simulate_transaction(&probe).await {
            Ok(simulation) => {
                if let Some(err) = &simulation.err {
                    debug!(error = %err, "Simulation reported an error, using compute floor");
                    None
                } else {
                    simulation.units_consumed
                }
            }
            Err(e) => {
                warn!(error = %e, "Simulation failed, using compute floor");
                None
            }
        };
        let compute_units = compute_unit_limit(
            units_consumed,
            self.config.compute_unit_multiplier,
            self.config.min_compute_units,
        );

        let transaction = self.sign(payer, fill, compute_units, priority_fee, blockhash.blockhash)?;
        let signatures = transaction.message.header().num_required_signatures;
        let projected_fee_lamports = projected_fee(signatures, compute_units, priority_fee);
        if projected_fee_lamports > self.config.fee_ceiling_lamports {
            return Ok(BuildOutcome::Skipped(SkipReason::FeeCeilingExceeded {
                projected_lamports: projected_fee_lamports,
                ceiling_lamports: self.config.fee_ceiling_lamports,
            }));
        }

        debug!(
            compute_units,
            priority_fee,
            projected_fee_lamports,
            "Fill transaction prepared"
        );
        Ok(BuildOutcome::Ready(PreparedTransaction {
            transaction,
            last_valid_block_height: blockhash.last_valid_block_height,
            compute_units,
            priority_fee,
            projected_fee_lamports,
        }))
    }

    async fn priority_fee(&self, instructions: &[Instruction]) -> u64 {
        let samples = match self
            .ledger
            .get_recent_prioritization_fees(writable_accounts(instructions))
            .await
        {
            Ok(samples) => samples,
            Err(e) => {
                warn!(error = %e, "Prioritization fee query failed, using minimum");
                Vec::new()
            }
        };
        let fee = priority_fee_from_samples(
            samples,
            self.config.priority_fee_percentile,
            self.config.min_priority_fee,
        );
        Metrics::priority_fee(fee);
        fee
    }

    fn sign(
        &self,
        payer: &Keypair,
        fill: &FillInstructions,
        compute_units: u32,
        priority_fee: u64,
        blockhash: Hash,
    ) -> FillResult<VersionedTransaction> {
        let mut instructions = Vec::with_capacity(fill.instructions.len() + 2);
        instructions.push(ComputeBudgetInstruction::set_compute_unit_limit(compute_units));
        instructions.push(ComputeBudgetInstruction::set_compute_unit_price(priority_fee));
        instructions.extend(fill.instructions.iter().cloned());

        let message = v0::Message::try_compile(
            &payer.pubkey(),
            &instructions,
            &fill.lookup_tables,
            blockhash,
        )
        .map_err(|e| FillError::Build(e.to_string()))?;

        let mut signers: Vec<&dyn Signer> = Vec::with_capacity(fill.signers.len() + 1);
        signers.push(payer);
        for signer in &fill.signers {
            signers.push(signer);
        }

        VersionedTransaction::try_new(VersionedMessage::V0(message), &signers)
            .map_err(|e| FillError::Signing(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fill_ledger::{MockLedger, Simulation};
    use rust_decimal_macros::dec;
    use solana_sdk::instruction::AccountMeta;

    fn fill_for(payer: &Keypair) -> FillInstructions {
        FillInstructions {
            instructions: vec![Instruction::new_with_bytes(
                Pubkey::new_unique(),
                &[1, 2, 3],
                vec![
                    AccountMeta::new(Pubkey::new_unique(), false),
                    AccountMeta::new(payer.pubkey(), true),
                ],
            )],
            lookup_tables: Vec::new(),
            signers: Vec::new(),
        }
    }

    #[test]
    fn test_compute_unit_limit() {
        assert_eq!(compute_unit_limit(Some(300_000), dec!(1.5), 200_000), 450_000);
        assert_eq!(compute_unit_limit(Some(100_001), dec!(1.5), 100_000), 150_002);
        // Below the floor
        assert_eq!(compute_unit_limit(Some(50_000), dec!(1.5), 200_000), 200_000);
        // Missing consumption falls back to the floor
        assert_eq!(compute_unit_limit(None, dec!(1.5), 200_000), 200_000);
        assert_eq!(compute_unit_limit(Some(5_000_000), dec!(1.5), 200_000), 1_400_000);
    }

    #[test]
    fn test_priority_fee_percentile() {
        let fees = vec![50, 10, 40, 20, 30];
        assert_eq!(priority_fee_from_samples(fees.clone(), 0, 0), 10);
        assert_eq!(priority_fee_from_samples(fees.clone(), 50, 0), 30);
        assert_eq!(priority_fee_from_samples(fees.clone(), 100, 0), 50);
        assert_eq!(priority_fee_from_samples(fees, 50, 1_000), 1_000);
        assert_eq!(priority_fee_from_samples(Vec::new(), 75, 7), 7);
    }

    #[test]
    fn test_projected_fee() {
        assert_eq!(projected_fee(1, 200_000, 0), 5_000);
        // 200k CU at 1_000 micro-lamports = 200 lamports
        assert_eq!(projected_fee(1, 200_000, 1_000), 5_200);
        // Rounds up
        assert_eq!(projected_fee(2, 1, 1), 10_001);
    }

    #[tokio::test]
    async fn test_build_uses_simulated_units() {
        let ledger = Arc::new(MockLedger::new());
        ledger.set_simulation(Simulation {
            err: None,
            logs: Vec::new(),
            units_consumed: Some(300_000),
        });
        ledger.set_priority_fees(vec![2_000, 4_000]);
        let builder = TransactionBuilder::new(ledger.clone(), TransactionConfig::default());
        let payer = Keypair::new();

        let outcome = builder.build(&payer, &fill_for(&payer)).await.unwrap();
        let BuildOutcome::Ready(prepared) = outcome else {
            panic!("expected a prepared transaction");
        };
        assert_eq!(prepared.compute_units, 450_000);
        assert_eq!(prepared.priority_fee, 2_000);
        assert_eq!(prepared.transaction.signatures.len(), 1);
        assert_eq!(ledger.simulated_count(), 1);
    }

    #[tokio::test]
    async fn test_simulation_error_falls_back_to_floor() {
        let ledger = Arc::new(MockLedger::new());
        ledger.set_simulation(Simulation {
            err: Some("InstructionError".to_string()),
            logs: Vec::new(),
            units_consumed: Some(900_000),
        });
        let builder = TransactionBuilder::new(ledger, TransactionConfig::default());
        let payer = Keypair::new();

        let BuildOutcome::Ready(prepared) = builder.build(&payer, &fill_for(&payer)).await.unwrap()
        else {
            panic!("expected a prepared transaction");
        };
        assert_eq!(prepared.compute_units, 200_000);
    }

    #[tokio::test]
    async fn test_fee_ceiling_skips() {
        let ledger = Arc::new(MockLedger::new());
        ledger.set_priority_fees(vec![1_000_000_000]);
        let config = TransactionConfig {
            fee_ceiling_lamports: 10_000,
            ..TransactionConfig::default()
        };
        let builder = TransactionBuilder::new(ledger.clone(), config);
        let payer = Keypair::new();

        let outcome = builder.build(&payer, &fill_for(&payer)).await.unwrap();
        assert!(matches!(
            outcome,
            BuildOutcome::Skipped(SkipReason::FeeCeilingExceeded {
                ceiling_lamports: 10_000,
                ..
            })
        ));
        assert_eq!(ledger.sent_count(), 0);
    }
}
