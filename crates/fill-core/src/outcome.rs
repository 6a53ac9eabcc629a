//! Fill outcomes.
//!
//! Every execution attempt resolves to a [`FillOutcome`] or to an error. Only
//! errors are retried; every outcome here is final for the attempt.

use std::fmt;

use solana_sdk::signature::Signature;

use crate::order::OrderStatus;

/// Reason an order was not attempted this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Protocol withdrawal limit is below the safety ratio of the request.
    InsufficientFillable { fillable: u64, requested: u64 },
    /// Destination does not hold the asset's token account.
    MissingDestinationAccount,
    /// Destination would stay below the rent-exempt minimum.
    RentShortfall { balance: u64, amount: u64, minimum: u64 },
    /// Projected transaction fee exceeds the configured ceiling.
    FeeCeilingExceeded { projected_lamports: u64, ceiling_lamports: u64 },
}

impl SkipReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::InsufficientFillable { .. } => "insufficient_fillable",
            SkipReason::MissingDestinationAccount => "missing_destination_account",
            SkipReason::RentShortfall { .. } => "rent_shortfall",
            SkipReason::FeeCeilingExceeded { .. } => "fee_ceiling",
        }
    }
}

/// Business-rule failure reported by the ledger program.
///
/// These reflect user-side conditions; they are never retried and never
/// alerted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusinessRejection {
    InsufficientCollateral,
    InsufficientDeposit,
    DailyWithdrawLimit,
    NoSpotPositionAvailable,
}

impl BusinessRejection {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            BusinessRejection::InsufficientCollateral => "insufficient_collateral",
            BusinessRejection::InsufficientDeposit => "insufficient_deposit",
            BusinessRejection::DailyWithdrawLimit => "daily_withdraw_limit",
            BusinessRejection::NoSpotPositionAvailable => "no_spot_position",
        }
    }
}

impl fmt::Display for BusinessRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final result of one execution attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FillOutcome {
    /// Transaction confirmed without on-chain error.
    Executed { signature: Signature },
    /// Order no longer exists; nothing to do.
    Gone,
    /// Ledger program rejected the fill for a business reason.
    Rejected(BusinessRejection),
    /// Pre-condition not met; reconsidered on the next discovery pass.
    Skipped(SkipReason),
}

impl FillOutcome {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            FillOutcome::Executed { .. } => "executed",
            FillOutcome::Gone => "gone",
            FillOutcome::Rejected(_) => "rejected",
            FillOutcome::Skipped(_) => "skipped",
        }
    }

    /// Status the order takes after this outcome.
    #[must_use]
    pub fn status(&self) -> OrderStatus {
        match self {
            FillOutcome::Executed { .. } => OrderStatus::Executed,
            FillOutcome::Gone => OrderStatus::Gone,
            FillOutcome::Rejected(_) => OrderStatus::FailedTerminal,
            FillOutcome::Skipped(_) => OrderStatus::Discovered,
        }
    }
}
