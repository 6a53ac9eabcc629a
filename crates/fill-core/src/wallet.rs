//! Operator wallet state.

use solana_sdk::pubkey::Pubkey;

/// Lamports per SOL.
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Snapshot of the operator wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalletState {
    pub address: Pubkey,
    pub native_balance: u64,
    pub min_balance_floor: u64,
}

impl WalletState {
    #[must_use]
    pub fn new(address: Pubkey, native_balance: u64, min_balance_floor: u64) -> Self {
        Self {
            address,
            native_balance,
            min_balance_floor,
        }
    }

    #[must_use]
    pub fn is_below_floor(&self) -> bool {
        self.native_balance < self.min_balance_floor
    }

    /// Balance in SOL, for logs.
    #[must_use]
    pub fn balance_sol(&self) -> f64 {
        lamports_to_sol(self.native_balance)
    }
}

#[must_use]
pub fn lamports_to_sol(lamports: u64) -> f64 {
    lamports as f64 / LAMPORTS_PER_SOL as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floor_is_strict() {
        let address = Pubkey::new_unique();
        assert!(!WalletState::new(address, 300_000_000, 300_000_000).is_below_floor());
        assert!(WalletState::new(address, 299_999_999, 300_000_000).is_below_floor());
    }

    #[test]
    fn test_balance_sol() {
        let state = WalletState::new(Pubkey::new_unique(), 1_500_000_000, 0);
        assert!((state.balance_sol() - 1.5).abs() < f64::EPSILON);
    }
}
