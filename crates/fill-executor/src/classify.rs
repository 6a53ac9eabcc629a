//! Failure classification.
//!
//! Program logs of a failed simulation or transaction are matched against a
//! fixed table of substrings. The first matching entry wins.

use fill_core::BusinessRejection;

/// Log substring reported when an account was closed before the fill landed.
const ACCOUNT_MISSING: &str = "Account does not exist or has no data";

/// Substring table for business-rule rejections.
const REJECTIONS: &[(&str, BusinessRejection)] = &[
    (
        "Program log: Error Insufficient collateral thrown at programs/drift/src/state/user.rs",
        BusinessRejection::InsufficientCollateral,
    ),
    (
        "Error Code: InsufficientDeposit. Error Number: 6002",
        BusinessRejection::InsufficientDeposit,
    ),
    (
        "Error Code: DailyWithdrawLimit. Error Number: 6128",
        BusinessRejection::DailyWithdrawLimit,
    ),
    (
        "Error Code: NoSpotPositionAvailable. Error Number: 6084",
        BusinessRejection::NoSpotPositionAvailable,
    ),
];

/// Classified failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Rejected(BusinessRejection),
    /// An account the fill needs is gone.
    AccountMissing,
    Unclassified,
}

/// Classify a failure from its message and program logs.
#[must_use]
pub fn classify_failure<S: AsRef<str>>(message: &str, logs: &[S]) -> FailureClass {
    let lines = std::iter::once(message).chain(logs.iter().map(AsRef::as_ref));
    for line in lines {
        if let Some((_, rejection)) = REJECTIONS
            .iter()
            .find(|(needle, _)| line.contains(needle))
        {
            return FailureClass::Rejected(*rejection);
        }
        if line.contains(ACCOUNT_MISSING) {
            return FailureClass::AccountMissing;
        }
    }
    FailureClass::Unclassified
}
