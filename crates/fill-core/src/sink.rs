//! Entry point shared by every order producer.

use crate::order::Order;

/// Result of handing an order to a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitResult {
    /// The order was new and a task has been started for it.
    Accepted,
    /// An in-flight or settled task already exists for this order.
    Duplicate,
}

impl SubmitResult {
    #[must_use]
    pub fn is_accepted(self) -> bool {
        matches!(self, SubmitResult::Accepted)
    }
}

/// Receiver of discovered orders.
///
/// Implemented by the scheduler; the listener, discovery and the deposit
/// scanner only see this trait. `submit` must not block on the order's wait.
pub trait OrderSink: Send + Sync {
    fn submit(&self, order: Order) -> SubmitResult;
}
