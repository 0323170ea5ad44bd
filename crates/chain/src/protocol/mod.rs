//! Protocol read surface.
//!
//! The keeper only needs three things from the lending protocol:
//!
//! - [`SortedPositions`]: walk the borrower list from its riskiest end and
//!   read each borrower's collateral ratio at a given price;
//! - [`HintSource`]: redemption hints so a redemption can be submitted with
//!   the insert position precomputed;
//! - the write surface, which always goes through the keeper wrapper
//!   ([`crate::contracts::KeeperGateway`]).
//!
//! # Example
//!
//! ```rust,ignore
//! use keeper_chain::protocol::SortedPositions;
//!
//! let mut cursor = positions.last().await?;
//! while let Some(id) = cursor {
//!     let icr = positions.ratio(id, price).await?;
//!     cursor = positions.prev(id).await?;
//! }
//! ```

use alloy::primitives::{Address, U256};
use anyhow::Result;
use async_trait::async_trait;
use std::fmt::Debug;

/// Borrower list sorted ascending by collateral ratio.
///
/// The zero address marks the end of the list; implementations map it to
/// `None`.
#[async_trait]
pub trait SortedPositions: Send + Sync + Debug {
    /// Lowest-ratio borrower, or `None` for an empty list.
    async fn last(&self) -> Result<Option<Address>>;

    /// Next borrower towards the safe end, or `None` at the head.
    async fn prev(&self, id: Address) -> Result<Option<Address>>;

    /// Current collateral ratio (1e18 = 100%) at `price`.
    async fn ratio(&self, id: Address, price: U256) -> Result<U256>;
}

/// Redemption hints as returned by the protocol's hint helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedemptionHints {
    /// First borrower the redemption will touch
    pub first_hint: Address,
    /// Nominal ratio of the partially redeemed borrower after redemption
    pub partial_nicr: U256,
    /// Amount the protocol can actually redeem within the iteration cap
    pub truncated_amount: U256,
}

/// Hint helpers for hinted redemptions.
#[async_trait]
pub trait HintSource: Send + Sync + Debug {
    async fn redemption_hints(
        &self,
        amount: U256,
        price: U256,
        max_iterations: u64,
    ) -> Result<RedemptionHints>;

    /// `(upper, lower)` neighbours for a node with ratio `nicr`.
    async fn insert_position(
        &self,
        nicr: U256,
        prev: Address,
        next: Address,
    ) -> Result<(Address, Address)>;
}

/// Map the list's zero sentinel to `None`.
pub fn non_zero(addr: Address) -> Option<Address> {
    (addr != Address::ZERO).then_some(addr)
}
