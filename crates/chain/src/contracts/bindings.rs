//! Contract bindings for the lending protocol and the keeper wrapper.
//!
//! # Usage
//!
//! ```rust,ignore
//! use keeper_chain::contracts::bindings::ISortedTroves;
//!
//! let sorted = ISortedTroves::new(address, &provider);
//! let tail = sorted.getLast().call().await?._0;
//! ```

use alloy::sol;

// ============================================================================
// Protocol read surface
// ============================================================================

sol! {
    /// Sorted borrower list, ascending by nominal collateral ratio.
    #[sol(rpc)]
    interface ISortedTroves {
        function getLast() external view returns (address);
        function getPrev(address _id) external view returns (address);
        function getSize() external view returns (uint256);
        function findInsertPosition(uint256 _NICR, address _prevId, address _nextId)
            external view returns (address, address);
    }

    #[sol(rpc)]
    interface ITroveManager {
        function getCurrentICR(address _borrower, uint256 _price) external view returns (uint256);
    }

    #[sol(rpc)]
    interface IHintHelpers {
        function getRedemptionHints(uint256 _amount, uint256 _price, uint256 _maxIterations)
            external view returns (
                address firstRedemptionHint,
                uint256 partialRedemptionHintNICR,
                uint256 truncatedAmount
            );
    }

    #[sol(rpc)]
    interface IERC20 {
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 amount) external returns (bool);
    }
}

// ============================================================================
// Keeper wrapper (stateless pass-through)
// ============================================================================

sol! {
    #[sol(rpc)]
    #[derive(Debug)]
    interface IKeeperWrapper {
        /// Emitted once per liquidation call.
        event LiquidationJob(uint256 indexed jobId, address indexed caller, uint256 attempted, uint256 succeeded);

        /// Emitted once per redemption call.
        event RedemptionJob(uint256 indexed jobId, address indexed caller, uint256 amountIn, uint256 refunded);

        function liquidate(address borrower, address recipient) external returns (uint256 succeeded);

        function liquidateBatch(address[] calldata borrowers, bool fallbackOnFail, address recipient)
            external returns (uint256 succeeded);

        function redeemHinted(
            uint256 amount,
            address firstHint,
            address upperHint,
            address lowerHint,
            uint256 partialNICR,
            uint256 maxIterations,
            address recipient
        ) external;
    }
}
