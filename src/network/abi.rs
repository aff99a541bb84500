//! On-chain surfaces consumed by the engine

use alloy::sol;

sol! {
    /// DCA program entry point. Swaps `amount` of the input asset for `user`
    /// using router calldata produced off-chain.
    function executeSwap(bytes swapCalldata, address user, uint256 amount) external;

    /// Concentrated-liquidity pool swap event
    event Swap(
        address indexed sender,
        address indexed recipient,
        int256 amount0,
        int256 amount1,
        uint160 sqrtPriceX96,
        uint128 liquidity,
        int24 tick
    );
}

/// `Payment` as emitted by the current program
pub mod payment {
    alloy::sol! {
        event Payment(address indexed user, uint256 amount, string planId, string paymentId);
    }
}

/// `Payment` variant that also names the settled token
pub mod payment_with_token {
    alloy::sol! {
        event Payment(
            address indexed user,
            uint256 amount,
            string planId,
            string paymentId,
            string token
        );
    }
}
