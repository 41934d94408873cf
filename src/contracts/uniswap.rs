//! Uniswap V3 core and periphery.
//!
//! Struct parameters are declared as named structs, in Solidity field order.
//! Overloaded router functions are declared once, in the form used here.

use ethers::contract::abigen;

abigen!(
    UniswapV3Factory,
    r#"[
        function getPool(address tokenA, address tokenB, uint24 fee) external view returns (address pool)
    ]"#,
);

abigen!(
    UniswapV3Pool,
    r#"[
        function slot0() external view returns (uint160 sqrtPriceX96, int24 tick, uint16 observationIndex, uint16 observationCardinality, uint16 observationCardinalityNext, uint8 feeProtocol, bool unlocked)
        function liquidity() external view returns (uint128)
        function token0() external view returns (address)
        function token1() external view returns (address)
        function fee() external view returns (uint24)
    ]"#,
);

pub mod position_manager {
    use ethers::contract::abigen;

    abigen!(
        NonfungiblePositionManager,
        r#"[
            struct MintParams { address token0; address token1; uint24 fee; int24 tickLower; int24 tickUpper; uint256 amount0Desired; uint256 amount1Desired; uint256 amount0Min; uint256 amount1Min; address recipient; uint256 deadline; }
            struct DecreaseLiquidityParams { uint256 tokenId; uint128 liquidity; uint256 amount0Min; uint256 amount1Min; uint256 deadline; }
            struct CollectParams { uint256 tokenId; address recipient; uint128 amount0Max; uint128 amount1Max; }
            function createAndInitializePoolIfNecessary(address token0, address token1, uint24 fee, uint160 sqrtPriceX96) external payable returns (address pool)
            function mint(MintParams params) external payable returns (uint256 tokenId, uint128 liquidity, uint256 amount0, uint256 amount1)
            function positions(uint256 tokenId) external view returns (uint96 nonce, address operator, address token0, address token1, uint24 fee, int24 tickLower, int24 tickUpper, uint128 liquidity, uint256 feeGrowthInside0LastX128, uint256 feeGrowthInside1LastX128, uint128 tokensOwed0, uint128 tokensOwed1)
            function decreaseLiquidity(DecreaseLiquidityParams params) external payable returns (uint256 amount0, uint256 amount1)
            function collect(CollectParams params) external payable returns (uint256 amount0, uint256 amount1)
            function multicall(bytes[] data) external payable returns (bytes[] results)
            function ownerOf(uint256 tokenId) external view returns (address)
            event IncreaseLiquidity(uint256 indexed tokenId, uint128 liquidity, uint256 amount0, uint256 amount1)
        ]"#,
    );
}

pub mod router {
    use ethers::contract::abigen;

    abigen!(
        SwapRouter,
        r#"[
            struct ExactInputSingleParams { address tokenIn; address tokenOut; uint24 fee; address recipient; uint256 amountIn; uint256 amountOutMinimum; uint160 sqrtPriceLimitX96; }
            struct MintParams { address token0; address token1; uint24 fee; int24 tickLower; int24 tickUpper; uint256 amount0Min; uint256 amount1Min; address recipient; }
            function exactInputSingle(ExactInputSingleParams params) external payable returns (uint256 amountOut)
            function pull(address token, uint256 value) external payable
            function approveMax(address token) external payable
            function mint(MintParams params) external payable returns (bytes result)
            function sweepToken(address token, uint256 amountMinimum, address recipient) external payable
            function multicall(uint256 deadline, bytes[] data) external payable returns (bytes[] results)
        ]"#,
    );
}

abigen!(
    QuoterV2,
    r#"[
        struct QuoteExactInputSingleParams { address tokenIn; address tokenOut; uint256 amountIn; uint24 fee; uint160 sqrtPriceLimitX96; }
        function quoteExactInputSingle(QuoteExactInputSingleParams params) external returns (uint256 amountOut, uint160 sqrtPriceX96After, uint32 initializedTicksCrossed, uint256 gasEstimate)
    ]"#,
);

pub use position_manager::NonfungiblePositionManager;
pub use router::SwapRouter;
