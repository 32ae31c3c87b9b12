//! Avantis trading contract interface.
//!
//! The real deployed ABI is supplied by the venue and is not vendored here;
//! this module declares the subset of the interface the indexer and the risk
//! manager depend on. [`crate::indexer`] refuses to start if a deployed
//! contract's events fail to decode against this interface (§4.2) rather than
//! silently falling back to a partial schema.

#[allow(clippy::too_many_arguments)]
pub mod dex {
    alloy::sol! {
        #[derive(Debug)]
        #[sol(rpc)]
        interface Exchange {
            /// Emitted when a trader opens a new position (or adds to an existing one).
            event TradeOpened(
                address indexed trader,
                uint16 indexed pairId,
                bool isLong,
                uint256 sizeUsd,
                uint256 price,
                uint256 fee,
                uint32 leverageBps,
                uint256 tradeId
            );

            /// Emitted when a trader voluntarily closes all or part of a position.
            event TradeClosed(
                address indexed trader,
                uint16 indexed pairId,
                bool isLong,
                uint256 sizeUsd,
                uint256 price,
                uint256 fee,
                int256 pnl,
                uint256 tradeId
            );

            /// Emitted when a position is force-closed by the venue's liquidation engine.
            event Liquidated(
                address indexed trader,
                uint16 indexed pairId,
                bool isLong,
                uint256 sizeUsd,
                uint256 price,
                uint256 fee,
                uint256 tradeId
            );

            function getMarkPrice(uint16 pairId) external view returns (uint256);
            function getTraderEquity(address trader) external view returns (uint256);
            function getPairDecimals(uint16 pairId) external view returns (uint8 priceDecimals, uint8 sizeDecimals);
            function collateralDecimals() external view returns (uint8);
            function isHalted() external view returns (bool);

            /// Opens (or adds to) a position sized in collateral USD, at up to
            /// `leverageBps` leverage, reverting if the fill would move price
            /// beyond `maxSlippageBps`.
            function openTrade(
                uint16 pairId,
                bool isLong,
                uint256 collateralUsd,
                uint32 leverageBps,
                uint256 maxSlippageBps
            ) external returns (uint256 tradeId);

            /// Closes all or part of an existing position by trade id.
            function closeTrade(uint16 pairId, uint256 tradeId, uint256 sizeUsd, uint256 maxSlippageBps) external;

            error Halted();
            error InsufficientMargin();
            error PositionNotFound();
            error PairNotListed();
        }
    }
}
