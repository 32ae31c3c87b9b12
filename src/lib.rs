//! Avantis copy-trading core.
//!
//! # Overview
//!
//! This crate implements the copy-trading pipeline behind the chat-exposed
//! trading platform: a reorg-safe indexer for Avantis trade events, a FIFO
//! position/PnL engine, a copyability leaderboard, and the signal fanout +
//! execution path that turns a followed trader's fill into sized, risk-checked
//! mirror orders.
//!
//! The chat front-end, wallet custody, oracle adapters, and order-book
//! matching itself are external collaborators; only the narrow contracts this
//! crate consumes from them ([`signer::Signer`], [`price::PriceProvider`],
//! [`chat`]) are modeled here.
//!
//! # Layout
//!
//! * [`chain`] — typed JSON-RPC wrapper with retry/backoff (C1).
//! * [`indexer`] — backfill + tail + reorg handling (C2).
//! * [`store`] — relational repositories and the shared (Redis-class) store (C3, C6, C13).
//! * [`pnl`] — FIFO lot matching and 30d rolling stats (C4).
//! * [`leaderboard`] — copyability scoring and ranking cache (C5).
//! * [`fanout`] — fill → per-follower `CopyIntent` translation (C7).
//! * [`exec`] — DRY/LIVE gate, emergency stop, rate limiting (C8).
//! * [`risk`] — per-intent validation (C9).
//! * [`tx`] — nonce/gas/broadcast/confirm orchestration (C10).
//! * [`health`] — liveness/readiness/metrics HTTP surface (C11).
//! * [`config`] — boot-time configuration (C12).
//! * [`portfolio`] — on-chain equity reads backing [`risk::PortfolioProvider`].

pub mod abi;
pub mod chain;
pub mod chat;
pub mod config;
pub mod error;
pub mod exec;
pub mod fanout;
pub mod health;
pub mod indexer;
pub mod leaderboard;
pub mod num;
pub mod pnl;
pub mod portfolio;
pub mod price;
pub mod risk;
pub mod signer;
pub mod store;
pub mod tx;
pub mod types;

use alloy::primitives::{Address, address};

/// Chain the Avantis exchange is deployed on.
#[derive(Clone, Debug)]
pub struct Chain {
    chain_id: u64,
    exchange: Address,
    deployed_at_block: u64,
}

impl Chain {
    /// Base mainnet, with the well-known Avantis trading contract address.
    pub fn base_mainnet() -> Self {
        Self {
            chain_id: 8453,
            exchange: address!("0x5FF292d70bA9cD9e7CCb313782811b3D7120535f"),
            deployed_at_block: 5726873,
        }
    }

    pub fn custom(chain_id: u64, exchange: Address, deployed_at_block: u64) -> Self {
        Self {
            chain_id,
            exchange,
            deployed_at_block,
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn exchange(&self) -> Address {
        self.exchange
    }

    pub fn deployed_at_block(&self) -> u64 {
        self.deployed_at_block
    }
}
