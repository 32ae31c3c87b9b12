//! Persistence layer (C13): a relational store for durable aggregates and a
//! narrow `SharedStore` trait over a fast key-value store for exec-mode CAS,
//! nonce allocation, rate limiting and notification dedup.

pub mod pg;
pub mod shared;

pub use pg::{
    CopyIntentsRepo, CursorRepo, FillsRepo, FollowRepo, LotsRepo, PgStore, QuarantineRepo,
    StatsRepo, TxIntentsRepo,
};
pub use shared::{InMemorySharedStore, RedisSharedStore, SharedStore};
