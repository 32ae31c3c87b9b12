//! Top-level error type for the service binary's own plumbing — config
//! assembly, boot-time collaborator construction, and task wiring. Business
//! logic errors stay in the library's own error types; this only wraps them
//! at the boundary main() runs in.

use avantis_copytrader::error::{ChainError, ConfigError, CoreError};
use avantis_copytrader::signer::SignerError;
use avantis_copytrader::tx::TxError;

#[derive(Debug, thiserror::Error)]
pub enum BootError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("chain client: {0}")]
    Chain(#[from] ChainError),
    #[error("signer: {0}")]
    Signer(#[from] SignerError),
    #[error("relational store: {0}")]
    Store(#[from] sqlx::Error),
    #[error("shared store: {0}")]
    SharedStore(#[from] redis::RedisError),
    #[error("transaction orchestrator: {0}")]
    Tx(#[from] TxError),
    #[error("metrics: {0}")]
    Metrics(#[from] prometheus::Error),
    #[error("core: {0}")]
    Core(#[from] CoreError),
    #[error("health server: {0}")]
    Http(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BootError>;
