//! Chat bridge (C14): a thin translation layer between the chat
//! collaborator and the core. It owns no state of its own beyond the
//! outbound event channel — commands are translated directly into calls
//! against the follow store (C6), the execution gate (C8), and the
//! leaderboard cache (C5) (§4.12).

use alloy::primitives::{Address, TxHash};
use fastnum::UD64;
use tokio::sync::mpsc;
use ulid::Ulid;

use crate::exec::ExecGate;
use crate::leaderboard::LeaderboardEntry;
use crate::store::{FollowRepo, SharedStore};
use crate::types::{ExecMode, FillSide, FollowConfig, IntentStatus, PairId, ReasonCode, TraderKey, UserId};

fn side_wire(side: FillSide) -> &'static str {
    match side {
        FillSide::Open => "OPEN",
        FillSide::Close => "CLOSE",
        FillSide::Liquidation => "LIQUIDATION",
    }
}

fn status_wire(status: IntentStatus) -> &'static str {
    match status {
        IntentStatus::Pending => "PENDING",
        IntentStatus::Validated => "VALIDATED",
        IntentStatus::Submitted => "SUBMITTED",
        IntentStatus::Confirmed => "CONFIRMED",
        IntentStatus::Failed => "FAILED",
        IntentStatus::Skipped => "SKIPPED",
    }
}

/// Plain, wire-safe leaderboard row — [`LeaderboardEntry`] carries an
/// `alloy::primitives::Address` which this crate never derives `Serialize`
/// on directly (see `WireExecModeState` in `store::shared` for the same
/// convention).
#[derive(Clone, Debug, serde::Serialize)]
pub struct WireLeaderboardEntry {
    pub trader_address: String,
    pub score: f64,
    pub volume_usd_30d: f64,
}

impl From<&LeaderboardEntry> for WireLeaderboardEntry {
    fn from(e: &LeaderboardEntry) -> Self {
        Self { trader_address: e.trader_address.to_string(), score: e.score, volume_usd_30d: e.volume_usd_30d }
    }
}

/// Core → chat event stream (§6). Serializable so a queue or RPC transport
/// can be bolted on without touching core logic.
#[derive(Clone, Debug, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    Signal {
        user_id: UserId,
        trader_key: String,
        pair: PairId,
        side: String,
        size: String,
        leverage: u32,
        status: String,
        reason: Option<String>,
    },
    IntentUpdate {
        intent_id: String,
        status: String,
        tx_hash: Option<String>,
        reason: Option<String>,
    },
    Leaderboard {
        entries: Vec<WireLeaderboardEntry>,
    },
}

/// Chat → core command sink (§6).
#[derive(Clone, Debug)]
pub enum ChatCommand {
    Follow { user_id: UserId, trader_key: Address, cfg: FollowConfig },
    Unfollow { user_id: UserId, trader_key: Address },
    SetExecMode { admin_id: UserId, mode: ExecMode },
    EmergencyStop { admin_id: UserId, on: bool },
    GetLeaderboard { limit: usize },
    GetFollowing { user_id: UserId },
}

#[derive(Debug)]
pub enum CommandResult {
    Ack,
    Leaderboard(Vec<LeaderboardEntry>),
    Following(Vec<FollowConfig>),
}

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("relational store: {0}")]
    Store(#[from] sqlx::Error),
    #[error("shared store: {0}")]
    SharedStore(#[from] redis::RedisError),
    #[error("outbound event channel closed")]
    ChannelClosed,
}

pub struct ChatBridge<Sh> {
    follows: FollowRepo,
    gate: ExecGate<Sh>,
    leaderboard: crate::leaderboard::LeaderboardCache,
    outbound: mpsc::Sender<ChatEvent>,
}

impl<Sh: SharedStore> ChatBridge<Sh> {
    pub fn new(
        follows: FollowRepo,
        gate: ExecGate<Sh>,
        leaderboard: crate::leaderboard::LeaderboardCache,
        outbound: mpsc::Sender<ChatEvent>,
    ) -> Self {
        Self { follows, gate, leaderboard, outbound }
    }

    pub async fn handle_command(&self, cmd: ChatCommand) -> Result<CommandResult, ChatError> {
        match cmd {
            ChatCommand::Follow { cfg, .. } => {
                self.follows.upsert(&cfg).await?;
                Ok(CommandResult::Ack)
            }
            ChatCommand::Unfollow { user_id, trader_key } => {
                self.follows.delete(user_id, trader_key).await?;
                Ok(CommandResult::Ack)
            }
            ChatCommand::SetExecMode { admin_id, mode } => {
                self.gate.set_mode(mode, admin_id).await?;
                Ok(CommandResult::Ack)
            }
            ChatCommand::EmergencyStop { admin_id, on } => {
                self.gate.set_emergency_stop(on, admin_id).await?;
                Ok(CommandResult::Ack)
            }
            ChatCommand::GetLeaderboard { limit } => Ok(CommandResult::Leaderboard(self.leaderboard.top_n(limit))),
            ChatCommand::GetFollowing { user_id } => {
                Ok(CommandResult::Following(self.follows.list_by_user(user_id).await?))
            }
        }
    }

    /// Reports one follower's signal outcome, whether it was built,
    /// notify-only, or skipped (§4.6).
    pub async fn emit_signal(
        &self,
        user_id: UserId,
        trader_key: TraderKey,
        pair: PairId,
        side: FillSide,
        size: UD64,
        leverage: u32,
        status: IntentStatus,
        reason: Option<ReasonCode>,
    ) -> Result<(), ChatError> {
        self.outbound
            .send(ChatEvent::Signal {
                user_id,
                trader_key: trader_key.to_string(),
                pair,
                side: side_wire(side).to_string(),
                size: size.to_string(),
                leverage,
                status: status_wire(status).to_string(),
                reason: reason.map(|r| r.to_string()),
            })
            .await
            .map_err(|_| ChatError::ChannelClosed)
    }

    /// Reports a `TxIntent`/`CopyIntent` state transition (§4.8, §4.12).
    pub async fn emit_intent_update(
        &self,
        intent_id: Ulid,
        status: IntentStatus,
        tx_hash: Option<TxHash>,
        reason: Option<ReasonCode>,
    ) -> Result<(), ChatError> {
        self.outbound
            .send(ChatEvent::IntentUpdate {
                intent_id: intent_id.to_string(),
                status: status_wire(status).to_string(),
                tx_hash: tx_hash.map(|h| h.to_string()),
                reason: reason.map(|r| r.to_string()),
            })
            .await
            .map_err(|_| ChatError::ChannelClosed)
    }

    pub async fn emit_leaderboard(&self, limit: usize) -> Result<(), ChatError> {
        let entries = self.leaderboard.top_n(limit).iter().map(WireLeaderboardEntry::from).collect();
        self.outbound.send(ChatEvent::Leaderboard { entries }).await.map_err(|_| ChatError::ChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leaderboard::LeaderboardCache;
    use crate::store::InMemorySharedStore;
    use alloy::primitives::address;
    use fastnum::udec64;

    #[tokio::test]
    async fn emergency_stop_command_updates_gate_state() {
        let store = InMemorySharedStore::default();
        let gate = ExecGate::new(store, crate::exec::RateLimits::default(), crate::health::Metrics::new().unwrap());

        gate.set_mode(ExecMode::Live, 1).await.unwrap();
        let state = gate.current_mode().await.unwrap();
        assert_eq!(state.mode, ExecMode::Live);

        gate.set_emergency_stop(true, 1).await.unwrap();
        let state = gate.current_mode().await.unwrap();
        assert!(state.emergency_stop);
    }

    #[tokio::test]
    async fn get_leaderboard_returns_cached_top_n() {
        let cache = LeaderboardCache::new();
        cache.replace(vec![], chrono::Utc::now());
        assert!(cache.top_n(10).is_empty());
    }

    #[tokio::test]
    async fn signal_event_serializes_into_wire_shape() {
        let (tx, mut rx) = mpsc::channel(8);
        tx.send(ChatEvent::Signal {
            user_id: 1,
            trader_key: address!("0x0000000000000000000000000000000000000f").to_string(),
            pair: 7,
            side: side_wire(FillSide::Open).to_string(),
            size: udec64!(1000).to_string(),
            leverage: 50_000,
            status: status_wire(IntentStatus::Validated).to_string(),
            reason: None,
        })
        .await
        .unwrap();

        let event = rx.recv().await.unwrap();
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "signal");
        assert_eq!(json["status"], "VALIDATED");
    }
}
