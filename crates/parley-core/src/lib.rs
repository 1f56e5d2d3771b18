pub mod access;
pub mod collab;
pub mod error;
pub mod gateway;
pub mod outbox;
pub mod presence;
pub mod router;
pub mod session;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use parley_db::DbPool;
use tokio::sync::Notify;

use crate::access::{AccessConfig, AccessPolicy};
use crate::gateway::MessageGateway;
use crate::store::{SqlGroupDirectory, SqlMessageRepository, SqlSessionStore};

/// Gateway tuning knobs.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// Time allowed between upgrade and a completed handshake.
    pub handshake_timeout: Duration,
    pub outbox_capacity: usize,
    /// In characters.
    pub max_message_length: usize,
    pub max_messages_per_minute: u32,
    pub max_connections_per_user: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            outbox_capacity: 256,
            max_message_length: 4000,
            max_messages_per_minute: 240,
            max_connections_per_user: 5,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct AppConfig {
    pub gateway: GatewayConfig,
    pub access: AccessConfig,
    /// Worker bits stamped into message snowflakes.
    pub worker_id: u16,
}

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: AppConfig,
    pub gateway: Arc<MessageGateway>,
    pub access: Arc<AccessPolicy>,
    pub shutdown: Arc<Notify>,
}

impl AppState {
    /// Wires the gateway to the SQL-backed collaborators.
    pub fn new(db: DbPool, config: AppConfig) -> Self {
        let gateway = MessageGateway::new(
            config.gateway.clone(),
            Arc::new(SqlSessionStore::new(db.clone())),
            Arc::new(SqlGroupDirectory::new(db.clone())),
            Arc::new(SqlMessageRepository::new(db.clone(), config.worker_id)),
        );
        Self {
            access: Arc::new(AccessPolicy::new(db.clone(), config.access.clone())),
            gateway: Arc::new(gateway),
            shutdown: Arc::new(Notify::new()),
            db,
            config,
        }
    }
}
