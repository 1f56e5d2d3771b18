use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use parley_db::DbPool;

#[derive(Clone, Debug)]
pub struct AccessConfig {
    pub enabled: bool,
    /// Use the first `X-Forwarded-For` entry instead of the socket peer.
    pub trust_forwarded_for: bool,
    pub cache_ttl: Duration,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            trust_forwarded_for: false,
            cache_ttl: Duration::from_secs(300),
        }
    }
}

/// Gate applied before a connection is upgraded: refuses clients whose IP
/// is on the block list. Verdicts are cached per IP.
pub struct AccessPolicy {
    db: DbPool,
    config: AccessConfig,
    verdicts: moka::future::Cache<IpAddr, bool>,
}

impl AccessPolicy {
    pub fn new(db: DbPool, config: AccessConfig) -> Self {
        let verdicts = moka::future::Cache::builder()
            .max_capacity(50_000)
            .time_to_live(config.cache_ttl)
            .build();
        Self {
            db,
            config,
            verdicts,
        }
    }

    pub fn client_ip(&self, peer: SocketAddr, forwarded_for: Option<&str>) -> IpAddr {
        if self.config.trust_forwarded_for {
            if let Some(ip) = forwarded_for
                .and_then(|raw| raw.split(',').next())
                .and_then(|first| first.trim().parse::<IpAddr>().ok())
            {
                return ip;
            }
        }
        peer.ip()
    }

    /// Lookup failures fail open.
    pub async fn is_allowed(&self, ip: IpAddr) -> bool {
        if !self.config.enabled {
            return true;
        }
        if let Some(allowed) = self.verdicts.get(&ip).await {
            return allowed;
        }
        match parley_db::blocked_ips::is_ip_blocked(&self.db, &ip.to_string()).await {
            Ok(blocked) => {
                self.verdicts.insert(ip, !blocked).await;
                !blocked
            }
            Err(err) => {
                tracing::warn!(ip = %ip, error = %err, "blocked-ip lookup failed, allowing");
                true
            }
        }
    }
}
