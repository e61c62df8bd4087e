use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{PoolError, Result};

fn to_chrono(duration: Duration) -> chrono::Duration {
    // Cap absurd timeouts so expiry arithmetic cannot overflow
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36500))
}

/// The time-bounded right of one job to exclusively use one bench.
#[derive(Debug, Clone)]
pub struct Lease {
    pub id: Uuid,
    pub job_id: Uuid,
    pub bench_id: String,
    pub granted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub timeout: Duration,
    pub revoked: bool,
}

/// Tracks every lease ever granted in this run. Revocation is flagged, not
/// deleted, so a late heartbeat or double release resolves to a clean
/// `LeaseExpired` instead of corrupting state.
#[derive(Debug, Default)]
pub struct LeaseTable {
    leases: HashMap<Uuid, Lease>,
}

impl LeaseTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a lease binding `job_id` to `bench_id` for `timeout`.
    /// Called only from the allocator's critical section.
    pub(crate) fn grant(&mut self, job_id: Uuid, bench_id: &str, timeout: Duration) -> Uuid {
        let now = Utc::now();
        let lease = Lease {
            id: Uuid::new_v4(),
            job_id,
            bench_id: bench_id.to_string(),
            granted_at: now,
            expires_at: now + to_chrono(timeout),
            last_heartbeat: now,
            timeout,
            revoked: false,
        };
        let id = lease.id;
        tracing::info!(
            lease_id = %id,
            job_id = %job_id,
            bench_id = %bench_id,
            timeout_secs = timeout.as_secs(),
            "Lease granted"
        );
        self.leases.insert(id, lease);
        id
    }

    pub fn get(&self, lease_id: &Uuid) -> Option<&Lease> {
        self.leases.get(lease_id)
    }

    /// Flag a lease revoked. Returns the (job, bench) binding on the first
    /// call and `None` on any later call or for an unknown id - revocation
    /// is idempotent because timeout and explicit-release races are
    /// expected.
    pub(crate) fn mark_revoked(&mut self, lease_id: Uuid) -> Option<(Uuid, String)> {
        match self.leases.get_mut(&lease_id) {
            Some(lease) if !lease.revoked => {
                lease.revoked = true;
                tracing::info!(lease_id = %lease_id, bench_id = %lease.bench_id, "Lease revoked");
                Some((lease.job_id, lease.bench_id.clone()))
            }
            _ => None,
        }
    }

    /// Extend a live lease by its own timeout, measured from now.
    pub fn heartbeat(&mut self, lease_id: Uuid) -> Result<()> {
        match self.leases.get_mut(&lease_id) {
            Some(lease) if !lease.revoked => {
                let now = Utc::now();
                lease.last_heartbeat = now;
                lease.expires_at = now + to_chrono(lease.timeout);
                tracing::debug!(lease_id = %lease_id, "Lease heartbeat");
                Ok(())
            }
            _ => Err(PoolError::LeaseExpired(lease_id)),
        }
    }

    /// Non-revoked leases whose expiry has passed.
    pub fn expired(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        self.leases
            .values()
            .filter(|lease| !lease.revoked && lease.expires_at <= now)
            .map(|lease| lease.id)
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.leases.values().filter(|l| !l.revoked).count()
    }
}
