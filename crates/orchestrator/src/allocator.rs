//! First-fit host selection.
//!
//! Hosts are scanned in listing order and the first one with enough free RAM
//! wins. There is no load balancing and no bin packing: an earlier host that
//! qualifies is always preferred over an emptier later one.
//!
//! Reads of the inventory and the eventual write of `capacity_used` are
//! separate round-trips, so the allocator keeps an in-process ledger of RAM
//! that has been promised to an order but not yet committed to the store.
//! [`Allocator::reserve_host`] decides and records a reservation under one
//! lock; the returned [`HostReservation`] either commits the RAM to the store
//! against a server row or hands it back when dropped.

use badger_core::store::StoreResult;
use badger_core::{Host, HostId, ServerId, Store};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// The first host in `hosts` with at least `ram_needed` GB free.
pub fn first_fit(hosts: &[Host], ram_needed: u64) -> Option<&Host> {
    hosts.iter().find(|host| host.free_capacity() >= ram_needed)
}

#[derive(Default)]
struct ReservationLedger {
    /// Serializes "read inventory, decide, reserve" and "commit, release".
    gate: tokio::sync::Mutex<()>,
    reserved: Mutex<HashMap<HostId, u64>>,
}

impl ReservationLedger {
    fn reserved(&self, host: HostId) -> u64 {
        let table = self.reserved.lock().unwrap_or_else(PoisonError::into_inner);
        table.get(&host).copied().unwrap_or(0)
    }

    fn reserve(&self, host: HostId, ram: u64) {
        let mut table = self.reserved.lock().unwrap_or_else(PoisonError::into_inner);
        *table.entry(host).or_insert(0) += ram;
    }

    fn release(&self, host: HostId, ram: u64) {
        let mut table = self.reserved.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(held) = table.get_mut(&host) {
            *held = held.saturating_sub(ram);
            if *held == 0 {
                table.remove(&host);
            }
        }
    }
}

#[derive(Clone)]
pub struct Allocator {
    store: Arc<dyn Store>,
    ledger: Arc<ReservationLedger>,
}

impl Allocator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            ledger: Arc::new(ReservationLedger::default()),
        }
    }

    /// First-fit over the stored inventory, ignoring outstanding reservations.
    ///
    /// `None` for `ram_needed` means the request carried no usable size and
    /// never matches.
    pub async fn find_host(&self, ram_needed: Option<u64>) -> StoreResult<Option<Host>> {
        let Some(ram) = ram_needed else {
            debug!("Host lookup without a RAM requirement, no match");
            return Ok(None);
        };
        let hosts = self.store.list_hosts().await?;
        Ok(first_fit(&hosts, ram).cloned())
    }

    /// Picks the first host with `ram_needed` GB free after subtracting
    /// outstanding reservations, and reserves that RAM on it.
    pub async fn reserve_host(&self, ram_needed: Option<u64>) -> StoreResult<Option<HostReservation>> {
        let Some(ram) = ram_needed else {
            debug!("Reservation without a RAM requirement, no match");
            return Ok(None);
        };

        let _gate = self.ledger.gate.lock().await;
        let hosts = self.store.list_hosts().await?;
        let chosen = hosts.into_iter().find(|host| self.fits(host, ram));
        Ok(chosen.map(|host| self.reservation(host, ram)))
    }

    /// Reserves `ram` on the host at `host_ip` only. Used when a server row
    /// already names its host but its capacity was never committed.
    pub async fn reserve_on(&self, host_ip: &str, ram: u64) -> StoreResult<Option<HostReservation>> {
        let _gate = self.ledger.gate.lock().await;
        let hosts = self.store.list_hosts().await?;
        let Some(host) = hosts.into_iter().find(|host| host.ip_address == host_ip) else {
            warn!(host = %host_ip, "Host named by server row is not in the inventory");
            return Ok(None);
        };
        if !self.fits(&host, ram) {
            return Ok(None);
        }
        Ok(Some(self.reservation(host, ram)))
    }

    fn fits(&self, host: &Host, ram: u64) -> bool {
        host.free_capacity()
            .saturating_sub(self.ledger.reserved(host.id))
            >= ram
    }

    fn reservation(&self, host: Host, ram: u64) -> HostReservation {
        self.ledger.reserve(host.id, ram);
        debug!(host = %host.ip_address, ram_gb = ram, "Reserved host capacity");
        HostReservation {
            host,
            ram,
            ledger: self.ledger.clone(),
            active: true,
        }
    }

    /// RAM currently reserved on `host` and not yet committed.
    pub fn reserved_on(&self, host: HostId) -> u64 {
        self.ledger.reserved(host)
    }
}

/// RAM promised to one order on one host.
///
/// Dropping the guard without calling [`commit`](Self::commit) releases the
/// reservation.
pub struct HostReservation {
    host: Host,
    ram: u64,
    ledger: Arc<ReservationLedger>,
    active: bool,
}

impl HostReservation {
    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn ram(&self) -> u64 {
        self.ram
    }

    /// Commits `server`'s RAM to this host's `capacity_used` and clears the
    /// reservation. On a store error the reservation is released on drop.
    pub async fn commit(mut self, store: &dyn Store, server: ServerId) -> StoreResult<()> {
        let _gate = self.ledger.gate.lock().await;
        match store.commit_server_capacity(server, self.host.id).await? {
            Some(updated) => info!(
                host = %updated.ip_address,
                used = updated.capacity_used,
                total = updated.capacity_total,
                "Committed host capacity"
            ),
            None => warn!(
                host = %self.host.ip_address,
                server_id = %server,
                "Host or server vanished before capacity commit"
            ),
        }
        self.ledger.release(self.host.id, self.ram);
        self.active = false;
        Ok(())
    }
}

impl Drop for HostReservation {
    fn drop(&mut self) {
        if self.active {
            debug!(host = %self.host.ip_address, ram_gb = self.ram, "Releasing host reservation");
            self.ledger.release(self.host.id, self.ram);
        }
    }
}

impl std::fmt::Debug for HostReservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostReservation")
            .field("host", &self.host.ip_address)
            .field("ram", &self.ram)
            .field("active", &self.active)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use badger_core::{
        InternalStatus, MemoryStore, NewServer, NewSubscription, ServerStatus, SubscriptionStatus,
    };

    /// A server row on `ip` holding `ram` GB, capacity not yet committed.
    async fn server_row(store: &MemoryStore, ip: &str, ram: u64) -> ServerId {
        let user = store.add_user(&format!("{ip}@example.com")).await;
        let game = store.add_game("valheim").await;
        let plan = store.add_plan(game.id, Some(ram), 2).await;
        let now = badger_core::now_utc();
        let sub = store
            .insert_subscription(NewSubscription {
                user_id: user.id,
                plan_id: plan.id,
                status: SubscriptionStatus::Active,
                internal_status: InternalStatus::Provisioning,
                is_trial: false,
                expires_at: now,
                next_billing_date: now,
            })
            .await
            .unwrap();
        store
            .insert_server(NewServer {
                subscription_id: sub.id,
                status: ServerStatus::Provisioning,
                ip_address: ip.to_string(),
                ports: vec![],
                container_id: "-".into(),
                config: "{}".into(),
                ram_gb: ram,
            })
            .await
            .unwrap()
            .id
    }

    fn host(id: i64, total: u64, used: u64) -> Host {
        Host {
            id: HostId(id),
            ip_address: format!("10.0.0.{id}"),
            capacity_total: total,
            capacity_used: used,
        }
    }

    #[test]
    fn test_first_fit_takes_first_qualifying_host() {
        let hosts = vec![host(1, 10, 8), host(2, 20, 0)];
        assert_eq!(first_fit(&hosts, 5).map(|h| h.id), Some(HostId(2)));
        // Both qualify: listing order wins over free space.
        assert_eq!(first_fit(&hosts, 2).map(|h| h.id), Some(HostId(1)));
        assert!(first_fit(&hosts, 21).is_none());
    }

    #[tokio::test]
    async fn test_find_host_without_ram_is_no_match() {
        let store = Arc::new(MemoryStore::new());
        store.add_host("10.0.0.1", 64, 0).await;
        let allocator = Allocator::new(store);

        assert!(allocator.find_host(None).await.unwrap().is_none());
        assert!(allocator.find_host(Some(4)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_reservations_count_against_free_capacity() {
        let store = Arc::new(MemoryStore::new());
        store.add_host("10.0.0.1", 8, 0).await;
        store.add_host("10.0.0.2", 8, 0).await;
        let allocator = Allocator::new(store);

        let first = allocator.reserve_host(Some(6)).await.unwrap().unwrap();
        let second = allocator.reserve_host(Some(6)).await.unwrap().unwrap();
        assert_eq!(first.host().ip_address, "10.0.0.1");
        assert_eq!(second.host().ip_address, "10.0.0.2");
        assert!(allocator.reserve_host(Some(6)).await.unwrap().is_none());

        drop(first);
        let third = allocator.reserve_host(Some(6)).await.unwrap().unwrap();
        assert_eq!(third.host().ip_address, "10.0.0.1");
    }

    #[tokio::test]
    async fn test_commit_moves_reservation_into_store() {
        let store = Arc::new(MemoryStore::new());
        let seeded = store.add_host("10.0.0.1", 16, 4).await;
        let allocator = Allocator::new(store.clone());

        let server = server_row(&store, "10.0.0.1", 8).await;
        let reservation = allocator.reserve_host(Some(8)).await.unwrap().unwrap();
        assert_eq!(allocator.reserved_on(seeded.id), 8);
        reservation.commit(store.as_ref(), server).await.unwrap();

        assert_eq!(allocator.reserved_on(seeded.id), 0);
        assert_eq!(store.hosts().await[0].capacity_used, 12);
    }

    #[tokio::test]
    async fn test_failed_commit_releases_on_drop() {
        let store = Arc::new(MemoryStore::new());
        let seeded = store.add_host("10.0.0.1", 16, 0).await;
        let allocator = Allocator::new(store.clone());

        let server = server_row(&store, "10.0.0.1", 8).await;
        let reservation = allocator.reserve_host(Some(8)).await.unwrap().unwrap();
        store.set_offline(true);
        assert!(reservation.commit(store.as_ref(), server).await.is_err());
        assert_eq!(allocator.reserved_on(seeded.id), 0);
    }

    #[tokio::test]
    async fn test_reserve_on_targets_one_host() {
        let store = Arc::new(MemoryStore::new());
        store.add_host("10.0.0.1", 16, 0).await;
        let second = store.add_host("10.0.0.2", 8, 4).await;
        let allocator = Allocator::new(store);

        let reservation = allocator.reserve_on("10.0.0.2", 4).await.unwrap().unwrap();
        assert_eq!(reservation.host().id, second.id);
        // The first host has room, but only the named one counts.
        assert!(allocator.reserve_on("10.0.0.2", 1).await.unwrap().is_none());
        assert!(allocator.reserve_on("10.9.9.9", 1).await.unwrap().is_none());
    }
}
