// Copyright 2026 The Pylon Authors
// SPDX-License-Identifier: Apache-2.0

//! Services: the replica pool behind one `(protocol, port)` pair.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use metrics::{counter, gauge};
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::listener::Listener;
use crate::proto::Protocol;
use crate::proxy;
use crate::replica::Replica;

struct Pool {
    replicas: Vec<Arc<Replica>>,
    cursor: usize,
}

/// One public endpoint exposed by the load balancer.
///
/// A service owns its data-plane listener and an ordered replica
/// pool. It goes non-live when its last replica is evicted (the
/// listener is closed), and can be restarted by a later registration
/// for the same `(protocol, port)` key.
pub struct Service {
    addr: IpAddr,
    port: u16,
    proto: Protocol,
    // Dropped on termination so the socket is actually released and
    // later connects are refused, not parked in the accept backlog.
    listener: Mutex<Option<Arc<Listener>>>,
    pool: Mutex<Pool>,
    live: AtomicBool,
}

impl Service {
    /// Creates a service around an already-bound data listener and
    /// starts its accept loop.
    #[must_use]
    pub fn new(addr: IpAddr, port: u16, proto: Protocol, listener: Listener) -> Arc<Self> {
        let listener = Arc::new(listener);
        let service = Arc::new(Self {
            addr,
            port,
            proto,
            listener: Mutex::new(Some(listener.clone())),
            pool: Mutex::new(Pool { replicas: Vec::new(), cursor: 0 }),
            live: AtomicBool::new(true),
        });
        service.spawn_accept(listener);
        service
    }

    /// The service's public port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The service's transport protocol.
    #[must_use]
    pub fn proto(&self) -> Protocol {
        self.proto
    }

    /// Whether the data listener is currently serving.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Number of replicas currently in the pool.
    #[must_use]
    pub fn replica_count(&self) -> usize {
        self.pool.lock().replicas.len()
    }

    /// Appends a replica to the pool.
    pub fn add_replica(&self, replica: Arc<Replica>) {
        let count = {
            let mut pool = self.pool.lock();
            pool.replicas.push(replica.clone());
            pool.replicas.len()
        };
        gauge!("pylon_lb_service_replicas", "service" => self.describe()).set(count as f64);
        info!(service = %self.describe(), replica = %replica, total = count, "added replica");
    }

    /// Removes every replica matching `target`'s `(addr, port,
    /// proto)` identity. Returns whether anything was removed.
    ///
    /// When the pool ends up empty the service is terminated and
    /// marked non-live.
    pub fn remove_replica(&self, target: &Replica) -> bool {
        let (removed, now_empty, count) = {
            let mut pool = self.pool.lock();
            let before = pool.replicas.len();
            pool.replicas.retain(|r| !r.same_endpoint(target));
            (pool.replicas.len() < before, pool.replicas.is_empty(), pool.replicas.len())
        };

        gauge!("pylon_lb_service_replicas", "service" => self.describe()).set(count as f64);

        if now_empty {
            info!(service = %self.describe(), "no replicas left, terminating listener");
            self.terminate();
            self.live.store(false, Ordering::SeqCst);
        }

        removed
    }

    /// Closes and releases the data-plane listener.
    pub fn terminate(&self) {
        if let Some(listener) = self.listener.lock().take() {
            listener.close();
        }
    }

    /// Rebinds the service on a fresh listener after depletion.
    pub fn restart(self: &Arc<Self>, listener: Listener) {
        let listener = Arc::new(listener);
        *self.listener.lock() = Some(listener.clone());
        self.live.store(true, Ordering::SeqCst);
        self.spawn_accept(listener);
        info!(service = %self.describe(), "restarted service listener");
    }

    /// Advances the round-robin cursor and picks the replica at the
    /// new position.
    ///
    /// The cursor moves before selecting, so the first dispatch after
    /// startup serves index 1 (index 0 with a single replica).
    fn next_replica(&self) -> Option<Arc<Replica>> {
        let mut pool = self.pool.lock();
        if pool.replicas.is_empty() {
            return None;
        }
        pool.cursor = if pool.cursor + 1 < pool.replicas.len() { pool.cursor + 1 } else { 0 };
        Some(pool.replicas[pool.cursor].clone())
    }

    /// Round-robin picks a replica and proxies the client connection
    /// to it. With an empty pool the client connection is closed with
    /// a logged error.
    pub async fn dispatch(&self, mut client: TcpStream, peer: SocketAddr) {
        if self.proto == Protocol::Udp {
            warn!(service = %self.describe(), "UDP data path is not supported");
            return;
        }

        let Some(target) = self.next_replica() else {
            warn!(
                service = %self.describe(),
                client = %peer,
                "no replicas available, closing client connection"
            );
            let _ = client.shutdown().await;
            return;
        };

        counter!("pylon_lb_dispatch_total", "service" => self.describe()).increment(1);
        debug!(service = %self.describe(), client = %peer, target = %target, "forwarding");

        let target_addr = SocketAddr::new(target.addr(), target.port());
        if let Err(e) = proxy::forward(client, target_addr).await {
            warn!(
                service = %self.describe(),
                client = %peer,
                target = %target,
                error = %e,
                "forwarding failed"
            );
        }
    }

    fn spawn_accept(self: &Arc<Self>, listener: Arc<Listener>) {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let dispatcher = service.clone();
            listener
                .run(move |conn, peer| {
                    let service = dispatcher.clone();
                    async move { service.dispatch(conn, peer).await }
                })
                .await;
        });
    }

    fn describe(&self) -> String {
        format!("{}/{}:{}", self.proto, self.addr, self.port)
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::time::Duration;

    use tokio::io::AsyncReadExt;

    use super::*;

    fn loopback() -> IpAddr {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }

    async fn ephemeral_service() -> Arc<Service> {
        let listener = Listener::open(loopback(), 0, Protocol::Tcp).await.unwrap();
        let port = listener.local_addr().port();
        Service::new(loopback(), port, Protocol::Tcp, listener)
    }

    fn fake_replica(last_octet: u8, port: u16) -> Arc<Replica> {
        Arc::new(Replica::new(
            IpAddr::V4(Ipv4Addr::new(127, 0, 0, last_octet)),
            port,
            Protocol::Tcp,
        ))
    }

    #[tokio::test]
    async fn test_round_robin_serves_index_one_first() {
        let service = ephemeral_service().await;
        let a = fake_replica(1, 9002);
        let b = fake_replica(2, 9002);
        service.add_replica(a.clone());
        service.add_replica(b.clone());

        let picks: Vec<_> =
            (0..6).map(|_| service.next_replica().unwrap().addr()).collect();
        assert_eq!(
            picks,
            vec![b.addr(), a.addr(), b.addr(), a.addr(), b.addr(), a.addr()]
        );
    }

    #[tokio::test]
    async fn test_round_robin_single_replica() {
        let service = ephemeral_service().await;
        let only = fake_replica(1, 9002);
        service.add_replica(only.clone());

        for _ in 0..3 {
            assert!(service.next_replica().unwrap().same_endpoint(&only));
        }
    }

    #[tokio::test]
    async fn test_cursor_survives_pool_shrink() {
        let service = ephemeral_service().await;
        for octet in 1..=3 {
            service.add_replica(fake_replica(octet, 9002));
        }
        // Advance the cursor to the last slot, then shrink the pool.
        service.next_replica();
        service.next_replica();
        assert!(service.remove_replica(&fake_replica(3, 9002)));

        // A stale out-of-range cursor wraps to the front.
        let next = service.next_replica().unwrap();
        assert_eq!(next.addr(), fake_replica(1, 9002).addr());
    }

    #[tokio::test]
    async fn test_remove_missing_replica_returns_false() {
        let service = ephemeral_service().await;
        service.add_replica(fake_replica(1, 9002));
        assert!(!service.remove_replica(&fake_replica(9, 9002)));
        assert_eq!(service.replica_count(), 1);
        assert!(service.is_live());
    }

    #[tokio::test]
    async fn test_removing_last_replica_terminates_service() {
        let service = ephemeral_service().await;
        let port = service.port();
        service.add_replica(fake_replica(1, 9002));

        assert!(service.remove_replica(&fake_replica(1, 9002)));
        assert!(!service.is_live());
        assert_eq!(service.replica_count(), 0);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(TcpStream::connect((loopback(), port)).await.is_err());
    }

    #[tokio::test]
    async fn test_dispatch_with_empty_pool_closes_client() {
        let service = ephemeral_service().await;
        let port = service.port();

        let mut client = TcpStream::connect((loopback(), port)).await.unwrap();
        let mut buf = [0u8; 1];
        // The dispatcher finds no replica and shuts the connection.
        let read = tokio::time::timeout(Duration::from_secs(1), client.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read, 0);
    }

    #[tokio::test]
    async fn test_restart_after_depletion() {
        let service = ephemeral_service().await;
        let port = service.port();
        service.add_replica(fake_replica(1, 9002));
        service.remove_replica(&fake_replica(1, 9002));
        assert!(!service.is_live());
        tokio::time::sleep(Duration::from_millis(50)).await;

        let listener = Listener::open(loopback(), port, Protocol::Tcp).await.unwrap();
        service.restart(listener);
        service.add_replica(fake_replica(1, 9002));

        assert!(service.is_live());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(TcpStream::connect((loopback(), port)).await.is_ok());
    }
}
