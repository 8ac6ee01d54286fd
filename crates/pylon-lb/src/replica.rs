// Copyright 2026 The Pylon Authors
// SPDX-License-Identifier: Apache-2.0

//! Back-end replicas and their health-check state machine.
//!
//! Every registered replica runs one independent health-check task
//! over the control connection it registered on. The task drives a
//! one-way state machine:
//!
//! ```text
//! REGISTERED ──ok──▶ HEALTHY ──fail──▶ DEGRADED(k) ──k ≥ max──▶ DEAD
//!                       ▲                   │
//!                       └────────ok─────────┘
//! ```
//!
//! The DEAD transition closes the control connection (bounded
//! deadline) and removes the replica from its owning service; if that
//! was the last replica, the service's listener is terminated.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::counter;
use parking_lot::Mutex;
use pylon_core::{Error, HealthConfig, Result};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{mpsc, Notify};
use tokio::time::timeout;
use tracing::{debug, error, warn};

use crate::proto::{self, Command, Protocol};
use crate::service::Service;

/// Deadline for closing a dead replica's control connection.
const CLOSE_DEADLINE: Duration = Duration::from_secs(3);

/// Health-check progress of one replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Registered, no probe completed yet.
    Registered,
    /// Last probe succeeded.
    Healthy,
    /// The given number of consecutive probes failed.
    Degraded(u32),
    /// Evicted. This state is terminal.
    Dead,
}

/// One back-end endpoint, exclusively owned by its service.
///
/// Two replicas are the same endpoint iff `(addr, port, proto)`
/// match.
pub struct Replica {
    addr: IpAddr,
    port: u16,
    proto: Protocol,
    state: Mutex<HealthState>,
    last_healthy: Mutex<Option<Instant>>,
}

impl Replica {
    /// Creates a freshly registered replica.
    #[must_use]
    pub fn new(addr: IpAddr, port: u16, proto: Protocol) -> Self {
        Self {
            addr,
            port,
            proto,
            state: Mutex::new(HealthState::Registered),
            last_healthy: Mutex::new(None),
        }
    }

    /// The replica's data-plane address.
    #[must_use]
    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    /// The replica's data-plane port (same as the service port).
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The replica's transport protocol.
    #[must_use]
    pub fn proto(&self) -> Protocol {
        self.proto
    }

    /// Current health-check state.
    #[must_use]
    pub fn state(&self) -> HealthState {
        *self.state.lock()
    }

    /// When the last successful probe completed, if any.
    #[must_use]
    pub fn last_healthy(&self) -> Option<Instant> {
        *self.last_healthy.lock()
    }

    /// Whether `other` names the same `(addr, port, proto)` endpoint.
    #[must_use]
    pub fn same_endpoint(&self, other: &Replica) -> bool {
        self.addr == other.addr && self.port == other.port && self.proto == other.proto
    }

    fn set_state(&self, state: HealthState) {
        *self.state.lock() = state;
    }
}

impl std::fmt::Display for Replica {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}:{}", self.proto, self.addr, self.port)
    }
}

/// The health task's handle onto the shared control connection.
///
/// The connection's read loop lives in the controller; probe
/// acknowledgments are routed here over `acks`, probe requests go out
/// through the shared `writer`, and `closer` tells the read loop to
/// drop the connection once the replica is dead.
pub struct HealthChannel {
    /// Write half of the control connection, shared with the ack
    /// writer in the controller.
    pub writer: Arc<tokio::sync::Mutex<OwnedWriteHalf>>,
    /// Probe acknowledgments routed from the connection read loop.
    pub acks: mpsc::Receiver<()>,
    /// Signals the connection read loop to tear down.
    pub closer: Arc<Notify>,
}

/// Runs the health-check loop for one replica until it dies.
///
/// Each probe sends `{"cmd":"hello"}` and requires `{"ack":"hello"}`
/// within the configured timeout; any other outcome counts as one
/// failure, and any success resets the failure counter.
pub async fn run_health_loop(
    replica: Arc<Replica>,
    service: Arc<Service>,
    config: HealthConfig,
    mut channel: HealthChannel,
) {
    let mut failures = 0u32;

    loop {
        match probe(&channel.writer, &mut channel.acks, config.timeout).await {
            Ok(()) => {
                failures = 0;
                replica.set_state(HealthState::Healthy);
                *replica.last_healthy.lock() = Some(Instant::now());
                debug!(replica = %replica, "health check finished");
            }
            Err(e) => {
                failures += 1;
                replica.set_state(HealthState::Degraded(failures));
                counter!("pylon_lb_probe_failures_total").increment(1);
                warn!(
                    replica = %replica,
                    failures,
                    max_failure = config.max_failure,
                    last_healthy = ?replica.last_healthy(),
                    error = %e,
                    "health check failed"
                );
            }
        }

        if failures >= config.max_failure {
            replica.set_state(HealthState::Dead);
            error!(replica = %replica, failures, "max health check failures reached");
            break;
        }

        tokio::time::sleep(config.interval).await;
    }

    // Dead: close the control connection with a bounded deadline,
    // then hand the socket back to the read loop for teardown.
    let close = async { channel.writer.lock().await.shutdown().await };
    match timeout(CLOSE_DEADLINE, close).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            warn!(replica = %replica, error = %e, "unable to close control connection");
        }
        Err(_) => {
            warn!(replica = %replica, "control connection close timed out, abandoning");
        }
    }
    channel.closer.notify_one();

    warn!(replica = %replica, "removing replica from service after repeated probe failures");
    service.remove_replica(&replica);
}

/// Sends one probe and waits for its acknowledgment.
async fn probe(
    writer: &tokio::sync::Mutex<OwnedWriteHalf>,
    acks: &mut mpsc::Receiver<()>,
    deadline: Duration,
) -> Result<()> {
    // Acks from a previous, timed-out probe must not satisfy this one.
    while acks.try_recv().is_ok() {}

    writer.lock().await.write_all(&proto::encode(&Command::Hello)).await?;

    match timeout(deadline, acks.recv()).await {
        Ok(Some(())) => Ok(()),
        Ok(None) => Err(Error::Protocol("control connection is gone".into())),
        Err(_) => {
            Err(Error::Protocol(format!("health check timed out ({}s)", deadline.as_secs())))
        }
    }
}
