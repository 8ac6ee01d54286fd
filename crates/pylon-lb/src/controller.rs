// Copyright 2026 The Pylon Authors
// SPDX-License-Identifier: Apache-2.0

//! The control plane: registration handling and the service registry.
//!
//! Back-ends dial the controller and keep the connection open; it
//! carries their registration commands and, once registered, the
//! health probes for the replica bound to it. One read loop per
//! connection classifies inbound frames and routes probe
//! acknowledgments to the replica's health task.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use metrics::counter;
use pylon_core::{LbConfig, Result};
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, trace, warn};

use crate::listener::Listener;
use crate::proto::{self, Ack, Command, Frame, FrameDecoder, Protocol};
use crate::replica::{run_health_loop, HealthChannel, Replica};
use crate::service::Service;

/// Registry key: one service per `(port, protocol)`.
pub type ServiceKey = (u16, Protocol);

type SharedWriter = Arc<tokio::sync::Mutex<OwnedWriteHalf>>;

/// The singleton control-plane server.
pub struct Controller {
    config: LbConfig,
    listener: Arc<Listener>,
    registry: tokio::sync::Mutex<HashMap<ServiceKey, Arc<Service>>>,
}

impl Controller {
    /// Binds the control-plane listener.
    ///
    /// # Errors
    ///
    /// Returns a bind error when the configured address is
    /// unavailable.
    pub async fn bind(config: LbConfig) -> Result<Arc<Self>> {
        let listener =
            Listener::open(config.listen_addr, config.listen_port, Protocol::Tcp).await?;
        info!(addr = %listener.local_addr(), "control plane listening");

        Ok(Arc::new(Self {
            config,
            listener: Arc::new(listener),
            registry: tokio::sync::Mutex::new(HashMap::new()),
        }))
    }

    /// The control plane's bound address.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// Looks up the service registered for `(port, proto)`.
    pub async fn service(&self, port: u16, proto: Protocol) -> Option<Arc<Service>> {
        self.registry.lock().await.get(&(port, proto)).cloned()
    }

    /// Serves control connections until the listener is closed.
    pub async fn run(self: &Arc<Self>) {
        let listener = self.listener.clone();
        let controller = self.clone();
        listener
            .run(move |conn, peer| {
                let controller = controller.clone();
                async move { controller.serve_connection(conn, peer).await }
            })
            .await;
    }

    /// Stops accepting control connections.
    pub fn close(&self) {
        self.listener.close();
    }

    /// Framed-JSON loop over one control connection.
    async fn serve_connection(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        debug!(peer = %peer, "control connection opened");

        let (mut reader, writer) = stream.into_split();
        let writer: SharedWriter = Arc::new(tokio::sync::Mutex::new(writer));
        let closer = Arc::new(Notify::new());
        let mut decoder = FrameDecoder::new();
        let mut buf = [0u8; 1024];
        // Set once this connection has registered its replica; routes
        // probe acks to the replica's health task.
        let mut ack_tx: Option<mpsc::Sender<()>> = None;

        loop {
            let n = tokio::select! {
                _ = closer.notified() => {
                    debug!(peer = %peer, "tearing down control connection for dead replica");
                    break;
                }
                read = reader.read(&mut buf) => match read {
                    Ok(0) => {
                        debug!(peer = %peer, "control connection closed by peer");
                        break;
                    }
                    Ok(n) => n,
                    Err(e) => {
                        warn!(peer = %peer, error = %e, "error reading control connection");
                        break;
                    }
                }
            };

            decoder.extend(&buf[..n]);
            loop {
                match decoder.next_frame() {
                    Ok(Some(frame)) => {
                        self.handle_frame(frame, peer, &writer, &closer, &mut ack_tx).await;
                    }
                    Ok(None) => break,
                    // A bad message never kills the control loop.
                    Err(e) => {
                        warn!(peer = %peer, error = %e, "ignoring malformed control message");
                    }
                }
            }
        }
    }

    async fn handle_frame(
        self: &Arc<Self>,
        frame: Frame,
        peer: SocketAddr,
        writer: &SharedWriter,
        closer: &Arc<Notify>,
        ack_tx: &mut Option<mpsc::Sender<()>>,
    ) {
        match frame {
            Frame::Ack(Ack::Hello) => match ack_tx {
                // A full ack slot means no probe is waiting; drop it.
                Some(tx) => {
                    let _ = tx.try_send(());
                }
                None => trace!(peer = %peer, "probe ack from unregistered connection"),
            },
            Frame::Ack(ack) => {
                trace!(peer = %peer, ?ack, "ignoring acknowledgment");
            }
            Frame::Command(Command::Hello) => {
                debug!(peer = %peer, "ignoring inbound hello");
            }
            Frame::Command(Command::Unregister { protocol, port }) => {
                warn!(peer = %peer, %protocol, %port, "unregister requested");
                let msg =
                    "unregister is not supported, replicas are evicted by health checks".to_string();
                send_ack(writer, &Ack::Failed { msg }, peer).await;
            }
            Frame::Command(Command::Register { protocol, port }) => {
                if ack_tx.is_some() {
                    let msg = "connection already registered a replica".to_string();
                    send_ack(writer, &Ack::Failed { msg }, peer).await;
                    return;
                }

                match self.register(peer.ip(), protocol, &port, writer.clone(), closer.clone()).await
                {
                    Ok(tx) => {
                        *ack_tx = Some(tx);
                        send_ack(writer, &Ack::Successful, peer).await;
                    }
                    Err(e) => {
                        warn!(peer = %peer, error = %e, "could not add a new replica");
                        send_ack(writer, &Ack::Failed { msg: e.to_string() }, peer).await;
                    }
                }
            }
        }
    }

    /// Registers the dialing back-end as a replica and starts its
    /// health-check task on this very connection.
    async fn register(
        self: &Arc<Self>,
        peer_ip: IpAddr,
        protocol: Protocol,
        port: &serde_json::Number,
        writer: SharedWriter,
        closer: Arc<Notify>,
    ) -> Result<mpsc::Sender<()>> {
        let port = proto::parse_port(port)?;
        let service = self.find_or_create(protocol, port).await?;

        let replica = Arc::new(Replica::new(peer_ip, port, protocol));
        service.add_replica(replica.clone());
        counter!("pylon_lb_registrations_total").increment(1);

        let (tx, acks) = mpsc::channel(1);
        let channel = HealthChannel { writer, acks, closer };
        tokio::spawn(run_health_loop(replica, service, self.config.health.clone(), channel));

        Ok(tx)
    }

    /// Finds the service for `(protocol, port)`, restarting it if its
    /// listener was closed, or creates it with an eagerly bound data
    /// listener.
    ///
    /// Serialized on the registry lock so two concurrent
    /// registrations cannot create the same service twice.
    async fn find_or_create(&self, protocol: Protocol, port: u16) -> Result<Arc<Service>> {
        let mut registry = self.registry.lock().await;

        if let Some(service) = registry.get(&(port, protocol)) {
            if service.is_live() {
                info!(%protocol, port, "existing service, adding a new replica");
            } else {
                info!(%protocol, port, "existing service had its listener terminated, restarting");
                let listener = Listener::open(self.config.listen_addr, port, protocol).await?;
                service.restart(listener);
            }
            return Ok(service.clone());
        }

        info!(%protocol, port, "new service");
        let listener = Listener::open(self.config.listen_addr, port, protocol).await?;
        let service = Service::new(self.config.listen_addr, port, protocol, listener);
        registry.insert((port, protocol), service.clone());
        Ok(service)
    }
}

/// Writes one acknowledgment frame, logging instead of failing.
async fn send_ack(writer: &SharedWriter, ack: &Ack, peer: SocketAddr) {
    let payload = proto::encode(ack);
    if let Err(e) = writer.lock().await.write_all(&payload).await {
        warn!(peer = %peer, error = %e, "unable to write acknowledgment");
    }
}
