//! Socket ownership and accept loops.

use std::future::Future;
use std::net::{IpAddr, SocketAddr};

use pylon_core::{Error, Result};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::proto::Protocol;

#[derive(Debug)]
enum Socket {
    Tcp(TcpListener),
    Udp(UdpSocket),
}

/// One bound socket producing accepted connections.
///
/// A listener is bound eagerly by [`Listener::open`] and serves until
/// [`Listener::close`] is called; closing is idempotent and unblocks
/// a running accept loop.
#[derive(Debug)]
pub struct Listener {
    socket: Socket,
    local_addr: SocketAddr,
    proto: Protocol,
    shutdown: watch::Sender<bool>,
}

impl Listener {
    /// Binds a new listener immediately. Bind failures are reported,
    /// not retried.
    ///
    /// # Errors
    ///
    /// Returns a bind error when the address is unavailable.
    pub async fn open(addr: IpAddr, port: u16, proto: Protocol) -> Result<Self> {
        let requested = SocketAddr::new(addr, port);
        let (socket, local_addr) = match proto {
            Protocol::Tcp => {
                let listener = TcpListener::bind(requested)
                    .await
                    .map_err(|e| Error::bind(requested.to_string(), e))?;
                let local = listener.local_addr().map_err(Error::Io)?;
                (Socket::Tcp(listener), local)
            }
            Protocol::Udp => {
                let socket = UdpSocket::bind(requested)
                    .await
                    .map_err(|e| Error::bind(requested.to_string(), e))?;
                let local = socket.local_addr().map_err(Error::Io)?;
                (Socket::Udp(socket), local)
            }
        };

        let (shutdown, _) = watch::channel(false);
        Ok(Self { socket, local_addr, proto, shutdown })
    }

    /// The bound address, with the ephemeral port resolved.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The listener's transport protocol.
    #[must_use]
    pub fn proto(&self) -> Protocol {
        self.proto
    }

    /// Dispatches each accepted connection to `handler` in its own
    /// task until the listener is closed.
    ///
    /// Transient accept errors are logged and the loop continues; the
    /// loop exits when [`Listener::close`] is called.
    ///
    /// In UDP mode there is no accept stream: datagrams are drained
    /// and dropped with a warning, since the UDP data path is not
    /// supported.
    pub async fn run<F, Fut>(&self, handler: F)
    where
        F: Fn(TcpStream, SocketAddr) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut shutdown = self.shutdown.subscribe();

        match &self.socket {
            Socket::Tcp(listener) => loop {
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    _ = shutdown.changed() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((conn, peer)) => {
                            tokio::spawn(handler(conn, peer));
                        }
                        Err(e) => {
                            warn!(addr = %self.local_addr, error = %e, "error accepting connection");
                        }
                    }
                }
            },
            Socket::Udp(socket) => {
                let mut scratch = [0u8; 2048];
                loop {
                    if *shutdown.borrow() {
                        break;
                    }
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        received = socket.recv_from(&mut scratch) => match received {
                            Ok((len, peer)) => {
                                warn!(
                                    addr = %self.local_addr,
                                    peer = %peer,
                                    len,
                                    "UDP data path is not supported, dropping datagram"
                                );
                            }
                            Err(e) => {
                                warn!(addr = %self.local_addr, error = %e, "error receiving datagram");
                            }
                        }
                    }
                }
            }
        }

        debug!(addr = %self.local_addr, proto = %self.proto, "listener closed");
    }

    /// Stops the accept loop. Safe to call more than once.
    pub fn close(&self) {
        self.shutdown.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::io::AsyncWriteExt;

    use super::*;

    fn loopback() -> IpAddr {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }

    #[tokio::test]
    async fn test_open_reports_bind_conflict() {
        let first = Listener::open(loopback(), 0, Protocol::Tcp).await.unwrap();
        let taken = first.local_addr().port();

        let err = Listener::open(loopback(), taken, Protocol::Tcp).await.unwrap_err();
        assert!(matches!(err, Error::Bind { .. }));
    }

    #[tokio::test]
    async fn test_accepts_are_dispatched_concurrently() {
        let listener = Arc::new(Listener::open(loopback(), 0, Protocol::Tcp).await.unwrap());
        let addr = listener.local_addr();
        let seen = Arc::new(AtomicUsize::new(0));

        let run_seen = seen.clone();
        let run_listener = listener.clone();
        let accept_loop = tokio::spawn(async move {
            run_listener
                .run(move |_conn, _peer| {
                    let seen = run_seen.clone();
                    async move {
                        seen.fetch_add(1, Ordering::SeqCst);
                    }
                })
                .await;
        });

        for _ in 0..3 {
            let mut conn = TcpStream::connect(addr).await.unwrap();
            conn.shutdown().await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 3);

        listener.close();
        tokio::time::timeout(Duration::from_secs(1), accept_loop).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_unblocks_run() {
        let listener = Arc::new(Listener::open(loopback(), 0, Protocol::Tcp).await.unwrap());

        let run_listener = listener.clone();
        let accept_loop = tokio::spawn(async move {
            run_listener.run(|_conn, _peer| async {}).await;
        });

        listener.close();
        listener.close();
        tokio::time::timeout(Duration::from_secs(1), accept_loop).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_run_after_close_returns_immediately() {
        let listener = Listener::open(loopback(), 0, Protocol::Tcp).await.unwrap();
        listener.close();
        tokio::time::timeout(Duration::from_secs(1), listener.run(|_conn, _peer| async {}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_udp_listener_binds() {
        let listener = Listener::open(loopback(), 0, Protocol::Udp).await.unwrap();
        assert_eq!(listener.proto(), Protocol::Udp);
        assert_ne!(listener.local_addr().port(), 0);
        listener.close();
        listener.run(|_conn, _peer| async {}).await;
    }
}
