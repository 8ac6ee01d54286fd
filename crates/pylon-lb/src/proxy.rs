//! Data-plane byte splicing.

use std::net::SocketAddr;

use pylon_core::Result;
use tokio::net::TcpStream;
use tracing::debug;

/// Opens a fresh connection to `target` and splices bytes in both
/// directions until either side reaches end-of-stream or errors.
///
/// No framing or parsing is imposed on the payload. End-of-stream on
/// one side shuts down the write half of the other, so the forwarder
/// always terminates.
///
/// # Errors
///
/// Returns an error if the target is unreachable or the splice fails.
pub async fn forward(mut client: TcpStream, target: SocketAddr) -> Result<(u64, u64)> {
    let mut upstream = TcpStream::connect(target).await?;
    let (to_upstream, to_client) = tokio::io::copy_bidirectional(&mut client, &mut upstream).await?;
    debug!(%target, to_upstream, to_client, "proxy finished");
    Ok((to_upstream, to_client))
}
