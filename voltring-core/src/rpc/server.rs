//! Server side of the peer RPC surface.
//!
//! Accepts line-framed JSON requests. Presence announcements mutate the
//! registry before the ack; election tokens and winner announcements are
//! acknowledged first and handed to the election manager on a separate task,
//! so ring forwarding never blocks the serving connection.

use crate::election::ElectionManager;
use crate::error::PlantError;
use crate::registry::PlantRegistry;
use crate::rpc::wire::{Ack, PeerMessage};
use futures_util::{SinkExt, StreamExt};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct RpcServer {
    listener: TcpListener,
}

impl RpcServer {
    /// Bind the peer RPC listener. An occupied port is reported as the
    /// distinct [`PlantError::PortInUse`] so the operator can pick another.
    pub async fn bind(port: u16) -> Result<Self, PlantError> {
        match TcpListener::bind(("0.0.0.0", port)).await {
            Ok(listener) => Ok(Self { listener }),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => Err(PlantError::PortInUse(port)),
            Err(e) => Err(e.into()),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the accept loop until shutdown.
    pub fn start(
        self,
        election: Arc<ElectionManager>,
        registry: Arc<PlantRegistry>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "peer RPC server for plant {} listening on port {}",
                registry.self_id(),
                self.listener
                    .local_addr()
                    .map(|a| a.port())
                    .unwrap_or_default()
            );
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    accepted = self.listener.accept() => match accepted {
                        Ok((stream, peer_addr)) => {
                            let election = election.clone();
                            let registry = registry.clone();
                            let shutdown = shutdown.clone();
                            tokio::spawn(async move {
                                serve_connection(stream, peer_addr, election, registry, shutdown)
                                    .await;
                            });
                        }
                        Err(e) => warn!("peer RPC accept failed: {e}"),
                    }
                }
            }
            debug!("peer RPC server stopped");
        })
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    election: Arc<ElectionManager>,
    registry: Arc<PlantRegistry>,
    shutdown: CancellationToken,
) {
    let mut lines = Framed::new(stream, LinesCodec::new());
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next() => {
                let Some(line) = line else { break };
                let ack = match line {
                    Ok(line) => dispatch(&line, &election, &registry),
                    Err(e) => {
                        warn!("unreadable frame from {peer_addr}: {e}");
                        break;
                    }
                };
                let Ok(ack_line) = ack.to_line() else { break };
                if let Err(e) = lines.send(ack_line).await {
                    warn!("failed to ack {peer_addr}: {e}");
                    break;
                }
            }
        }
    }
    debug!("peer connection from {peer_addr} closed");
}

/// Handle one request line. The handler must never propagate a failure to
/// the caller as anything but `Ack{success: false}`.
fn dispatch(line: &str, election: &Arc<ElectionManager>, registry: &Arc<PlantRegistry>) -> Ack {
    match PeerMessage::from_line(line) {
        Ok(PeerMessage::AnnouncePresence(plant)) => {
            info!("received presence announcement from plant {}", plant.plant_id);
            registry.add(plant);
            Ack::ok(format!(
                "presence acknowledged by plant {}",
                registry.self_id()
            ))
        }
        Ok(PeerMessage::ElectionToken(token)) => {
            info!(
                "received election token for request {} from initiator {}",
                token.request_id, token.initiator_id
            );
            let election = election.clone();
            tokio::spawn(async move {
                election.handle_token(token).await;
            });
            Ack::ok("token accepted")
        }
        Ok(PeerMessage::WinnerAnnouncement(announcement)) => {
            info!(
                "received winner announcement for request {}: plant {} at ${:.2}",
                announcement.request_id,
                announcement.winning_plant_id,
                announcement.winning_price
            );
            let election = election.clone();
            tokio::spawn(async move {
                election.handle_winner_announcement(announcement).await;
            });
            Ack::ok("announcement accepted")
        }
        Err(e) => {
            warn!("malformed peer message: {e}");
            Ack::failure(format!("malformed peer message: {e}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn binding_an_occupied_port_reports_port_in_use() {
        let first = RpcServer::bind(0).await.unwrap();
        let port = first.local_addr().unwrap().port();
        match RpcServer::bind(port).await {
            Err(PlantError::PortInUse(reported)) => assert_eq!(reported, port),
            Err(e) => panic!("expected PortInUse, got {e}"),
            Ok(_) => panic!("expected PortInUse, bind succeeded"),
        }
    }
}
