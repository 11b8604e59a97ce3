//! Client side of the peer RPC surface.
//!
//! One long-lived connection per peer, keyed by plant id and created lazily.
//! Every call carries a deadline. Failure handling differs per method:
//! presence announcements and winner announcements evict the unreachable peer
//! from the registry, while a failed token forward only logs — membership
//! updates and the next election recover from a lost token.

use crate::error::PlantError;
use crate::registry::PlantRegistry;
use crate::rpc::wire::{Ack, ElectionToken, PeerMessage, WinnerAnnouncement};
use crate::types::{PlantId, PlantInfo};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, error, info, warn};

type PeerConnection = Arc<Mutex<Framed<TcpStream, LinesCodec>>>;

pub struct PeerClient {
    registry: Arc<PlantRegistry>,
    rpc_timeout: Duration,
    connections: Mutex<HashMap<PlantId, PeerConnection>>,
}

impl PeerClient {
    pub fn new(registry: Arc<PlantRegistry>, rpc_timeout: Duration) -> Self {
        Self {
            registry,
            rpc_timeout,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Announce this plant to `target`. An unreachable target is presumed
    /// gone and removed from the registry.
    pub async fn announce_presence(&self, target: &PlantInfo) {
        let self_info = self.registry.self_info().clone();
        info!(
            "announcing presence of plant {} to plant {}",
            self_info.plant_id, target.plant_id
        );
        if let Err(e) = self.call(target, &PeerMessage::AnnouncePresence(self_info)).await {
            warn!(
                "presence announcement to plant {} failed: {e}; evicting peer",
                target.plant_id
            );
            self.registry.remove(target.plant_id);
        }
    }

    /// Forward an election token to `target`. The peer is kept in the
    /// registry on failure.
    pub async fn forward_token(&self, target: &PlantInfo, token: ElectionToken) {
        let best = if token.best_bid.is_placeholder() {
            "none".to_string()
        } else {
            format!(
                "plant {} @ ${:.2}",
                token.best_bid.plant_id, token.best_bid.price
            )
        };
        info!(
            "forwarding token for request {} to plant {} (best bid: {best})",
            token.request_id, target.plant_id
        );
        if let Err(e) = self.call(target, &PeerMessage::ElectionToken(token)).await {
            error!("token forward to plant {} failed: {e}", target.plant_id);
        }
    }

    /// Pass a winner announcement along the ring. An unreachable target is
    /// removed from the registry; the announcement still makes progress
    /// through the remaining members.
    pub async fn announce_winner(&self, target: &PlantInfo, announcement: WinnerAnnouncement) {
        debug!(
            "announcing winner of request {} to plant {}",
            announcement.request_id, target.plant_id
        );
        if let Err(e) = self
            .call(target, &PeerMessage::WinnerAnnouncement(announcement))
            .await
        {
            warn!(
                "winner announcement to plant {} failed: {e}; evicting peer",
                target.plant_id
            );
            self.registry.remove(target.plant_id);
        }
    }

    /// Drop all cached connections.
    pub async fn shutdown(&self) {
        let mut connections = self.connections.lock().await;
        let count = connections.len();
        connections.clear();
        info!("closed {count} peer connections");
    }

    async fn call(&self, target: &PlantInfo, message: &PeerMessage) -> Result<Ack, PlantError> {
        let outcome = tokio::time::timeout(self.rpc_timeout, self.call_inner(target, message)).await;
        match outcome {
            Ok(Ok(ack)) => {
                if !ack.success {
                    warn!(
                        "plant {} rejected our request: {}",
                        target.plant_id, ack.message
                    );
                }
                Ok(ack)
            }
            Ok(Err(e)) => {
                self.drop_connection(target.plant_id).await;
                Err(e)
            }
            Err(_) => {
                self.drop_connection(target.plant_id).await;
                Err(PlantError::PeerUnreachable(
                    target.plant_id,
                    format!("deadline of {:?} exceeded", self.rpc_timeout),
                ))
            }
        }
    }

    async fn call_inner(
        &self,
        target: &PlantInfo,
        message: &PeerMessage,
    ) -> Result<Ack, PlantError> {
        let connection = self.connection_for(target).await?;
        let mut framed = connection.lock().await;
        framed
            .send(message.to_line()?)
            .await
            .map_err(|e| PlantError::PeerUnreachable(target.plant_id, e.to_string()))?;
        match framed.next().await {
            Some(Ok(line)) => Ok(Ack::from_line(&line)?),
            Some(Err(e)) => Err(PlantError::PeerUnreachable(target.plant_id, e.to_string())),
            None => Err(PlantError::PeerUnreachable(
                target.plant_id,
                "connection closed before ack".to_string(),
            )),
        }
    }

    async fn connection_for(&self, target: &PlantInfo) -> Result<PeerConnection, PlantError> {
        if let Some(connection) = self.connections.lock().await.get(&target.plant_id) {
            return Ok(connection.clone());
        }
        info!(
            "opening peer connection to plant {} at {}:{}",
            target.plant_id, target.address, target.port
        );
        let stream = TcpStream::connect((target.address.as_str(), target.port))
            .await
            .map_err(|e| PlantError::PeerUnreachable(target.plant_id, e.to_string()))?;
        let connection: PeerConnection = Arc::new(Mutex::new(Framed::new(stream, LinesCodec::new())));
        Ok(self
            .connections
            .lock()
            .await
            .entry(target.plant_id)
            .or_insert(connection)
            .clone())
    }

    async fn drop_connection(&self, plant_id: PlantId) {
        self.connections.lock().await.remove(&plant_id);
    }
}
