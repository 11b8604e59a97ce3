//! Per-request election coordination.
//!
//! The manager keeps one [`ElectionState`] per request id, applies the ring
//! algorithm to incoming tokens, completes elections whose token returned to
//! us, and circulates winner announcements. Completed states linger for a
//! fixed delay to absorb in-flight duplicates before a background task
//! removes them.

use crate::config::PlantConfig;
use crate::processor::RequestProcessor;
use crate::registry::PlantRegistry;
use crate::ring::{self, TokenAction};
use crate::rpc::client::PeerClient;
use crate::rpc::wire::{ElectionToken, WinnerAnnouncement};
use crate::types::{unix_timestamp_ms, Bid, EnergyRequest, PlantId};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// State of one ongoing election, shared between the intake path, the RPC
/// handlers and the completion path. All field transitions go through the
/// inner mutex; `winner_announced` is a one-way latch.
pub struct ElectionState {
    request: EnergyRequest,
    inner: Mutex<StateInner>,
}

struct StateInner {
    /// Our generated price; `None` while we are only passively aware of the
    /// request (e.g. it arrived while we were busy).
    my_bid: Option<f64>,
    best_bid_seen: Bid,
    participant: bool,
    winner_announced: bool,
}

impl ElectionState {
    fn new(request: EnergyRequest, my_bid: Option<f64>) -> Self {
        Self {
            request,
            inner: Mutex::new(StateInner {
                my_bid,
                best_bid_seen: Bid::NONE,
                participant: false,
                winner_announced: false,
            }),
        }
    }

    pub fn request(&self) -> &EnergyRequest {
        &self.request
    }

    pub fn my_bid(&self) -> Option<f64> {
        self.inner.lock().my_bid
    }

    fn set_my_bid(&self, price: f64) {
        self.inner.lock().my_bid = Some(price);
    }

    fn ensure_my_bid(&self, generate: impl FnOnce() -> f64) -> f64 {
        *self.inner.lock().my_bid.get_or_insert_with(generate)
    }

    /// Transition to participant; returns false when we already were one.
    fn become_participant(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.participant {
            return false;
        }
        inner.participant = true;
        true
    }

    pub fn is_participant(&self) -> bool {
        self.inner.lock().participant
    }

    pub fn winner_announced(&self) -> bool {
        self.inner.lock().winner_announced
    }

    /// One-way latch; true exactly once across the process lifetime.
    fn try_set_winner_announced(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.winner_announced {
            return false;
        }
        inner.winner_announced = true;
        true
    }

    /// Adopt `candidate` when it beats the best bid seen so far.
    fn update_best_bid(&self, candidate: Bid) -> bool {
        let mut inner = self.inner.lock();
        if candidate.beats(&inner.best_bid_seen) {
            inner.best_bid_seen = candidate;
            return true;
        }
        false
    }

    pub fn best_bid(&self) -> Bid {
        self.inner.lock().best_bid_seen
    }

    /// Atomically resolve an incoming token against this state. Returns
    /// `None` when a winner is already known and the token is obsolete.
    fn resolve_token(
        &self,
        self_id: PlantId,
        token_best: Bid,
        generate: impl FnOnce() -> f64,
    ) -> Option<TokenAction> {
        let mut inner = self.inner.lock();
        if inner.winner_announced {
            return None;
        }
        let price = *inner.my_bid.get_or_insert_with(generate);
        let my_bid = Bid::new(self_id, price);
        let action = ring::decide(inner.participant, my_bid, token_best);
        match action {
            TokenAction::ForwardUnchanged => {
                inner.participant = true;
                if token_best.beats(&inner.best_bid_seen) {
                    inner.best_bid_seen = token_best;
                }
            }
            TokenAction::InitiateOwn => {
                inner.participant = true;
            }
            TokenAction::Discard => {}
        }
        Some(action)
    }
}

pub struct ElectionManager {
    registry: Arc<PlantRegistry>,
    processor: Arc<RequestProcessor>,
    peers: Arc<PeerClient>,
    states: Arc<Mutex<HashMap<String, Arc<ElectionState>>>>,
    price_min: f64,
    price_max: f64,
    cleanup_delay: Duration,
}

impl ElectionManager {
    pub fn new(
        registry: Arc<PlantRegistry>,
        processor: Arc<RequestProcessor>,
        peers: Arc<PeerClient>,
        config: &PlantConfig,
    ) -> Self {
        Self {
            registry,
            processor,
            peers,
            states: Arc::new(Mutex::new(HashMap::new())),
            price_min: config.price_min,
            price_max: config.price_max,
            cleanup_delay: config.election_cleanup_delay,
        }
    }

    /// Uniform price in the configured bounds, rounded to cents.
    pub fn generate_price(&self) -> f64 {
        let price = rand::thread_rng().gen_range(self.price_min..=self.price_max);
        (price * 100.0).round() / 100.0
    }

    /// Start an election for a request that arrived while we were idle.
    pub async fn start_active_election(&self, request: EnergyRequest) {
        let self_id = self.registry.self_id();
        let state = self.get_or_create(&request, None);
        if state.winner_announced() {
            debug!(
                "not initiating election for request {}: winner already known",
                request.request_id
            );
            return;
        }
        let price = state.ensure_my_bid(|| self.generate_price());
        if !state.become_participant() {
            debug!(
                "plant {self_id} already participates in the election for request {}",
                request.request_id
            );
            return;
        }
        info!(
            "plant {self_id} generated price ${price:.2} for request {} and is initiating an election",
            request.request_id
        );
        self.initiate(&state).await;
    }

    /// Record a request that arrived while we were busy. No bid is placed;
    /// tokens for the request may still pass through us unchanged.
    pub fn register_passive(&self, request: &EnergyRequest) {
        self.get_or_create(request, None);
    }

    /// Start an election for a request dequeued after a production run. The
    /// price is regenerated: market conditions may have moved while the
    /// request waited.
    pub async fn start_dequeued_election(&self, request: EnergyRequest) {
        let self_id = self.registry.self_id();
        if let Some(state) = self.get(&request.request_id) {
            if state.winner_announced() {
                info!(
                    "not starting election for dequeued request {}: winner already decided",
                    request.request_id
                );
                return;
            }
        }
        let price = self.generate_price();
        let state = self.get_or_create(&request, Some(price));
        state.set_my_bid(price);
        if !state.become_participant() {
            debug!(
                "plant {self_id} already participates in the election for dequeued request {}",
                request.request_id
            );
            return;
        }
        info!(
            "plant {self_id} (now free) generated price ${price:.2} for dequeued request {} and is initiating an election",
            request.request_id
        );
        self.initiate(&state).await;
    }

    /// Handle an incoming election token according to the ring algorithm.
    pub async fn handle_token(&self, token: ElectionToken) {
        let self_id = self.registry.self_id();

        // The token returned to its initiator: circulation is complete.
        if token.initiator_id == self_id {
            match self.get(&token.request_id) {
                Some(state) => self.complete(&state, &token).await,
                None => warn!(
                    "own token for request {} returned but its state is gone",
                    token.request_id
                ),
            }
            return;
        }

        // A busy plant never bids; the token passes through unchanged.
        if self.processor.is_busy() {
            info!(
                "plant {self_id} is busy, forwarding token for request {} without bidding",
                token.request_id
            );
            self.forward_unchanged(token).await;
            return;
        }

        let state = self.get_or_create_from_token(&token);
        match state.resolve_token(self_id, token.best_bid, || self.generate_price()) {
            None => debug!(
                "dropping token for request {}: winner already announced",
                token.request_id
            ),
            Some(TokenAction::Discard) => info!(
                "plant {self_id} holds the stronger bid, discarding token from initiator {}",
                token.initiator_id
            ),
            Some(TokenAction::ForwardUnchanged) => {
                info!(
                    "plant {self_id} is outbid for request {}, forwarding token from initiator {}",
                    token.request_id, token.initiator_id
                );
                self.forward_unchanged(token).await;
            }
            Some(TokenAction::InitiateOwn) => {
                info!(
                    "plant {self_id} joined late with the stronger bid for request {}, starting its own circulation",
                    token.request_id
                );
                self.initiate(&state).await;
            }
        }
    }

    /// Handle a circulating winner announcement.
    pub async fn handle_winner_announcement(&self, announcement: WinnerAnnouncement) {
        let self_id = self.registry.self_id();

        // Back at the plant that started the circulation: stop here.
        if announcement.initiator_id == self_id {
            info!(
                "winner announcement for request {} completed its circulation",
                announcement.request_id
            );
            return;
        }

        match self.get(&announcement.request_id) {
            None => {
                // We never took part, but a queued copy may exist.
                info!(
                    "plant {self_id} acknowledges winner {} for request {}",
                    announcement.winning_plant_id, announcement.request_id
                );
                self.processor.remove_by_id(&announcement.request_id);
            }
            Some(state) => {
                if state.try_set_winner_announced() {
                    info!(
                        "plant {self_id} acknowledges winner {} for request {} at ${:.2}",
                        announcement.winning_plant_id,
                        announcement.request_id,
                        announcement.winning_price
                    );
                    if announcement.winning_plant_id == self_id {
                        self.processor
                            .fulfill(state.request().clone(), announcement.winning_price);
                    } else {
                        self.processor.remove_by_id(&announcement.request_id);
                    }
                    self.schedule_cleanup(&announcement.request_id);
                } else {
                    debug!(
                        "duplicate winner announcement for request {}",
                        announcement.request_id
                    );
                }
            }
        }

        let next = self.registry.next_in_ring(self_id);
        if next.plant_id != self_id {
            self.peers.announce_winner(&next, announcement).await;
        }
    }

    /// Whether a winner has been latched for `request_id` on this plant.
    pub fn is_winner_announced(&self, request_id: &str) -> bool {
        self.get(request_id)
            .map(|state| state.winner_announced())
            .unwrap_or(false)
    }

    /// Send a fresh token carrying our bid to the ring successor, or decide
    /// the election locally when we are alone.
    async fn initiate(&self, state: &Arc<ElectionState>) {
        let self_id = self.registry.self_id();
        let price = state.ensure_my_bid(|| self.generate_price());
        state.update_best_bid(Bid::new(self_id, price));
        let token = ElectionToken {
            initiator_id: self_id,
            request_id: state.request().request_id.clone(),
            best_bid: state.best_bid(),
            energy_amount_kwh: state.request().amount_kwh,
        };
        let next = self.registry.next_in_ring(self_id);
        if next.plant_id == self_id {
            self.complete(state, &token).await;
            return;
        }
        self.peers.forward_token(&next, token).await;
    }

    async fn forward_unchanged(&self, token: ElectionToken) {
        let next = self.registry.next_in_ring(self.registry.self_id());
        self.peers.forward_token(&next, token).await;
    }

    /// Conclude an election whose token returned to us: latch the winner,
    /// fulfill if it is us, then start the announcement around the ring.
    async fn complete(&self, state: &Arc<ElectionState>, token: &ElectionToken) {
        state.update_best_bid(token.best_bid);
        if !state.try_set_winner_announced() {
            debug!(
                "election for request {} already concluded",
                token.request_id
            );
            return;
        }
        let self_id = self.registry.self_id();
        let winner = state.best_bid();
        info!(
            "election for request {} concluded: winner is plant {} at ${:.2}",
            token.request_id, winner.plant_id, winner.price
        );
        if winner.plant_id == self_id {
            info!(
                "plant {self_id} won its own election for request {}",
                token.request_id
            );
            self.processor
                .fulfill(state.request().clone(), winner.price);
        }
        let announcement = WinnerAnnouncement {
            request_id: token.request_id.clone(),
            winning_plant_id: winner.plant_id,
            winning_price: winner.price,
            initiator_id: self_id,
        };
        let next = self.registry.next_in_ring(self_id);
        if next.plant_id != self_id {
            self.peers.announce_winner(&next, announcement).await;
        }
        self.schedule_cleanup(&token.request_id);
    }

    fn get(&self, request_id: &str) -> Option<Arc<ElectionState>> {
        self.states.lock().get(request_id).cloned()
    }

    fn get_or_create(&self, request: &EnergyRequest, my_bid: Option<f64>) -> Arc<ElectionState> {
        self.states
            .lock()
            .entry(request.request_id.clone())
            .or_insert_with(|| {
                debug!(
                    "creating election state for request {}",
                    request.request_id
                );
                Arc::new(ElectionState::new(request.clone(), my_bid))
            })
            .clone()
    }

    /// Create state for a request we only know through a token, rebuilding
    /// the request from the token's fields.
    fn get_or_create_from_token(&self, token: &ElectionToken) -> Arc<ElectionState> {
        self.states
            .lock()
            .entry(token.request_id.clone())
            .or_insert_with(|| {
                debug!(
                    "creating election state for request {} from token",
                    token.request_id
                );
                let request = EnergyRequest::new(
                    token.request_id.clone(),
                    token.energy_amount_kwh,
                    unix_timestamp_ms(),
                );
                Arc::new(ElectionState::new(request, None))
            })
            .clone()
    }

    /// Remove the state for a concluded election after a fixed delay that
    /// absorbs in-flight duplicates.
    fn schedule_cleanup(&self, request_id: &str) {
        let states = self.states.clone();
        let request_id = request_id.to_string();
        let delay = self.cleanup_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if states.lock().remove(&request_id).is_some() {
                debug!("cleaned up election state for request {request_id}");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PlantInfo;
    use tokio_util::sync::CancellationToken;

    fn manager(plant_id: PlantId, price: f64) -> (Arc<ElectionManager>, Arc<RequestProcessor>) {
        let config = PlantConfig::default()
            .with_identity(plant_id, 7100 + plant_id as u16)
            .with_price_range(price, price);
        let self_info = PlantInfo::new(plant_id, "localhost", config.port, 10);
        let registry = Arc::new(PlantRegistry::new(self_info));
        let (processor, _dequeue_rx) =
            RequestProcessor::new(plant_id, 1, CancellationToken::new());
        let processor = Arc::new(processor);
        let peers = Arc::new(PeerClient::new(registry.clone(), config.rpc_timeout));
        let manager = Arc::new(ElectionManager::new(
            registry,
            processor.clone(),
            peers,
            &config,
        ));
        (manager, processor)
    }

    fn request(id: &str, kwh: u32) -> EnergyRequest {
        EnergyRequest::new(id, kwh, 0)
    }

    #[tokio::test]
    async fn single_plant_wins_its_own_election() {
        let (manager, processor) = manager(1, 0.5);
        manager.start_active_election(request("er-1", 60_000)).await;

        assert!(processor.is_busy());
        assert_eq!(processor.current_request_id(), Some("er-1".to_string()));
        assert!(manager.is_winner_announced("er-1"));
    }

    #[tokio::test]
    async fn duplicate_request_delivery_is_idempotent() {
        let (manager, processor) = manager(1, 0.5);
        manager.start_active_election(request("er-1", 60_000)).await;
        manager.start_active_election(request("er-1", 60_000)).await;

        // Only the first delivery fulfills; the second observes the latch.
        assert_eq!(processor.current_request_id(), Some("er-1".to_string()));
    }

    #[tokio::test]
    async fn winner_announcement_for_us_fulfills_from_state() {
        let (manager, processor) = manager(2, 0.5);
        manager.register_passive(&request("er-3", 40_000));

        let announcement = WinnerAnnouncement {
            request_id: "er-3".to_string(),
            winning_plant_id: 2,
            winning_price: 0.33,
            initiator_id: 9,
        };
        manager.handle_winner_announcement(announcement).await;

        assert!(processor.is_busy());
        assert_eq!(processor.current_request_id(), Some("er-3".to_string()));
    }

    #[tokio::test]
    async fn duplicate_winner_announcement_latches_once() {
        let (manager, processor) = manager(2, 0.5);
        manager.register_passive(&request("er-4", 40_000));

        let announcement = WinnerAnnouncement {
            request_id: "er-4".to_string(),
            winning_plant_id: 5,
            winning_price: 0.21,
            initiator_id: 9,
        };
        manager.handle_winner_announcement(announcement.clone()).await;
        manager.handle_winner_announcement(announcement).await;

        assert!(manager.is_winner_announced("er-4"));
        assert!(!processor.is_busy());
    }

    #[tokio::test]
    async fn own_token_without_state_is_dropped() {
        let (manager, processor) = manager(3, 0.5);
        let token = ElectionToken {
            initiator_id: 3,
            request_id: "er-ghost".to_string(),
            best_bid: Bid::new(3, 0.5),
            energy_amount_kwh: 1000,
        };
        manager.handle_token(token).await;
        assert!(!processor.is_busy());
    }

    #[tokio::test]
    async fn obsolete_token_is_dropped_after_winner_known() {
        let (manager, _processor) = manager(2, 0.5);
        manager.register_passive(&request("er-5", 1000));
        manager
            .handle_winner_announcement(WinnerAnnouncement {
                request_id: "er-5".to_string(),
                winning_plant_id: 7,
                winning_price: 0.11,
                initiator_id: 9,
            })
            .await;

        // A straggler token for the same request must not restart anything.
        let token = ElectionToken {
            initiator_id: 8,
            request_id: "er-5".to_string(),
            best_bid: Bid::new(8, 0.9),
            energy_amount_kwh: 1000,
        };
        manager.handle_token(token).await;
        assert!(manager.is_winner_announced("er-5"));
    }

    #[test]
    fn generated_prices_respect_bounds_and_rounding() {
        let config = PlantConfig::default().with_price_range(0.1, 0.9);
        let self_info = PlantInfo::new(1, "localhost", 7101, 10);
        let registry = Arc::new(PlantRegistry::new(self_info));
        let (processor, _rx) = RequestProcessor::new(1, 1, CancellationToken::new());
        let peers = Arc::new(PeerClient::new(registry.clone(), config.rpc_timeout));
        let manager = ElectionManager::new(registry, Arc::new(processor), peers, &config);

        for _ in 0..200 {
            let price = manager.generate_price();
            assert!((0.1..=0.9).contains(&price));
            assert_eq!((price * 100.0).round() / 100.0, price);
        }
    }
}
