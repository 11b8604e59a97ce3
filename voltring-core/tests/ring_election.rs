//! End-to-end ring election scenarios over loopback TCP.
//!
//! Each test wires full plant runtimes (registry, processor, election
//! manager, peer client and RPC server) without broker or administration
//! collaborators. Degenerate price ranges pin the generated bids so winners
//! are deterministic.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use voltring_core::config::PlantConfig;
use voltring_core::election::ElectionManager;
use voltring_core::processor::RequestProcessor;
use voltring_core::registry::PlantRegistry;
use voltring_core::rpc::client::PeerClient;
use voltring_core::rpc::server::RpcServer;
use voltring_core::rpc::wire::{ElectionToken, WinnerAnnouncement};
use voltring_core::types::{Bid, EnergyRequest, PlantInfo};

struct TestPlant {
    info: PlantInfo,
    registry: Arc<PlantRegistry>,
    processor: Arc<RequestProcessor>,
    election: Arc<ElectionManager>,
    peers: Arc<PeerClient>,
    _shutdown: CancellationToken,
}

/// Bring up one plant with a pinned bid price on an ephemeral port.
async fn spawn_plant(plant_id: u32, registration_time: u64, price: f64) -> TestPlant {
    let shutdown = CancellationToken::new();
    let server = RpcServer::bind(0).await.expect("bind ephemeral port");
    let port = server.local_addr().unwrap().port();

    let info = PlantInfo::new(plant_id, "127.0.0.1", port, registration_time);
    let config = PlantConfig::default()
        .with_identity(plant_id, port)
        .with_price_range(price, price);
    let registry = Arc::new(PlantRegistry::new(info.clone()));
    let (processor, mut dequeue_rx) = RequestProcessor::new(plant_id, 1, shutdown.clone());
    let processor = Arc::new(processor);
    let peers = Arc::new(PeerClient::new(registry.clone(), Duration::from_secs(5)));
    let election = Arc::new(ElectionManager::new(
        registry.clone(),
        processor.clone(),
        peers.clone(),
        &config,
    ));
    server.start(election.clone(), registry.clone(), shutdown.child_token());

    let dequeue_election = election.clone();
    tokio::spawn(async move {
        while let Some(request) = dequeue_rx.recv().await {
            dequeue_election.start_dequeued_election(request).await;
        }
    });

    TestPlant {
        info,
        registry,
        processor,
        election,
        peers,
        _shutdown: shutdown,
    }
}

/// Give every plant the others' membership, as the administration service
/// would have.
fn link(plants: &[&TestPlant]) {
    for a in plants {
        for b in plants {
            if a.info.plant_id != b.info.plant_id {
                a.registry.add(b.info.clone());
            }
        }
    }
}

fn request(id: &str, kwh: u32) -> EnergyRequest {
    EnergyRequest::new(id, kwh, 0)
}

async fn eventually(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}

#[tokio::test]
async fn idle_plant_wins_while_busy_plant_queues() {
    let a = spawn_plant(1, 1, 0.5).await;
    let b = spawn_plant(2, 2, 0.5).await;
    link(&[&a, &b]);

    // B is mid-production for an earlier request and queues the new one.
    b.processor.fulfill(request("r0", 600_000), 0.4);
    b.processor.handle_incoming(request("r1", 60_000));
    b.election.register_passive(&request("r1", 60_000));
    assert_eq!(b.processor.queue_len(), 1);

    // A receives the broadcast while idle and runs the election.
    a.election.start_active_election(request("r1", 60_000)).await;

    eventually("plant 1 to win r1", || {
        a.processor.current_request_id() == Some("r1".to_string())
    })
    .await;
    eventually("plant 2 to drop its queued copy", || {
        b.processor.queue_len() == 0
    })
    .await;
    eventually("plant 2 to latch the winner", || {
        b.election.is_winner_announced("r1")
    })
    .await;
    assert_eq!(b.processor.current_request_id(), Some("r0".to_string()));
}

#[tokio::test]
async fn equal_prices_go_to_the_higher_plant_id() {
    let a = spawn_plant(1, 1, 0.5).await;
    let b = spawn_plant(2, 2, 0.5).await;
    link(&[&a, &b]);

    // Both plants receive the broadcast.
    a.election.start_active_election(request("r2", 60_000)).await;
    b.election.start_active_election(request("r2", 60_000)).await;

    eventually("plant 2 to win the tie-break", || {
        b.processor.current_request_id() == Some("r2".to_string())
    })
    .await;
    eventually("both plants to latch the winner", || {
        a.election.is_winner_announced("r2") && b.election.is_winner_announced("r2")
    })
    .await;
    assert!(!a.processor.is_busy());
}

#[tokio::test]
async fn late_joiner_with_stronger_bid_takes_the_election() {
    let a = spawn_plant(1, 1, 0.8).await;
    let b = spawn_plant(2, 2, 0.9).await;
    let c = spawn_plant(3, 3, 0.2).await;
    link(&[&a, &b, &c]);

    // Only A sees the broadcast; B and C join through the circulating token.
    a.election.start_active_election(request("r3", 60_000)).await;

    eventually("plant 3 to win with the lowest price", || {
        c.processor.current_request_id() == Some("r3".to_string())
    })
    .await;
    eventually("every plant to latch the winner", || {
        a.election.is_winner_announced("r3")
            && b.election.is_winner_announced("r3")
            && c.election.is_winner_announced("r3")
    })
    .await;
    assert!(!a.processor.is_busy());
    assert!(!b.processor.is_busy());
}

#[tokio::test]
async fn completed_production_triggers_election_for_queued_request() {
    let a = spawn_plant(1, 1, 0.5).await;

    // Busy with r4; r5 arrives and waits in the queue.
    a.processor.fulfill(request("r4", 50), 0.5);
    a.processor.handle_incoming(request("r5", 60_000));
    a.election.register_passive(&request("r5", 60_000));

    eventually("plant 1 to finish r4 and win r5 alone", || {
        a.processor.current_request_id() == Some("r5".to_string())
    })
    .await;
    assert_eq!(a.processor.queue_len(), 0);
    assert!(a.election.is_winner_announced("r5"));
}

#[tokio::test]
async fn winner_announce_failure_evicts_peer_but_token_failure_does_not() {
    let a = spawn_plant(1, 1, 0.5).await;
    // A port nobody listens on: the peer is unreachable.
    let ghost = PlantInfo::new(9, "127.0.0.1", 1, 99);
    a.registry.add(ghost.clone());

    a.peers
        .forward_token(
            &ghost,
            ElectionToken {
                initiator_id: 1,
                request_id: "r6".to_string(),
                best_bid: Bid::new(1, 0.5),
                energy_amount_kwh: 1000,
            },
        )
        .await;
    assert_eq!(
        a.registry.others_count(),
        1,
        "token-forward failure must keep the peer"
    );

    a.peers
        .announce_winner(
            &ghost,
            WinnerAnnouncement {
                request_id: "r6".to_string(),
                winning_plant_id: 1,
                winning_price: 0.5,
                initiator_id: 1,
            },
        )
        .await;
    assert_eq!(
        a.registry.others_count(),
        0,
        "winner-announce failure must evict the peer"
    );
}

#[tokio::test]
async fn plant_left_alone_by_evictions_completes_locally() {
    let a = spawn_plant(1, 1, 0.5).await;
    let ghost = PlantInfo::new(9, "127.0.0.1", 1, 99);
    a.registry.add(ghost.clone());

    // Startup presence announcement prunes the unreachable peer...
    a.peers.announce_presence(&ghost).await;
    assert_eq!(a.registry.others_count(), 0);

    // ...so the next election is a single-node ring and fulfills itself.
    a.election.start_active_election(request("r7", 60_000)).await;
    eventually("lone plant to fulfill its own request", || {
        a.processor.current_request_id() == Some("r7".to_string())
    })
    .await;
}
