//! Busy/idle request processing and the pending-request queue.
//!
//! The processor owns the plant's production state machine: `Idle -> Busy`
//! only through [`RequestProcessor::fulfill`], `Busy -> Idle` only when the
//! production task completes. Requests arriving while busy are queued; on
//! completion the queue head is handed back to the election manager through
//! the dequeue channel.

use crate::types::{EnergyRequest, PlantId};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Outcome of handing a freshly received request to the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeDecision {
    /// The plant was idle; the caller should start an election right away.
    StartElection,
    /// The plant was busy; the request was queued for later.
    Queued,
}

#[derive(Default)]
struct BusyState {
    busy: bool,
    current_request_id: Option<String>,
}

pub struct RequestProcessor {
    plant_id: PlantId,
    ms_per_kwh: u64,
    state: Arc<Mutex<BusyState>>,
    pending: Arc<Mutex<VecDeque<EnergyRequest>>>,
    dequeue_tx: mpsc::UnboundedSender<EnergyRequest>,
    shutdown: CancellationToken,
}

impl RequestProcessor {
    /// Create a processor. The returned receiver yields requests dequeued
    /// after a production run completes; the caller is expected to start an
    /// election for each.
    pub fn new(
        plant_id: PlantId,
        ms_per_kwh: u64,
        shutdown: CancellationToken,
    ) -> (Self, mpsc::UnboundedReceiver<EnergyRequest>) {
        let (dequeue_tx, dequeue_rx) = mpsc::unbounded_channel();
        let processor = Self {
            plant_id,
            ms_per_kwh,
            state: Arc::new(Mutex::new(BusyState::default())),
            pending: Arc::new(Mutex::new(VecDeque::new())),
            dequeue_tx,
            shutdown,
        };
        (processor, dequeue_rx)
    }

    /// Route an incoming request: queue it when busy, otherwise tell the
    /// caller to start an election. The busy check and the enqueue happen
    /// under the state lock so a concurrent completion cannot strand the
    /// request in the queue.
    pub fn handle_incoming(&self, request: EnergyRequest) -> IntakeDecision {
        let state = self.state.lock();
        if !state.busy {
            return IntakeDecision::StartElection;
        }
        let mut pending = self.pending.lock();
        if pending.iter().any(|r| r.request_id == request.request_id) {
            return IntakeDecision::Queued;
        }
        info!(
            "plant {} is busy, queued request {} (queue size {})",
            self.plant_id,
            request.request_id,
            pending.len() + 1
        );
        pending.push_back(request);
        IntakeDecision::Queued
    }

    /// Remove a queued request by id, e.g. because another plant won its
    /// election. No-op when absent.
    pub fn remove_by_id(&self, request_id: &str) -> bool {
        if request_id.is_empty() {
            return false;
        }
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|r| r.request_id != request_id);
        let removed = pending.len() != before;
        if removed {
            info!(
                "plant {} dropped queued request {}: handled by another plant",
                self.plant_id, request_id
            );
        }
        removed
    }

    /// Transition idle -> busy and simulate production for
    /// `amount_kwh * ms_per_kwh` milliseconds on a background task. A second
    /// fulfillment while busy is logged and dropped. On completion the plant
    /// goes idle and the queue head, if any, is pushed into the dequeue
    /// channel; an interrupt during production still runs that path.
    pub fn fulfill(&self, request: EnergyRequest, price: f64) {
        {
            let mut state = self.state.lock();
            if state.busy {
                warn!(
                    "plant {} cannot fulfill request {}: already busy with {:?}",
                    self.plant_id, request.request_id, state.current_request_id
                );
                return;
            }
            state.busy = true;
            state.current_request_id = Some(request.request_id.clone());
        }
        // A queued copy of this request is stale now.
        self.remove_by_id(&request.request_id);

        info!(
            "plant {} won request {} at ${:.2}, producing {} kWh",
            self.plant_id, request.request_id, price, request.amount_kwh
        );
        let duration = Duration::from_millis(u64::from(request.amount_kwh) * self.ms_per_kwh);

        let plant_id = self.plant_id;
        let state = self.state.clone();
        let pending = self.pending.clone();
        let dequeue_tx = self.dequeue_tx.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(duration) => {}
                _ = shutdown.cancelled() => {
                    warn!(
                        "plant {plant_id} production for request {} interrupted",
                        request.request_id
                    );
                }
            }
            info!(
                "plant {plant_id} finished producing for request {}",
                request.request_id
            );
            {
                let mut state = state.lock();
                state.busy = false;
                state.current_request_id = None;
            }
            let next = pending.lock().pop_front();
            if let Some(next) = next {
                info!(
                    "plant {plant_id} dequeued request {} for a fresh election",
                    next.request_id
                );
                let _ = dequeue_tx.send(next);
            }
        });
    }

    pub fn is_busy(&self) -> bool {
        self.state.lock().busy
    }

    pub fn current_request_id(&self) -> Option<String> {
        self.state.lock().current_request_id.clone()
    }

    pub fn queue_len(&self) -> usize {
        self.pending.lock().len()
    }
}
