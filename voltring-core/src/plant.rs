//! The power-plant facade: wires the subsystems together and manages the
//! process lifecycle.
//!
//! Start order: bind the peer RPC listener, register with the administration
//! service, seed the registry from its answer, start the request intake and
//! the pollution monitor, then announce our presence to every plant the
//! registration returned. Stop order: intake, pollution monitor, peer
//! connections, RPC server.

use crate::admin_client::AdminClient;
use crate::config::PlantConfig;
use crate::election::ElectionManager;
use crate::error::PlantError;
use crate::intake::RequestIntake;
use crate::pollution::PollutionMonitor;
use crate::processor::{IntakeDecision, RequestProcessor};
use crate::registry::PlantRegistry;
use crate::rpc::client::PeerClient;
use crate::rpc::server::RpcServer;
use crate::types::{unix_timestamp_ms, EnergyRequest, PlantInfo};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct PowerPlant {
    config: PlantConfig,
    registry: Arc<PlantRegistry>,
    processor: Arc<RequestProcessor>,
    election: Arc<ElectionManager>,
    peers: Arc<PeerClient>,
    shutdown: CancellationToken,
    dequeue_rx: Option<mpsc::UnboundedReceiver<EnergyRequest>>,
    intake: Option<RequestIntake>,
    pollution: Option<PollutionMonitor>,
}

impl PowerPlant {
    pub fn new(config: PlantConfig) -> Result<Self, PlantError> {
        config.validate()?;
        let shutdown = CancellationToken::new();
        let self_info = PlantInfo::new(
            config.plant_id,
            config.address.clone(),
            config.port,
            unix_timestamp_ms(),
        );
        let registry = Arc::new(PlantRegistry::new(self_info));
        let (processor, dequeue_rx) = RequestProcessor::new(
            config.plant_id,
            config.production_ms_per_kwh,
            shutdown.clone(),
        );
        let processor = Arc::new(processor);
        let peers = Arc::new(PeerClient::new(registry.clone(), config.rpc_timeout));
        let election = Arc::new(ElectionManager::new(
            registry.clone(),
            processor.clone(),
            peers.clone(),
            &config,
        ));
        info!("initialized power plant {}", config.plant_id);
        Ok(Self {
            config,
            registry,
            processor,
            election,
            peers,
            shutdown,
            dequeue_rx: Some(dequeue_rx),
            intake: None,
            pollution: None,
        })
    }

    /// Bring the plant online. Fails with [`PlantError::PortInUse`] or
    /// [`PlantError::RegistrationConflict`] in a way the caller can recover
    /// from by prompting for new values; call [`PowerPlant::stop`] before
    /// retrying.
    pub async fn start(&mut self) -> Result<(), PlantError> {
        let plant_id = self.config.plant_id;
        info!("starting power plant {plant_id}");

        let server = RpcServer::bind(self.config.port).await?;
        server.start(
            self.election.clone(),
            self.registry.clone(),
            self.shutdown.child_token(),
        );

        let admin = AdminClient::new(&self.config.admin_base_url);
        let initial_plants = admin.register(self.registry.self_info()).await?;
        if initial_plants.is_empty() {
            info!("registered with the administration server as the first plant");
        } else {
            self.registry.add_initial(initial_plants);
            info!(
                "registered with the administration server; {} other plants known",
                self.registry.others_count()
            );
        }

        let (intake_tx, intake_rx) = mpsc::unbounded_channel();
        self.intake = Some(RequestIntake::start(
            &self.config,
            intake_tx,
            self.shutdown.child_token(),
        )?);
        self.spawn_intake_worker(intake_rx);
        self.spawn_dequeue_worker();

        self.pollution = Some(PollutionMonitor::start(
            &self.config,
            self.shutdown.child_token(),
        )?);

        for plant in self.registry.snapshot() {
            self.peers.announce_presence(&plant).await;
        }

        info!("power plant {plant_id} is fully started");
        Ok(())
    }

    /// Graceful shutdown; safe to call more than once.
    pub async fn stop(&mut self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        info!("shutting down power plant {}", self.config.plant_id);
        self.shutdown.cancel();
        if let Some(intake) = self.intake.take() {
            intake.stop().await;
        }
        if let Some(pollution) = self.pollution.take() {
            pollution.stop().await;
        }
        self.peers.shutdown().await;
        info!("power plant {} stopped", self.config.plant_id);
    }

    pub fn is_busy(&self) -> bool {
        self.processor.is_busy()
    }

    pub fn self_info(&self) -> &PlantInfo {
        self.registry.self_info()
    }

    pub fn registry(&self) -> &Arc<PlantRegistry> {
        &self.registry
    }

    pub fn election(&self) -> &Arc<ElectionManager> {
        &self.election
    }

    /// Route intake requests: idle plants start an election, busy plants
    /// queue the request and keep a passive election state so later tokens
    /// find the context.
    fn spawn_intake_worker(&self, mut intake_rx: mpsc::UnboundedReceiver<EnergyRequest>) {
        let processor = self.processor.clone();
        let election = self.election.clone();
        let shutdown = self.shutdown.child_token();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    request = intake_rx.recv() => {
                        let Some(request) = request else { break };
                        match processor.handle_incoming(request.clone()) {
                            IntakeDecision::StartElection => {
                                election.start_active_election(request).await;
                            }
                            IntakeDecision::Queued => {
                                election.register_passive(&request);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Start a fresh election for each request dequeued after production.
    fn spawn_dequeue_worker(&mut self) {
        let Some(mut dequeue_rx) = self.dequeue_rx.take() else {
            warn!("dequeue worker already running");
            return;
        };
        let election = self.election.clone();
        let shutdown = self.shutdown.child_token();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    request = dequeue_rx.recv() => {
                        let Some(request) = request else { break };
                        election.start_dequeued_election(request).await;
                    }
                }
            }
        });
    }
}
