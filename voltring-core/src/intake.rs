//! MQTT intake of broadcast energy requests.
//!
//! The poll loop only validates and hands requests over a channel; elections
//! and their outbound RPCs run on the orchestrator's workers, never on the
//! broker callback path.

use crate::config::PlantConfig;
use crate::error::PlantError;
use crate::types::EnergyRequest;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const RECONNECT_DELAY: Duration = Duration::from_secs(3);

pub struct RequestIntake {
    client: AsyncClient,
    task: JoinHandle<()>,
}

impl RequestIntake {
    /// Connect to the broker and subscribe to the energy-request topic.
    /// Received requests are pushed into `requests_tx`. Re-subscription
    /// happens on every connection acknowledgement, which covers broker
    /// reconnects.
    pub fn start(
        config: &PlantConfig,
        requests_tx: mpsc::UnboundedSender<EnergyRequest>,
        shutdown: CancellationToken,
    ) -> Result<Self, PlantError> {
        let (host, port) = config.broker_host_port()?;
        let mut options = MqttOptions::new(format!("plant-{}-intake", config.plant_id), host, port);
        options.set_keep_alive(Duration::from_secs(10));
        let (client, mut event_loop) = AsyncClient::new(options, 64);

        let topic = config.energy_request_topic.clone();
        let subscriber = client.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = event_loop.poll() => match event {
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            info!("connected to broker, subscribing to '{topic}'");
                            if let Err(e) = subscriber.subscribe(topic.as_str(), QoS::ExactlyOnce).await {
                                warn!("subscription to '{topic}' failed: {e}");
                            }
                        }
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            handle_payload(&publish.payload, &requests_tx);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!("broker connection error: {e}; reconnecting");
                            tokio::time::sleep(RECONNECT_DELAY).await;
                        }
                    }
                }
            }
            debug!("request intake stopped");
        });

        Ok(Self { client, task })
    }

    pub async fn stop(self) {
        let _ = self.client.disconnect().await;
        self.task.abort();
    }
}

/// Decode one broker payload; malformed JSON and blank request ids are
/// logged and dropped.
fn handle_payload(payload: &[u8], requests_tx: &mpsc::UnboundedSender<EnergyRequest>) {
    match serde_json::from_slice::<EnergyRequest>(payload) {
        Ok(request) if request.request_id.trim().is_empty() => {
            warn!("dropping energy request with blank id");
        }
        Ok(request) => {
            info!(
                "energy request {} for {} kWh received",
                request.request_id, request.amount_kwh
            );
            let _ = requests_tx.send(request);
        }
        Err(e) => warn!("dropping malformed energy request payload: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn valid_payload_is_forwarded() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        handle_payload(br#"{"requestId":"er-1","amountKWh":5000,"timestamp":7}"#, &tx);
        let request = rx.try_recv().unwrap();
        assert_eq!(request.request_id, "er-1");
        assert_eq!(request.amount_kwh, 5000);
    }

    #[tokio::test]
    async fn blank_request_id_is_dropped() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        handle_payload(br#"{"requestId":"  ","amountKWh":5000,"timestamp":7}"#, &tx);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn malformed_payload_is_dropped() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        handle_payload(b"definitely not json", &tx);
        handle_payload(br#"{"requestId":"er-1"}"#, &tx);
        assert!(rx.try_recv().is_err());
    }
}
