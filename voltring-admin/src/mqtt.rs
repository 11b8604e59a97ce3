//! Subscriber feeding the measurement store from the pollution topic.

use crate::state::AppState;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use voltring_core::config::parse_broker_url;
use voltring_core::error::PlantError;
use voltring_core::types::PollutionBatch;

const RECONNECT_DELAY: Duration = Duration::from_secs(3);

pub fn start_pollution_subscriber(
    broker_url: &str,
    topic: String,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> Result<(), PlantError> {
    let (host, port) = parse_broker_url(broker_url)?;
    let mut options = MqttOptions::new("voltring-admin-pollution", host, port);
    options.set_keep_alive(Duration::from_secs(10));
    let (client, mut event_loop) = AsyncClient::new(options, 64);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = event_loop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("connected to broker, subscribing to '{topic}'");
                        if let Err(e) = client.subscribe(topic.as_str(), QoS::ExactlyOnce).await {
                            warn!("subscription to '{topic}' failed: {e}");
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        match serde_json::from_slice::<PollutionBatch>(&publish.payload) {
                            Ok(batch) => state.measurements.add(batch),
                            Err(e) => warn!("dropping malformed pollution batch: {e}"),
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("broker connection error: {e}; reconnecting");
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                }
            }
        }
    });

    Ok(())
}
