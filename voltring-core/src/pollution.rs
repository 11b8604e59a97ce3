//! Pollution sensing, sliding-window aggregation and publishing.
//!
//! Three cooperating tasks: a simulated sensor appends CO2 readings to a
//! drainable buffer, the aggregator folds them through a sliding window of
//! size 8 that advances by 4 (50% overlap), and a publisher wakes every
//! 10 seconds to ship the accumulated averages as one QoS-2 batch.

use crate::config::PlantConfig;
use crate::error::PlantError;
use crate::types::{unix_timestamp_ms, Measurement, PlantId, PollutionBatch};
use parking_lot::Mutex;
use rand::Rng;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Measurements per computed average.
pub const WINDOW_SIZE: usize = 8;
/// Oldest measurements discarded after each average; W/2 gives 50% overlap,
/// so no measurement contributes to more than two windows.
pub const WINDOW_SLIDE: usize = 4;

const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Thread-safe append-and-drain queue between the sensor and the aggregator.
#[derive(Default)]
pub struct MeasurementBuffer {
    inner: Mutex<Vec<Measurement>>,
}

impl MeasurementBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, measurement: Measurement) {
        self.inner.lock().push(measurement);
    }

    /// Atomically take everything currently buffered.
    pub fn drain(&self) -> Vec<Measurement> {
        std::mem::take(&mut *self.inner.lock())
    }
}

/// Sliding-window state: measurements awaiting a full window plus the
/// averages computed since the last publish.
pub struct SlidingWindow {
    window: VecDeque<Measurement>,
    averages: Vec<f64>,
}

impl SlidingWindow {
    pub fn new() -> Self {
        Self {
            window: VecDeque::new(),
            averages: Vec::new(),
        }
    }

    /// Fold new measurements in, computing an average for every full window.
    /// The output only depends on the overall arrival order, not on how the
    /// input was chunked.
    pub fn push_all(&mut self, measurements: impl IntoIterator<Item = Measurement>) {
        self.window.extend(measurements);
        while self.window.len() >= WINDOW_SIZE {
            let mean = self
                .window
                .iter()
                .take(WINDOW_SIZE)
                .map(|m| m.value)
                .sum::<f64>()
                / WINDOW_SIZE as f64;
            self.averages.push(mean);
            for _ in 0..WINDOW_SLIDE {
                self.window.pop_front();
            }
        }
    }

    /// Retrieve the computed averages in order, leaving the list empty.
    pub fn take_averages(&mut self) -> Vec<f64> {
        std::mem::take(&mut self.averages)
    }

    /// Measurements still waiting for a full window.
    pub fn pending(&self) -> usize {
        self.window.len()
    }
}

impl Default for SlidingWindow {
    fn default() -> Self {
        Self::new()
    }
}

pub struct PollutionMonitor {
    client: AsyncClient,
    tasks: Vec<JoinHandle<()>>,
}

impl PollutionMonitor {
    /// Start the sensor, aggregator and publisher tasks plus a task driving
    /// the broker connection.
    pub fn start(config: &PlantConfig, shutdown: CancellationToken) -> Result<Self, PlantError> {
        let (host, port) = config.broker_host_port()?;
        let mut options =
            MqttOptions::new(format!("plant-{}-pollution", config.plant_id), host, port);
        options.set_keep_alive(Duration::from_secs(10));
        let (client, mut event_loop) = AsyncClient::new(options, 64);

        let buffer = Arc::new(MeasurementBuffer::new());
        let window = Arc::new(Mutex::new(SlidingWindow::new()));
        let mut tasks = Vec::new();

        // Broker connection driver; publish errors surface on the poll side.
        let conn_shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = conn_shutdown.cancelled() => break,
                    event = event_loop.poll() => if let Err(e) = event {
                        warn!("pollution publisher broker error: {e}; reconnecting");
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                }
            }
        }));

        // Sensor: one simulated CO2 reading per period.
        let sensor_buffer = buffer.clone();
        let sensor_shutdown = shutdown.clone();
        let sensor_period = config.sensor_period;
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sensor_period);
            loop {
                tokio::select! {
                    _ = sensor_shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        sensor_buffer.add(Measurement {
                            value: simulated_co2(),
                            timestamp: unix_timestamp_ms(),
                        });
                    }
                }
            }
        }));

        // Aggregator: drain the buffer into the window.
        let aggregator_buffer = buffer.clone();
        let aggregator_window = window.clone();
        let aggregator_shutdown = shutdown.clone();
        let aggregation_period = config.aggregation_period;
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(aggregation_period);
            loop {
                tokio::select! {
                    _ = aggregator_shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let fresh = aggregator_buffer.drain();
                        if !fresh.is_empty() {
                            aggregator_window.lock().push_all(fresh);
                        }
                    }
                }
            }
        }));

        // Publisher: ship accumulated averages as one batch.
        let publisher_client = client.clone();
        let publisher_window = window;
        let publisher_shutdown = shutdown;
        let publish_period = config.publish_period;
        let plant_id: PlantId = config.plant_id;
        let topic = config.pollution_topic.clone();
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(publish_period);
            loop {
                tokio::select! {
                    _ = publisher_shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let averages = publisher_window.lock().take_averages();
                        if averages.is_empty() {
                            continue;
                        }
                        let batch = PollutionBatch {
                            plant_id,
                            list_computation_timestamp: unix_timestamp_ms(),
                            averages,
                        };
                        publish_batch(&publisher_client, &topic, &batch).await;
                    }
                }
            }
        }));

        Ok(Self { client, tasks })
    }

    pub async fn stop(self) {
        let _ = self.client.disconnect().await;
        for task in self.tasks {
            task.abort();
        }
    }
}

async fn publish_batch(client: &AsyncClient, topic: &str, batch: &PollutionBatch) {
    let payload = match serde_json::to_vec(batch) {
        Ok(payload) => payload,
        Err(e) => {
            warn!("failed to encode pollution batch: {e}");
            return;
        }
    };
    // A failed publish is logged and dropped; the pipeline does not retry.
    match client
        .publish(topic, QoS::ExactlyOnce, false, payload)
        .await
    {
        Ok(()) => debug!(
            "published pollution batch with {} averages",
            batch.averages.len()
        ),
        Err(e) => warn!("dropping pollution batch: {e}"),
    }
}

fn simulated_co2() -> f64 {
    rand::thread_rng().gen_range(30.0..90.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn measurements(values: impl IntoIterator<Item = f64>) -> Vec<Measurement> {
        values
            .into_iter()
            .enumerate()
            .map(|(i, value)| Measurement {
                value,
                timestamp: i as u64,
            })
            .collect()
    }

    #[test]
    fn sixteen_measurements_yield_two_overlapping_averages() {
        let mut window = SlidingWindow::new();
        window.push_all(measurements((1..=16).map(f64::from)));

        let averages = window.take_averages();
        assert_eq!(averages, vec![4.5, 8.5]); // mean(1..=8), mean(5..=12)
        assert_eq!(window.pending(), 4); // 13..=16 await the next batch
    }

    #[test]
    fn no_partial_average_below_window_size() {
        let mut window = SlidingWindow::new();
        window.push_all(measurements((1..=7).map(f64::from)));
        assert!(window.take_averages().is_empty());
        assert_eq!(window.pending(), 7);
    }

    #[test]
    fn take_averages_clears_in_order() {
        let mut window = SlidingWindow::new();
        window.push_all(measurements((1..=12).map(f64::from)));
        assert_eq!(window.take_averages(), vec![4.5]);
        assert!(window.take_averages().is_empty());

        window.push_all(measurements((13..=16).map(f64::from)));
        assert_eq!(window.take_averages(), vec![8.5]);
    }

    #[test]
    fn chunking_does_not_change_the_output() {
        let values: Vec<f64> = (1..=20).map(f64::from).collect();

        let mut burst = SlidingWindow::new();
        burst.push_all(measurements(values.clone()));

        let mut one_at_a_time = SlidingWindow::new();
        for m in measurements(values) {
            one_at_a_time.push_all([m]);
        }

        assert_eq!(burst.take_averages(), one_at_a_time.take_averages());
        assert_eq!(burst.pending(), one_at_a_time.pending());
    }

    #[test]
    fn buffer_drains_atomically() {
        let buffer = MeasurementBuffer::new();
        buffer.add(Measurement {
            value: 1.0,
            timestamp: 1,
        });
        buffer.add(Measurement {
            value: 2.0,
            timestamp: 2,
        });
        assert_eq!(buffer.drain().len(), 2);
        assert!(buffer.drain().is_empty());
    }
}
