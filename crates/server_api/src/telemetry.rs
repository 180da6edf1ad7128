//! Periodic synthetic telemetry for every connected owner.
//!
//! A single long-lived task sleeps for the tick interval, snapshots the
//! connection registry and fans readings out to each owner's room. Owners are
//! processed in their own tasks, so a slow or failing device lookup only
//! affects that owner. Nothing that happens to one owner stops the loop.

use std::{sync::Arc, time::Duration};

use rand::Rng;
use shared::{
    domain::OwnerId,
    protocol::{
        ServerEvent, TelemetryReading, HUMIDITY_RANGE, INSECT_COUNT_RANGE, TEMPERATURE_RANGE,
        WATER_LEVEL_RANGE,
    },
};
use storage::DeviceStore;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    chaos::ChaosController,
    registry::{ConnectionEntry, ConnectionRegistry},
    rooms::RoomHub,
};

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(2);

/// Draws one reading uniformly from the documented ranges. Decimal values keep two places.
pub fn sample_reading<R: Rng + ?Sized>(rng: &mut R) -> TelemetryReading {
    TelemetryReading {
        temperature: round_to_hundredths(rng.gen_range(TEMPERATURE_RANGE)),
        humidity: round_to_hundredths(rng.gen_range(HUMIDITY_RANGE)),
        water_level: rng.gen_range(WATER_LEVEL_RANGE),
        insect_count: rng.gen_range(INSECT_COUNT_RANGE),
    }
}

fn round_to_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Outcome of one scan over the registry snapshot.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub owners: usize,
    pub skipped: usize,
    pub failed: usize,
    pub readings: usize,
}

enum OwnerOutcome {
    Skipped,
    Delivered { readings: usize },
    Failed,
}

#[derive(Clone)]
pub struct TelemetryProducer {
    registry: ConnectionRegistry,
    rooms: RoomHub,
    store: Arc<dyn DeviceStore>,
    chaos: ChaosController,
    interval: Duration,
}

impl TelemetryProducer {
    pub fn new(
        registry: ConnectionRegistry,
        rooms: RoomHub,
        store: Arc<dyn DeviceStore>,
        chaos: ChaosController,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            rooms,
            store,
            chaos,
            interval,
        }
    }

    /// Starts the perpetual sleep/scan loop on the current runtime.
    pub fn spawn(self) -> ProducerHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let join = tokio::spawn(async move { self.run(token).await });
        ProducerHandle { cancel, join }
    }

    async fn run(self, cancel: CancellationToken) {
        info!(interval = ?self.interval, "telemetry producer started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("telemetry producer shutting down");
                    return;
                }
                () = tokio::time::sleep(self.interval) => {}
            }

            let report = self.run_cycle().await;
            debug!(
                owners = report.owners,
                skipped = report.skipped,
                failed = report.failed,
                readings = report.readings,
                "telemetry cycle complete"
            );
        }
    }

    /// Runs one scan: snapshot the registry and deliver a reading per device to every owner.
    pub async fn run_cycle(&self) -> CycleReport {
        let snapshot = self.registry.snapshot().await;
        let mut report = CycleReport {
            owners: snapshot.len(),
            ..CycleReport::default()
        };

        let mut owner_tasks = JoinSet::new();
        for (owner, entry) in snapshot {
            let rooms = self.rooms.clone();
            let store = Arc::clone(&self.store);
            let chaos = self.chaos.clone();
            owner_tasks.spawn(async move {
                deliver_to_owner(owner, entry, &rooms, store.as_ref(), &chaos).await
            });
        }

        while let Some(joined) = owner_tasks.join_next().await {
            match joined {
                Ok(OwnerOutcome::Skipped) => report.skipped += 1,
                Ok(OwnerOutcome::Delivered { readings }) => report.readings += readings,
                Ok(OwnerOutcome::Failed) => report.failed += 1,
                Err(error) => {
                    error!(%error, "telemetry task for owner aborted");
                    report.failed += 1;
                }
            }
        }

        report
    }
}

async fn deliver_to_owner(
    owner: OwnerId,
    entry: ConnectionEntry,
    rooms: &RoomHub,
    store: &dyn DeviceStore,
    chaos: &ChaosController,
) -> OwnerOutcome {
    if chaos.should_fail(entry.chaos_enabled) {
        warn!(
            owner_id = owner.0,
            "chaos mode: telemetry delivery skipped, will retry next cycle"
        );
        return OwnerOutcome::Skipped;
    }

    let devices = match store.list_devices_for_owner(owner).await {
        Ok(devices) => devices,
        Err(error) => {
            error!(owner_id = owner.0, error = %format!("{error:#}"), "telemetry device lookup failed");
            return OwnerOutcome::Failed;
        }
    };

    for device in &devices {
        let reading = sample_reading(&mut rand::thread_rng());
        rooms.multicast(
            owner,
            ServerEvent::TelemetryUpdate {
                device_id: device.device_id,
                reading,
            },
        );
        debug!(
            owner_id = owner.0,
            device_id = device.device_id.0,
            "simulated telemetry sent"
        );
    }

    OwnerOutcome::Delivered {
        readings: devices.len(),
    }
}

/// Owning handle of the running producer task.
pub struct ProducerHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl ProducerHandle {
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Signals the loop to stop and waits for it. An in-flight cycle runs to completion first.
    pub async fn shutdown(self) -> Result<(), JoinError> {
        self.cancel.cancel();
        self.join.await
    }
}

#[cfg(test)]
#[path = "tests/telemetry_tests.rs"]
mod tests;
