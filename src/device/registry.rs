use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tokio::sync::{broadcast, Mutex, RwLock};

use super::{ConnectReport, ConnectionState, DeviceError, DeviceSnapshot, Endpoint, Result};
use crate::serial::{Connector, DisplayProtocol, ProtocolTiming, SerialInterface, WireEvent};

struct SlotStatus {
    connection_state: ConnectionState,
    last_handshake: Option<DateTime<Utc>>,
}

struct DeviceSlot {
    endpoint: Endpoint,
    /// Holding this lock is the only way to talk to the device
    session: Mutex<Option<DisplayProtocol>>,
    /// Mirrors `session` being open and handshaken; readable without the lock
    live: AtomicBool,
    status: RwLock<SlotStatus>,
}

/// Ordered set of configured devices, their sessions and liveness.
pub struct DeviceRegistry {
    slots: Vec<DeviceSlot>,
    connector: Arc<dyn Connector>,
    timing: ProtocolTiming,
    wire_tx: broadcast::Sender<WireEvent>,
}

impl DeviceRegistry {
    pub fn new(
        endpoints: Vec<Endpoint>,
        connector: Arc<dyn Connector>,
        timing: ProtocolTiming,
        event_capacity: usize,
    ) -> Self {
        let (wire_tx, _) = broadcast::channel(event_capacity.max(1));
        let slots = endpoints
            .into_iter()
            .map(|endpoint| DeviceSlot {
                endpoint,
                session: Mutex::new(None),
                live: AtomicBool::new(false),
                status: RwLock::new(SlotStatus {
                    connection_state: ConnectionState::Disconnected,
                    last_handshake: None,
                }),
            })
            .collect();

        Self {
            slots,
            connector,
            timing,
            wire_tx,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn endpoint(&self, index: usize) -> Option<&Endpoint> {
        self.slots.get(index).map(|s| &s.endpoint)
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.slots.iter().map(|s| &s.endpoint)
    }

    /// Connect every endpoint independently; one failure never stops the
    /// others. Reports come back in endpoint order.
    pub async fn connect_all(&self, handshake_timeout: Duration) -> Vec<ConnectReport> {
        log::info!("Connecting to {} device(s)...", self.slots.len());

        let attempts = (0..self.slots.len()).map(|index| async move {
            let result = self.connect(index, handshake_timeout).await;
            let endpoint = &self.slots[index].endpoint;
            ConnectReport {
                index,
                address: endpoint.address.clone(),
                connected: result.is_ok(),
                error: result.err().map(|e| e.to_string()),
            }
        });
        let reports = join_all(attempts).await;

        let live = self.live_count();
        if live == self.slots.len() {
            log::info!("All {} device(s) connected", live);
        } else {
            log::warn!(
                "{}/{} device(s) connected; {} module(s) available",
                live,
                self.slots.len(),
                self.live_modules()
            );
        }
        reports
    }

    /// Open and handshake one endpoint. Already-live devices are left as is.
    pub async fn connect(&self, index: usize, handshake_timeout: Duration) -> Result<()> {
        let slot = self.slot(index)?;
        let mut guard = slot.session.lock().await;

        if guard.as_ref().is_some_and(|p| p.interface().is_ready()) {
            log::debug!("Device {} already connected", index);
            return Ok(());
        }
        if let Some(mut stale) = guard.take() {
            stale.close().await;
        }

        self.set_state(slot, ConnectionState::Connecting, None).await;
        log::info!("Attempting to connect to port: {}", slot.endpoint.address);

        match SerialInterface::open(
            &slot.endpoint,
            self.connector.as_ref(),
            handshake_timeout,
            Some(self.wire_tx.clone()),
        )
        .await
        {
            Ok(interface) => {
                let handshake_at = interface.handshake_at();
                *guard = Some(DisplayProtocol::new(interface, self.timing));
                slot.live.store(true, Ordering::SeqCst);
                self.set_state(slot, ConnectionState::Connected, handshake_at).await;
                Ok(())
            }
            Err(e) => {
                log::error!("Connection to {} failed: {}", slot.endpoint.address, e);
                slot.live.store(false, Ordering::SeqCst);
                self.set_state(slot, ConnectionState::Error(e.to_string()), None).await;
                Err(DeviceError::SerialError(e))
            }
        }
    }

    /// Close one device's session. Waits for any in-flight exchange first.
    pub async fn disconnect(&self, index: usize) -> Result<()> {
        let slot = self.slot(index)?;
        let mut guard = slot.session.lock().await;

        slot.live.store(false, Ordering::SeqCst);
        if let Some(mut protocol) = guard.take() {
            protocol.close().await;
        }
        self.set_state(slot, ConnectionState::Disconnected, None).await;
        Ok(())
    }

    /// Close every session. Never fails.
    pub async fn disconnect_all(&self) {
        for index in 0..self.slots.len() {
            // index is always in range here
            let _ = self.disconnect(index).await;
        }
        log::info!("All devices disconnected");
    }

    pub fn is_live(&self, index: usize) -> bool {
        self.slots
            .get(index)
            .is_some_and(|s| s.live.load(Ordering::SeqCst))
    }

    pub fn live_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.live.load(Ordering::SeqCst))
            .count()
    }

    /// Liveness of every device, by index
    pub fn live_set(&self) -> Vec<bool> {
        self.slots
            .iter()
            .map(|s| s.live.load(Ordering::SeqCst))
            .collect()
    }

    pub fn live_indices(&self) -> Vec<usize> {
        (0..self.slots.len()).filter(|&i| self.is_live(i)).collect()
    }

    pub fn live_modules(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.live.load(Ordering::SeqCst))
            .map(|s| s.endpoint.modules)
            .sum()
    }

    pub fn subscribe_wire(&self) -> broadcast::Receiver<WireEvent> {
        self.wire_tx.subscribe()
    }

    /// Run `f` against device `index`'s session while holding its lock.
    ///
    /// The lock is released on every exit path. A transport failure inside
    /// `f` closes the session and marks the device not live.
    pub async fn with_exclusive<F, R>(&self, index: usize, f: F) -> Result<R>
    where
        F: FnOnce(&mut DisplayProtocol) -> Pin<Box<dyn Future<Output = Result<R>> + Send + '_>>,
        R: Send,
    {
        let slot = self.slot(index)?;
        let mut guard = slot.session.lock().await;

        let result = match guard.as_mut() {
            Some(protocol) if protocol.interface().is_ready() => f(protocol).await,
            _ => return Err(DeviceError::NotConnected(index)),
        };

        if let Err(e) = &result {
            if e.is_transport_failure() {
                log::error!(
                    "Device {} ({}) lost: {}",
                    index,
                    slot.endpoint.address,
                    e
                );
                slot.live.store(false, Ordering::SeqCst);
                if let Some(mut protocol) = guard.take() {
                    protocol.close().await;
                }
                self.set_state(slot, ConnectionState::Error(e.to_string()), None)
                    .await;
            }
        }
        result
    }

    pub async fn snapshots(&self) -> Vec<DeviceSnapshot> {
        let mut out = Vec::with_capacity(self.slots.len());
        for (index, slot) in self.slots.iter().enumerate() {
            let status = slot.status.read().await;
            out.push(DeviceSnapshot {
                index,
                address: slot.endpoint.address.clone(),
                baud_rate: slot.endpoint.baud_rate,
                live: slot.live.load(Ordering::SeqCst),
                connection_state: status.connection_state.clone(),
                last_handshake: status.last_handshake,
            });
        }
        out
    }

    fn slot(&self, index: usize) -> Result<&DeviceSlot> {
        self.slots.get(index).ok_or(DeviceError::NotFound(index))
    }

    async fn set_state(
        &self,
        slot: &DeviceSlot,
        state: ConnectionState,
        handshake_at: Option<DateTime<Utc>>,
    ) {
        let mut status = slot.status.write().await;
        status.connection_state = state;
        status.last_handshake = handshake_at;
    }
}
