//! # BLE Transport Module
//!
//! The slice of a BLE stack a session needs: connect, list channels,
//! subscribe/unsubscribe, receive notifications, disconnect.
//!
//! Notifications are not delivered through callbacks. Each link forwards
//! the raw payloads of all subscribed channels onto one bounded channel,
//! which the session drains in arrival order.

use crate::error::ConnectionError;
use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use std::future::Future;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// Payloads buffered per link before the forwarder waits on the session
const NOTIFICATION_QUEUE: usize = 256;

const FIND_RETRY_INTERVAL: Duration = Duration::from_millis(250);

/// A communication channel advertised by a connected device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyChannel {
    pub id: String,
    pub supports_notify: bool,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, address: &str) -> Result<Box<dyn DeviceLink>, ConnectionError>;
}

#[async_trait]
pub trait DeviceLink: Send {
    fn channels(&self) -> Vec<NotifyChannel>;

    /// Receiver for the raw payloads of every subscribed channel.
    /// Closed when the link drops.
    async fn notifications(&mut self) -> Result<mpsc::Receiver<Vec<u8>>, ConnectionError>;

    async fn subscribe(&mut self, channel: &NotifyChannel) -> Result<(), ConnectionError>;

    async fn unsubscribe(&mut self, channel: &NotifyChannel) -> Result<(), ConnectionError>;

    async fn disconnect(&mut self) -> Result<(), ConnectionError>;
}

/// One adapter scan shared by every lookup of a run.
///
/// The scan starts with the first lookup and stops when the last one ends,
/// so one session finding its device never cuts another session's scan short.
#[derive(Debug, Default)]
struct SharedScan {
    active: Mutex<usize>,
}

impl SharedScan {
    async fn acquire<F, Fut, E>(&self, start: F) -> Result<(), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        let mut active = self.active.lock().await;
        if *active == 0 {
            start().await?;
        }
        *active += 1;
        Ok(())
    }

    async fn release<F, Fut>(&self, stop: F)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut active = self.active.lock().await;
        *active = active.saturating_sub(1);
        if *active == 0 {
            stop().await;
        }
    }
}

/// Transport backed by the first local Bluetooth adapter
pub struct BtleplugTransport {
    adapter: Adapter,
    scan_duration: Duration,
    scan: SharedScan,
}

impl BtleplugTransport {
    pub async fn new(scan_duration: Duration) -> Result<Self, ConnectionError> {
        let manager = Manager::new()
            .await
            .map_err(|e| ConnectionError::ManagerInit(e.to_string()))?;

        let adapter = manager
            .adapters()
            .await
            .map_err(|_| ConnectionError::NoAdapter)?
            .into_iter()
            .next()
            .ok_or(ConnectionError::NoAdapter)?;

        Ok(Self {
            adapter,
            scan_duration,
            scan: SharedScan::default(),
        })
    }

    async fn known_peripheral(&self, address: &str) -> Option<Peripheral> {
        let peripherals = self.adapter.peripherals().await.ok()?;
        peripherals
            .into_iter()
            .find(|p| p.address().to_string().eq_ignore_ascii_case(address))
    }

    /// Look the address up, scanning for it if this adapter has not seen it yet
    async fn find_peripheral(&self, address: &str) -> Result<Peripheral, ConnectionError> {
        if let Some(peripheral) = self.known_peripheral(address).await {
            return Ok(peripheral);
        }

        log::debug!("{} not cached, scanning", address);
        let adapter = &self.adapter;
        self.scan
            .acquire(|| async move { adapter.start_scan(ScanFilter::default()).await })
            .await
            .map_err(|e| ConnectionError::DeviceConnection {
                address: address.to_string(),
                reason: e.to_string(),
            })?;

        let deadline = tokio::time::Instant::now() + self.scan_duration;
        let mut found = None;
        while tokio::time::Instant::now() < deadline {
            tokio::time::sleep(FIND_RETRY_INTERVAL).await;
            if let Some(peripheral) = self.known_peripheral(address).await {
                found = Some(peripheral);
                break;
            }
        }

        self.scan
            .release(|| async move {
                if let Err(e) = adapter.stop_scan().await {
                    log::warn!("Failed to stop scan: {}", e);
                }
            })
            .await;

        found.ok_or_else(|| ConnectionError::DeviceNotFound(address.to_string()))
    }
}

#[async_trait]
impl Transport for BtleplugTransport {
    async fn connect(&self, address: &str) -> Result<Box<dyn DeviceLink>, ConnectionError> {
        let peripheral = self.find_peripheral(address).await?;
        let connect_failed = |e: btleplug::Error| ConnectionError::DeviceConnection {
            address: address.to_string(),
            reason: e.to_string(),
        };

        peripheral.connect().await.map_err(connect_failed)?;
        peripheral.discover_services().await.map_err(connect_failed)?;

        let characteristics: Vec<Characteristic> = peripheral.characteristics().into_iter().collect();
        log::info!(
            "Connected to {} ({} characteristics)",
            address,
            characteristics.len()
        );

        Ok(Box::new(BtleplugLink {
            adapter: self.adapter.clone(),
            peripheral,
            address: address.to_string(),
            characteristics,
            forwarder: None,
        }))
    }
}

struct BtleplugLink {
    adapter: Adapter,
    peripheral: Peripheral,
    address: String,
    characteristics: Vec<Characteristic>,
    forwarder: Option<JoinHandle<()>>,
}

impl BtleplugLink {
    fn characteristic(&self, channel: &NotifyChannel) -> Result<&Characteristic, ConnectionError> {
        self.characteristics
            .iter()
            .find(|c| c.uuid.to_string() == channel.id)
            .ok_or_else(|| ConnectionError::Channel {
                channel: channel.id.clone(),
                reason: "not offered by device".to_string(),
            })
    }
}

#[async_trait]
impl DeviceLink for BtleplugLink {
    fn channels(&self) -> Vec<NotifyChannel> {
        self.characteristics
            .iter()
            .map(|c| NotifyChannel {
                id: c.uuid.to_string(),
                supports_notify: c.properties.contains(CharPropFlags::NOTIFY),
            })
            .collect()
    }

    async fn notifications(&mut self) -> Result<mpsc::Receiver<Vec<u8>>, ConnectionError> {
        let lost = |e: btleplug::Error| ConnectionError::DeviceConnection {
            address: self.address.clone(),
            reason: e.to_string(),
        };
        let mut stream = self.peripheral.notifications().await.map_err(lost)?;
        let mut events = self.adapter.events().await.map_err(lost)?;
        let peripheral_id = self.peripheral.id();
        let (tx, rx) = mpsc::channel(NOTIFICATION_QUEUE);

        // Dropping tx on disconnect closes the session's receiver
        self.forwarder = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    notification = stream.next() => match notification {
                        Some(notification) => {
                            if tx.send(notification.value).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                    event = events.next() => match event {
                        Some(CentralEvent::DeviceDisconnected(id)) if id == peripheral_id => break,
                        Some(_) => {}
                        None => break,
                    },
                }
            }
        }));

        Ok(rx)
    }

    async fn subscribe(&mut self, channel: &NotifyChannel) -> Result<(), ConnectionError> {
        let characteristic = self.characteristic(channel)?;
        self.peripheral
            .subscribe(characteristic)
            .await
            .map_err(|e| ConnectionError::Channel {
                channel: channel.id.clone(),
                reason: e.to_string(),
            })
    }

    async fn unsubscribe(&mut self, channel: &NotifyChannel) -> Result<(), ConnectionError> {
        let characteristic = self.characteristic(channel)?;
        self.peripheral
            .unsubscribe(characteristic)
            .await
            .map_err(|e| ConnectionError::Channel {
                channel: channel.id.clone(),
                reason: e.to_string(),
            })
    }

    async fn disconnect(&mut self) -> Result<(), ConnectionError> {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        self.peripheral
            .disconnect()
            .await
            .map_err(|e| ConnectionError::Disconnect {
                address: self.address.clone(),
                reason: e.to_string(),
            })
    }
}

/// In-memory transport for session tests
#[cfg(test)]
pub mod fake {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    struct FakeDevice {
        channels: Vec<NotifyChannel>,
        payloads: mpsc::Receiver<Vec<u8>>,
        failing_unsubscribe: Vec<String>,
    }

    #[derive(Clone, Default)]
    pub struct FakeTransport {
        devices: Arc<Mutex<HashMap<String, FakeDevice>>>,
        calls: Arc<Mutex<Vec<String>>>,
        connect_delay: Arc<Mutex<Option<Duration>>>,
    }

    impl FakeTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Register a reachable device; the returned sender feeds its notifications
        pub fn add_device(&self, address: &str, channels: &[(&str, bool)]) -> mpsc::Sender<Vec<u8>> {
            let (tx, rx) = mpsc::channel(NOTIFICATION_QUEUE);
            let device = FakeDevice {
                channels: channels
                    .iter()
                    .map(|(id, notify)| NotifyChannel {
                        id: id.to_string(),
                        supports_notify: *notify,
                    })
                    .collect(),
                payloads: rx,
                failing_unsubscribe: Vec::new(),
            };
            self.devices.lock().unwrap().insert(address.to_string(), device);
            tx
        }

        pub fn fail_unsubscribe(&self, address: &str, channel: &str) {
            if let Some(device) = self.devices.lock().unwrap().get_mut(address) {
                device.failing_unsubscribe.push(channel.to_string());
            }
        }

        /// Make every later connect take this long
        pub fn set_connect_delay(&self, delay: Duration) {
            *self.connect_delay.lock().unwrap() = Some(delay);
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn connect(&self, address: &str) -> Result<Box<dyn DeviceLink>, ConnectionError> {
            self.calls.lock().unwrap().push(format!("connect {}", address));
            let delay = *self.connect_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let device = self.devices.lock().unwrap().remove(address).ok_or_else(|| {
                ConnectionError::DeviceConnection {
                    address: address.to_string(),
                    reason: "unreachable".to_string(),
                }
            })?;
            Ok(Box::new(FakeLink {
                address: address.to_string(),
                channels: device.channels,
                payloads: Some(device.payloads),
                failing_unsubscribe: device.failing_unsubscribe,
                calls: self.calls.clone(),
            }))
        }
    }

    struct FakeLink {
        address: String,
        channels: Vec<NotifyChannel>,
        payloads: Option<mpsc::Receiver<Vec<u8>>>,
        failing_unsubscribe: Vec<String>,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl FakeLink {
        fn record(&self, call: &str) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{} {}", call, self.address));
        }
    }

    #[async_trait]
    impl DeviceLink for FakeLink {
        fn channels(&self) -> Vec<NotifyChannel> {
            self.channels.clone()
        }

        async fn notifications(&mut self) -> Result<mpsc::Receiver<Vec<u8>>, ConnectionError> {
            self.payloads
                .take()
                .ok_or_else(|| ConnectionError::LinkLost(self.address.clone()))
        }

        async fn subscribe(&mut self, channel: &NotifyChannel) -> Result<(), ConnectionError> {
            self.record(&format!("subscribe {}", channel.id));
            Ok(())
        }

        async fn unsubscribe(&mut self, channel: &NotifyChannel) -> Result<(), ConnectionError> {
            self.record(&format!("unsubscribe {}", channel.id));
            if self.failing_unsubscribe.contains(&channel.id) {
                return Err(ConnectionError::Channel {
                    channel: channel.id.clone(),
                    reason: "refused".to_string(),
                });
            }
            Ok(())
        }

        async fn disconnect(&mut self) -> Result<(), ConnectionError> {
            self.record("disconnect");
            Ok(())
        }
    }
}
