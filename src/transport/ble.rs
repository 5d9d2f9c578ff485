//! # Bluetooth LE Transport
//!
//! Niimbot printers expose one GATT characteristic that is readable,
//! writable without response, and notifying. Commands are written to it and
//! responses come back as notifications on the same characteristic.
//!
//! ## Discovery
//!
//! 1. Scan until a peripheral advertises a name starting with the requested
//!    prefix (e.g. `D11`)
//! 2. Connect and discover services
//! 3. Pick the first characteristic under [`SERVICE_UUID`] with
//!    read + write-without-response + notify
//!
//! ## Events
//!
//! A background task forwards notifications from that characteristic, and
//! the adapter's disconnect event for that peripheral, into the session's
//! [`LinkEvent`] channel.
//!
//! ## Linux Setup
//!
//! BlueZ must be running and the user must be allowed to talk to it over
//! D-Bus. Pairing is not required.

use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::{NiimbotError, Result};
use crate::transport::link::{self, Link, LinkEvent, LinkEvents};

/// Primary service carrying the printer characteristic
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0xe7810a71_73ae_499d_8c15_faa9aef0c3f2);

/// Default time to look for a matching device
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(10);

/// Poll interval while scanning
const SCAN_POLL: Duration = Duration::from_millis(250);

fn ble_err(context: &str) -> impl Fn(btleplug::Error) -> NiimbotError + '_ {
    move |e| NiimbotError::Transport(format!("{}: {}", context, e))
}

/// One connected printer characteristic.
pub struct BleLink {
    peripheral: Peripheral,
    characteristic: Characteristic,
}

impl BleLink {
    /// Scan for, connect to, and open the printer whose advertised name
    /// starts with `name_prefix`.
    ///
    /// ## Errors
    ///
    /// Returns [`NiimbotError::Transport`] if no adapter is present, no
    /// matching device shows up within `scan_timeout`, or the device lacks
    /// the expected characteristic.
    pub async fn connect(name_prefix: &str, scan_timeout: Duration) -> Result<(Self, LinkEvents)> {
        let manager = Manager::new().await.map_err(ble_err("BLE manager"))?;
        let adapter = manager
            .adapters()
            .await
            .map_err(ble_err("list adapters"))?
            .into_iter()
            .next()
            .ok_or_else(|| NiimbotError::Transport("no Bluetooth adapter found".to_string()))?;

        log::info!("scanning for '{}*'", name_prefix);
        adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(ble_err("start scan"))?;
        let found = scan_for(&adapter, name_prefix, scan_timeout).await;
        if let Err(e) = adapter.stop_scan().await {
            log::warn!("failed to stop scan: {}", e);
        }
        let peripheral = found?;

        peripheral.connect().await.map_err(ble_err("connect"))?;
        peripheral
            .discover_services()
            .await
            .map_err(ble_err("discover services"))?;

        let wanted =
            CharPropFlags::READ | CharPropFlags::WRITE_WITHOUT_RESPONSE | CharPropFlags::NOTIFY;
        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.service_uuid == SERVICE_UUID && c.properties.contains(wanted))
            .ok_or_else(|| {
                NiimbotError::Transport("required characteristic not found".to_string())
            })?;
        log::info!("using characteristic {}", characteristic.uuid);

        let events = spawn_event_pump(&adapter, &peripheral, &characteristic).await?;
        Ok((
            Self {
                peripheral,
                characteristic,
            },
            events,
        ))
    }
}

async fn scan_for(
    adapter: &Adapter,
    name_prefix: &str,
    scan_timeout: Duration,
) -> Result<Peripheral> {
    let deadline = Instant::now() + scan_timeout;
    loop {
        for p in adapter.peripherals().await.map_err(ble_err("list peripherals"))? {
            let name = p
                .properties()
                .await
                .map_err(ble_err("read properties"))?
                .and_then(|props| props.local_name);
            if let Some(name) = name.filter(|n| n.starts_with(name_prefix)) {
                log::info!("found {} ({})", name, p.address());
                return Ok(p);
            }
        }
        if Instant::now() >= deadline {
            return Err(NiimbotError::Transport(format!(
                "no device named '{}*' found",
                name_prefix
            )));
        }
        tokio::time::sleep(SCAN_POLL).await;
    }
}

async fn spawn_event_pump(
    adapter: &Adapter,
    peripheral: &Peripheral,
    characteristic: &Characteristic,
) -> Result<LinkEvents> {
    let (tx, rx) = link::event_channel();
    let mut notifications = peripheral
        .notifications()
        .await
        .map_err(ble_err("notification stream"))?;
    let mut central = adapter.events().await.map_err(ble_err("adapter events"))?;
    let id = peripheral.id();
    let uuid = characteristic.uuid;

    tokio::spawn(async move {
        loop {
            tokio::select! {
                n = notifications.next() => match n {
                    Some(n) if n.uuid == uuid => {
                        if tx.send(LinkEvent::Notification(n.value)).is_err() {
                            return;
                        }
                    }
                    Some(_) => {}
                    None => break,
                },
                e = central.next() => match e {
                    Some(CentralEvent::DeviceDisconnected(pid)) if pid == id => break,
                    Some(_) => {}
                    None => break,
                },
            }
        }
        let _ = tx.send(LinkEvent::Disconnected);
    });

    Ok(rx)
}

#[async_trait]
impl Link for BleLink {
    async fn start_notifications(&self) -> Result<()> {
        self.peripheral
            .subscribe(&self.characteristic)
            .await
            .map_err(ble_err("subscribe"))
    }

    async fn stop_notifications(&self) -> Result<()> {
        self.peripheral
            .unsubscribe(&self.characteristic)
            .await
            .map_err(ble_err("unsubscribe"))
    }

    async fn write_without_response(&self, data: &[u8]) -> Result<()> {
        self.peripheral
            .write(&self.characteristic, data, WriteType::WithoutResponse)
            .await
            .map_err(ble_err("write"))
    }

    async fn disconnect(&self) -> Result<()> {
        self.peripheral
            .disconnect()
            .await
            .map_err(ble_err("disconnect"))
    }

    async fn is_connected(&self) -> bool {
        match self.peripheral.is_connected().await {
            Ok(connected) => connected,
            Err(e) => {
                log::debug!("connection check failed: {}", e);
                false
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_uuid() {
        assert_eq!(
            SERVICE_UUID.to_string(),
            "e7810a71-73ae-499d-8c15-faa9aef0c3f2"
        );
    }

    // Note: Connection tests require actual hardware.
}
