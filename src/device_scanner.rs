use crate::config::Config;
use crate::error::ScanError;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BluetoothDevice {
    pub address: String,
    pub name: String,
}

impl BluetoothDevice {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }
}

impl fmt::Display for BluetoothDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.address)
    }
}

/// Keep devices whose name is allow-listed or whose address is known,
/// each address at most once
pub fn filter_known_devices(
    found: impl IntoIterator<Item = BluetoothDevice>,
    config: &Config,
) -> Vec<BluetoothDevice> {
    let mut devices: Vec<BluetoothDevice> = Vec::new();

    for device in found {
        let named = config.allowed_names().any(|name| name == device.name);
        if !named && !config.is_known_address(&device.address) {
            continue;
        }
        if devices
            .iter()
            .any(|d| d.address.eq_ignore_ascii_case(&device.address))
        {
            continue;
        }
        devices.push(device);
    }

    devices
}

/// Scans for nearby accelerometer devices.
///
/// An empty list means the scan worked but nothing known was in range.
pub async fn scan_devices(config: Config) -> Result<Vec<BluetoothDevice>, ScanError> {
    log::info!("Scanning for devices...");
    let found = scan_with_btleplug(&config).await?;
    let devices = filter_known_devices(found, &config);

    if devices.is_empty() {
        log::info!("No suitable devices found.");
    } else {
        for (idx, device) in devices.iter().enumerate() {
            log::info!("{}: {}", idx + 1, device);
        }
    }

    Ok(devices)
}

async fn scan_with_btleplug(config: &Config) -> Result<Vec<BluetoothDevice>, ScanError> {
    use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter};
    use btleplug::platform::Manager;

    let manager = Manager::new()
        .await
        .map_err(|e| ScanError::ManagerInit(e.to_string()))?;

    let adapters = manager
        .adapters()
        .await
        .map_err(|e| ScanError::ScanFailed(e.to_string()))?;

    let central = adapters.into_iter().next().ok_or(ScanError::NoAdapters)?;

    central
        .start_scan(ScanFilter::default())
        .await
        .map_err(|e| ScanError::ScanFailed(e.to_string()))?;

    tokio::time::sleep(config.scan_duration()).await;

    central
        .stop_scan()
        .await
        .map_err(|e| ScanError::ScanFailed(e.to_string()))?;

    let peripherals = central
        .peripherals()
        .await
        .map_err(|e| ScanError::ScanFailed(e.to_string()))?;

    let mut devices = Vec::new();

    for peripheral in peripherals {
        // Unnamed advertisers cannot be told apart in the dropdown
        if let Ok(Some(props)) = peripheral.properties().await {
            if let Some(local_name) = props.local_name {
                devices.push(BluetoothDevice::new(local_name, peripheral.address().to_string()));
            }
        }
    }

    Ok(devices)
}
