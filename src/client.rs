use btleplug::api::{
    CharPropFlags, Central, Characteristic as GattCharacteristic, Manager as _,
    Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use chrono::Local;
use futures::stream::{Stream, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::protocol::{Characteristic, Command, Notification};
use crate::schedule::{ScheduleBlock, WireBlock};
use crate::{Error, Result};

/// Attempts per characteristic write before giving up
const MAX_RETRIES: u8 = 3;

/// Gets the default Bluetooth adapter
#[instrument(skip(manager))]
async fn get_central(manager: &Manager) -> Result<Adapter> {
    debug!("Getting default Bluetooth adapter");
    let adapters = manager.adapters().await?;
    let Some(adapter) = adapters.into_iter().next() else {
        error!("No Bluetooth adapters found");
        return Err(Error::NoBluetoothAdapters);
    };
    debug!("Using Bluetooth adapter");
    Ok(adapter)
}

/// How to pick the controller out of the scan results
#[derive(Debug, Clone)]
pub enum Target {
    /// First peripheral whose local name starts with this prefix
    Name(String),
    /// Peripheral with this address or platform id
    Address(String),
}

impl Target {
    fn matches(&self, peripheral: &Peripheral, local_name: &str) -> bool {
        match self {
            Target::Name(prefix) => local_name.starts_with(prefix.as_str()),
            Target::Address(addr) => {
                let addr = addr.to_lowercase();
                peripheral.address().to_string().to_lowercase() == addr
                    || peripheral.id().to_string().to_lowercase() == addr
            }
        }
    }
}

/// Serialises writes and keeps a minimum gap between them
struct CommandQueue {
    min_delay: Duration,
    last_command: Mutex<Option<Instant>>,
}

impl CommandQueue {
    fn new(min_delay_ms: u64) -> Self {
        Self {
            min_delay: Duration::from_millis(min_delay_ms),
            last_command: Mutex::new(None),
        }
    }

    async fn execute<T, F>(&self, future: F) -> T
    where
        F: std::future::Future<Output = T>,
    {
        // Holding the lock for the whole write keeps one command in flight
        let mut last_cmd = self.last_command.lock().await;
        if let Some(last) = *last_cmd {
            let elapsed = last.elapsed();
            if elapsed < self.min_delay {
                let wait_time = self.min_delay - elapsed;
                trace!("Rate limiting: waiting {:?} before next command", wait_time);
                time::sleep(wait_time).await;
            }
        }

        let result = future.await;
        *last_cmd = Some(Instant::now());
        result
    }
}

/// BLE central talking to a light controller
pub struct LightClient {
    peripheral: Peripheral,
    characteristics: HashMap<Characteristic, GattCharacteristic>,
    command_queue: Arc<CommandQueue>,
}

impl LightClient {
    /// Scans for `target`, connects and resolves the light service
    /// characteristics. The Sensor characteristic is optional.
    #[instrument]
    pub async fn connect(target: Target, scan_timeout: Duration, command_delay_ms: u64) -> Result<LightClient> {
        info!("Initializing BLE light client");
        let manager = Manager::new().await?;
        let central = get_central(&manager).await?;

        info!("Scanning for light controllers...");
        central.start_scan(ScanFilter::default()).await?;

        let start_time = Instant::now();
        let mut found: Option<Peripheral> = None;

        while found.is_none() && start_time.elapsed() < scan_timeout {
            let peripherals = central.peripherals().await?;
            debug!("Found {} BLE peripherals so far", peripherals.len());

            for p in peripherals {
                let Ok(Some(props)) = p.properties().await else {
                    continue;
                };
                let Some(name) = props.local_name else {
                    continue;
                };
                debug!("Found device: {} {}", p.id(), name);
                if target.matches(&p, &name) {
                    info!("Found controller: {}", name);
                    found = Some(p);
                    break;
                }
            }

            if found.is_none() {
                let remaining = scan_timeout.saturating_sub(start_time.elapsed());
                info!(
                    "Still scanning for a controller... ({} seconds remaining)",
                    remaining.as_secs()
                );
                time::sleep(Duration::from_millis(500)).await;
            }
        }

        central.stop_scan().await?;
        let Some(peripheral) = found else {
            error!(
                "No light controller found within {} seconds",
                scan_timeout.as_secs()
            );
            return Err(Error::NoCompatibleDevice);
        };

        info!("Connecting to controller...");
        if !peripheral.is_connected().await? {
            peripheral.connect().await?;
        }
        debug!("Discovering services...");
        peripheral.discover_services().await?;

        let available = peripheral.characteristics();
        let mut characteristics = HashMap::new();
        for characteristic in Characteristic::ALL {
            match available.iter().find(|c| c.uuid == characteristic.uuid()) {
                Some(gatt) => {
                    debug!("Found {} characteristic: {}", characteristic, gatt.uuid);
                    characteristics.insert(characteristic, gatt.clone());
                }
                None if characteristic == Characteristic::Sensor => {
                    debug!("Sensor characteristic not found, but this is optional");
                }
                None => {
                    return Err(Error::CharacteristicNotFound(characteristic.uuid().to_string()));
                }
            }
        }

        info!("Connected to light controller");
        Ok(LightClient {
            peripheral,
            characteristics,
            command_queue: Arc::new(CommandQueue::new(command_delay_ms)),
        })
    }

    /// Writes one command to the characteristic it belongs to
    #[instrument(skip(self))]
    pub async fn send(&self, command: &Command) -> Result<()> {
        let characteristic = command.characteristic();
        let gatt = self
            .characteristics
            .get(&characteristic)
            .ok_or_else(|| Error::CharacteristicNotFound(characteristic.uuid().to_string()))?;
        self.write(gatt, &command.encode()).await
    }

    /// Sets the controller clock to the host's local time
    pub async fn sync_time(&self) -> Result<()> {
        let now = Local::now().naive_local();
        debug!("Syncing controller time to {}", now);
        self.send(&Command::SetClock(now)).await
    }

    /// Replaces the controller schedule
    #[instrument(skip(self, blocks), fields(count = blocks.len()))]
    pub async fn upload_schedule(&self, version: u8, blocks: &[ScheduleBlock]) -> Result<()> {
        let blocks = blocks.iter().map(WireBlock::from_block).collect();
        self.send(&Command::UploadSchedule { version, blocks }).await
    }

    /// Subscribes to Control and Sensor notifications and yields them
    /// decoded. Frames that fail to decode are logged and skipped.
    pub async fn notifications(&self) -> Result<impl Stream<Item = Notification>> {
        for characteristic in [Characteristic::Control, Characteristic::Sensor] {
            if let Some(gatt) = self.characteristics.get(&characteristic) {
                self.peripheral.subscribe(gatt).await?;
            }
        }

        let stream = self.peripheral.notifications().await?;
        Ok(stream.filter_map(|value| async move {
            let characteristic = Characteristic::from_uuid(value.uuid)?;
            match Notification::decode(characteristic, &value.value) {
                Ok(notification) => Some(notification),
                Err(e) => {
                    warn!("Undecodable notification: {}", e);
                    None
                }
            }
        }))
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.peripheral.disconnect().await?;
        info!("Disconnected from controller");
        Ok(())
    }

    /// Rate-limited write with retries
    #[instrument(skip(self, gatt, payload), fields(len = payload.len()))]
    async fn write(&self, gatt: &GattCharacteristic, payload: &[u8]) -> Result<()> {
        let write_type = if gatt.properties.contains(CharPropFlags::WRITE) {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };

        self.command_queue
            .execute(async {
                let mut attempt = 0;
                loop {
                    trace!("Sending BLE write (attempt {}/{})", attempt + 1, MAX_RETRIES);
                    match self.peripheral.write(gatt, payload, write_type).await {
                        Ok(()) => {
                            trace!("Write sent successfully");
                            return Ok(());
                        }
                        Err(e) => {
                            attempt += 1;
                            warn!("Write failed (attempt {}/{}): {}", attempt, MAX_RETRIES, e);
                            if attempt >= MAX_RETRIES {
                                error!("Write failed permanently: {}", e);
                                return Err(Error::CommandTimeout(MAX_RETRIES));
                            }
                            time::sleep(Duration::from_millis(300)).await;
                        }
                    }
                }
            })
            .await
    }
}
