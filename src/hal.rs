/*!
 # External collaborators

 Everything the control core consumes but does not own: the pixel
 actuator, clocks, watchdog, memory monitor, environment sensors, the
 GATT radio and the document store. Board support implements these
 traits; [`crate::sim`] provides host versions.
*/

use std::io;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDateTime, Timelike};
use thiserror::Error;

use crate::color::Color;
use crate::protocol::Characteristic;

/// Pixel actuator write failure. Logged, never fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("pixel actuator error: {0}")]
pub struct ActuatorError(pub String);

/// Addressable strip driver
pub trait PixelActuator {
    /// Stage `color` on every pixel
    fn set_pixels(&mut self, color: Color) -> Result<(), ActuatorError>;
    /// Push staged pixels to the strip
    fn commit(&mut self) -> Result<(), ActuatorError>;
}

/// Monotonic time source. Override expiry and rate limiting use this,
/// never the wall clock.
pub trait Clock: Send + Sync {
    /// Milliseconds since an arbitrary fixed origin
    fn now_ms(&self) -> u64;
    /// Block the control thread
    fn sleep(&self, duration: Duration);
}

/// Settable wall clock used for minute-of-day lookups and time notifications
pub trait Rtc: Send + Sync {
    fn now(&self) -> NaiveDateTime;
    fn set(&self, time: NaiveDateTime);

    /// Minutes since local midnight, `0..=1439`
    fn minute_of_day(&self) -> u16 {
        let now = self.now();
        (now.hour() * 60 + now.minute()) as u16
    }
}

/// Hardware watchdog. Must be fed at least once per fade step and once per
/// loop iteration.
pub trait Watchdog: Send + Sync {
    fn feed(&self);
}

/// Heap introspection and reclamation hook
pub trait MemoryMonitor: Send + Sync {
    /// Bytes currently free
    fn free_bytes(&self) -> u32;
    /// Reclaim garbage / compact the heap
    fn reclaim(&self);
}

/// One reading of every environment sensor. `None` means the sensor is
/// disabled or the read failed, which is distinct from a zero reading.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EnvironmentReading {
    pub temperature_c: Option<f32>,
    pub humidity_pct: Option<f32>,
    pub co2_ppm: Option<u32>,
    pub pressure_hpa: Option<f32>,
    pub lux: Option<f32>,
}

impl EnvironmentReading {
    /// True if at least one sensor produced a value
    pub fn has_any(&self) -> bool {
        self.temperature_c.is_some()
            || self.humidity_pct.is_some()
            || self.co2_ppm.is_some()
            || self.pressure_hpa.is_some()
            || self.lux.is_some()
    }
}

/// Environment sensor bundle
pub trait EnvironmentSensor {
    fn read_environment(&mut self) -> EnvironmentReading;
}

/// Opaque connection handle assigned by the radio stack
pub type ConnHandle = u16;

/// Radio transport fault, classified per the way the engine reacts to it
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RadioError {
    /// The peer went away; the link is dead
    #[error("peer disconnected")]
    PeerDisconnected,

    /// The stack could not allocate
    #[error("radio out of memory")]
    OutOfMemory,

    /// Anything else; logged and dropped
    #[error("radio error: {0}")]
    Transient(String),
}

impl RadioError {
    /// True for faults that mean the connection no longer exists
    pub fn is_peer_gone(&self) -> bool {
        matches!(self, RadioError::PeerDisconnected)
    }
}

/// GATT server side of the radio
pub trait Radio {
    /// Begin connectable advertising under `name`
    fn start_advertising(&mut self, name: &str, interval_us: u32) -> Result<(), RadioError>;
    /// Write `payload` to `characteristic` and notify the peer
    fn notify(
        &mut self,
        conn: ConnHandle,
        characteristic: Characteristic,
        payload: &[u8],
    ) -> Result<(), RadioError>;
}

/// Events delivered by the radio stack, processed strictly in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    Connected(ConnHandle),
    Disconnected(ConnHandle),
    Write {
        characteristic: Characteristic,
        data: Vec<u8>,
    },
}

/// Key/value document store
pub trait Storage: Send {
    /// Contents of `key`, `None` if it was never written
    fn read(&self, key: &str) -> io::Result<Option<String>>;
    /// Replace `key` atomically
    fn write(&mut self, key: &str, contents: &str) -> io::Result<()>;
}

/// Shared board services. All of them take `&self`, so one instance is
/// handed to every engine.
#[derive(Clone)]
pub struct Services {
    pub clock: Arc<dyn Clock>,
    pub rtc: Arc<dyn Rtc>,
    pub watchdog: Arc<dyn Watchdog>,
    pub memory: Arc<dyn MemoryMonitor>,
}
