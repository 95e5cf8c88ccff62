//! Host implementations of the board collaborators, used by `picolightd`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDateTime, TimeDelta};
use parking_lot::Mutex;
use tracing::{debug, info, trace};

use crate::color::Color;
use crate::hal::{
    ActuatorError, Clock, ConnHandle, EnvironmentReading, EnvironmentSensor, MemoryMonitor,
    PixelActuator, Radio, RadioError, Rtc, Services, Watchdog,
};
use crate::protocol::Characteristic;

/// Services backed by the host clocks and the given memory model
pub fn host_services(memory: Arc<SimMemory>) -> Services {
    Services {
        clock: Arc::new(SystemClock::new()),
        rtc: Arc::new(SystemRtc::default()),
        watchdog: Arc::new(LogWatchdog),
        memory,
    }
}

/// Monotonic clock over [`Instant`]
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Local time plus an offset that [`Rtc::set`] adjusts
#[derive(Debug)]
pub struct SystemRtc {
    offset: Mutex<TimeDelta>,
}

impl Default for SystemRtc {
    fn default() -> Self {
        Self {
            offset: Mutex::new(TimeDelta::zero()),
        }
    }
}

impl Rtc for SystemRtc {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local() + *self.offset.lock()
    }

    fn set(&self, time: NaiveDateTime) {
        let offset = time - Local::now().naive_local();
        *self.offset.lock() = offset;
        debug!("RTC offset now {}s", offset.num_seconds());
    }
}

/// Watchdog that only traces feeds
#[derive(Debug, Default)]
pub struct LogWatchdog;

impl Watchdog for LogWatchdog {
    fn feed(&self) {
        trace!("watchdog fed");
    }
}

/// Free-memory figure that can be changed at runtime
#[derive(Debug)]
pub struct SimMemory {
    free: AtomicU32,
}

impl SimMemory {
    pub fn new(free_bytes: u32) -> Self {
        Self {
            free: AtomicU32::new(free_bytes),
        }
    }

    pub fn set_free(&self, free_bytes: u32) {
        self.free.store(free_bytes, Ordering::Relaxed);
        info!("Simulated free memory set to {} bytes", free_bytes);
    }
}

impl MemoryMonitor for SimMemory {
    fn free_bytes(&self) -> u32 {
        self.free.load(Ordering::Relaxed)
    }

    fn reclaim(&self) {
        trace!("reclaim requested");
    }
}

/// Strip that logs every committed colour
#[derive(Debug, Default)]
pub struct LogActuator {
    staged: Color,
    shown: Color,
}

impl LogActuator {
    /// Colour of the last commit
    pub fn shown(&self) -> Color {
        self.shown
    }
}

impl PixelActuator for LogActuator {
    fn set_pixels(&mut self, color: Color) -> Result<(), ActuatorError> {
        self.staged = color;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), ActuatorError> {
        if self.staged != self.shown {
            trace!("strip {}", self.staged);
        }
        self.shown = self.staged;
        Ok(())
    }
}

/// Sensor bundle that always reports the same reading
#[derive(Debug, Clone)]
pub struct StaticSensor {
    reading: EnvironmentReading,
}

impl StaticSensor {
    pub fn new(reading: EnvironmentReading) -> Self {
        Self { reading }
    }
}

impl Default for StaticSensor {
    fn default() -> Self {
        Self::new(EnvironmentReading {
            temperature_c: Some(22.5),
            humidity_pct: Some(55.0),
            co2_ppm: Some(650),
            pressure_hpa: Some(1013.2),
            lux: None,
        })
    }
}

impl EnvironmentSensor for StaticSensor {
    fn read_environment(&mut self) -> EnvironmentReading {
        self.reading
    }
}

/// Radio that prints notifications to stdout as hex, one per line
#[derive(Debug, Default)]
pub struct StdoutRadio;

impl Radio for StdoutRadio {
    fn start_advertising(&mut self, name: &str, interval_us: u32) -> Result<(), RadioError> {
        println!("ADV {} {}us", name, interval_us);
        Ok(())
    }

    fn notify(
        &mut self,
        conn: ConnHandle,
        characteristic: Characteristic,
        payload: &[u8],
    ) -> Result<(), RadioError> {
        let hex: String = payload.iter().map(|b| format!("{:02x}", b)).collect();
        println!("NOTIFY {} {} {}", conn, characteristic, hex);
        Ok(())
    }
}
