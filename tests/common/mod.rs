//! Shared test infrastructure for picolight integration tests

#![allow(dead_code)] // Items used across multiple test files; Rust analyzes per-file

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use parking_lot::Mutex;
use picolight::config::Config;
use picolight::controller::Controller;
use picolight::fade::FadeEngine;
use picolight::hal::{
    ActuatorError, Clock, ConnHandle, EnvironmentReading, EnvironmentSensor, MemoryMonitor,
    PixelActuator, Radio, RadioError, Rtc, Services, Watchdog,
};
use picolight::protocol::{Characteristic, Notification};
use picolight::store::{MemoryStorage, ScheduleStore};
use picolight::Color;

// ============================================================================
// Mock Actuator
// ============================================================================

#[derive(Debug, Default)]
pub struct ActuatorLog {
    pub commits: Vec<Color>,
    pub staged: Color,
    pub fail: bool,
}

/// Actuator that records every committed colour. Clones share the log.
#[derive(Debug, Clone, Default)]
pub struct RecordingActuator {
    log: Arc<Mutex<ActuatorLog>>,
}

impl RecordingActuator {
    pub fn commits(&self) -> Vec<Color> {
        self.log.lock().commits.clone()
    }

    pub fn last(&self) -> Option<Color> {
        self.log.lock().commits.last().copied()
    }

    pub fn clear(&self) {
        self.log.lock().commits.clear();
    }

    pub fn set_fail(&self, fail: bool) {
        self.log.lock().fail = fail;
    }
}

impl PixelActuator for RecordingActuator {
    fn set_pixels(&mut self, color: Color) -> Result<(), ActuatorError> {
        self.log.lock().staged = color;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), ActuatorError> {
        let mut log = self.log.lock();
        if log.fail {
            return Err(ActuatorError("bus fault".into()));
        }
        let staged = log.staged;
        log.commits.push(staged);
        Ok(())
    }
}

// ============================================================================
// Mock Time
// ============================================================================

/// Monotonic clock that only moves when told to; sleeping advances it
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
    sleeps: AtomicUsize,
}

impl ManualClock {
    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn sleeps(&self) -> usize {
        self.sleeps.load(Ordering::SeqCst)
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.fetch_add(1, Ordering::SeqCst);
        self.advance(duration.as_millis() as u64);
    }
}

/// Wall clock pinned to a settable instant
#[derive(Debug)]
pub struct FixedRtc {
    now: Mutex<NaiveDateTime>,
}

impl FixedRtc {
    pub fn at(hour: u32, minute: u32) -> Self {
        Self {
            now: Mutex::new(datetime(hour, minute)),
        }
    }

    pub fn set_time(&self, hour: u32, minute: u32) {
        *self.now.lock() = datetime(hour, minute);
    }
}

impl Rtc for FixedRtc {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock()
    }

    fn set(&self, time: NaiveDateTime) {
        *self.now.lock() = time;
    }
}

/// 2026-03-14 at `hour:minute`
pub fn datetime(hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 3, 14)
        .and_then(|date| date.and_hms_opt(hour, minute, 0))
        .unwrap()
}

// ============================================================================
// Mock Watchdog / Memory
// ============================================================================

#[derive(Debug, Default)]
pub struct CountingWatchdog {
    feeds: AtomicUsize,
}

impl CountingWatchdog {
    pub fn feeds(&self) -> usize {
        self.feeds.load(Ordering::SeqCst)
    }
}

impl Watchdog for CountingWatchdog {
    fn feed(&self) {
        self.feeds.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct CountingMemory {
    free: AtomicU32,
    reclaims: AtomicUsize,
}

impl CountingMemory {
    pub fn new(free: u32) -> Self {
        Self {
            free: AtomicU32::new(free),
            reclaims: AtomicUsize::new(0),
        }
    }

    pub fn set_free(&self, free: u32) {
        self.free.store(free, Ordering::SeqCst);
    }

    pub fn reclaims(&self) -> usize {
        self.reclaims.load(Ordering::SeqCst)
    }
}

impl MemoryMonitor for CountingMemory {
    fn free_bytes(&self) -> u32 {
        self.free.load(Ordering::SeqCst)
    }

    fn reclaim(&self) {
        self.reclaims.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Mock Radio / Sensor
// ============================================================================

#[derive(Debug, Default)]
pub struct RadioLog {
    pub advertised: Vec<String>,
    pub sent: Vec<(ConnHandle, Characteristic, Vec<u8>)>,
    pub fail_advertising: bool,
    pub notify_error: Option<RadioError>,
}

/// Radio that records advertising and notifications. Clones share the log.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRadio {
    log: Arc<Mutex<RadioLog>>,
}

impl ScriptedRadio {
    pub fn advertise_count(&self) -> usize {
        self.log.lock().advertised.len()
    }

    pub fn set_fail_advertising(&self, fail: bool) {
        self.log.lock().fail_advertising = fail;
    }

    pub fn set_notify_error(&self, error: Option<RadioError>) {
        self.log.lock().notify_error = error;
    }

    /// Raw payloads sent so far
    pub fn sent(&self) -> Vec<(Characteristic, Vec<u8>)> {
        self.log
            .lock()
            .sent
            .iter()
            .map(|(_, characteristic, payload)| (*characteristic, payload.clone()))
            .collect()
    }

    /// Notifications sent so far, decoded
    pub fn notifications(&self) -> Vec<Notification> {
        self.sent()
            .into_iter()
            .map(|(characteristic, payload)| Notification::decode(characteristic, &payload).unwrap())
            .collect()
    }

    /// First byte of every Control notification
    pub fn codes(&self) -> Vec<u8> {
        self.sent()
            .into_iter()
            .filter(|(characteristic, _)| *characteristic == Characteristic::Control)
            .filter_map(|(_, payload)| payload.first().copied())
            .collect()
    }

    pub fn clear(&self) {
        self.log.lock().sent.clear();
    }
}

impl Radio for ScriptedRadio {
    fn start_advertising(&mut self, name: &str, _interval_us: u32) -> Result<(), RadioError> {
        let mut log = self.log.lock();
        if log.fail_advertising {
            return Err(RadioError::Transient("advertising refused".into()));
        }
        log.advertised.push(name.to_string());
        Ok(())
    }

    fn notify(
        &mut self,
        conn: ConnHandle,
        characteristic: Characteristic,
        payload: &[u8],
    ) -> Result<(), RadioError> {
        let mut log = self.log.lock();
        if let Some(error) = log.notify_error.clone() {
            return Err(error);
        }
        log.sent.push((conn, characteristic, payload.to_vec()));
        Ok(())
    }
}

/// Sensor whose reading can be changed from the test. Clones share it.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSensor {
    reading: Arc<Mutex<EnvironmentReading>>,
    reads: Arc<AtomicUsize>,
}

impl ScriptedSensor {
    pub fn set(&self, reading: EnvironmentReading) {
        *self.reading.lock() = reading;
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl EnvironmentSensor for ScriptedSensor {
    fn read_environment(&mut self) -> EnvironmentReading {
        self.reads.fetch_add(1, Ordering::SeqCst);
        *self.reading.lock()
    }
}

// ============================================================================
// Harness
// ============================================================================

pub const FREE_MEMORY: u32 = 64 * 1024;

/// One set of mocks wired together
pub struct Harness {
    pub config: Config,
    pub clock: Arc<ManualClock>,
    pub rtc: Arc<FixedRtc>,
    pub watchdog: Arc<CountingWatchdog>,
    pub memory: Arc<CountingMemory>,
    pub actuator: RecordingActuator,
    pub radio: ScriptedRadio,
    pub sensor: ScriptedSensor,
    pub storage: MemoryStorage,
}

impl Harness {
    /// Wall clock at 12:00, plenty of free memory
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            config,
            clock: Arc::new(ManualClock::default()),
            rtc: Arc::new(FixedRtc::at(12, 0)),
            watchdog: Arc::new(CountingWatchdog::default()),
            memory: Arc::new(CountingMemory::new(FREE_MEMORY)),
            actuator: RecordingActuator::default(),
            radio: ScriptedRadio::default(),
            sensor: ScriptedSensor::default(),
            storage: MemoryStorage::new(),
        }
    }

    pub fn services(&self) -> Services {
        Services {
            clock: self.clock.clone(),
            rtc: self.rtc.clone(),
            watchdog: self.watchdog.clone(),
            memory: self.memory.clone(),
        }
    }

    pub fn fade(&self) -> FadeEngine {
        FadeEngine::new(
            Box::new(self.actuator.clone()),
            self.services(),
            self.config.fade.clone(),
        )
    }

    pub fn store(&self) -> ScheduleStore {
        ScheduleStore::new(Box::new(self.storage.clone()), &self.config)
    }

    pub fn boot(&self) -> Controller {
        Controller::boot(
            self.config.clone(),
            self.services(),
            Box::new(self.actuator.clone()),
            Box::new(self.sensor.clone()),
            Box::new(self.radio.clone()),
            self.store(),
        )
    }
}
