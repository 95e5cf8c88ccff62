/*!
 # Controller loop

 [`ControllerState`] is the single owned bundle of mutable controller state
 (light, schedule, sensor cache). [`Controller`] pairs it with the
 [`ProtocolEngine`] and runs the cooperative loop: radio events are
 handled to completion between calls to [`Controller::poll`], which runs the
 periodic tasks.
*/

use std::time::Duration;

use tracing::{debug, info, instrument, trace};

use crate::color::Color;
use crate::config::{Config, TimingConfig};
use crate::fade::FadeEngine;
use crate::hal::{EnvironmentReading, EnvironmentSensor, PixelActuator, Radio, RadioEvent, Services};
use crate::peripheral::ProtocolEngine;
use crate::protocol::Notification;
use crate::scheduler::{ScheduleEngine, TickOutcome};
use crate::store::ScheduleStore;

/// Everything the radio callbacks and periodic tasks mutate
pub struct ControllerState {
    pub fade: FadeEngine,
    pub scheduler: ScheduleEngine,
    pub services: Services,
    /// Last environment reading
    pub environment: EnvironmentReading,
    sensor: Box<dyn EnvironmentSensor>,
    last_sensor_read: Option<u64>,
}

impl ControllerState {
    pub fn new(
        fade: FadeEngine,
        scheduler: ScheduleEngine,
        services: Services,
        sensor: Box<dyn EnvironmentSensor>,
    ) -> Self {
        Self {
            fade,
            scheduler,
            services,
            environment: EnvironmentReading::default(),
            sensor,
            last_sensor_read: None,
        }
    }

    /// Monotonic milliseconds
    pub fn now_ms(&self) -> u64 {
        self.services.clock.now_ms()
    }

    /// Wall-clock minute of the day
    pub fn minute_of_day(&self) -> u16 {
        self.services.rtc.minute_of_day()
    }

    /// Reads every sensor into the cache
    pub fn refresh_environment(&mut self) {
        self.environment = self.sensor.read_environment();
        self.last_sensor_read = Some(self.now_ms());
        if self.environment.has_any() {
            debug!("Environment: {:?}", self.environment);
        } else {
            debug!("No sensor produced a reading");
        }
    }

    /// Evaluates the schedule against the current time
    pub fn tick_schedule(&mut self, force: bool) -> TickOutcome {
        let now = self.now_ms();
        let minute = self.minute_of_day();
        self.scheduler.tick(now, minute, force, &mut self.fade)
    }
}

/// The device control loop
pub struct Controller {
    state: ControllerState,
    protocol: ProtocolEngine,
    timing: TimingConfig,
    sensor_update_interval_ms: u64,
    last_sensor_push: Option<u64>,
    last_housekeeping: Option<u64>,
}

impl Controller {
    /// Loads persisted documents, reads the sensors once, starts advertising
    /// and brings the light to the scheduled state.
    #[instrument(skip_all)]
    pub fn boot(
        config: Config,
        services: Services,
        actuator: Box<dyn PixelActuator>,
        sensor: Box<dyn EnvironmentSensor>,
        radio: Box<dyn Radio>,
        store: ScheduleStore,
    ) -> Self {
        info!("--- Controller startup v{} ---", env!("CARGO_PKG_VERSION"));
        services.memory.reclaim();
        info!("Initial memory: {} bytes free", services.memory.free_bytes());

        let scheduler = ScheduleEngine::new(store, config.schedule.clone());
        let fade = FadeEngine::new(actuator, services.clone(), config.fade.clone());
        let mut state = ControllerState::new(fade, scheduler, services, sensor);
        state.refresh_environment();

        let mut protocol = ProtocolEngine::new(radio, config.ble.clone());
        protocol.start_advertising(state.services.memory.as_ref());

        let now = state.now_ms();
        let minute = state.minute_of_day();
        let outcome = state.scheduler.tick_with(
            now,
            minute,
            true,
            &mut state.fade,
            config.fade.startup_duration(),
        );
        info!("Initial schedule state: {:?}", outcome);

        Self {
            state,
            protocol,
            timing: config.timing,
            sensor_update_interval_ms: config.ble.sensor_update_interval_ms,
            last_sensor_push: None,
            last_housekeeping: Some(now),
        }
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut ControllerState {
        &mut self.state
    }

    pub fn protocol(&self) -> &ProtocolEngine {
        &self.protocol
    }

    /// Pause between loop iterations
    pub fn loop_delay(&self) -> Duration {
        Duration::from_millis(self.timing.main_loop_delay_ms)
    }

    /// Runs one radio event to completion
    pub fn handle_event(&mut self, event: RadioEvent) {
        trace!("Radio event: {:?}", event);
        self.protocol.handle_event(event, &mut self.state);
    }

    /// One loop iteration of periodic tasks
    pub fn poll(&mut self) {
        let now = self.state.now_ms();
        self.state.services.watchdog.feed();

        self.protocol
            .retry_advertising(now, self.state.services.memory.as_ref());

        let outcome = self.state.tick_schedule(false);
        if let TickOutcome::Applied(recipe) = outcome {
            debug!("Schedule moved to '{}'", recipe);
        }

        if due(self.state.last_sensor_read, now, self.timing.sensor_read_interval_ms) {
            self.state.refresh_environment();
            self.push_environment(now);
        } else if due(self.last_sensor_push, now, self.sensor_update_interval_ms) {
            self.push_environment(now);
        }

        if due(self.last_housekeeping, now, self.timing.housekeeping_interval_ms) {
            self.last_housekeeping = Some(now);
            self.state.services.memory.reclaim();
            trace!("Housekeeping: {} bytes free", self.state.services.memory.free_bytes());
        }
    }

    /// Leaves the strip dark
    #[instrument(skip(self))]
    pub fn shutdown(&mut self) {
        info!("Shutting down, turning lights off");
        self.state.fade.set_immediate(Color::OFF);
    }

    fn push_environment(&mut self, now: u64) {
        if !self.protocol.is_connected() {
            return;
        }
        self.last_sensor_push = Some(now);
        self.protocol
            .notify(&Notification::Environment(self.state.environment));
    }
}

fn due(last: Option<u64>, now: u64, interval_ms: u64) -> bool {
    last.map_or(true, |last| now.saturating_sub(last) >= interval_ms)
}
