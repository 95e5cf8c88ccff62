/*!
 # BLE peripheral protocol engine

 Owns the connection state machine and the radio. Characteristic writes are
 decoded into [`Command`]s and executed against the fade and schedule
 engines; internal state goes back out as [`Notification`]s.

 Advertising is gated on free memory: starting it under memory pressure can
 bring the whole device down, so a low reading defers the attempt and
 leaves the request set for the periodic retry.
*/

use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::BleConfig;
use crate::controller::ControllerState;
use crate::hal::{ConnHandle, MemoryMonitor, Radio, RadioEvent};
use crate::protocol::{Characteristic, Command, Notification};
use crate::recipes;
use crate::schedule::WireBlock;
use crate::{Error, Result};

/// Link state of the peripheral
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Advertising,
    Connected,
}

/// Result of an advertising attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertiseOutcome {
    /// The radio is advertising
    Started,
    /// Not enough free memory; retried later
    Deferred,
    /// The radio refused; retried later
    Failed,
    /// Nothing to do in the current state
    Skipped,
}

/// Connection lifecycle, command dispatch and notification delivery
pub struct ProtocolEngine {
    radio: Box<dyn Radio>,
    config: BleConfig,
    state: ConnectionState,
    conn: Option<ConnHandle>,
    advertising_needed: bool,
    last_retry: Option<u64>,
}

impl ProtocolEngine {
    pub fn new(radio: Box<dyn Radio>, config: BleConfig) -> Self {
        let advertising_needed = config.enabled;
        Self {
            radio,
            config,
            state: ConnectionState::Disconnected,
            conn: None,
            advertising_needed,
            last_retry: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// An advertising (re)start has been requested and not yet achieved
    pub fn advertising_needed(&self) -> bool {
        self.advertising_needed
    }

    pub fn conn_handle(&self) -> Option<ConnHandle> {
        self.conn
    }

    /// Starts advertising if disconnected and enough memory is free
    #[instrument(skip(self, memory))]
    pub fn start_advertising(&mut self, memory: &dyn MemoryMonitor) -> AdvertiseOutcome {
        if !self.config.enabled || self.state != ConnectionState::Disconnected {
            return AdvertiseOutcome::Skipped;
        }

        let free = memory.free_bytes();
        if free < self.config.min_free_memory {
            warn!(
                "Deferring advertising: {} bytes free, need {}",
                free, self.config.min_free_memory
            );
            self.advertising_needed = true;
            return AdvertiseOutcome::Deferred;
        }

        match self
            .radio
            .start_advertising(&self.config.device_name, self.config.adv_interval_us)
        {
            Ok(()) => {
                info!("Advertising as '{}'", self.config.device_name);
                self.state = ConnectionState::Advertising;
                self.advertising_needed = false;
                AdvertiseOutcome::Started
            }
            Err(e) => {
                error!("BLE advertising failed: {}", e);
                self.state = ConnectionState::Disconnected;
                self.advertising_needed = true;
                AdvertiseOutcome::Failed
            }
        }
    }

    /// Periodic task: retries advertising at the configured interval while
    /// disconnected. Returns `None` when it did not run.
    pub fn retry_advertising(
        &mut self,
        now_ms: u64,
        memory: &dyn MemoryMonitor,
    ) -> Option<AdvertiseOutcome> {
        if let Some(last) = self.last_retry {
            if now_ms.saturating_sub(last) < self.config.restart_check_interval_ms {
                return None;
            }
        }
        self.last_retry = Some(now_ms);

        if !self.advertising_needed || self.state != ConnectionState::Disconnected {
            return None;
        }
        debug!("Retrying advertising");
        Some(self.start_advertising(memory))
    }

    /// Entry point for every radio event
    pub fn handle_event(&mut self, event: RadioEvent, state: &mut ControllerState) {
        match event {
            RadioEvent::Connected(handle) => self.on_connect(handle, state),
            RadioEvent::Disconnected(handle) => self.on_disconnect(handle),
            RadioEvent::Write {
                characteristic,
                data,
            } => self.handle_write(characteristic, &data, state),
        }
    }

    /// Records the peer and synchronises it with a full notification set
    #[instrument(skip(self, state))]
    pub fn on_connect(&mut self, handle: ConnHandle, state: &mut ControllerState) {
        info!("Connected (handle: {})", handle);
        self.conn = Some(handle);
        self.state = ConnectionState::Connected;
        self.advertising_needed = false;

        self.notify(&settings_notification(state));
        self.notify(&Notification::Environment(state.environment));
        self.notify(&memory_notification(state));
        self.notify(&Notification::Time(state.services.rtc.now()));
        self.notify(&status_notification(state));
    }

    #[instrument(skip(self))]
    pub fn on_disconnect(&mut self, handle: ConnHandle) {
        info!("Disconnected (handle: {})", handle);
        self.drop_connection();
    }

    /// Decodes and executes one characteristic write. Malformed or rejected
    /// commands are answered with an invalid-command notification.
    #[instrument(skip(self, data, state), fields(len = data.len()))]
    pub fn handle_write(
        &mut self,
        characteristic: Characteristic,
        data: &[u8],
        state: &mut ControllerState,
    ) {
        let command = match Command::decode(characteristic, data) {
            Ok(command) => command,
            Err(e) => {
                warn!("{}", e);
                self.notify(&Notification::InvalidCommand {
                    characteristic: characteristic.code(),
                    op: e.op,
                });
                return;
            }
        };

        debug!("Received {:?} on {}", command, characteristic);
        let characteristic = command.characteristic().code();
        let op = command.op();
        if let Err(e) = self.execute(command, state) {
            warn!("Command rejected: {}", e);
            self.notify(&Notification::InvalidCommand { characteristic, op });
        }
    }

    /// Applies a decoded command
    pub fn execute(&mut self, command: Command, state: &mut ControllerState) -> Result<()> {
        let ack = Notification::Ack {
            characteristic: command.characteristic().code(),
            op: command.op(),
        };
        let now = state.now_ms();
        let duration = state.fade.config().duration();

        match command {
            Command::SelectRecipe(index) => {
                let name = recipe_at(index)?;
                state.scheduler.set_manual_override(now);
                state.fade.set_recipe(name, duration)?;
                self.notify(&ack);
            }
            Command::CustomColor(color) => {
                state.scheduler.set_manual_override(now);
                state.fade.fade_to(color, duration);
                self.notify(&ack);
            }
            Command::LightsOff => {
                state.scheduler.set_manual_override(now);
                state.fade.set_recipe(recipes::OFF, duration)?;
                self.notify(&ack);
            }
            Command::LightsOn => {
                state.scheduler.set_manual_override(now);
                let active = state.scheduler.settings().active_recipe.clone();
                state.fade.set_recipe(&active, duration)?;
                self.notify(&ack);
            }
            Command::ToggleAutoCycle => {
                let enabled = !state.scheduler.settings().auto_cycle;
                state.scheduler.set_auto_cycle(enabled)?;
                if enabled {
                    state.tick_schedule(true);
                    self.notify(&Notification::AutoCycleEnabled);
                } else {
                    self.notify(&Notification::AutoCycleDisabled);
                }
            }
            Command::RequestStatus => {
                info!("Status requested, sending all status notifications");
                state.refresh_environment();
                self.push_status(state);
            }
            Command::SetActiveRecipe(index) => {
                let name = recipe_at(index)?;
                state.scheduler.set_active_recipe(name)?;
                self.notify(&Notification::ActiveRecipe(index));
            }
            Command::RequestLightStatus => {
                self.notify(&status_notification(state));
            }
            Command::SetClock(time) => {
                state.services.rtc.set(time);
                info!("RTC time set to {}", time);
                self.notify(&Notification::Time(state.services.rtc.now()));
            }
            Command::UploadSchedule { version, blocks } => {
                let minute = state.minute_of_day();
                state
                    .scheduler
                    .apply_uploaded_schedule(version, &blocks, now, minute, &mut state.fade)?;
                self.notify(&ack);
                self.notify(&schedule_notification(state));
            }
        }
        Ok(())
    }

    /// Sensor, memory, time and schedule notifications
    pub fn push_status(&mut self, state: &ControllerState) {
        self.notify(&Notification::Environment(state.environment));
        self.notify(&memory_notification(state));
        self.notify(&Notification::Time(state.services.rtc.now()));
        self.notify(&schedule_notification(state));
    }

    /// Best-effort delivery. A peer-gone fault forces the link down; any
    /// other fault drops the notification.
    pub fn notify(&mut self, notification: &Notification) -> bool {
        let Some(conn) = self.conn.filter(|_| self.is_connected()) else {
            trace!("Not connected, dropping {:?}", notification.code());
            return false;
        };

        let payload = notification.encode();
        match self
            .radio
            .notify(conn, notification.characteristic(), &payload)
        {
            Ok(()) => {
                trace!("Notified {} bytes on {}", payload.len(), notification.characteristic());
                true
            }
            Err(e) if e.is_peer_gone() => {
                warn!("Peer gone while notifying: {}", e);
                self.drop_connection();
                false
            }
            Err(e) => {
                warn!("Failed to notify {:?}: {}", notification.code(), e);
                false
            }
        }
    }

    fn drop_connection(&mut self) {
        self.conn = None;
        self.state = ConnectionState::Disconnected;
        self.advertising_needed = self.config.enabled;
    }
}

fn recipe_at(index: u8) -> Result<&'static str> {
    recipes::name_at(index)
        .ok_or_else(|| Error::InvalidCommand(format!("recipe index {} out of range", index)))
}

fn settings_notification(state: &ControllerState) -> Notification {
    let settings = state.scheduler.settings();
    Notification::Settings {
        auto_cycle: settings.auto_cycle,
        active_recipe: recipes::status_code(&settings.active_recipe),
    }
}

fn memory_notification(state: &ControllerState) -> Notification {
    Notification::Memory {
        free_bytes: state.services.memory.free_bytes(),
    }
}

fn status_notification(state: &ControllerState) -> Notification {
    Notification::Status {
        lights_on: state.fade.is_on(),
        recipe: recipes::status_code(state.fade.recipe_name()),
        color: state.fade.current(),
    }
}

fn schedule_notification(state: &ControllerState) -> Notification {
    let schedule = state.scheduler.schedule();
    Notification::Schedule {
        version: schedule.version,
        blocks: schedule.blocks.iter().map(WireBlock::from_block).collect(),
    }
}
