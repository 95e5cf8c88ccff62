//! Binary BLE protocol shared by the controller and its clients.
//!
//! Commands arrive as writes on one of four characteristics; the first
//! byte of a Control write is the op code. Replies and status pushes go out
//! as notifications on the Control characteristic, each prefixed with a
//! schema code. Environment readings are pushed as a CSV string on the
//! Sensor characteristic. Multi-byte integers are little-endian.

use std::fmt;

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use thiserror::Error;
use uuid::Uuid;

use crate::color::Color;
use crate::hal::EnvironmentReading;
use crate::schedule::WireBlock;

/// Light service
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x19b10000_e8f2_537e_4f6c_d104768a1214);

// ---------------------------------------------------------------------------
// Control op codes (client → controller)
// ---------------------------------------------------------------------------

pub const OP_LIGHTS_OFF: u8 = 0;
pub const OP_LIGHTS_ON: u8 = 1;
pub const OP_TOGGLE_AUTO_CYCLE: u8 = 2;
pub const OP_REQUEST_STATUS: u8 = 12;
pub const OP_SET_ACTIVE_RECIPE: u8 = 13;
pub const OP_REQUEST_LIGHT_STATUS: u8 = 14;
pub const OP_SET_CLOCK: u8 = 30;

// ---------------------------------------------------------------------------
// Notification codes (controller → client)
// ---------------------------------------------------------------------------

pub const NOTIFY_ACK: u8 = 100;
pub const NOTIFY_INVALID_COMMAND: u8 = 101;
pub const NOTIFY_AUTO_CYCLE_ENABLED: u8 = 102;
pub const NOTIFY_AUTO_CYCLE_DISABLED: u8 = 103;
pub const NOTIFY_SETTINGS: u8 = 112;
pub const NOTIFY_ACTIVE_RECIPE: u8 = 113;
pub const NOTIFY_STATUS: u8 = 120;
pub const NOTIFY_MEMORY: u8 = 121;
pub const NOTIFY_TIME: u8 = 131;
pub const NOTIFY_SCHEDULE: u8 = 140;

/// Placeholder for absent values in the environment CSV
const MISSING: &str = "N/A";

/// GATT characteristics of the light service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Characteristic {
    /// Write: recipe index
    Recipe,
    /// Write: four RGBW bytes
    Custom,
    /// Write/notify: op codes and all coded notifications
    Control,
    /// Write: schedule upload
    Schedule,
    /// Read/notify: environment CSV
    Sensor,
}

impl Characteristic {
    pub const ALL: [Characteristic; 5] = [
        Characteristic::Recipe,
        Characteristic::Custom,
        Characteristic::Control,
        Characteristic::Schedule,
        Characteristic::Sensor,
    ];

    /// Identifier used inside ack/error notifications
    pub fn code(self) -> u8 {
        match self {
            Characteristic::Recipe => 1,
            Characteristic::Custom => 2,
            Characteristic::Control => 3,
            Characteristic::Schedule => 4,
            Characteristic::Sensor => 5,
        }
    }

    pub fn uuid(self) -> Uuid {
        match self {
            Characteristic::Recipe => Uuid::from_u128(0x19b10001_e8f2_537e_4f6c_d104768a1214),
            Characteristic::Custom => Uuid::from_u128(0x19b10002_e8f2_537e_4f6c_d104768a1214),
            Characteristic::Control => Uuid::from_u128(0x19b10003_e8f2_537e_4f6c_d104768a1214),
            Characteristic::Schedule => Uuid::from_u128(0x19b10004_e8f2_537e_4f6c_d104768a1214),
            Characteristic::Sensor => Uuid::from_u128(0xa1b2c3d4_e5f6_4789_a0b1_c2d3e4f5a601),
        }
    }

    pub fn from_uuid(uuid: Uuid) -> Option<Characteristic> {
        Self::ALL.into_iter().find(|c| c.uuid() == uuid)
    }

    /// Parses the names used by the simulator console
    pub fn from_name(name: &str) -> Option<Characteristic> {
        match name.to_lowercase().as_str() {
            "recipe" => Some(Characteristic::Recipe),
            "custom" => Some(Characteristic::Custom),
            "control" => Some(Characteristic::Control),
            "schedule" => Some(Characteristic::Schedule),
            "sensor" => Some(Characteristic::Sensor),
            _ => None,
        }
    }
}

impl fmt::Display for Characteristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Characteristic::Recipe => "recipe",
            Characteristic::Custom => "custom",
            Characteristic::Control => "control",
            Characteristic::Schedule => "schedule",
            Characteristic::Sensor => "sensor",
        };
        f.write_str(name)
    }
}

/// A frame that could not be decoded
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed {characteristic} frame (op {op}): {reason}")]
pub struct DecodeError {
    pub characteristic: Characteristic,
    /// Control op, or 0 for characteristics without ops
    pub op: u8,
    pub reason: String,
}

impl DecodeError {
    fn new(characteristic: Characteristic, op: u8, reason: impl Into<String>) -> Self {
        Self {
            characteristic,
            op,
            reason: reason.into(),
        }
    }
}

/// A decoded client command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Select a catalog recipe by wire index
    SelectRecipe(u8),
    /// Show an arbitrary colour
    CustomColor(Color),
    LightsOff,
    /// Show the active recipe
    LightsOn,
    ToggleAutoCycle,
    /// Push sensor, memory, time and schedule notifications
    RequestStatus,
    /// Change the recipe used by [`Command::LightsOn`]
    SetActiveRecipe(u8),
    /// Push the instantaneous RGBW status
    RequestLightStatus,
    SetClock(NaiveDateTime),
    UploadSchedule { version: u8, blocks: Vec<WireBlock> },
}

impl Command {
    /// Parses a write on `characteristic`
    pub fn decode(characteristic: Characteristic, data: &[u8]) -> Result<Command, DecodeError> {
        match characteristic {
            Characteristic::Recipe => match data.first() {
                Some(&index) => Ok(Command::SelectRecipe(index)),
                None => Err(DecodeError::new(characteristic, 0, "empty recipe write")),
            },
            Characteristic::Custom => match data {
                [r, g, b, w] => Ok(Command::CustomColor(Color::new(*r, *g, *b, *w))),
                _ => Err(DecodeError::new(
                    characteristic,
                    0,
                    format!("expected 4 colour bytes, got {}", data.len()),
                )),
            },
            Characteristic::Control => Self::decode_control(data),
            Characteristic::Schedule => Self::decode_schedule(data),
            Characteristic::Sensor => Err(DecodeError::new(
                characteristic,
                0,
                "sensor characteristic is read-only",
            )),
        }
    }

    fn decode_control(data: &[u8]) -> Result<Command, DecodeError> {
        let Some((&op, payload)) = data.split_first() else {
            return Err(DecodeError::new(Characteristic::Control, 0, "empty control write"));
        };
        let error = |reason: &str| DecodeError::new(Characteristic::Control, op, reason);

        match op {
            OP_LIGHTS_OFF => Ok(Command::LightsOff),
            OP_LIGHTS_ON => Ok(Command::LightsOn),
            OP_TOGGLE_AUTO_CYCLE => Ok(Command::ToggleAutoCycle),
            OP_REQUEST_STATUS => Ok(Command::RequestStatus),
            OP_SET_ACTIVE_RECIPE => payload
                .first()
                .map(|&index| Command::SetActiveRecipe(index))
                .ok_or_else(|| error("missing recipe index")),
            OP_REQUEST_LIGHT_STATUS => Ok(Command::RequestLightStatus),
            OP_SET_CLOCK => {
                if payload.len() < 8 {
                    return Err(error("clock payload needs 8 bytes"));
                }
                decode_datetime(payload)
                    .map(Command::SetClock)
                    .ok_or_else(|| error("invalid date or time"))
            }
            _ => Err(error("unknown op")),
        }
    }

    fn decode_schedule(data: &[u8]) -> Result<Command, DecodeError> {
        let error = |reason: String| DecodeError::new(Characteristic::Schedule, 0, reason);
        let [version, count, rest @ ..] = data else {
            return Err(error(format!("header needs 2 bytes, got {}", data.len())));
        };
        let count = *count as usize;
        if rest.len() < count * WireBlock::LEN {
            return Err(error(format!(
                "{} blocks need {} bytes, got {}",
                count,
                count * WireBlock::LEN,
                rest.len()
            )));
        }
        let blocks = rest
            .chunks_exact(WireBlock::LEN)
            .take(count)
            .map(|chunk| {
                let mut bytes = [0u8; WireBlock::LEN];
                bytes.copy_from_slice(chunk);
                WireBlock::from_bytes(bytes)
            })
            .collect();
        Ok(Command::UploadSchedule {
            version: *version,
            blocks,
        })
    }

    /// Characteristic this command is written to
    pub fn characteristic(&self) -> Characteristic {
        match self {
            Command::SelectRecipe(_) => Characteristic::Recipe,
            Command::CustomColor(_) => Characteristic::Custom,
            Command::UploadSchedule { .. } => Characteristic::Schedule,
            _ => Characteristic::Control,
        }
    }

    /// Control op code, 0 for the other characteristics
    pub fn op(&self) -> u8 {
        match self {
            Command::LightsOff => OP_LIGHTS_OFF,
            Command::LightsOn => OP_LIGHTS_ON,
            Command::ToggleAutoCycle => OP_TOGGLE_AUTO_CYCLE,
            Command::RequestStatus => OP_REQUEST_STATUS,
            Command::SetActiveRecipe(_) => OP_SET_ACTIVE_RECIPE,
            Command::RequestLightStatus => OP_REQUEST_LIGHT_STATUS,
            Command::SetClock(_) => OP_SET_CLOCK,
            Command::SelectRecipe(_) | Command::CustomColor(_) | Command::UploadSchedule { .. } => 0,
        }
    }

    /// Bytes to write to [`characteristic`](Self::characteristic)
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Command::SelectRecipe(index) => vec![*index],
            Command::CustomColor(color) => color.to_bytes().to_vec(),
            Command::SetActiveRecipe(index) => vec![OP_SET_ACTIVE_RECIPE, *index],
            Command::SetClock(time) => {
                let mut frame = vec![OP_SET_CLOCK];
                frame.extend_from_slice(&encode_datetime(time));
                frame
            }
            Command::UploadSchedule { version, blocks } => encode_blocks(*version, blocks),
            other => vec![other.op()],
        }
    }
}

/// A controller → client message
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Ack { characteristic: u8, op: u8 },
    InvalidCommand { characteristic: u8, op: u8 },
    AutoCycleEnabled,
    AutoCycleDisabled,
    Settings { auto_cycle: bool, active_recipe: u8 },
    ActiveRecipe(u8),
    /// `recipe` is a wire index or [`crate::recipes::CUSTOM_CODE`]
    Status { lights_on: bool, recipe: u8, color: Color },
    Memory { free_bytes: u32 },
    Time(NaiveDateTime),
    Schedule { version: u8, blocks: Vec<WireBlock> },
    Environment(EnvironmentReading),
}

impl Notification {
    pub fn characteristic(&self) -> Characteristic {
        match self {
            Notification::Environment(_) => Characteristic::Sensor,
            _ => Characteristic::Control,
        }
    }

    /// Schema code, `None` for the uncoded environment CSV
    pub fn code(&self) -> Option<u8> {
        let code = match self {
            Notification::Ack { .. } => NOTIFY_ACK,
            Notification::InvalidCommand { .. } => NOTIFY_INVALID_COMMAND,
            Notification::AutoCycleEnabled => NOTIFY_AUTO_CYCLE_ENABLED,
            Notification::AutoCycleDisabled => NOTIFY_AUTO_CYCLE_DISABLED,
            Notification::Settings { .. } => NOTIFY_SETTINGS,
            Notification::ActiveRecipe(_) => NOTIFY_ACTIVE_RECIPE,
            Notification::Status { .. } => NOTIFY_STATUS,
            Notification::Memory { .. } => NOTIFY_MEMORY,
            Notification::Time(_) => NOTIFY_TIME,
            Notification::Schedule { .. } => NOTIFY_SCHEDULE,
            Notification::Environment(_) => return None,
        };
        Some(code)
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Notification::Ack { characteristic, op } => vec![NOTIFY_ACK, *characteristic, *op],
            Notification::InvalidCommand { characteristic, op } => {
                vec![NOTIFY_INVALID_COMMAND, *characteristic, *op]
            }
            Notification::AutoCycleEnabled => vec![NOTIFY_AUTO_CYCLE_ENABLED],
            Notification::AutoCycleDisabled => vec![NOTIFY_AUTO_CYCLE_DISABLED],
            Notification::Settings {
                auto_cycle,
                active_recipe,
            } => vec![NOTIFY_SETTINGS, *auto_cycle as u8, *active_recipe],
            Notification::ActiveRecipe(index) => vec![NOTIFY_ACTIVE_RECIPE, *index],
            Notification::Status {
                lights_on,
                recipe,
                color,
            } => {
                let mut frame = vec![NOTIFY_STATUS, *lights_on as u8, *recipe];
                frame.extend_from_slice(&color.to_bytes());
                frame
            }
            Notification::Memory { free_bytes } => {
                let mut frame = vec![NOTIFY_MEMORY];
                frame.extend_from_slice(&free_bytes.to_le_bytes());
                frame
            }
            Notification::Time(time) => {
                let mut frame = vec![NOTIFY_TIME];
                frame.extend_from_slice(&encode_datetime(time));
                frame
            }
            Notification::Schedule { version, blocks } => {
                let mut frame = vec![NOTIFY_SCHEDULE];
                frame.extend(encode_blocks(*version, blocks));
                frame
            }
            Notification::Environment(reading) => encode_environment(reading).into_bytes(),
        }
    }

    /// Parses a notification received on `characteristic`
    pub fn decode(characteristic: Characteristic, data: &[u8]) -> Result<Notification, DecodeError> {
        if characteristic == Characteristic::Sensor {
            return decode_environment(data)
                .map(Notification::Environment)
                .ok_or_else(|| DecodeError::new(characteristic, 0, "malformed sensor CSV"));
        }

        let Some((&code, body)) = data.split_first() else {
            return Err(DecodeError::new(characteristic, 0, "empty notification"));
        };
        let short = || DecodeError::new(characteristic, code, "notification too short");

        let notification = match code {
            NOTIFY_ACK | NOTIFY_INVALID_COMMAND => {
                let [c, op, ..] = body else { return Err(short()) };
                if code == NOTIFY_ACK {
                    Notification::Ack { characteristic: *c, op: *op }
                } else {
                    Notification::InvalidCommand { characteristic: *c, op: *op }
                }
            }
            NOTIFY_AUTO_CYCLE_ENABLED => Notification::AutoCycleEnabled,
            NOTIFY_AUTO_CYCLE_DISABLED => Notification::AutoCycleDisabled,
            NOTIFY_SETTINGS => {
                let [auto, recipe, ..] = body else { return Err(short()) };
                Notification::Settings {
                    auto_cycle: *auto != 0,
                    active_recipe: *recipe,
                }
            }
            NOTIFY_ACTIVE_RECIPE => {
                let [recipe, ..] = body else { return Err(short()) };
                Notification::ActiveRecipe(*recipe)
            }
            NOTIFY_STATUS => {
                let [on, recipe, r, g, b, w, ..] = body else { return Err(short()) };
                Notification::Status {
                    lights_on: *on != 0,
                    recipe: *recipe,
                    color: Color::new(*r, *g, *b, *w),
                }
            }
            NOTIFY_MEMORY => {
                let [a, b, c, d, ..] = body else { return Err(short()) };
                Notification::Memory {
                    free_bytes: u32::from_le_bytes([*a, *b, *c, *d]),
                }
            }
            NOTIFY_TIME => {
                if body.len() < 8 {
                    return Err(short());
                }
                let time = decode_datetime(body).ok_or_else(|| {
                    DecodeError::new(characteristic, code, "invalid date or time")
                })?;
                Notification::Time(time)
            }
            NOTIFY_SCHEDULE => match Command::decode_schedule(body) {
                Ok(Command::UploadSchedule { version, blocks }) => {
                    Notification::Schedule { version, blocks }
                }
                _ => return Err(short()),
            },
            _ => return Err(DecodeError::new(characteristic, code, "unknown notification code")),
        };
        Ok(notification)
    }
}

fn encode_blocks(version: u8, blocks: &[WireBlock]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(2 + blocks.len() * WireBlock::LEN);
    frame.push(version);
    frame.push(blocks.len() as u8);
    for block in blocks {
        frame.extend_from_slice(&block.to_bytes());
    }
    frame
}

/// `[year u16][month][day][hour][minute][second][weekday, 0 = Sunday]`
fn encode_datetime(time: &NaiveDateTime) -> [u8; 8] {
    let year = (time.year().clamp(0, u16::MAX as i32) as u16).to_le_bytes();
    [
        year[0],
        year[1],
        time.month() as u8,
        time.day() as u8,
        time.hour() as u8,
        time.minute() as u8,
        time.second() as u8,
        time.weekday().num_days_from_sunday() as u8,
    ]
}

/// Inverse of [`encode_datetime`]; the weekday byte is implied by the date
fn decode_datetime(bytes: &[u8]) -> Option<NaiveDateTime> {
    let [y0, y1, month, day, hour, minute, second, ..] = bytes else {
        return None;
    };
    let year = u16::from_le_bytes([*y0, *y1]) as i32;
    NaiveDate::from_ymd_opt(year, *month as u32, *day as u32)?.and_hms_opt(
        *hour as u32,
        *minute as u32,
        *second as u32,
    )
}

/// `temperature,humidity,co2,pressure,lux`, one decimal, `N/A` when absent
pub fn encode_environment(reading: &EnvironmentReading) -> String {
    let decimal = |value: Option<f32>| match value {
        Some(v) => format!("{v:.1}"),
        None => MISSING.to_string(),
    };
    let co2 = match reading.co2_ppm {
        Some(v) => v.to_string(),
        None => MISSING.to_string(),
    };
    format!(
        "{},{},{},{},{}",
        decimal(reading.temperature_c),
        decimal(reading.humidity_pct),
        co2,
        decimal(reading.pressure_hpa),
        decimal(reading.lux)
    )
}

fn decode_environment(data: &[u8]) -> Option<EnvironmentReading> {
    let text = std::str::from_utf8(data).ok()?;
    let fields: Vec<&str> = text.trim().split(',').collect();
    let [temperature, humidity, co2, pressure, lux] = fields.as_slice() else {
        return None;
    };
    fn field<T: std::str::FromStr>(raw: &str) -> Option<Option<T>> {
        if raw == MISSING {
            Some(None)
        } else {
            raw.parse().ok().map(Some)
        }
    }
    Some(EnvironmentReading {
        temperature_c: field(temperature)?,
        humidity_pct: field(humidity)?,
        co2_ppm: field(co2)?,
        pressure_hpa: field(pressure)?,
        lux: field(lux)?,
    })
}
