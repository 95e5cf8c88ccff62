/*!
 # PicoLight Controller Core

 The control plane of a BLE-attached RGBW grow-light controller.
 It fades an addressable light strip between colour recipes, evaluates a
 multi-block daily schedule, suspends the schedule after manual commands,
 and speaks a compact binary command/notification protocol over BLE.

 ## Features

 * RGBW colour model and recipe catalog
 * Smooth and instant colour transitions with watchdog/memory obligations
 * Multi-block daily schedule with midnight wraparound and last-wins overlap
 * Manual override window that resumes the schedule after a delay
 * Schedule and settings persistence with silent fallback to defaults
 * BLE connection state machine with memory-gated advertising retry
 * A host simulator (`picolightd`) and a BLE client CLI (`picolight`)

 ## Example

 ```rust,no_run
 use std::sync::Arc;
 use picolight::config::Config;
 use picolight::controller::Controller;
 use picolight::sim::{self, SimMemory, StdoutRadio};
 use picolight::store::{FileStorage, ScheduleStore};

 fn main() -> Result<(), picolight::Error> {
     let config = Config::default();
     let store = ScheduleStore::new(Box::new(FileStorage::new(".")), &config);
     let memory = Arc::new(SimMemory::new(64 * 1024));
     let mut controller = Controller::boot(
         config,
         sim::host_services(memory),
         Box::new(sim::LogActuator::default()),
         Box::new(sim::StaticSensor::default()),
         Box::new(StdoutRadio::default()),
         store,
     );
     controller.poll();
     Ok(())
 }
 ```
*/

use thiserror::Error;

/// Custom error types for the controller core and the BLE client
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or out-of-range command payload
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// Rejected schedule upload or stored schedule document
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// Recipe name not present in the catalog
    #[error("Unknown recipe: {0}")]
    UnknownRecipe(String),

    /// Persistence backend failure
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// Persisted document could not be (de)serialized
    #[error("Document error: {0}")]
    Document(#[from] serde_json::Error),

    /// Configuration file could not be parsed
    #[error("Config error: {0}")]
    Config(#[from] ron::error::SpannedError),

    /// Radio transport fault
    #[error(transparent)]
    Radio(#[from] hal::RadioError),

    /// No Bluetooth adapters found
    #[error("No Bluetooth adapters found")]
    NoBluetoothAdapters,

    /// No controller advertising the expected name was found
    #[error("No compatible light controller found")]
    NoCompatibleDevice,

    /// Failed to find required BLE characteristic
    #[error("Could not find required BLE characteristic: {0}")]
    CharacteristicNotFound(String),

    /// Command timeout
    #[error("Command timed out after {0} retries")]
    CommandTimeout(u8),

    /// Error from btleplug
    #[error(transparent)]
    BtlePlugError(#[from] btleplug::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

pub mod client;
pub mod color;
pub mod config;
pub mod controller;
pub mod fade;
pub mod hal;
pub mod peripheral;
pub mod protocol;
pub mod recipes;
pub mod schedule;
pub mod scheduler;
pub mod sim;
pub mod store;

// Re-export key types
pub use client::LightClient;
pub use color::Color;
pub use config::Config;
pub use controller::{Controller, ControllerState};
pub use fade::FadeEngine;
pub use peripheral::{ConnectionState, ProtocolEngine};
pub use protocol::{Characteristic, Command, Notification};
pub use recipes::{RECIPES, RECIPE_KEYS};
pub use schedule::{Schedule, ScheduleBlock};
pub use scheduler::ScheduleEngine;
