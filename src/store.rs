/*!
 # Document persistence

 The schedule and settings documents are stored as JSON through a
 [`Storage`] backend. Loading never fails: anything unreadable or invalid
 is replaced by defaults, which are written back. Saving validates first and
 reports failure to the caller, who must not have touched its in-memory
 copy yet.
*/

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::hal::Storage;
use crate::recipes;
use crate::schedule::Schedule;
use crate::{Error, Result};

/// Persisted user settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Let the schedule drive the light
    pub auto_cycle: bool,
    /// Recipe used by the "lights on" command
    pub active_recipe: String,
}

impl Settings {
    fn validate(&self) -> Result<()> {
        if recipes::exists(&self.active_recipe) {
            Ok(())
        } else {
            Err(Error::UnknownRecipe(self.active_recipe.clone()))
        }
    }
}

/// Loads, validates and saves the schedule and settings documents
pub struct ScheduleStore {
    storage: Box<dyn Storage>,
    schedule_key: String,
    settings_key: String,
    max_blocks: usize,
    default_settings: Settings,
}

impl ScheduleStore {
    pub fn new(storage: Box<dyn Storage>, config: &Config) -> Self {
        Self {
            storage,
            schedule_key: config.storage.schedule_path.clone(),
            settings_key: config.storage.settings_path.clone(),
            max_blocks: config.schedule.max_blocks,
            default_settings: Settings {
                auto_cycle: config.defaults.auto_cycle,
                active_recipe: config.defaults.active_recipe.clone(),
            },
        }
    }

    pub fn max_blocks(&self) -> usize {
        self.max_blocks
    }

    /// Stored schedule, or an empty disabled one
    #[instrument(skip(self))]
    pub fn load(&mut self) -> Schedule {
        match self.read_schedule() {
            Ok(Some(schedule)) => {
                info!("Schedule loaded with {} blocks", schedule.blocks.len());
                schedule
            }
            Ok(None) => {
                info!("No schedule stored, using defaults");
                self.restore(Schedule::default())
            }
            Err(e) => {
                warn!("Invalid schedule in storage ({}), using defaults", e);
                self.restore(Schedule::default())
            }
        }
    }

    /// Validates and writes `schedule`
    #[instrument(skip(self, schedule), fields(blocks = schedule.blocks.len()))]
    pub fn save(&mut self, schedule: &Schedule) -> Result<()> {
        schedule.validate(self.max_blocks)?;
        let document = serde_json::to_string(schedule)?;
        self.storage.write(&self.schedule_key, &document)?;
        info!("Schedule saved with {} blocks", schedule.blocks.len());
        Ok(())
    }

    /// Stored settings, or the configured defaults
    #[instrument(skip(self))]
    pub fn load_settings(&mut self) -> Settings {
        match self.read_settings() {
            Ok(Some(settings)) => {
                debug!("Settings loaded: {:?}", settings);
                settings
            }
            Ok(None) => {
                info!("No settings stored, using defaults");
                self.restore_settings()
            }
            Err(e) => {
                warn!("Invalid settings in storage ({}), using defaults", e);
                self.restore_settings()
            }
        }
    }

    /// Validates and writes `settings`
    #[instrument(skip(self))]
    pub fn save_settings(&mut self, settings: &Settings) -> Result<()> {
        settings.validate()?;
        let document = serde_json::to_string(settings)?;
        self.storage.write(&self.settings_key, &document)?;
        debug!("Settings saved");
        Ok(())
    }

    fn read_schedule(&self) -> Result<Option<Schedule>> {
        let Some(document) = self.storage.read(&self.schedule_key)? else {
            return Ok(None);
        };
        let schedule: Schedule = serde_json::from_str(&document)?;
        schedule.validate(self.max_blocks)?;
        Ok(Some(schedule))
    }

    fn read_settings(&self) -> Result<Option<Settings>> {
        let Some(document) = self.storage.read(&self.settings_key)? else {
            return Ok(None);
        };
        let settings: Settings = serde_json::from_str(&document)?;
        settings.validate()?;
        Ok(Some(settings))
    }

    fn restore(&mut self, schedule: Schedule) -> Schedule {
        if let Err(e) = self.save(&schedule) {
            warn!("Could not rewrite default schedule: {}", e);
        }
        schedule
    }

    fn restore_settings(&mut self) -> Settings {
        let mut settings = self.default_settings.clone();
        if !recipes::exists(&settings.active_recipe) {
            warn!(
                "Configured default recipe '{}' is not in the catalog",
                settings.active_recipe
            );
            settings.active_recipe = recipes::OFF.into();
        }
        if let Err(e) = self.save_settings(&settings) {
            warn!("Could not rewrite default settings: {}", e);
        }
        settings
    }
}

/// Documents as files under a directory. Writes go through a temporary file
/// and a rename so a document is never half-written.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl Storage for FileStorage {
    fn read(&self, key: &str) -> io::Result<Option<String>> {
        match std::fs::read_to_string(self.path(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write(&mut self, key: &str, contents: &str) -> io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        let target = self.path(key);
        let staging = self.path(&format!("{key}.tmp"));
        std::fs::write(&staging, contents)?;
        std::fs::rename(&staging, &target)
    }
}

#[derive(Debug, Default)]
struct MemoryDocuments {
    documents: HashMap<String, String>,
    fail_writes: bool,
    writes: usize,
}

/// In-memory storage. Clones share the same documents, which lets a caller
/// keep a handle after giving one to a [`ScheduleStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryDocuments>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw contents of `key`
    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.lock().documents.get(key).cloned()
    }

    /// Replaces `key` without going through a store
    pub fn put(&self, key: &str, contents: &str) {
        self.inner
            .lock()
            .documents
            .insert(key.to_string(), contents.to_string());
    }

    /// Makes every subsequent write fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.lock().fail_writes = fail;
    }

    /// Number of successful writes so far
    pub fn writes(&self) -> usize {
        self.inner.lock().writes
    }
}

impl Storage for MemoryStorage {
    fn read(&self, key: &str) -> io::Result<Option<String>> {
        Ok(self.get(key))
    }

    fn write(&mut self, key: &str, contents: &str) -> io::Result<()> {
        let mut inner = self.inner.lock();
        if inner.fail_writes {
            return Err(io::Error::new(io::ErrorKind::Other, "storage is read-only"));
        }
        inner.documents.insert(key.to_string(), contents.to_string());
        inner.writes += 1;
        Ok(())
    }
}
