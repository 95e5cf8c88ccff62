/*!
 # Schedule engine

 Decides what the light should show right now. Evaluation is rate limited,
 suppressed while a manual override window is open or auto-cycle is off,
 and remembers a pending application so that nothing is lost while
 suppressed.
*/

use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::config::ScheduleConfig;
use crate::fade::FadeEngine;
use crate::recipes;
use crate::schedule::{Schedule, ScheduleBlock, WireBlock};
use crate::store::{ScheduleStore, Settings};
use crate::{Error, Result};

/// What a call to [`ScheduleEngine::tick`] did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Called again before the check interval elapsed
    RateLimited,
    /// Nothing to apply
    Unchanged,
    /// A change is pending but an override window is open
    Overridden,
    /// A change is pending but auto-cycle is off
    AutoCycleOff,
    /// The named recipe was applied
    Applied(String),
}

/// Multi-block schedule evaluation and override handling
pub struct ScheduleEngine {
    store: ScheduleStore,
    config: ScheduleConfig,
    schedule: Schedule,
    settings: Settings,
    /// Monotonic deadline of the manual override window
    override_until: Option<u64>,
    last_block: Option<ScheduleBlock>,
    /// The last evaluated block has not reached the light yet
    pending: bool,
    last_check: Option<u64>,
}

impl ScheduleEngine {
    /// Loads both documents from `store`, falling back to defaults
    pub fn new(mut store: ScheduleStore, config: ScheduleConfig) -> Self {
        let schedule = store.load();
        let settings = store.load_settings();
        Self {
            store,
            config,
            schedule,
            settings,
            override_until: None,
            last_block: None,
            pending: true,
            last_check: None,
        }
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The block that governs `minute`, if any
    pub fn current_block(&self, minute: u16) -> Option<&ScheduleBlock> {
        self.schedule.active_block(minute)
    }

    /// The block recorded by the most recent evaluation
    pub fn last_block(&self) -> Option<&ScheduleBlock> {
        self.last_block.as_ref()
    }

    /// True while automatic application is suppressed by a manual command
    pub fn override_active(&self, now_ms: u64) -> bool {
        self.override_until.is_some_and(|until| now_ms < until)
    }

    /// Opens the override window after a manual light change
    #[instrument(skip(self))]
    pub fn set_manual_override(&mut self, now_ms: u64) {
        if !self.config.resume_after_manual {
            return;
        }
        let delay_ms = self.config.resume_delay_secs * 1000;
        self.override_until = Some(now_ms + delay_ms);
        info!(
            "Manual override set, schedule paused for {}s",
            self.config.resume_delay_secs
        );
    }

    pub fn clear_override(&mut self) {
        if self.override_until.take().is_some() {
            debug!("Override window cleared");
            self.pending = true;
        }
    }

    /// Evaluates the schedule and applies it with the configured transition fade
    pub fn tick(&mut self, now_ms: u64, minute: u16, force: bool, fade: &mut FadeEngine) -> TickOutcome {
        let duration = self.config.transition_fade();
        self.tick_with(now_ms, minute, force, fade, duration)
    }

    /// Evaluates the schedule and applies it with an explicit fade duration.
    ///
    /// Unless `force` is set, calls closer together than the configured
    /// check interval do nothing.
    #[instrument(skip(self, fade))]
    pub fn tick_with(
        &mut self,
        now_ms: u64,
        minute: u16,
        force: bool,
        fade: &mut FadeEngine,
        duration: Duration,
    ) -> TickOutcome {
        if !force {
            if let Some(last) = self.last_check {
                if now_ms.saturating_sub(last) < self.config.check_interval_ms {
                    return TickOutcome::RateLimited;
                }
            }
        }
        self.last_check = Some(now_ms);

        if let Some(until) = self.override_until {
            if now_ms >= until {
                info!("Manual override expired, resuming schedule");
                self.override_until = None;
                self.pending = true;
            }
        }

        let block = self.schedule.active_block(minute).cloned();
        if block != self.last_block {
            debug!(
                "Block change detected. Old: {:?}, New: {:?}",
                self.last_block, block
            );
            self.last_block = block;
            self.pending = true;
        }

        if !self.pending {
            return TickOutcome::Unchanged;
        }
        if self.override_active(now_ms) {
            debug!("Schedule change pending behind manual override");
            return TickOutcome::Overridden;
        }
        if !self.settings.auto_cycle {
            return TickOutcome::AutoCycleOff;
        }

        let recipe = self
            .last_block
            .as_ref()
            .map(|block| block.recipe.clone())
            .unwrap_or_else(|| recipes::OFF.to_string());
        self.pending = false;

        if fade.recipe_name() == recipe {
            debug!("Recipe '{}' already showing", recipe);
            return TickOutcome::Unchanged;
        }
        info!("Schedule applying recipe '{}'", recipe);
        if let Err(e) = fade.set_recipe(&recipe, duration) {
            warn!("Schedule could not apply '{}': {}", recipe, e);
            return TickOutcome::Unchanged;
        }
        TickOutcome::Applied(recipe)
    }

    /// Replaces the schedule with an uploaded one.
    ///
    /// The upload is validated and persisted before anything in memory
    /// changes; the new schedule is then force-evaluated.
    #[instrument(skip(self, blocks, fade), fields(count = blocks.len()))]
    pub fn apply_uploaded_schedule(
        &mut self,
        version: u8,
        blocks: &[WireBlock],
        now_ms: u64,
        minute: u16,
        fade: &mut FadeEngine,
    ) -> Result<TickOutcome> {
        if blocks.len() > self.store.max_blocks() {
            return Err(Error::InvalidSchedule(format!(
                "{} blocks exceeds maximum of {}",
                blocks.len(),
                self.store.max_blocks()
            )));
        }
        let blocks = blocks
            .iter()
            .map(|block| block.to_block())
            .collect::<Result<Vec<_>>>()?;
        let schedule = Schedule::new(version, blocks);

        self.store.save(&schedule)?;
        info!(
            "New schedule v{} installed with {} blocks",
            version,
            schedule.blocks.len()
        );
        self.schedule = schedule;
        Ok(self.tick(now_ms, minute, true, fade))
    }

    /// Turns schedule-driven changes on or off and persists the choice
    #[instrument(skip(self))]
    pub fn set_auto_cycle(&mut self, enabled: bool) -> Result<()> {
        let settings = Settings {
            auto_cycle: enabled,
            ..self.settings.clone()
        };
        self.store.save_settings(&settings)?;
        self.settings = settings;
        if enabled {
            self.clear_override();
            self.pending = true;
        }
        info!("Auto-cycle {}", if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    /// Changes the recipe used by "lights on" and persists it
    #[instrument(skip(self))]
    pub fn set_active_recipe(&mut self, name: &str) -> Result<()> {
        let settings = Settings {
            active_recipe: name.to_string(),
            ..self.settings.clone()
        };
        self.store.save_settings(&settings)?;
        self.settings = settings;
        info!("Active recipe set to '{}'", name);
        Ok(())
    }
}
