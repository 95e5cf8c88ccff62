/*!
 # Fade engine

 Owns the pixel actuator and the cached light state. Every colour change in
 the controller, manual or scheduled, goes through here.
*/

use std::time::Duration;

use tracing::{debug, info, instrument, trace, warn};

use crate::color::Color;
use crate::config::FadeConfig;
use crate::hal::{ActuatorError, PixelActuator, Services};
use crate::recipes;
use crate::{Error, Result};

/// Interpolates and commits colour transitions
pub struct FadeEngine {
    actuator: Box<dyn PixelActuator>,
    services: Services,
    config: FadeConfig,
    current: Color,
    recipe: &'static str,
}

impl FadeEngine {
    /// Creates an engine that assumes the strip is dark
    pub fn new(actuator: Box<dyn PixelActuator>, services: Services, config: FadeConfig) -> Self {
        Self {
            actuator,
            services,
            config,
            current: Color::OFF,
            recipe: recipes::OFF,
        }
    }

    /// Last colour committed (or attempted) to the strip
    pub fn current(&self) -> Color {
        self.current
    }

    /// Catalog name of the current colour, `"custom"` if it matches none
    pub fn recipe_name(&self) -> &'static str {
        self.recipe
    }

    /// True unless the strip is dark
    pub fn is_on(&self) -> bool {
        !self.current.is_off()
    }

    pub fn config(&self) -> &FadeConfig {
        &self.config
    }

    /// Writes `color` to every pixel unless it is already showing.
    ///
    /// Returns `false` on the no-op fast path.
    #[instrument(skip(self))]
    pub fn set_immediate(&mut self, color: Color) -> bool {
        if color == self.current {
            trace!("Colour unchanged, skipping write");
            return false;
        }

        self.services.watchdog.feed();
        if let Err(e) = self.write(color) {
            warn!("Immediate colour write failed: {}", e);
        }
        self.remember(color);
        debug!("Colour set to {} ({})", color, self.recipe);
        true
    }

    /// Transitions from the current colour to `target` over `duration`.
    ///
    /// Short durations and no-change targets collapse into
    /// [`set_immediate`](Self::set_immediate). The fade always runs to
    /// completion; the final step commits `target` exactly.
    #[instrument(skip(self))]
    pub fn fade_to(&mut self, target: Color, duration: Duration) {
        if duration.as_secs_f32() < self.config.instant_threshold_secs || self.current == target {
            self.set_immediate(target);
            return;
        }

        let start = self.current;
        let steps = ((duration.as_secs_f32() * self.config.steps_per_second as f32).floor()
            as u32)
            .max(1);
        let step_delay = duration / steps;
        let reclaim_every = self.config.reclaim_every_steps.max(1);
        debug!(
            "Fading {} -> {} in {} steps of {:?}",
            start, target, steps, step_delay
        );

        let mut failures = 0u32;
        for step in 0..=steps {
            let color = if step == steps {
                target
            } else {
                Color::interpolate(start, target, step, steps)
            };

            if let Err(e) = self.write(color) {
                failures += 1;
                trace!("Fade step {} write failed: {}", step, e);
            }
            self.services.watchdog.feed();

            if step > 0 && step % reclaim_every == 0 {
                self.services.memory.reclaim();
            }
            if step < steps {
                self.services.clock.sleep(step_delay);
            }
        }

        if failures > 0 {
            warn!("{} of {} fade steps failed to commit", failures, steps + 1);
        }
        self.remember(target);
        debug!("Fade complete at {} ({})", target, self.recipe);
    }

    /// Fades to a catalog recipe
    #[instrument(skip(self))]
    pub fn set_recipe(&mut self, name: &str, duration: Duration) -> Result<()> {
        let color = recipes::color_of(name).ok_or_else(|| Error::UnknownRecipe(name.into()))?;
        info!("Applying recipe '{}'", name);
        self.fade_to(color, duration);
        Ok(())
    }

    fn write(&mut self, color: Color) -> std::result::Result<(), ActuatorError> {
        self.actuator.set_pixels(color)?;
        self.actuator.commit()
    }

    fn remember(&mut self, color: Color) {
        self.current = color;
        self.recipe = recipes::name_for_color(color);
    }
}
