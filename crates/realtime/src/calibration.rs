// Calibration flow.
//
// The viewer looks at each target in turn and clicks it; every click is
// recorded with the provider as a training sample. Finishing the last target
// is what allows a room connection.

use crate::provider::GazeProvider;
use abyss_core::{AbyssError, CalibrationConfig, CalibrationPoint};

pub const CLICK_LABEL: &str = "click";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationState {
    Uncalibrated,
    Calibrating { point: usize },
    Calibrated,
}

#[derive(Debug, Clone)]
pub struct Calibration {
    points: Vec<CalibrationPoint>,
    state: CalibrationState,
}

impl Calibration {
    pub fn new(config: &CalibrationConfig) -> Self {
        Self {
            points: config.points.clone(),
            state: CalibrationState::Uncalibrated,
        }
    }

    pub fn state(&self) -> CalibrationState {
        self.state
    }

    pub fn is_calibrated(&self) -> bool {
        self.state == CalibrationState::Calibrated
    }

    pub fn points(&self) -> &[CalibrationPoint] {
        &self.points
    }

    /// Target the viewer should click next
    pub fn current_point(&self) -> Option<CalibrationPoint> {
        match self.state {
            CalibrationState::Calibrating { point } => self.points.get(point).copied(),
            _ => None,
        }
    }

    /// Begin (or restart) the sequence, discarding earlier samples.
    pub fn start(&mut self, provider: &dyn GazeProvider) {
        provider.clear_data();
        self.state = CalibrationState::Calibrating { point: 0 };
        tracing::info!("Calibration started with {} points", self.points.len());
    }

    /// Throw away progress and samples, back to the first target.
    pub fn restart(&mut self, provider: &dyn GazeProvider) {
        tracing::info!("Calibration restarted from {:?}", self.state);
        self.start(provider);
    }

    /// Record a click at screen position (`x`, `y`) and advance.
    pub fn record(
        &mut self,
        provider: &dyn GazeProvider,
        x: f64,
        y: f64,
    ) -> Result<CalibrationState, AbyssError> {
        let CalibrationState::Calibrating { point } = self.state else {
            return Err(AbyssError::calibration(format!(
                "cannot record a sample while {:?}",
                self.state
            )));
        };

        provider.record_screen_position(x, y, CLICK_LABEL);
        self.state = if point + 1 < self.points.len() {
            CalibrationState::Calibrating { point: point + 1 }
        } else {
            tracing::info!("Calibration complete");
            CalibrationState::Calibrated
        };
        Ok(self.state)
    }
}
