use fisheye_imgproc::chessboard::DetectorParams;
use fisheye_imgproc::subpix::{SubpixConfig, TermCriteria};
use serde::{Deserialize, Serialize};

use crate::board::BoardGeometry;
use crate::calibrate::{default_criteria, CalibrationFlags};
use crate::error::CalibrationError;

/// Settings of a complete calibration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// The checkerboard layout.
    pub board: BoardGeometry,
    /// Parameters of the corner detector.
    pub detector: DetectorParams,
    /// Parameters of the sub-pixel refinement.
    pub subpix: SubpixConfig,
    /// Which parameters the solver estimates.
    pub flags: CalibrationFlags,
    /// Termination criteria of the solver.
    pub criteria: TermCriteria,
    /// Trade-off between cropping (0) and keeping the full field of view (1).
    pub balance: f64,
    /// Divisor of the focal length of the undistorted view.
    pub fov_scale: f64,
    /// Minimum number of images with a detected board.
    pub min_images: usize,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            board: BoardGeometry::default(),
            detector: DetectorParams::default(),
            subpix: SubpixConfig::default(),
            flags: CalibrationFlags::default(),
            criteria: default_criteria(),
            balance: 1.0,
            fov_scale: 1.0,
            min_images: 1,
        }
    }
}

impl CalibrationConfig {
    /// Create a configuration with default settings for the given board.
    pub fn new(board: BoardGeometry) -> Self {
        Self {
            board,
            ..Default::default()
        }
    }

    /// Set the solver flags.
    pub fn with_flags(mut self, flags: CalibrationFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set the sub-pixel refinement parameters.
    pub fn with_subpix(mut self, subpix: SubpixConfig) -> Self {
        self.subpix = subpix;
        self
    }

    /// Set the corner detector parameters.
    pub fn with_detector(mut self, detector: DetectorParams) -> Self {
        self.detector = detector;
        self
    }

    /// Set the balance of the undistorted view.
    pub fn with_balance(mut self, balance: f64) -> Self {
        self.balance = balance;
        self
    }

    /// Set the minimum number of accepted images.
    pub fn with_min_images(mut self, min_images: usize) -> Self {
        self.min_images = min_images;
        self
    }

    /// Check every setting before any image is processed.
    pub fn validate(&self) -> Result<(), CalibrationError> {
        self.board.validate()?;
        if self.board.rows() < 2 || self.board.cols() < 2 {
            return Err(CalibrationError::InvalidGeometry(format!(
                "the detector needs at least 2x2 interior corners, got {}x{}",
                self.board.rows(),
                self.board.cols()
            )));
        }

        let (wx, wy) = self.subpix.window;
        if wx == 0 || wy == 0 {
            return Err(CalibrationError::InvalidConfig(format!(
                "sub-pixel window half size must be positive, got ({wx}, {wy})"
            )));
        }
        if !(self.detector.ring_radius.is_finite() && self.detector.ring_radius > 0.0) {
            return Err(CalibrationError::InvalidConfig(format!(
                "detector ring radius must be positive, got {}",
                self.detector.ring_radius
            )));
        }
        if !(self.criteria.epsilon.is_finite() && self.criteria.epsilon >= 0.0) {
            return Err(CalibrationError::InvalidConfig(format!(
                "solver epsilon must be finite and non-negative, got {}",
                self.criteria.epsilon
            )));
        }
        if !self.balance.is_finite() {
            return Err(CalibrationError::InvalidConfig(format!(
                "balance must be finite, got {}",
                self.balance
            )));
        }
        if !(self.fov_scale.is_finite() && self.fov_scale > 0.0) {
            return Err(CalibrationError::InvalidConfig(format!(
                "fov scale must be finite and positive, got {}",
                self.fov_scale
            )));
        }
        if self.min_images == 0 {
            return Err(CalibrationError::InvalidConfig(
                "min_images must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() -> Result<(), CalibrationError> {
        let config = CalibrationConfig::default();
        config.validate()?;
        assert_eq!(config.subpix.window, (11, 11));
        assert_eq!(config.subpix.criteria.max_iterations, 30);
        assert_eq!(config.criteria.max_iterations, 100);
        assert_eq!(config.balance, 1.0);
        Ok(())
    }

    #[test]
    fn json_roundtrip() -> Result<(), Box<dyn std::error::Error>> {
        let config = CalibrationConfig::new(BoardGeometry::new(5, 8, 30.0)?)
            .with_balance(0.25)
            .with_min_images(4);
        let json = serde_json::to_string_pretty(&config)?;
        let back: CalibrationConfig = serde_json::from_str(&json)?;
        assert_eq!(back, config);
        Ok(())
    }

    #[test]
    fn partial_json_uses_defaults() -> Result<(), Box<dyn std::error::Error>> {
        let config: CalibrationConfig = serde_json::from_str(
            r#"{"board": {"rows": 0, "cols": 9, "square_size": 25.0}, "balance": 0.5}"#,
        )?;
        assert_eq!(config.balance, 0.5);
        assert_eq!(config.flags, CalibrationFlags::default());
        assert!(matches!(
            config.validate(),
            Err(CalibrationError::InvalidGeometry(_))
        ));
        Ok(())
    }

    #[test]
    fn invalid_settings() {
        let config = CalibrationConfig::default().with_min_images(0);
        assert!(matches!(
            config.validate(),
            Err(CalibrationError::InvalidConfig(_))
        ));
        let config = CalibrationConfig::default().with_balance(f64::NAN);
        assert!(config.validate().is_err());
        let config = CalibrationConfig::default()
            .with_subpix(SubpixConfig::default().with_window(0, 11));
        assert!(config.validate().is_err());
    }
}
