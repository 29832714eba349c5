use fisheye_imgproc::chessboard::PatternSize;
use serde::{Deserialize, Serialize};

use crate::error::CalibrationError;

/// Physical layout of a planar checkerboard.
///
/// `rows` and `cols` count the interior corners, i.e. the points where four squares meet.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoardGeometry {
    rows: usize,
    cols: usize,
    square_size: f64,
}

impl Default for BoardGeometry {
    /// A board of 7x10 squares of 25 units, i.e. 6x9 interior corners.
    fn default() -> Self {
        Self {
            rows: 6,
            cols: 9,
            square_size: 25.0,
        }
    }
}

impl BoardGeometry {
    /// Create a board from its interior corner counts and square edge length.
    ///
    /// # Arguments
    ///
    /// * `rows` - The number of interior corner rows.
    /// * `cols` - The number of interior corner columns.
    /// * `square_size` - The edge length of one square, in world units.
    ///
    /// # Errors
    ///
    /// Returns [`CalibrationError::InvalidGeometry`] if a count is zero or the square size is
    /// not a finite positive number.
    pub fn new(rows: usize, cols: usize, square_size: f64) -> Result<Self, CalibrationError> {
        let board = Self {
            rows,
            cols,
            square_size,
        };
        board.validate()?;
        Ok(board)
    }

    /// Create a board from its square counts.
    ///
    /// A board of `rows x cols` squares has `(rows - 1) x (cols - 1)` interior corners.
    pub fn from_square_counts(
        rows: usize,
        cols: usize,
        square_size: f64,
    ) -> Result<Self, CalibrationError> {
        if rows < 2 || cols < 2 {
            return Err(CalibrationError::InvalidGeometry(format!(
                "a board of {rows}x{cols} squares has no interior corners"
            )));
        }
        Self::new(rows - 1, cols - 1, square_size)
    }

    /// Check the invariants of a board, e.g. after deserialization.
    pub fn validate(&self) -> Result<(), CalibrationError> {
        if self.rows == 0 || self.cols == 0 {
            return Err(CalibrationError::InvalidGeometry(format!(
                "interior corner counts must be positive, got {}x{}",
                self.rows, self.cols
            )));
        }
        if !self.square_size.is_finite() || self.square_size <= 0.0 {
            return Err(CalibrationError::InvalidGeometry(format!(
                "square size must be finite and positive, got {}",
                self.square_size
            )));
        }
        Ok(())
    }

    /// The number of interior corner rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// The number of interior corner columns.
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// The edge length of one square.
    pub fn square_size(&self) -> f64 {
        self.square_size
    }

    /// The number of interior corners.
    pub fn num_points(&self) -> usize {
        self.rows * self.cols
    }

    /// The corner pattern searched by the detector.
    pub fn pattern(&self) -> PatternSize {
        PatternSize::new(self.rows, self.cols)
    }

    /// Corner positions on the board plane, in row-major order.
    ///
    /// The corner at `(row, col)` is `(col * square_size, row * square_size, 0)`.
    pub fn object_points(&self) -> Vec<[f64; 3]> {
        (0..self.rows)
            .flat_map(|r| {
                (0..self.cols).map(move |c| {
                    [c as f64 * self.square_size, r as f64 * self.square_size, 0.0]
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_points_layout() -> Result<(), CalibrationError> {
        let board = BoardGeometry::new(6, 9, 25.0)?;
        let points = board.object_points();
        assert_eq!(points.len(), 54);
        assert_eq!(points[0], [0.0, 0.0, 0.0]);
        assert_eq!(points[1], [25.0, 0.0, 0.0]);
        assert_eq!(points[9], [0.0, 25.0, 0.0]);
        assert_eq!(points[53], [200.0, 125.0, 0.0]);
        assert_eq!(board.pattern(), PatternSize::new(6, 9));
        Ok(())
    }

    #[test]
    fn square_counts() -> Result<(), CalibrationError> {
        let board = BoardGeometry::from_square_counts(7, 10, 1.0)?;
        assert_eq!((board.rows(), board.cols()), (6, 9));
        assert!(BoardGeometry::from_square_counts(1, 10, 1.0).is_err());
        Ok(())
    }

    #[test]
    fn default_board_is_valid() -> Result<(), CalibrationError> {
        let board = BoardGeometry::default();
        board.validate()?;
        assert_eq!(board, BoardGeometry::from_square_counts(7, 10, 25.0)?);
        Ok(())
    }

    #[test]
    fn invalid_geometry() {
        assert!(matches!(
            BoardGeometry::new(0, 9, 25.0),
            Err(CalibrationError::InvalidGeometry(_))
        ));
        assert!(matches!(
            BoardGeometry::new(6, 9, 0.0),
            Err(CalibrationError::InvalidGeometry(_))
        ));
        assert!(matches!(
            BoardGeometry::new(6, 9, f64::NAN),
            Err(CalibrationError::InvalidGeometry(_))
        ));
    }
}
