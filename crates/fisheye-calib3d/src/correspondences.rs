use fisheye_imgproc::chessboard::CornerSet;

use crate::board::BoardGeometry;
use crate::error::CalibrationError;

/// Image corners of the accepted views paired with the board points.
///
/// Every stored view has exactly as many corners as the board has points, in the same
/// row-major order, so the i-th corner of a view observes the i-th object point.
#[derive(Debug, Clone)]
pub struct CorrespondenceAccumulator {
    board: BoardGeometry,
    object_points: Vec<[f64; 3]>,
    image_points: Vec<Vec<[f64; 2]>>,
    sources: Vec<usize>,
}

impl CorrespondenceAccumulator {
    /// Create an empty accumulator for the given board.
    pub fn new(board: BoardGeometry) -> Self {
        Self {
            object_points: board.object_points(),
            board,
            image_points: Vec::new(),
            sources: Vec::new(),
        }
    }

    /// Add the corners of one image.
    ///
    /// # Arguments
    ///
    /// * `source` - The index of the image in the caller's input sequence.
    /// * `corners` - The refined corners of the image.
    ///
    /// # Errors
    ///
    /// Returns [`CalibrationError::CorrespondenceMismatch`] if the number of corners differs
    /// from the number of board points. Nothing is stored in that case.
    pub fn push(&mut self, source: usize, corners: &CornerSet) -> Result<(), CalibrationError> {
        self.push_points(source, corners.points().to_vec())
    }

    /// Add the corners of one image given as raw points in row-major order.
    pub fn push_points(
        &mut self,
        source: usize,
        points: Vec<[f64; 2]>,
    ) -> Result<(), CalibrationError> {
        if points.len() != self.object_points.len() {
            return Err(CalibrationError::CorrespondenceMismatch {
                image: source,
                corners: points.len(),
                object_points: self.object_points.len(),
            });
        }
        self.image_points.push(points);
        self.sources.push(source);
        Ok(())
    }

    /// The board the correspondences refer to.
    pub fn board(&self) -> &BoardGeometry {
        &self.board
    }

    /// The board points shared by all views.
    pub fn object_points(&self) -> &[[f64; 3]] {
        &self.object_points
    }

    /// The corners of the view at `index`.
    pub fn image_points(&self, index: usize) -> Option<&[[f64; 2]]> {
        self.image_points.get(index).map(Vec::as_slice)
    }

    /// Iterate over `(object_points, image_points)` pairs, one per view.
    pub fn views(&self) -> impl Iterator<Item = (&[[f64; 3]], &[[f64; 2]])> + '_ {
        self.image_points
            .iter()
            .map(|points| (self.object_points.as_slice(), points.as_slice()))
    }

    /// The input index of each accepted view.
    pub fn sources(&self) -> &[usize] {
        &self.sources
    }

    /// The number of accepted views.
    pub fn len(&self) -> usize {
        self.image_points.len()
    }

    /// Whether no view has been accepted.
    pub fn is_empty(&self) -> bool {
        self.image_points.is_empty()
    }

    /// The total number of observed points over all views.
    pub fn num_observations(&self) -> usize {
        self.len() * self.object_points.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fisheye_imgproc::chessboard::PatternSize;

    #[test]
    fn accumulate_three_views() -> Result<(), Box<dyn std::error::Error>> {
        let board = BoardGeometry::new(6, 9, 25.0)?;
        let mut acc = CorrespondenceAccumulator::new(board);
        for source in [0, 2, 5] {
            let points = (0..54)
                .map(|i| [(i % 9) as f64 * 10.0 + source as f64, (i / 9) as f64 * 10.0])
                .collect();
            acc.push(source, &CornerSet::new(PatternSize::new(6, 9), points)?)?;
        }

        assert_eq!(acc.len(), 3);
        assert_eq!(acc.sources(), &[0, 2, 5]);
        assert_eq!(acc.num_observations(), 162);
        for (object, image) in acc.views() {
            assert_eq!(object.len(), 54);
            assert_eq!(image.len(), 54);
            assert_eq!(object, acc.object_points());
        }
        Ok(())
    }

    #[test]
    fn mismatch_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let mut acc = CorrespondenceAccumulator::new(BoardGeometry::new(6, 9, 25.0)?);
        let corners = CornerSet::new(PatternSize::new(5, 9), vec![[0.0, 0.0]; 45])?;
        let res = acc.push(3, &corners);
        assert!(matches!(
            res,
            Err(CalibrationError::CorrespondenceMismatch {
                image: 3,
                corners: 45,
                object_points: 54
            })
        ));
        assert!(acc.is_empty());
        Ok(())
    }
}
