use serde::{Deserialize, Serialize};

use crate::error::GeometryError;

/// The 4x4 stereo reprojection matrix `Q`.
///
/// For a pixel `(x, y)` with disparity `d` the homogeneous point is
/// `Q * [x, y, d, 1]^T = [X, Y, Z, W]^T` and the metric point is
/// `(X / W, Y / W, Z / W)`. The matrix is stored row-major.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReprojectionMatrix(pub [[f32; 4]; 4]);

impl ReprojectionMatrix {
    /// Build the matrix from 16 row-major values.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::InvalidMatrixLength`] if `values` does not hold
    /// exactly 16 elements.
    ///
    /// # Example
    ///
    /// ```
    /// use phase_3d::reprojection::ReprojectionMatrix;
    ///
    /// let q = ReprojectionMatrix::from_slice(&[
    ///     1.0, 0.0, 0.0, -320.0,
    ///     0.0, 1.0, 0.0, -240.0,
    ///     0.0, 0.0, 0.0, 500.0,
    ///     0.0, 0.0, 10.0, 0.0,
    /// ]).unwrap();
    ///
    /// assert_eq!(q.0[2][3], 500.0);
    /// ```
    pub fn from_slice(values: &[f32]) -> Result<Self, GeometryError> {
        if values.len() != 16 {
            return Err(GeometryError::InvalidMatrixLength(values.len()));
        }

        let mut m = [[0.0; 4]; 4];
        for (row, chunk) in m.iter_mut().zip(values.chunks_exact(4)) {
            row.copy_from_slice(chunk);
        }
        Ok(Self(m))
    }

    /// Build the matrix of a rectified stereo pair.
    ///
    /// # Arguments
    ///
    /// * `focal` - The rectified focal length in pixels.
    /// * `cx` - The principal point column of the left camera.
    /// * `cy` - The principal point row of the left camera.
    /// * `cx_right` - The principal point column of the right camera.
    /// * `baseline` - The distance between the optical centres in metres.
    pub fn from_stereo(focal: f32, cx: f32, cy: f32, cx_right: f32, baseline: f32) -> Self {
        Self([
            [1.0, 0.0, 0.0, -cx],
            [0.0, 1.0, 0.0, -cy],
            [0.0, 0.0, 0.0, focal],
            [0.0, 0.0, 1.0 / baseline, -(cx - cx_right) / baseline],
        ])
    }

    /// Return the matrix as 16 row-major values.
    pub fn to_array(&self) -> [f32; 16] {
        let mut out = [0.0; 16];
        for (dst, row) in out.chunks_exact_mut(4).zip(self.0.iter()) {
            dst.copy_from_slice(row);
        }
        out
    }

    /// Return the matrix for images resized by `factor`.
    ///
    /// Resizing scales pixel coordinates and disparities alike, so only the
    /// translation column changes and the metric reconstruction is preserved.
    pub fn scaled(&self, factor: f32) -> Self {
        let mut m = self.0;
        for row in m.iter_mut() {
            row[3] *= factor;
        }
        Self(m)
    }

    /// Apply the matrix to a pixel and its disparity.
    ///
    /// Returns the homogeneous point `[X, Y, Z, W]`.
    #[inline]
    pub fn project(&self, x: f32, y: f32, d: f32) -> [f32; 4] {
        let m = &self.0;
        let mut out = [0.0; 4];
        for (o, row) in out.iter_mut().zip(m.iter()) {
            *o = row[0] * x + row[1] * y + row[2] * d + row[3];
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::ReprojectionMatrix;
    use crate::error::GeometryError;
    use approx::assert_relative_eq;

    #[test]
    fn from_slice_rejects_length() {
        assert_eq!(
            ReprojectionMatrix::from_slice(&[0.0; 9]),
            Err(GeometryError::InvalidMatrixLength(9))
        );
    }

    #[test]
    fn slice_round_trip() -> Result<(), GeometryError> {
        let values: Vec<f32> = (0..16).map(|v| v as f32).collect();
        let q = ReprojectionMatrix::from_slice(&values)?;
        assert_eq!(q.0[1][2], 6.0);
        assert_eq!(q.to_array().as_slice(), values.as_slice());
        Ok(())
    }

    #[test]
    fn stereo_depth() {
        // f = 500 px, baseline = 0.1 m, d = 25 px -> z = 2 m
        let q = ReprojectionMatrix::from_stereo(500.0, 320.0, 240.0, 320.0, 0.1);
        let [_, _, z, w] = q.project(100.0, 50.0, 25.0);
        assert_relative_eq!(z / w, 2.0, epsilon = 1e-5);
    }

    #[test]
    fn scaled_preserves_depth() {
        let q = ReprojectionMatrix::from_stereo(500.0, 320.0, 240.0, 310.0, 0.1);
        let half = q.scaled(0.5);

        let [x0, y0, z0, w0] = q.project(200.0, 100.0, 40.0);
        let [x1, y1, z1, w1] = half.project(100.0, 50.0, 20.0);

        assert_relative_eq!(z0 / w0, z1 / w1, epsilon = 1e-4);
        assert_relative_eq!(x0 / w0, x1 / w1, epsilon = 1e-4);
        assert_relative_eq!(y0 / w0, y1 / w1, epsilon = 1e-4);
    }
}
