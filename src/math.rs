//! Checked linear-algebra helpers on top of glam.

use glam::{Mat3, Mat4, Vec3};
use thiserror::Error;

/// Errors from the fallible matrix operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MathError {
    #[error("matrix is singular (zero determinant) and cannot be inverted")]
    SingularMatrix,
}

/// Inverts a matrix, failing on a zero determinant.
///
/// Degenerate transforms (for example a zero scale axis) produce an exactly
/// zero determinant, which is the case this guards against. Near-singular
/// matrices still invert and are the caller's numerical concern.
pub fn try_invert(m: &Mat4) -> Result<Mat4, MathError> {
    if m.determinant() == 0.0 {
        return Err(MathError::SingularMatrix);
    }
    Ok(m.inverse())
}

/// Computes the normal matrix: the inverse-transpose of the top-left 3x3 of
/// a world matrix. Falls back to identity when the world matrix is singular,
/// since transform propagation has no error channel.
pub fn normal_matrix(world: &Mat4) -> Mat3 {
    let linear = Mat3::from_mat4(*world);
    if linear.determinant() == 0.0 {
        return Mat3::IDENTITY;
    }
    linear.inverse().transpose()
}

/// Builds an orthonormal basis with columns (right, up, forward) where
/// forward points from `target` towards `eye`.
///
/// Degenerate inputs are repaired rather than rejected: a zero view
/// direction falls back to +Z, and an up vector collinear with the view
/// direction nudges the direction before re-crossing.
pub fn look_at_basis(eye: Vec3, target: Vec3, up: Vec3) -> Mat3 {
    let mut dir = (eye - target).normalize_or_zero();
    if dir.length_squared() == 0.0 {
        dir.z = 1.0;
    }

    let mut right = up.cross(dir).normalize_or_zero();
    if right.length_squared() == 0.0 {
        dir.z += 0.1;
        right = up.cross(dir).normalize_or_zero();
    }

    let basis_up = dir.cross(right).normalize_or_zero();

    Mat3::from_cols(right, basis_up, dir)
}

/// Perspective projection with OpenGL clip-space conventions (fov in
/// degrees, right-handed, -1..1 depth).
pub fn perspective(fov_y_degrees: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
    Mat4::perspective_rh_gl(fov_y_degrees.to_radians(), aspect, near, far)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;

    fn assert_mat4_close(a: &Mat4, b: &Mat4, eps: f32) {
        for (x, y) in a
            .to_cols_array()
            .iter()
            .zip(b.to_cols_array().iter())
        {
            assert!((x - y).abs() < eps, "{a:?} vs {b:?}");
        }
    }

    #[test]
    fn invert_round_trips() {
        let m = Mat4::from_scale_rotation_translation(
            Vec3::new(2.0, 1.0, 0.5),
            Quat::from_rotation_y(0.7),
            Vec3::new(3.0, -2.0, 10.0),
        );
        let twice = try_invert(&try_invert(&m).unwrap()).unwrap();
        assert_mat4_close(&twice, &m, 1e-5);
    }

    #[test]
    fn invert_rejects_singular() {
        let flat = Mat4::from_scale(Vec3::new(1.0, 0.0, 1.0));
        assert_eq!(try_invert(&flat), Err(MathError::SingularMatrix));
    }

    #[test]
    fn normal_matrix_of_singular_world_is_identity() {
        let flat = Mat4::from_scale(Vec3::new(0.0, 1.0, 1.0));
        assert_eq!(normal_matrix(&flat), Mat3::IDENTITY);
    }

    #[test]
    fn normal_matrix_undoes_nonuniform_scale() {
        // Scaling Y by 2 must scale Y normals by 1/2 so they stay
        // perpendicular after renormalisation.
        let world = Mat4::from_scale(Vec3::new(1.0, 2.0, 1.0));
        let n = normal_matrix(&world);
        let bent = n * Vec3::new(0.0, 1.0, 0.0);
        assert!((bent.y - 0.5).abs() < 1e-6);
    }

    #[test]
    fn look_at_faces_target() {
        let basis = look_at_basis(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y);
        // Eye straight down +Z: forward is +Z, right is +X, up is +Y.
        assert!((basis.z_axis - Vec3::Z).length() < 1e-6);
        assert!((basis.x_axis - Vec3::X).length() < 1e-6);
        assert!((basis.y_axis - Vec3::Y).length() < 1e-6);
    }

    #[test]
    fn look_at_handles_coincident_eye_and_target() {
        let basis = look_at_basis(Vec3::ZERO, Vec3::ZERO, Vec3::Y);
        // Falls back to looking down +Z.
        assert!((basis.z_axis - Vec3::Z).length() < 1e-6);
    }
}
