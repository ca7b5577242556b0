//! Rigid pose helpers on [`nalgebra::Isometry3`].
//!
//! Poses are rotation-then-translation isometries; composing `a * b` expresses `b` (given in
//! `a`'s local frame) in the frame `a` is expressed in.

use nalgebra::{Isometry3, Quaternion, Translation3, UnitQuaternion, Vector3};

/// Builds a pose from a translation and a `(w, x, y, z)` quaternion.
///
/// The quaternion is normalized. Returns `None` if it is (numerically) zero.
pub fn pose_from_parts(translation: [f64; 3], rotation_wxyz: [f64; 4]) -> Option<Isometry3<f64>> {
    let [w, x, y, z] = rotation_wxyz;
    let rotation = UnitQuaternion::try_new(Quaternion::new(w, x, y, z), f64::EPSILON)?;
    let [tx, ty, tz] = translation;
    Some(Isometry3::from_parts(Translation3::new(tx, ty, tz), rotation))
}

/// The `(w, x, y, z)` components of a pose's rotation.
pub fn rotation_wxyz(pose: &Isometry3<f64>) -> [f64; 4] {
    let q = pose.rotation.quaternion();
    [q.w, q.i, q.j, q.k]
}

/// Composes transforms left to right: `[a, b, c]` gives `a * b * c`.
pub fn chain_transforms(transforms: &[Isometry3<f64>]) -> Isometry3<f64> {
    transforms
        .iter()
        .fold(Isometry3::identity(), |acc, tf| acc * tf)
}

/// Heading of the pose about the vertical axis, `atan2(R[1,0], R[0,0])`.
pub fn yaw(pose: &Isometry3<f64>) -> f64 {
    let rotation = pose.rotation.to_rotation_matrix();
    let m = rotation.matrix();
    m[(1, 0)].atan2(m[(0, 0)])
}

/// Flattens a pose onto the ground plane.
///
/// Roll and pitch are dropped, yaw and x/y are kept. `z` is replaced by `fixed_z` when given,
/// otherwise the live z of `pose` is kept.
pub fn planar_pose(pose: &Isometry3<f64>, fixed_z: Option<f64>) -> Isometry3<f64> {
    let t = pose.translation.vector;
    let z = fixed_z.unwrap_or(t.z);
    let rotation = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), yaw(pose));
    Isometry3::from_parts(Translation3::new(t.x, t.y, z), rotation)
}
