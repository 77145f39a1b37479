//! Frames, rotations and quaternions as expression graphs.
//!
//! Conventions:
//!
//! - Frames are 4×4 homogeneous transforms `a_T_b`; composition is
//!   [`Expression::matmul`].
//! - Points are `[x, y, z, 1]` and vectors `[x, y, z, 0]` (4×1).
//! - Quaternions are 4×1 in `(x, y, z, w)` order.  Unit norm is not enforced.
//! - Functions reading a rotation accept a 3×3 rotation or a 4×4 frame.
//! - Roll-pitch-yaw means `Rz(yaw) · Ry(pitch) · Rx(roll)`.
//!
//! Everything that branches does so through [`crate::conditionals`], so the
//! results stay differentiable almost everywhere.
//!
//! # Example
//!
//! ```rust
//! use std::collections::HashMap;
//! use kinesym_expr::{Scalar, geometry};
//!
//! let q = Scalar::symbol("q");
//! let tip_frame = geometry::frame_rpy(&0.0.into(), &0.0.into(), &0.0.into(),
//!                                      &0.0.into(), &0.0.into(), &q)
//!     .matmul(&geometry::translation3(1.0, 0.0, 0.0))
//!     .unwrap();
//! let tip = geometry::position_of(&tip_frame).unwrap();
//!
//! let values = tip.evaluate(&HashMap::from([("q", std::f64::consts::FRAC_PI_2)])).unwrap();
//! assert!(values[0].abs() < 1e-12 && (values[1] - 1.0).abs() < 1e-12);
//! ```

use std::f64::consts::{PI, TAU};

use crate::ExprError;
use crate::conditionals::{if_eq_zero, if_greater, if_greater_eq_zero, if_greater_zero, safe_division, select_with};
use crate::expression::Expression;
use crate::scalar::Scalar;

/// Gimbal-lock threshold used by [`rpy_from_matrix`].
const EPS: f64 = 4.0 * f64::EPSILON;

type Block3 = [[Scalar; 3]; 3];

// ────────────────────────────────────────────────────────────────────────────
// Shape helpers
// ────────────────────────────────────────────────────────────────────────────

fn zero() -> Scalar {
    Scalar::zero()
}

fn one() -> Scalar {
    Scalar::one()
}

/// Rotation block of a 3×3 or 4×4 matrix.
fn rotation_block(m: &Expression, operation: &'static str) -> Result<Block3, ExprError> {
    if !matches!(m.shape(), (3, 3) | (4, 4)) {
        return Err(ExprError::ShapeMismatch {
            operation,
            lhs: m.shape(),
            rhs: (4, 4),
        });
    }
    let (cols, entries) = (m.cols(), m.entries());
    Ok(std::array::from_fn(|r| std::array::from_fn(|c| entries[r * cols + c].clone())))
}

fn expect_frame(frame: &Expression, operation: &'static str) -> Result<(), ExprError> {
    if frame.shape() != (4, 4) {
        return Err(ExprError::ShapeMismatch {
            operation,
            lhs: frame.shape(),
            rhs: (4, 4),
        });
    }
    Ok(())
}

fn translation_part(frame: &Expression) -> Result<[Scalar; 3], ExprError> {
    Ok([
        frame.get(0, 3)?.clone(),
        frame.get(1, 3)?.clone(),
        frame.get(2, 3)?.clone(),
    ])
}

/// The first three entries of a 3- or 4-vector.
fn axis_part(axis: &Expression, operation: &'static str) -> Result<[Scalar; 3], ExprError> {
    if !axis.is_vector() || !(axis.len() == 3 || axis.len() == 4) {
        return Err(ExprError::ShapeMismatch {
            operation,
            lhs: axis.shape(),
            rhs: (3, 1),
        });
    }
    Ok([axis.at(0)?.clone(), axis.at(1)?.clone(), axis.at(2)?.clone()])
}

fn quaternion_part(q: &Expression, operation: &'static str) -> Result<[Scalar; 4], ExprError> {
    if !q.is_vector() || q.len() != 4 {
        return Err(ExprError::ShapeMismatch {
            operation,
            lhs: q.shape(),
            rhs: (4, 1),
        });
    }
    Ok([q.at(0)?.clone(), q.at(1)?.clone(), q.at(2)?.clone(), q.at(3)?.clone()])
}

fn homogeneous(r: Block3, p: [Scalar; 3]) -> Expression {
    let [[r00, r01, r02], [r10, r11, r12], [r20, r21, r22]] = r;
    let [x, y, z] = p;
    Expression::from_array([
        [r00, r01, r02, x],
        [r10, r11, r12, y],
        [r20, r21, r22, z],
        [zero(), zero(), zero(), one()],
    ])
}

// ────────────────────────────────────────────────────────────────────────────
// Points, vectors, frames
// ────────────────────────────────────────────────────────────────────────────

/// Homogeneous point `[x, y, z, 1]`.
pub fn point3(x: impl Into<Scalar>, y: impl Into<Scalar>, z: impl Into<Scalar>) -> Expression {
    Expression::column([x.into(), y.into(), z.into(), one()])
}

/// Homogeneous direction `[x, y, z, 0]`.
pub fn vector3(x: impl Into<Scalar>, y: impl Into<Scalar>, z: impl Into<Scalar>) -> Expression {
    Expression::column([x.into(), y.into(), z.into(), zero()])
}

/// Pure translation frame.
pub fn translation3(x: impl Into<Scalar>, y: impl Into<Scalar>, z: impl Into<Scalar>) -> Expression {
    homogeneous(identity_block(), [x.into(), y.into(), z.into()])
}

fn identity_block() -> Block3 {
    [[one(), zero(), zero()], [zero(), one(), zero()], [zero(), zero(), one()]]
}

fn rpy_block(roll: &Scalar, pitch: &Scalar, yaw: &Scalar) -> Block3 {
    let (sr, cr) = (roll.sin(), roll.cos());
    let (sp, cp) = (pitch.sin(), pitch.cos());
    let (sy, cy) = (yaw.sin(), yaw.cos());
    [
        [&cy * &cp, &cy * &sp * &sr - &sy * &cr, &cy * &sp * &cr + &sy * &sr],
        [&sy * &cp, &sy * &sp * &sr + &cy * &cr, &sy * &sp * &cr - &cy * &sr],
        [-&sp, &cp * &sr, &cp * &cr],
    ]
}

fn axis_angle_block(axis: &[Scalar; 3], angle: &Scalar) -> Block3 {
    let [ax, ay, az] = axis;
    let ct = angle.cos();
    let st = angle.sin();
    let vt = 1.0 - &ct;
    let (vt0, vt1, vt2) = (&vt * ax, &vt * ay, &vt * az);
    let (st0, st1, st2) = (ax * &st, ay * &st, az * &st);
    let vt01 = &vt0 * ay;
    let vt02 = &vt0 * az;
    let vt12 = &vt1 * az;
    [
        [&ct + &vt0 * ax, -&st2 + &vt01, &st1 + &vt02],
        [&st2 + &vt01, &ct + &vt1 * ay, -&st0 + &vt12],
        [-&st1 + &vt02, &st0 + &vt12, &ct + &vt2 * az],
    ]
}

fn quaternion_block(x: &Scalar, y: &Scalar, z: &Scalar, w: &Scalar) -> Block3 {
    let (x2, y2, z2, w2) = (x * x, y * y, z * z, w * w);
    [
        [&w2 + &x2 - &y2 - &z2, 2.0 * x * y - 2.0 * w * z, 2.0 * x * z + 2.0 * w * y],
        [2.0 * x * y + 2.0 * w * z, &w2 - &x2 + &y2 - &z2, 2.0 * y * z - 2.0 * w * x],
        [2.0 * x * z - 2.0 * w * y, 2.0 * y * z + 2.0 * w * x, &w2 - &x2 - &y2 + &z2],
    ]
}

/// 4×4 rotation `Rz(yaw) · Ry(pitch) · Rx(roll)`.
pub fn rotation_matrix_from_rpy(roll: &Scalar, pitch: &Scalar, yaw: &Scalar) -> Expression {
    homogeneous(rpy_block(roll, pitch, yaw), [zero(), zero(), zero()])
}

/// 4×4 rotation of `angle` about a unit `axis` (3- or 4-vector).
pub fn rotation_matrix_from_axis_angle(axis: &Expression, angle: &Scalar) -> Result<Expression, ExprError> {
    let axis = axis_part(axis, "rotation_matrix_from_axis_angle")?;
    Ok(homogeneous(axis_angle_block(&axis, angle), [zero(), zero(), zero()]))
}

/// 4×4 rotation of a unit quaternion.
pub fn rotation_matrix_from_quaternion(x: &Scalar, y: &Scalar, z: &Scalar, w: &Scalar) -> Expression {
    homogeneous(quaternion_block(x, y, z, w), [zero(), zero(), zero()])
}

/// Frame with translation `(x, y, z)` and roll-pitch-yaw rotation.
pub fn frame_rpy(x: &Scalar, y: &Scalar, z: &Scalar, roll: &Scalar, pitch: &Scalar, yaw: &Scalar) -> Expression {
    homogeneous(rpy_block(roll, pitch, yaw), [x.clone(), y.clone(), z.clone()])
}

/// Frame with translation `(x, y, z)` and axis-angle rotation.
pub fn frame_axis_angle(
    x: &Scalar,
    y: &Scalar,
    z: &Scalar,
    axis: &Expression,
    angle: &Scalar,
) -> Result<Expression, ExprError> {
    let axis = axis_part(axis, "frame_axis_angle")?;
    Ok(homogeneous(axis_angle_block(&axis, angle), [x.clone(), y.clone(), z.clone()]))
}

/// Frame with translation `(x, y, z)` and quaternion rotation.
pub fn frame_quaternion(
    x: &Scalar,
    y: &Scalar,
    z: &Scalar,
    qx: &Scalar,
    qy: &Scalar,
    qz: &Scalar,
    qw: &Scalar,
) -> Expression {
    homogeneous(quaternion_block(qx, qy, qz, qw), [x.clone(), y.clone(), z.clone()])
}

/// `b_T_a` from `a_T_b`, using the transpose of the rotation block.
pub fn inverse_frame(frame: &Expression) -> Result<Expression, ExprError> {
    expect_frame(frame, "inverse_frame")?;
    let r = rotation_block(frame, "inverse_frame")?;
    let p = translation_part(frame)?;
    let rt: Block3 = std::array::from_fn(|i| std::array::from_fn(|j| r[j][i].clone()));
    let p_inv: [Scalar; 3] =
        std::array::from_fn(|i| -(&rt[i][0] * &p[0] + &rt[i][1] * &p[1] + &rt[i][2] * &p[2]));
    Ok(homogeneous(rt, p_inv))
}

/// Origin of `frame` as a 4×1 point.
pub fn position_of(frame: &Expression) -> Result<Expression, ExprError> {
    expect_frame(frame, "position_of")?;
    frame.block(0, 3, 4, 1)
}

/// Copy of `frame` with the rotation replaced by identity.
pub fn translation_of(frame: &Expression) -> Result<Expression, ExprError> {
    expect_frame(frame, "translation_of")?;
    Ok(homogeneous(identity_block(), translation_part(frame)?))
}

/// Copy of `frame` with the translation zeroed.
pub fn rotation_of(frame: &Expression) -> Result<Expression, ExprError> {
    expect_frame(frame, "rotation_of")?;
    Ok(homogeneous(rotation_block(frame, "rotation_of")?, [zero(), zero(), zero()]))
}

/// Angle of `b_R_c`, i.e. the rotation separating `a_R_b` and `a_R_c`.
///
/// The cosine is clamped to `[-1, 1]` before `acos` so floating-point
/// overshoot on identical rotations yields 0 instead of NaN.
pub fn rotation_distance(a_r_b: &Expression, a_r_c: &Expression) -> Result<Scalar, ExprError> {
    let difference = a_r_b.transpose().matmul(a_r_c)?;
    let cos = (difference.block(0, 0, 3, 3)?.trace()? - 1.0) / 2.0;
    Ok(cos.min(1.0).max(-1.0).acos())
}

// ────────────────────────────────────────────────────────────────────────────
// Axis-angle
// ────────────────────────────────────────────────────────────────────────────

/// `(cos angle, unnormalised axis)` of a rotation block.
fn axis_angle_raw(r: &Block3) -> (Scalar, [Scalar; 3]) {
    let cos = (&r[0][0] + &r[1][1] + &r[2][2] - 1.0) / 2.0;
    let x = &r[2][1] - &r[1][2];
    let y = &r[0][2] - &r[2][0];
    let z = &r[1][0] - &r[0][1];
    (cos, [x, y, z])
}

/// Normalise `v`, falling back to `+z` when it is exactly zero.
fn guarded_axis(v: [Scalar; 3]) -> Expression {
    let [x, y, z] = v;
    let n = (&x * &x + &y * &y + &z * &z).sqrt();
    let m = if_eq_zero(&n, &one(), &n);
    Expression::column([
        if_eq_zero(&n, &zero(), &(&x / &m)),
        if_eq_zero(&n, &zero(), &(&y / &m)),
        if_eq_zero(&n, &one(), &(&z / &m)),
    ])
}

fn fast_axis_angle(r: &Block3) -> (Expression, Scalar) {
    let (cos, [x, y, z]) = axis_angle_raw(r);
    let n = (&x * &x + &y * &y + &z * &z).sqrt();
    (Expression::column([&x / &n, &y / &n, &z / &n]), cos.acos())
}

/// Axis (3×1) and angle of a rotation, with no guards.
///
/// The input must be a proper rotation.  At angle 0 the axis is `0/0`
/// (NaN) and the cosine is not clamped.
pub fn axis_angle_from_matrix_fast(rotation: &Expression) -> Result<(Expression, Scalar), ExprError> {
    Ok(fast_axis_angle(&rotation_block(rotation, "axis_angle_from_matrix_fast")?))
}

/// Axis (3×1) and angle of a rotation, defined everywhere.
///
/// At angle 0 the axis falls back to `+z`.  At exactly π the skew part of
/// the matrix vanishes and the axis also falls back to `+z`, which is wrong
/// for any other rotation axis; callers near a half turn must not rely on it.
pub fn axis_angle_from_matrix_stable(rotation: &Expression) -> Result<(Expression, Scalar), ExprError> {
    let r = rotation_block(rotation, "axis_angle_from_matrix_stable")?;
    let (cos, axis) = axis_angle_raw(&r);
    Ok((guarded_axis(axis), cos.min(1.0).max(-1.0).acos()))
}

/// Axis (3×1) and angle of a rotation, oriented so the angle lies in
/// `[0, π]`.
pub fn axis_angle_from_matrix(rotation: &Expression) -> Result<(Expression, Scalar), ExprError> {
    let r = rotation_block(rotation, "axis_angle_from_matrix")?;
    let (cos, axis) = axis_angle_raw(&r);
    let angle = cos.min(1.0).max(-1.0).acos();
    let sign = if_eq_zero(&angle, &one(), &angle.sign());
    Ok((guarded_axis(axis).scale(&sign), &sign * &angle))
}

/// Axis (3×1) and angle of a quaternion, normalising it first.
pub fn axis_angle_from_quaternion(x: &Scalar, y: &Scalar, z: &Scalar, w: &Scalar) -> (Expression, Scalar) {
    let l = (x * x + y * y + z * z + w * w).sqrt();
    let [x, y, z, w] = [x, y, z, w].map(|c| safe_division(c, &l, 0.0));
    let w2 = (1.0 - &w * &w).max(0.0).sqrt();
    let angle = 2.0 * w.max(-1.0).min(1.0).acos();
    let m = if_eq_zero(&w2, &one(), &w2);
    let axis = Expression::column([
        if_eq_zero(&w2, &zero(), &(&x / &m)),
        if_eq_zero(&w2, &zero(), &(&y / &m)),
        if_eq_zero(&w2, &one(), &(&z / &m)),
    ]);
    (axis, angle)
}

/// Unit quaternion of `angle` about a unit `axis`.
pub fn quaternion_from_axis_angle(axis: &Expression, angle: &Scalar) -> Result<Expression, ExprError> {
    let [ax, ay, az] = axis_part(axis, "quaternion_from_axis_angle")?;
    let half = angle / 2.0;
    let s = half.sin();
    Ok(Expression::column([&ax * &s, &ay * &s, &az * &s, half.cos()]))
}

/// Axis-angle of a roll-pitch-yaw rotation, through the unguarded matrix
/// extraction.
pub fn axis_angle_from_rpy(roll: &Scalar, pitch: &Scalar, yaw: &Scalar) -> (Expression, Scalar) {
    fast_axis_angle(&rpy_block(roll, pitch, yaw))
}

// ────────────────────────────────────────────────────────────────────────────
// Roll-pitch-yaw and quaternions
// ────────────────────────────────────────────────────────────────────────────

/// Roll, pitch and yaw of a rotation.
///
/// At gimbal lock (`|pitch| = π/2`) yaw is pinned to 0 and the whole
/// rotation about the locked axis goes into roll.
pub fn rpy_from_matrix(rotation: &Expression) -> Result<(Scalar, Scalar, Scalar), ExprError> {
    let r = rotation_block(rotation, "rpy_from_matrix")?;
    let cy = (&r[0][0] * &r[0][0] + &r[1][0] * &r[1][0]).sqrt();
    let unlocked = &cy - EPS;
    let roll = if_greater_zero(&unlocked, &r[2][1].atan2(&r[2][2]), &(-&r[1][2]).atan2(&r[1][1]));
    let pitch = (-&r[2][0]).atan2(&cy);
    let yaw = if_greater_zero(&unlocked, &r[1][0].atan2(&r[0][0]), &zero());
    Ok((roll, pitch, yaw))
}

/// Quaternion of a roll-pitch-yaw rotation.
pub fn quaternion_from_rpy(roll: &Scalar, pitch: &Scalar, yaw: &Scalar) -> Expression {
    let (c_roll, s_roll) = ((roll / 2.0).cos(), (roll / 2.0).sin());
    let (c_pitch, s_pitch) = ((pitch / 2.0).cos(), (pitch / 2.0).sin());
    let (c_yaw, s_yaw) = ((yaw / 2.0).cos(), (yaw / 2.0).sin());

    let cc = &c_roll * &c_yaw;
    let cs = &c_roll * &s_yaw;
    let sc = &s_roll * &c_yaw;
    let ss = &s_roll * &s_yaw;

    Expression::column([
        &c_pitch * &sc - &s_pitch * &cs,
        &c_pitch * &ss + &s_pitch * &cc,
        &c_pitch * &cs - &s_pitch * &sc,
        &c_pitch * &cc + &s_pitch * &ss,
    ])
}

/// Quaternion of a 3×3 rotation or 4×4 frame.
///
/// Largest-pivot extraction: the `w` candidate when the 3×3 trace is
/// positive, otherwise the candidate built around the largest diagonal
/// entry.  All four candidates are evaluated and blended with smooth
/// selections, which keeps half-turn rotations (trace −1) well defined.
pub fn quaternion_from_matrix(matrix: &Expression) -> Result<Expression, ExprError> {
    let m = rotation_block(matrix, "quaternion_from_matrix")?;
    let m33 = if matrix.shape() == (4, 4) {
        matrix.get(3, 3)?.clone()
    } else {
        one()
    };
    let [[m00, m01, m02], [m10, m11, m12], [m20, m21, m22]] = &m;

    let trace = m00 + m11 + m22 + &m33;
    let if0 = &trace - &m33;
    let if1 = m11 - m00;
    let if2 = m22 - if_greater_zero(&if1, m11, m00);

    // (x, y, z, w, t) per pivot
    let x_pivot = [m00 - (m11 + m22) + &m33, m01 + m10, m20 + m02, m21 - m12];
    let y_pivot = [m01 + m10, m11 - (m22 + m00) + &m33, m12 + m21, m02 - m20];
    let z_pivot = [m20 + m02, m12 + m21, m22 - (m00 + m11) + &m33, m10 - m01];
    let w_pivot = [m21 - m12, m02 - m20, m10 - m01, trace.clone()];
    let with_t = |q: [Scalar; 4], t_index: usize| -> [Scalar; 5] {
        let t = q[t_index].clone();
        let [a, b, c, d] = q;
        [a, b, c, d, t]
    };
    let pick = |condition: &Scalar, a: [Scalar; 5], b: [Scalar; 5]| -> [Scalar; 5] {
        std::array::from_fn(|i| if_greater_zero(condition, &a[i], &b[i]))
    };

    let selected = pick(
        &if0,
        with_t(w_pivot, 3),
        pick(
            &if2,
            with_t(z_pivot, 2),
            pick(&if1, with_t(y_pivot, 1), with_t(x_pivot, 0)),
        ),
    );
    let [x, y, z, w, t] = selected;
    let factor = safe_division(&Scalar::constant(0.5), &(&t * &m33).sqrt(), 0.0);
    Ok(Expression::column([x * &factor, y * &factor, z * &factor, w * &factor]))
}

/// Hamilton product `q1 ⊗ q2`.
pub fn quaternion_multiply(q1: &Expression, q2: &Expression) -> Result<Expression, ExprError> {
    let [x1, y1, z1, w1] = quaternion_part(q1, "quaternion_multiply")?;
    let [x0, y0, z0, w0] = quaternion_part(q2, "quaternion_multiply")?;
    Ok(Expression::column([
        &x1 * &w0 + &y1 * &z0 - &z1 * &y0 + &w1 * &x0,
        -&x1 * &z0 + &y1 * &w0 + &z1 * &x0 + &w1 * &y0,
        &x1 * &y0 - &y1 * &x0 + &z1 * &w0 + &w1 * &z0,
        -&x1 * &x0 - &y1 * &y0 - &z1 * &z0 + &w1 * &w0,
    ]))
}

pub fn quaternion_conjugate(q: &Expression) -> Result<Expression, ExprError> {
    let [x, y, z, w] = quaternion_part(q, "quaternion_conjugate")?;
    Ok(Expression::column([-x, -y, -z, w]))
}

/// `p` such that `q0 ⊗ p = q1`.
pub fn quaternion_diff(q0: &Expression, q1: &Expression) -> Result<Expression, ExprError> {
    quaternion_multiply(&quaternion_conjugate(q0)?, q1)
}

// ────────────────────────────────────────────────────────────────────────────
// Slerp
// ────────────────────────────────────────────────────────────────────────────

/// Spherical linear interpolation from `q1` (t = 0) to `q2` (t = 1).
///
/// Takes the short way round by flipping `q2` when the quaternions point
/// into opposite half-spaces.  Returns `q1` unchanged when they coincide and
/// blends linearly when the half-angle sine drops below 0.001.
pub fn slerp(q1: &Expression, q2: &Expression, t: &Scalar) -> Result<Expression, ExprError> {
    quaternion_part(q1, "slerp")?;
    quaternion_part(q2, "slerp")?;

    let cos_half = q1.dot(q2)?;
    let opposite = -&cos_half;
    let q2 = select_with(&-q2, q2, |a, b| if_greater_zero(&opposite, a, b))?;
    let cos_half = if_greater_zero(&opposite, &-&cos_half, &cos_half);

    let coincident = cos_half.abs() - 1.0;
    let cos_half = cos_half.min(1.0).max(-1.0);
    let half_theta = cos_half.acos();
    let sin_half = (1.0 - &cos_half * &cos_half).sqrt();
    let nearly_parallel = 0.001 - sin_half.abs();

    let ratio_a = safe_division(&((1.0 - t) * &half_theta).sin(), &sin_half, 0.0);
    let ratio_b = safe_division(&(t * &half_theta).sin(), &sin_half, 0.0);

    let blend = (q1 * 0.5).elementwise_add(&(&q2 * 0.5))?;
    let general = q1.scale(&ratio_a).elementwise_add(&q2.scale(&ratio_b))?;
    let interpolated = select_with(&blend, &general, |a, b| if_greater_zero(&nearly_parallel, a, b))?;
    select_with(q1, &interpolated, |a, b| if_greater_eq_zero(&coincident, a, b))
}

/// Numeric slerp with native branches, for one-shot use and as a regression
/// reference for [`slerp`].
pub fn slerp_reference(q1: [f64; 4], q2: [f64; 4], t: f64) -> [f64; 4] {
    let mut cos_half: f64 = q1.iter().zip(&q2).map(|(a, b)| a * b).sum();
    let mut q2 = q2;
    if cos_half < 0.0 {
        q2 = q2.map(|c| -c);
        cos_half = -cos_half;
    }
    if cos_half.abs() >= 1.0 {
        return q1;
    }
    let half_theta = cos_half.acos();
    let sin_half = (1.0 - cos_half * cos_half).sqrt();
    if sin_half.abs() < 0.001 {
        return std::array::from_fn(|i| 0.5 * q1[i] + 0.5 * q2[i]);
    }
    let ratio_a = ((1.0 - t) * half_theta).sin() / sin_half;
    let ratio_b = (t * half_theta).sin() / sin_half;
    std::array::from_fn(|i| q1[i] * ratio_a + q2[i] * ratio_b)
}

// ────────────────────────────────────────────────────────────────────────────
// Vectors and angles
// ────────────────────────────────────────────────────────────────────────────

/// `v` rescaled to length `a`; the zero vector stays zero.
pub fn scale(v: &Expression, a: &Scalar) -> Expression {
    let n = v.norm();
    v.map(|e| safe_division(e, &n, 0.0) * a)
}

/// `1 − v0 · v1`.
pub fn cosine_distance(v0: &Expression, v1: &Expression) -> Result<Scalar, ExprError> {
    Ok(1.0 - v0.dot(v1)?)
}

pub fn euclidean_distance(v0: &Expression, v1: &Expression) -> Result<Scalar, ExprError> {
    Ok(v0.elementwise_sub(v1)?.norm())
}

/// Angle wrapped into `[0, 2π)`.
pub fn normalize_angle_positive(angle: &Scalar) -> Scalar {
    (angle.fmod(TAU) + TAU).fmod(TAU)
}

/// Angle wrapped into `(−π, π]`.
pub fn normalize_angle(angle: &Scalar) -> Scalar {
    let a = normalize_angle_positive(angle);
    if_greater(&a, &Scalar::constant(PI), &(&a - TAU), &a)
}

/// Signed shortest rotation from `from` to `to`, in `[−π, π]`.
pub fn shortest_angular_distance(from: &Scalar, to: &Scalar) -> Scalar {
    normalize_angle(&(to - from))
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use approx::assert_relative_eq;
    use nalgebra::{Quaternion, Rotation3, Unit, UnitQuaternion, Vector3};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use crate::expression::element_name;
    use crate::jacobian;

    fn c(v: f64) -> Scalar {
        Scalar::constant(v)
    }

    fn numeric(e: &Expression) -> Vec<f64> {
        e.evaluate(&HashMap::new()).unwrap()
    }

    fn value(s: &Scalar) -> f64 {
        s.evaluate(&HashMap::new()).unwrap()
    }

    fn assert_rotation_eq(got: &[f64], expected: &Rotation3<f64>) {
        for r in 0..3 {
            for col in 0..3 {
                assert_relative_eq!(got[r * 4 + col], expected.matrix()[(r, col)], epsilon = 1e-12);
            }
        }
        assert_eq!(&got[12..], &[0.0, 0.0, 0.0, 1.0]);
    }

    fn random_unit_quaternion(rng: &mut StdRng) -> [f64; 4] {
        loop {
            let q: [f64; 4] = std::array::from_fn(|_| rng.random_range(-1.0..1.0));
            let n = q.iter().map(|c| c * c).sum::<f64>().sqrt();
            if n > 0.1 {
                return q.map(|c| c / n);
            }
        }
    }

    fn quaternion_symbols(name: &str) -> (Expression, Vec<String>) {
        let names = (0..4).map(|i| element_name(name, i, 0)).collect();
        (Expression::symbols(name, 4, 1), names)
    }

    fn bind<'a>(names: &'a [String], values: &[f64]) -> Vec<(&'a str, f64)> {
        names.iter().map(String::as_str).zip(values.iter().copied()).collect()
    }

    #[test]
    fn rpy_matrix_matches_nalgebra() {
        for (r, p, y) in [(0.1, 0.2, 0.3), (-1.2, 0.7, 2.9), (3.0, -1.4, -0.5)] {
            let m = numeric(&rotation_matrix_from_rpy(&c(r), &c(p), &c(y)));
            assert_rotation_eq(&m, &Rotation3::from_euler_angles(r, p, y));
        }
    }

    #[test]
    fn axis_angle_matrix_matches_nalgebra() {
        let axis = Vector3::new(0.3, -0.5, 0.8).normalize();
        let m = rotation_matrix_from_axis_angle(&Expression::column([c(axis.x), c(axis.y), c(axis.z)]), &c(1.1))
            .unwrap();
        assert_rotation_eq(
            &numeric(&m),
            &Rotation3::from_axis_angle(&Unit::new_normalize(axis), 1.1),
        );
        assert!(rotation_matrix_from_axis_angle(&Expression::zeros(2, 1), &c(1.0)).is_err());
    }

    #[test]
    fn quaternion_matrix_matches_nalgebra() {
        let q = UnitQuaternion::from_quaternion(Quaternion::new(0.4, -0.2, 0.7, 0.1));
        let m = rotation_matrix_from_quaternion(&c(q.coords[0]), &c(q.coords[1]), &c(q.coords[2]), &c(q.coords[3]));
        assert_rotation_eq(&numeric(&m), &q.to_rotation_matrix());
    }

    #[test]
    fn frame_composition_and_inverse() {
        let frame = frame_rpy(&c(1.0), &c(2.0), &c(3.0), &c(0.3), &c(-0.2), &c(0.9));
        let product = inverse_frame(&frame).unwrap().matmul(&frame).unwrap();
        let eye = numeric(&Expression::eye(4));
        for (got, expected) in numeric(&product).iter().zip(eye) {
            assert_relative_eq!(*got, expected, epsilon = 1e-12);
        }
        assert_eq!(numeric(&position_of(&frame).unwrap()), vec![1.0, 2.0, 3.0, 1.0]);
        let t = numeric(&translation_of(&frame).unwrap());
        assert_eq!(&t[..4], &[1.0, 0.0, 0.0, 1.0]);
        let r = numeric(&rotation_of(&frame).unwrap());
        assert_eq!([r[3], r[7], r[11]], [0.0, 0.0, 0.0]);
        assert!(position_of(&Expression::eye(3)).is_err());
    }

    #[test]
    fn rotation_distance_via_trace() {
        let a = rotation_matrix_from_rpy(&c(0.0), &c(0.0), &c(0.3));
        let b = rotation_matrix_from_rpy(&c(0.0), &c(0.0), &c(1.0));
        assert_relative_eq!(value(&rotation_distance(&a, &b).unwrap()), 0.7, epsilon = 1e-12);

        let same = rotation_matrix_from_rpy(&c(0.4), &c(-1.1), &c(2.2));
        let d = value(&rotation_distance(&same, &same).unwrap());
        assert!(!d.is_nan() && d.abs() < 1e-6);
    }

    #[test]
    fn axis_angle_of_identity_is_zero() {
        let (axis, angle) = axis_angle_from_matrix(&Expression::eye(4)).unwrap();
        assert_eq!(value(&angle), 0.0);
        assert_eq!(numeric(&axis), vec![0.0, 0.0, 1.0]);

        let (_, angle) = axis_angle_from_matrix_stable(&Expression::eye(3)).unwrap();
        assert_eq!(value(&angle), 0.0);
    }

    #[test]
    fn fast_axis_angle_is_undefined_at_zero() {
        let (axis, angle) = axis_angle_from_matrix_fast(&Expression::eye(4)).unwrap();
        assert_eq!(value(&angle), 0.0);
        assert!(numeric(&axis).iter().all(|v| v.is_nan()));
    }

    #[test]
    fn stable_axis_angle_is_wrong_at_half_turn() {
        // Exact half turn about x: the skew part is zero.
        let half_turn_x = Expression::diag(&[c(1.0), c(-1.0), c(-1.0)]);
        let (axis, angle) = axis_angle_from_matrix_stable(&half_turn_x).unwrap();
        assert_relative_eq!(value(&angle), PI, epsilon = 1e-12);
        assert_eq!(numeric(&axis), vec![0.0, 0.0, 1.0]);
    }

    #[test]
    fn axis_angle_round_trip() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..50 {
            let axis = Vector3::new(
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
            );
            if axis.norm() < 0.1 {
                continue;
            }
            let axis = axis.normalize();
            let angle: f64 = rng.random_range(0.05..3.0);
            let column = Expression::column([c(axis.x), c(axis.y), c(axis.z)]);
            let m = rotation_matrix_from_axis_angle(&column, &c(angle)).unwrap();

            let (got_axis, got_angle) = axis_angle_from_matrix(&m).unwrap();
            assert_relative_eq!(value(&got_angle), angle, epsilon = 1e-9);
            for (g, e) in numeric(&got_axis).iter().zip(axis.iter()) {
                assert_relative_eq!(*g, *e, epsilon = 1e-9);
            }

            let q = quaternion_from_axis_angle(&column, &c(angle)).unwrap();
            let [x, y, z, w] = quaternion_part(&q, "test").unwrap();
            let (q_axis, q_angle) = axis_angle_from_quaternion(&x, &y, &z, &w);
            assert_relative_eq!(value(&q_angle), angle, epsilon = 1e-9);
            for (g, e) in numeric(&q_axis).iter().zip(axis.iter()) {
                assert_relative_eq!(*g, *e, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn quaternion_round_trip_recovers_q_up_to_sign() {
        let (q, names) = quaternion_symbols("q");
        let [x, y, z, w] = quaternion_part(&q, "test").unwrap();
        let recovered = quaternion_from_matrix(&rotation_matrix_from_quaternion(&x, &y, &z, &w)).unwrap();

        let mut rng = StdRng::seed_from_u64(42);
        let mut samples: Vec<[f64; 4]> = (0..200).map(|_| random_unit_quaternion(&mut rng)).collect();
        // identity and the three half turns exercise every pivot
        samples.extend([
            [0.0, 0.0, 0.0, 1.0],
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
        ]);
        for sample in samples {
            let bindings: HashMap<&str, f64> = bind(&names, &sample).into_iter().collect();
            let got = recovered.evaluate(&bindings).unwrap();
            let dot: f64 = got.iter().zip(&sample).map(|(a, b)| a * b).sum();
            let sign = if dot < 0.0 { -1.0 } else { 1.0 };
            for (g, e) in got.iter().zip(&sample) {
                assert_relative_eq!(g * sign, *e, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn quaternion_from_3x3_matches_4x4() {
        let m4 = rotation_matrix_from_rpy(&c(0.2), &c(0.5), &c(-2.0));
        let m3 = m4.block(0, 0, 3, 3).unwrap();
        let a = numeric(&quaternion_from_matrix(&m4).unwrap());
        let b = numeric(&quaternion_from_matrix(&m3).unwrap());
        assert_eq!(a, b);
    }

    #[test]
    fn rpy_round_trip_and_gimbal_lock() {
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..100 {
            let r: f64 = rng.random_range(-3.0..3.0);
            let p: f64 = rng.random_range(-1.5..1.5);
            let y: f64 = rng.random_range(-3.0..3.0);
            let (gr, gp, gy) = rpy_from_matrix(&rotation_matrix_from_rpy(&c(r), &c(p), &c(y))).unwrap();
            assert_relative_eq!(value(&gr), r, epsilon = 1e-9);
            assert_relative_eq!(value(&gp), p, epsilon = 1e-9);
            assert_relative_eq!(value(&gy), y, epsilon = 1e-9);
        }

        let locked = rotation_matrix_from_rpy(&c(0.3), &c(PI / 2.0), &c(0.0));
        let (gr, gp, gy) = rpy_from_matrix(&locked).unwrap();
        assert_eq!(value(&gy), 0.0);
        assert_relative_eq!(value(&gp), PI / 2.0, epsilon = 1e-9);
        assert_relative_eq!(value(&gr), 0.3, epsilon = 1e-9);
    }

    #[test]
    fn quaternion_rpy_and_product_match_nalgebra() {
        let q1 = UnitQuaternion::from_euler_angles(0.1, 0.2, 0.3);
        let q2 = UnitQuaternion::from_euler_angles(-0.4, 0.5, 1.1);
        let e1 = quaternion_from_rpy(&c(0.1), &c(0.2), &c(0.3));
        let e2 = quaternion_from_rpy(&c(-0.4), &c(0.5), &c(1.1));
        for (g, e) in numeric(&e1).iter().zip(q1.coords.iter()) {
            assert_relative_eq!(*g, *e, epsilon = 1e-12);
        }

        let product = numeric(&quaternion_multiply(&e1, &e2).unwrap());
        for (g, e) in product.iter().zip((q1 * q2).coords.iter()) {
            assert_relative_eq!(*g, *e, epsilon = 1e-12);
        }

        // q1 ⊗ diff(q1, q2) == q2
        let diff = quaternion_diff(&e1, &e2).unwrap();
        let back = numeric(&quaternion_multiply(&e1, &diff).unwrap());
        for (g, e) in back.iter().zip(q2.coords.iter()) {
            assert_relative_eq!(*g, *e, epsilon = 1e-12);
        }
        assert!(quaternion_conjugate(&Expression::zeros(3, 1)).is_err());
    }

    #[test]
    fn slerp_of_a_quaternion_with_itself_is_exact() {
        let (q, names) = quaternion_symbols("q");
        let t = Scalar::symbol("t");
        let s = slerp(&q, &q, &t).unwrap();

        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..100 {
            let sample = random_unit_quaternion(&mut rng);
            let mut bindings: HashMap<&str, f64> = bind(&names, &sample).into_iter().collect();
            bindings.insert("t", rng.random_range(0.0..=1.0));
            assert_eq!(s.evaluate(&bindings).unwrap(), sample.to_vec());
        }
    }

    #[test]
    fn slerp_matches_native_reference() {
        let (a, a_names) = quaternion_symbols("a");
        let (b, b_names) = quaternion_symbols("b");
        let t = Scalar::symbol("t");
        let s = slerp(&a, &b, &t).unwrap();

        let mut rng = StdRng::seed_from_u64(21);
        for i in 0..200 {
            let qa = random_unit_quaternion(&mut rng);
            let qb = match i {
                0 => qa.map(|c| -c),
                _ => random_unit_quaternion(&mut rng),
            };
            let tv: f64 = rng.random_range(0.0..=1.0);
            let mut bindings: HashMap<&str, f64> = bind(&a_names, &qa).into_iter().collect();
            bindings.extend(bind(&b_names, &qb));
            bindings.insert("t", tv);

            let got = s.evaluate(&bindings).unwrap();
            let expected = slerp_reference(qa, qb, tv);
            for (g, e) in got.iter().zip(expected) {
                assert_relative_eq!(*g, e, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn slerp_endpoints() {
        let qa = [0.0, 0.0, 0.0, 1.0];
        let qb = [0.0, 0.0, (0.5f64).sin(), (0.5f64).cos()];
        for (g, e) in slerp_reference(qa, qb, 0.0).iter().zip(qa) {
            assert_relative_eq!(*g, e, epsilon = 1e-12);
        }
        for (g, e) in slerp_reference(qa, qb, 1.0).iter().zip(qb) {
            assert_relative_eq!(*g, e, epsilon = 1e-12);
        }
    }

    #[test]
    fn angle_normalisation() {
        assert_relative_eq!(value(&normalize_angle(&c(1.5 * PI))), -0.5 * PI, epsilon = 1e-12);
        assert_relative_eq!(value(&normalize_angle(&c(-0.5 * PI))), -0.5 * PI, epsilon = 1e-12);
        assert_relative_eq!(value(&normalize_angle_positive(&c(-0.5))), TAU - 0.5, epsilon = 1e-12);
        assert_relative_eq!(
            value(&shortest_angular_distance(&c(3.0), &c(-3.0))),
            TAU - 6.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn vector_helpers() {
        let v = vector3(3.0, 0.0, 4.0);
        assert_eq!(numeric(&scale(&v, &c(10.0))), vec![6.0, 0.0, 8.0, 0.0]);
        assert_eq!(numeric(&scale(&Expression::zeros(3, 1), &c(2.0))), vec![0.0; 3]);
        let x = vector3(1.0, 0.0, 0.0);
        let y = vector3(0.0, 1.0, 0.0);
        assert_eq!(value(&cosine_distance(&x, &y).unwrap()), 1.0);
        assert_relative_eq!(value(&euclidean_distance(&x, &y).unwrap()), 2f64.sqrt(), epsilon = 1e-15);
        assert!(euclidean_distance(&x, &point3(0.0, 0.0, 0.0).block(0, 0, 3, 1).unwrap()).is_err());
    }

    #[test]
    fn planar_chain_jacobian() {
        let q1 = Scalar::symbol("q1");
        let q2 = Scalar::symbol("q2");
        let z = c(0.0);
        let tip = frame_rpy(&z, &z, &z, &z, &z, &q1)
            .matmul(&frame_rpy(&c(1.0), &z, &z, &z, &z, &q2))
            .unwrap()
            .matmul(&point3(1.0, 0.0, 0.0))
            .unwrap();
        let j = jacobian(&tip.block(0, 0, 2, 1).unwrap(), &["q1", "q2"]).unwrap();

        let (a, b) = (0.4, -1.1);
        let got = j.evaluate(&HashMap::from([("q1", a), ("q2", b)])).unwrap();
        let expected = [
            -a.sin() - (a + b).sin(),
            -(a + b).sin(),
            a.cos() + (a + b).cos(),
            (a + b).cos(),
        ];
        for (g, e) in got.iter().zip(expected) {
            assert_relative_eq!(*g, e, epsilon = 1e-12);
        }
    }

    #[test]
    fn rotation_distance_gradient_matches_finite_differences() {
        let yaw = Scalar::symbol("yaw");
        let target = rotation_matrix_from_rpy(&c(0.2), &c(0.1), &c(0.5));
        let d = rotation_distance(&rotation_matrix_from_rpy(&c(0.0), &c(0.0), &yaw), &target).unwrap();
        let gradient = d.derivative("yaw");

        let at = |v: f64| d.evaluate(&HashMap::from([("yaw", v)])).unwrap();
        let h = 1e-6;
        let numeric_gradient = (at(1.4 + h) - at(1.4 - h)) / (2.0 * h);
        let symbolic = gradient.evaluate(&HashMap::from([("yaw", 1.4)])).unwrap();
        assert_relative_eq!(symbolic, numeric_gradient, epsilon = 1e-6);
    }
}
