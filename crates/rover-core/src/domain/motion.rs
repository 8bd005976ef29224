//! Planar motion math: angle wrapping, interpolation, and capped extrapolation.
//!
//! All angles are radians.  Headings are kept in the half-open range
//! `(-π, π]`.  The vehicle moves along `(sin(heading), cos(heading))`.

use std::f64::consts::{PI, TAU};

use crate::protocol::messages::{Pose, Velocity};

/// A smoothed pose/velocity pair produced by playback.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlaybackFrame {
    pub pose: Pose,
    pub velocity: Velocity,
}

impl PlaybackFrame {
    pub fn new(pose: Pose, velocity: Velocity) -> Self {
        Self { pose, velocity }
    }
}

/// Wraps an angle into `(-π, π]`.
///
/// Values already inside the range are returned unchanged, bit for bit.
///
/// # Examples
///
/// ```rust
/// use rover_core::domain::motion::wrap_angle;
/// use std::f64::consts::PI;
///
/// assert_eq!(wrap_angle(0.5), 0.5);
/// assert_eq!(wrap_angle(-PI), PI);
/// assert!((wrap_angle(3.0 * PI) - PI).abs() < 1e-12);
/// ```
pub fn wrap_angle(angle: f64) -> f64 {
    if angle > -PI && angle <= PI {
        return angle;
    }
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    if wrapped <= -PI {
        wrapped + TAU
    } else {
        wrapped
    }
}

/// Linear interpolation written so that `t = 0` yields `a` and `t = 1`
/// yields `b` exactly.
pub fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a * (1.0 - t) + b * t
}

/// Interpolates between two headings along the shorter arc.
///
/// Going from `3.0` to `-3.0` passes through `±π` (a turn of about 0.28 rad),
/// not back through zero.
pub fn lerp_angle(a: f64, b: f64, t: f64) -> f64 {
    let delta = wrap_angle(b - a);
    wrap_angle(a + delta * t)
}

/// Interpolates pose and velocity between two samples.
///
/// `t` is clamped to `[0, 1]`.
pub fn interpolate(previous: &PlaybackFrame, next: &PlaybackFrame, t: f64) -> PlaybackFrame {
    let t = t.clamp(0.0, 1.0);
    PlaybackFrame {
        pose: Pose {
            x: lerp(previous.pose.x, next.pose.x, t),
            y: lerp(previous.pose.y, next.pose.y, t),
            heading: lerp_angle(previous.pose.heading, next.pose.heading, t),
        },
        velocity: Velocity {
            linear: lerp(previous.velocity.linear, next.velocity.linear, t),
            angular: lerp(previous.velocity.angular, next.velocity.angular, t),
        },
    }
}

/// Projects a sample forward by `dt_ms`, capped at `horizon_ms`.
///
/// The heading is advanced first; the position then moves `linear * dt`
/// along the *new* heading.  Negative `dt_ms` is treated as zero.  Velocity
/// is carried over unchanged.
pub fn extrapolate(from: &PlaybackFrame, dt_ms: f64, horizon_ms: f64) -> PlaybackFrame {
    let dt = dt_ms.clamp(0.0, horizon_ms.max(0.0)) / 1000.0;
    let heading = wrap_angle(from.pose.heading + from.velocity.angular * dt);
    let distance = from.velocity.linear * dt;
    PlaybackFrame {
        pose: Pose {
            x: from.pose.x + heading.sin() * distance,
            y: from.pose.y + heading.cos() * distance,
            heading,
        },
        velocity: from.velocity,
    }
}
