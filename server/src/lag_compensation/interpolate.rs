//! Blending of two recorded samples into an intermediate pose.

use super::sample::{AnimationLayer, AnimationState, Pose, Sample};

/// Interpolates the pose at `target_time` between two samples that bracket it.
///
/// At either endpoint the endpoint's pose is returned untouched, so rewinding
/// to exactly a recorded time reproduces that record bit for bit.
pub fn interpolate(older: &Sample, newer: &Sample, target_time: f64) -> Pose {
    let span = newer.simulation_time - older.simulation_time;
    if span <= 0.0 {
        return newer.pose.clone();
    }

    let frac = ((target_time - older.simulation_time) / span) as f32;
    if frac <= 0.0 {
        return older.pose.clone();
    }
    if frac >= 1.0 {
        return newer.pose.clone();
    }

    lerp_pose(&older.pose, &newer.pose, frac)
}

pub fn lerp_pose(older: &Pose, newer: &Pose, frac: f32) -> Pose {
    Pose {
        origin: older.origin.lerp(newer.origin, frac),
        angles: older.angles.lerp(newer.angles, frac),
        mins: older.mins.lerp(newer.mins, frac),
        maxs: older.maxs.lerp(newer.maxs, frac),
        animation: lerp_animation(&older.animation, &newer.animation, frac),
    }
}

/// A master sequence change makes the two samples incomparable, so the newer
/// state is used as-is.
pub fn lerp_animation(older: &AnimationState, newer: &AnimationState, frac: f32) -> AnimationState {
    if older.sequence != newer.sequence {
        return newer.clone();
    }

    let layers = newer
        .layers
        .iter()
        .enumerate()
        .map(|(slot, newer_layer)| match older.layers.get(slot) {
            Some(older_layer) => lerp_layer(older_layer, newer_layer, frac),
            None => *newer_layer,
        })
        .collect();

    let pose_parameters = if older.pose_parameters.len() == newer.pose_parameters.len() {
        older
            .pose_parameters
            .iter()
            .zip(&newer.pose_parameters)
            .map(|(a, b)| lerp(*a, *b, frac))
            .collect()
    } else {
        newer.pose_parameters.clone()
    };

    AnimationState {
        sequence: newer.sequence,
        cycle: lerp_cycle(older.cycle, newer.cycle, frac),
        layers,
        pose_parameters,
    }
}

fn lerp_layer(older: &AnimationLayer, newer: &AnimationLayer, frac: f32) -> AnimationLayer {
    if older.sequence != newer.sequence || older.order != newer.order {
        return *newer;
    }

    AnimationLayer {
        sequence: newer.sequence,
        cycle: lerp_cycle(older.cycle, newer.cycle, frac),
        weight: lerp(older.weight, newer.weight, frac),
        order: newer.order,
    }
}

/// Interpolates a looping cycle. If the cycle went backwards between the two
/// samples it wrapped past 1.0, so the newer value is unrolled by one loop
/// before blending and the result folded back into `[0, 1)`.
pub fn lerp_cycle(older: f32, newer: f32, frac: f32) -> f32 {
    let newer = if older > newer { newer + 1.0 } else { newer };
    let cycle = lerp(older, newer, frac);
    let wrapped = cycle - cycle.floor();
    if wrapped >= 1.0 {
        0.0
    } else {
        wrapped
    }
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a * (1.0 - t) + b * t
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use shared::{QAngle, Vec3};

    fn animated(time: f64, origin: Vec3, sequence: i32, cycle: f32) -> Sample {
        let mut sample = Sample::at(time, origin);
        sample.pose.mins = Vec3::new(-16.0, -16.0, 0.0);
        sample.pose.maxs = Vec3::new(16.0, 16.0, 72.0);
        sample.pose.animation = AnimationState {
            sequence,
            cycle,
            layers: vec![AnimationLayer {
                sequence: 4,
                cycle,
                weight: 0.5,
                order: 0,
            }],
            pose_parameters: vec![0.0, 1.0],
        };
        sample
    }

    #[test]
    fn test_midpoint_position() {
        let older = Sample::at(10.0, Vec3::new(0.0, 0.0, 0.0));
        let newer = Sample::at(10.1, Vec3::new(10.0, 0.0, 0.0));

        let pose = interpolate(&older, &newer, 10.05);
        assert_approx_eq!(pose.origin.x, 5.0, 1e-3);
        assert_approx_eq!(pose.origin.y, 0.0);
    }

    #[test]
    fn test_endpoints_are_exact() {
        let mut older = animated(1.0, Vec3::new(1.0, 2.0, 3.0), 1, 0.3);
        older.pose.angles = QAngle::new(5.0, 359.0, 0.0);
        let mut newer = animated(1.5, Vec3::new(-7.0, 2.5, 3.25), 1, 0.6);
        newer.pose.angles = QAngle::new(-5.0, 1.0, 0.0);

        assert_eq!(interpolate(&older, &newer, 1.0), older.pose);
        assert_eq!(interpolate(&older, &newer, 1.5), newer.pose);
    }

    #[test]
    fn test_angles_take_shortest_path() {
        let mut older = Sample::at(0.0, Vec3::ZERO);
        older.pose.angles = QAngle::new(0.0, 350.0, 0.0);
        let mut newer = Sample::at(1.0, Vec3::ZERO);
        newer.pose.angles = QAngle::new(0.0, 10.0, 0.0);

        let pose = interpolate(&older, &newer, 0.5);
        assert!(pose.angles.yaw.abs() < 1e-3, "yaw was {}", pose.angles.yaw);
    }

    #[test]
    fn test_bounds_interpolate() {
        let mut older = Sample::at(0.0, Vec3::ZERO);
        older.pose.maxs = Vec3::new(16.0, 16.0, 72.0);
        let mut newer = Sample::at(1.0, Vec3::ZERO);
        newer.pose.maxs = Vec3::new(16.0, 16.0, 36.0);

        let pose = interpolate(&older, &newer, 0.5);
        assert_approx_eq!(pose.maxs.z, 54.0);
    }

    #[test]
    fn test_cycle_wraparound() {
        assert_approx_eq!(lerp_cycle(0.9, 0.1, 0.5), 0.0, 1e-4);
    }

    #[test]
    fn test_cycle_without_wrap() {
        assert_approx_eq!(lerp_cycle(0.2, 0.6, 0.5), 0.4);
    }

    #[test]
    fn test_sequence_change_uses_newer_animation() {
        let older = animated(0.0, Vec3::ZERO, 1, 0.2);
        let newer = animated(1.0, Vec3::ZERO, 2, 0.8);

        let pose = interpolate(&older, &newer, 0.5);
        assert_eq!(pose.animation, newer.pose.animation);
    }

    #[test]
    fn test_layer_wraps_independently() {
        let mut older = animated(0.0, Vec3::ZERO, 1, 0.2);
        let mut newer = animated(1.0, Vec3::ZERO, 1, 0.4);
        older.pose.animation.layers[0].cycle = 0.8;
        newer.pose.animation.layers[0].cycle = 0.0;

        let pose = interpolate(&older, &newer, 0.5);
        assert_approx_eq!(pose.animation.cycle, 0.3);
        assert_approx_eq!(pose.animation.layers[0].cycle, 0.9);
    }

    #[test]
    fn test_layer_sequence_change_not_interpolated() {
        let older = animated(0.0, Vec3::ZERO, 1, 0.2);
        let mut newer = animated(1.0, Vec3::ZERO, 1, 0.4);
        newer.pose.animation.layers[0].sequence = 9;
        newer.pose.animation.layers[0].weight = 1.0;

        let pose = interpolate(&older, &newer, 0.5);
        assert_eq!(pose.animation.layers[0], newer.pose.animation.layers[0]);
    }

    #[test]
    fn test_layer_order_change_not_interpolated() {
        let older = animated(0.0, Vec3::ZERO, 1, 0.2);
        let mut newer = animated(1.0, Vec3::ZERO, 1, 0.4);
        newer.pose.animation.layers[0].order = 3;

        let pose = interpolate(&older, &newer, 0.25);
        assert_eq!(pose.animation.layers[0], newer.pose.animation.layers[0]);
    }

    #[test]
    fn test_pose_parameters() {
        let older = animated(0.0, Vec3::ZERO, 1, 0.2);
        let mut newer = animated(1.0, Vec3::ZERO, 1, 0.4);
        newer.pose.animation.pose_parameters = vec![1.0, 0.0];

        let pose = interpolate(&older, &newer, 0.25);
        assert_approx_eq!(pose.animation.pose_parameters[0], 0.25);
        assert_approx_eq!(pose.animation.pose_parameters[1], 0.75);

        newer.pose.animation.pose_parameters = vec![1.0, 0.0, 0.5];
        let pose = interpolate(&older, &newer, 0.25);
        assert_eq!(pose.animation.pose_parameters, vec![1.0, 0.0, 0.5]);
    }
}
