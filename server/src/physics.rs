use shared::Vec3;

/// Axis-aligned box in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self {
            min: min.component_min(max),
            max: min.component_max(max),
        }
    }

    /// Box of an entity hull placed at `origin`.
    pub fn from_hull(origin: Vec3, mins: Vec3, maxs: Vec3) -> Self {
        Self::new(origin + mins, origin + maxs)
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Strict containment; points on the surface are outside.
    pub fn contains_strict(&self, point: Vec3) -> bool {
        point.x > self.min.x
            && point.x < self.max.x
            && point.y > self.min.y
            && point.y < self.max.y
            && point.z > self.min.z
            && point.z < self.max.z
    }

    /// Strict overlap; touching faces do not count.
    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.min.x < other.max.x
            && self.max.x > other.min.x
            && self.min.y < other.max.y
            && self.max.y > other.min.y
            && self.min.z < other.max.z
            && self.max.z > other.min.z
    }

    /// Grows this box by a hull so that sweeping the hull's origin point
    /// against the result is equivalent to sweeping the hull against `self`.
    pub fn expanded_by_hull(&self, mins: Vec3, maxs: Vec3) -> Aabb {
        Aabb {
            min: self.min - maxs,
            max: self.max - mins,
        }
    }

    /// Entry fraction of the segment `start -> end` into the box, using the
    /// slab method. `Some(0.0)` with `start` inside means the segment starts
    /// embedded; `None` means no contact.
    pub fn segment_entry(&self, start: Vec3, end: Vec3) -> Option<f32> {
        let delta = end - start;
        let axes = [
            (start.x, delta.x, self.min.x, self.max.x),
            (start.y, delta.y, self.min.y, self.max.y),
            (start.z, delta.z, self.min.z, self.max.z),
        ];

        let mut t_enter = 0.0f32;
        let mut t_exit = 1.0f32;
        for (origin, direction, lo, hi) in axes {
            if direction.abs() < 1e-8 {
                if origin <= lo || origin >= hi {
                    return None;
                }
                continue;
            }

            let inv = 1.0 / direction;
            let mut t0 = (lo - origin) * inv;
            let mut t1 = (hi - origin) * inv;
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
            }
            t_enter = t_enter.max(t0);
            t_exit = t_exit.min(t1);
            if t_enter >= t_exit {
                return None;
            }
        }
        Some(t_enter)
    }

    /// Distance along a unit ray to the box, if hit within `max_distance`.
    pub fn ray_distance(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> Option<f32> {
        if self.contains_strict(origin) {
            return Some(0.0);
        }
        let end = origin + direction * max_distance;
        self.segment_entry(origin, end)
            .map(|fraction| fraction * max_distance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn unit_box_at(x: f32) -> Aabb {
        Aabb::new(Vec3::new(x - 1.0, -1.0, -1.0), Vec3::new(x + 1.0, 1.0, 1.0))
    }

    #[test]
    fn test_new_orders_corners() {
        let b = Aabb::new(Vec3::new(1.0, 1.0, 1.0), Vec3::new(-1.0, -1.0, -1.0));
        assert_eq!(b.min, Vec3::new(-1.0, -1.0, -1.0));
        assert_eq!(b.center(), Vec3::ZERO);
    }

    #[test]
    fn test_contains_strict_excludes_surface() {
        let b = unit_box_at(0.0);
        assert!(b.contains_strict(Vec3::ZERO));
        assert!(!b.contains_strict(Vec3::new(1.0, 0.0, 0.0)));
    }

    #[test]
    fn test_overlaps() {
        assert!(unit_box_at(0.0).overlaps(&unit_box_at(1.5)));
        assert!(!unit_box_at(0.0).overlaps(&unit_box_at(2.0)));
    }

    #[test]
    fn test_segment_entry_hits_face() {
        let b = unit_box_at(5.0);
        let t = b
            .segment_entry(Vec3::ZERO, Vec3::new(10.0, 0.0, 0.0))
            .unwrap();
        assert_approx_eq!(t, 0.4);
    }

    #[test]
    fn test_segment_entry_misses() {
        let b = unit_box_at(5.0);
        assert!(b
            .segment_entry(Vec3::new(0.0, 3.0, 0.0), Vec3::new(10.0, 3.0, 0.0))
            .is_none());
        assert!(b.segment_entry(Vec3::ZERO, Vec3::new(3.0, 0.0, 0.0)).is_none());
    }

    #[test]
    fn test_zero_length_segment() {
        let b = unit_box_at(0.0);
        assert_eq!(b.segment_entry(Vec3::ZERO, Vec3::ZERO), Some(0.0));
        let outside = Vec3::new(3.0, 0.0, 0.0);
        assert_eq!(b.segment_entry(outside, outside), None);
    }

    #[test]
    fn test_expanded_by_hull() {
        let wall = unit_box_at(10.0);
        let grown = wall.expanded_by_hull(Vec3::new(-2.0, -2.0, 0.0), Vec3::new(2.0, 2.0, 4.0));
        assert_eq!(grown.min, Vec3::new(7.0, -3.0, -5.0));
        assert_eq!(grown.max, Vec3::new(13.0, 3.0, 1.0));
    }

    #[test]
    fn test_ray_distance() {
        let b = unit_box_at(5.0);
        let d = b
            .ray_distance(Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0), 100.0)
            .unwrap();
        assert_approx_eq!(d, 4.0, 1e-3);
        assert!(b
            .ray_distance(Vec3::ZERO, Vec3::new(-1.0, 0.0, 0.0), 100.0)
            .is_none());
    }
}
