//! Plane and segment geometry for section-based sampling
//!
//! A [`Section`] is a finite rectangular plane described by an origin and
//! two edge vectors. The functions here are pure: they are used by the
//! volume's oblique scanner and by the overlay compositor, and they signal
//! geometric degeneracies (parallel lines, empty intersections) as `None`
//! rather than as errors.

use glam::{DVec2, DVec3};
use serde::{Deserialize, Serialize};

/// A finite rectangular plane in 3-D space. Units are millimeters unless
/// a function states otherwise. Equality is exact member comparison.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub origin: DVec3,
    pub x_axis: DVec3,
    pub y_axis: DVec3,
}

impl Section {
    pub fn new(origin: DVec3, x_axis: DVec3, y_axis: DVec3) -> Self {
        Self {
            origin,
            x_axis,
            y_axis,
        }
    }

    /// Normalized normal vector (cross product of the two axes).
    pub fn normal(&self) -> DVec3 {
        self.x_axis.cross(self.y_axis).normalize()
    }

    /// Parallel translation.
    pub fn translated(&self, delta: DVec3) -> Section {
        Section {
            origin: self.origin + delta,
            x_axis: self.x_axis,
            y_axis: self.y_axis,
        }
    }

    /// Projects a 3-D point onto the section's coordinate system. The
    /// result is measured along each normalized axis, in the same units
    /// as the section itself.
    pub fn project_point(&self, point: DVec3) -> DVec2 {
        let p = point - self.origin;
        DVec2::new(
            self.x_axis.normalize().dot(p),
            self.y_axis.normalize().dot(p),
        )
    }

    /// True when `point` lies within the finite rectangle, not merely the
    /// infinite plane. Both boundaries are inclusive: the projection onto
    /// each axis must fall within `[0, |axis|^2]`.
    pub fn contains_point(&self, point: DVec3) -> bool {
        let op = point - self.origin;
        let dot_x = self.x_axis.dot(op);
        let dot_y = self.y_axis.dot(op);
        0.0 <= dot_x
            && dot_x <= self.x_axis.length_squared()
            && 0.0 <= dot_y
            && dot_y <= self.y_axis.length_squared()
    }

    /// Converts a mm-space section to voxel index space by dividing each
    /// component by the voxel size.
    pub fn to_index_space(&self, voxel_size: DVec3) -> Section {
        Section {
            origin: self.origin / voxel_size,
            x_axis: self.x_axis / voxel_size,
            y_axis: self.y_axis / voxel_size,
        }
    }
}

/// A 3-D line segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineSegment {
    pub start: DVec3,
    pub end: DVec3,
}

impl LineSegment {
    pub fn new(start: DVec3, end: DVec3) -> Self {
        Self { start, end }
    }

    /// Point at parameter `t` (`0.0` = start, `1.0` = end).
    pub fn at(&self, t: f64) -> DVec3 {
        self.start + (self.end - self.start) * t
    }

    pub fn length(&self) -> f64 {
        (self.end - self.start).length()
    }
}

/// Axis-aligned box, typically in mm space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Box3 {
    pub origin: DVec3,
    pub size: DVec3,
}

impl Box3 {
    pub fn new(origin: DVec3, size: DVec3) -> Self {
        Self { origin, size }
    }

    /// The 8 corner points.
    ///
    /// ```text
    ///   7----6
    ///  /|   /|      4..7 at origin.z + size.z
    /// 4----5 |
    /// | 3--|-2
    /// |/   |/       0..3 at origin.z
    /// 0----1
    /// ```
    pub fn corners(&self) -> [DVec3; 8] {
        let o = self.origin;
        let s = self.size;
        [
            o,
            o + DVec3::new(s.x, 0.0, 0.0),
            o + DVec3::new(s.x, s.y, 0.0),
            o + DVec3::new(0.0, s.y, 0.0),
            o + DVec3::new(0.0, 0.0, s.z),
            o + DVec3::new(s.x, 0.0, s.z),
            o + s,
            o + DVec3::new(0.0, s.y, s.z),
        ]
    }

    /// The 12 edges as line segments.
    pub fn edges(&self) -> [LineSegment; 12] {
        const EDGES: [(usize, usize); 12] = [
            (0, 1),
            (1, 2),
            (2, 3),
            (3, 0),
            (4, 5),
            (5, 6),
            (6, 7),
            (7, 4),
            (0, 4),
            (1, 5),
            (2, 6),
            (3, 7),
        ];
        let c = self.corners();
        EDGES.map(|(a, b)| LineSegment::new(c[a], c[b]))
    }
}

/// Axis-aligned rectangle in 2-D (canvas) space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub origin: DVec2,
    pub size: DVec2,
}

impl Rect {
    pub fn new(origin: DVec2, size: DVec2) -> Self {
        Self { origin, size }
    }

    /// Smallest rectangle containing all of `points`, or `None` for an
    /// empty iterator.
    pub fn bounding(points: impl IntoIterator<Item = DVec2>) -> Option<Rect> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let (mut min, mut max) = (first, first);
        for p in iter {
            min = min.min(p);
            max = max.max(p);
        }
        Some(Rect {
            origin: min,
            size: max - min,
        })
    }

    /// Expands to the enclosing whole-pixel rectangle: floor the origin,
    /// ceil the far corner.
    pub fn grown_to_pixels(&self) -> Rect {
        let min = self.origin.floor();
        let max = (self.origin + self.size).ceil();
        Rect {
            origin: min,
            size: max - min,
        }
    }
}

/// Intersection of a line segment and the (infinite) plane containing the
/// section.
///
/// Returns `None` when both endpoints lie strictly on the same side, and
/// also when both signed distances are exactly zero, i.e. the segment is
/// embedded in the plane. A coincident segment therefore never yields an
/// intersection point; see the degenerate-case tests.
pub fn intersect_line_plane(section: &Section, line: &LineSegment) -> Option<DVec3> {
    let nv = section.normal();
    let dot_a = (section.origin - line.start).dot(nv);
    let dot_b = (section.origin - line.end).dot(nv);

    if dot_a == 0.0 && dot_b == 0.0 {
        // segment parallel to and within the plane
        None
    } else if (dot_a > 0.0 && dot_b > 0.0) || (dot_a < 0.0 && dot_b < 0.0) {
        // both endpoints on the same side
        None
    } else {
        let rate = dot_a.abs() / (dot_a.abs() + dot_b.abs());
        Some(line.at(rate))
    }
}

/// Like [`intersect_line_plane`], but only accepts intersection points
/// inside the section's finite rectangle.
pub fn intersect_line_section(section: &Section, line: &LineSegment) -> Option<DVec3> {
    intersect_line_plane(section, line).filter(|&p| section.contains_point(p))
}

/// Intersection of two finite sections.
///
/// Projects the 4 edges of `target`'s rectangle onto `base`'s plane and
/// returns the segment between two distinct intersection points. `None`
/// when fewer than two edges cross the plane, when every crossing lies
/// outside `base`'s finite rectangle, or when all crossings coincide
/// (identical sections fall in this last case). The resulting segment may
/// extend beyond `base`'s boundary but never beyond `target`'s.
pub fn intersect_sections(base: &Section, target: &Section) -> Option<LineSegment> {
    // 0--1
    // |  |
    // 3--2
    let o = target.origin;
    let vertices = [
        o,
        o + target.x_axis,
        o + target.x_axis + target.y_axis,
        o + target.y_axis,
    ];
    let edges = [(0, 1), (1, 2), (2, 3), (3, 0)];

    let mut points: Vec<DVec3> = Vec::with_capacity(4);
    for (a, b) in edges {
        let edge = LineSegment::new(vertices[a], vertices[b]);
        if let Some(p) = intersect_line_plane(base, &edge) {
            points.push(p);
        }
    }

    if points.len() < 2 {
        return None;
    }
    if points.iter().all(|&p| !base.contains_point(p)) {
        return None;
    }

    // Normally two points remain; with more, pick one distinct from the first.
    for &p in &points[1..] {
        if points[0].distance(p) > 1e-4 {
            return Some(LineSegment::new(points[0], p));
        }
    }
    None
}

/// Intersection points of a box's 12 edges with the section's plane, or
/// `None` when no edge crosses it.
pub fn intersect_box_plane(b: &Box3, section: &Section) -> Option<Vec<DVec3>> {
    let points: Vec<DVec3> = b
        .edges()
        .iter()
        .filter_map(|edge| intersect_line_plane(section, edge))
        .collect();
    if points.is_empty() {
        None
    } else {
        Some(points)
    }
}

/// Intersection of two rectangles, `None` when they do not overlap.
pub fn intersect_rects(a: &Rect, b: &Rect) -> Option<Rect> {
    let min = a.origin.max(b.origin);
    let max = (a.origin + a.size).min(b.origin + b.size);
    if min.x < max.x && min.y < max.y {
        Some(Rect {
            origin: min,
            size: max - min,
        })
    } else {
        None
    }
}

/// Maps a volume-space (mm) point to canvas pixel coordinates for the
/// given section and output resolution.
pub fn volume_to_screen(section: &Section, resolution: [usize; 2], point: DVec3) -> DVec2 {
    let projection = section.project_point(point);
    DVec2::new(
        projection.x * resolution[0] as f64 / section.x_axis.length(),
        projection.y * resolution[1] as f64 / section.y_axis.length(),
    )
}

/// Maps canvas pixel coordinates back to a volume-space (mm) point.
pub fn screen_to_volume(section: &Section, resolution: [usize; 2], point: DVec2) -> DVec3 {
    section.origin
        + section.x_axis * (point.x / resolution[0] as f64)
        + section.y_axis * (point.y / resolution[1] as f64)
}
