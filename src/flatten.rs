//! Curve flattening: cubic and quadratic Béziers, elliptical arcs and full
//! ellipses become polylines; `merge_close_points` enforces the minimum
//! spacing between neighbouring points.

use std::f32::consts::{PI, TAU};

use crate::types::Point;

/// Flattens a cubic Bézier into exactly `segments + 1` points by uniform
/// parametric stepping. The first and last points are `p0` and `p3` verbatim.
pub fn flatten_cubic(p0: Point, p1: Point, p2: Point, p3: Point, segments: usize) -> Vec<Point> {
    let n = segments.max(1);
    let mut out = Vec::with_capacity(n + 1);
    out.push(p0);
    for i in 1..n {
        let t = i as f32 / n as f32;
        out.push(cubic_point(p0, p1, p2, p3, t));
    }
    out.push(p3);
    out
}

/// Quadratic Bézier through the cubic flattener (exact degree elevation).
pub fn flatten_quadratic(p0: Point, p1: Point, p2: Point, segments: usize) -> Vec<Point> {
    let (c1, c2) = quad_to_cubic(p0, p1, p2);
    flatten_cubic(p0, c1, c2, p2, segments)
}

pub fn quad_to_cubic(p0: Point, p1: Point, p2: Point) -> (Point, Point) {
    let c1 = Point::new(
        p0.x + (2.0 / 3.0) * (p1.x - p0.x),
        p0.y + (2.0 / 3.0) * (p1.y - p0.y),
    );
    let c2 = Point::new(
        p2.x + (2.0 / 3.0) * (p1.x - p2.x),
        p2.y + (2.0 / 3.0) * (p1.y - p2.y),
    );
    (c1, c2)
}

fn cubic_point(p0: Point, p1: Point, p2: Point, p3: Point, t: f32) -> Point {
    let mt = 1.0 - t;
    let a = mt * mt * mt;
    let b = 3.0 * mt * mt * t;
    let c = 3.0 * mt * t * t;
    let d = t * t * t;
    Point::new(
        a * p0.x + b * p1.x + c * p2.x + d * p3.x,
        a * p0.y + b * p1.y + c * p2.y + d * p3.y,
    )
}

/// Centre parameterization of an elliptical arc. Angles are in radians;
/// `sweep_angle` is signed (positive runs in the direction of increasing
/// angle).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArcParams {
    pub center: Point,
    pub rx: f32,
    pub ry: f32,
    pub rotation: f32,
    pub start_angle: f32,
    pub sweep_angle: f32,
}

impl ArcParams {
    pub fn full(center: Point, rx: f32, ry: f32) -> Self {
        Self {
            center,
            rx: rx.abs(),
            ry: ry.abs(),
            rotation: 0.0,
            start_angle: 0.0,
            sweep_angle: TAU,
        }
    }

    /// Endpoint-to-centre conversion of an SVG `A` command (SVG 1.1
    /// implementation notes F.6.5/F.6.6). `None` means the arc degenerates to
    /// a straight line: a zero radius or coincident endpoints.
    pub fn from_endpoints(
        from: Point,
        rx: f32,
        ry: f32,
        x_axis_rotation_deg: f32,
        large_arc: bool,
        sweep: bool,
        to: Point,
    ) -> Option<Self> {
        let mut rx = rx.abs();
        let mut ry = ry.abs();
        if rx == 0.0 || ry == 0.0 || from == to {
            return None;
        }
        if !rx.is_finite() || !ry.is_finite() {
            return None;
        }

        let phi = x_axis_rotation_deg.to_radians();
        let sin_phi = libm::sinf(phi);
        let cos_phi = libm::cosf(phi);

        let dx2 = (from.x - to.x) / 2.0;
        let dy2 = (from.y - to.y) / 2.0;
        let x1p = cos_phi * dx2 + sin_phi * dy2;
        let y1p = -sin_phi * dx2 + cos_phi * dy2;

        // Scale radii up when no ellipse of the given size reaches both ends.
        let x1p2 = x1p * x1p;
        let y1p2 = y1p * y1p;
        let lambda = x1p2 / (rx * rx) + y1p2 / (ry * ry);
        if lambda > 1.0 {
            let s = libm::sqrtf(lambda);
            rx *= s;
            ry *= s;
        }

        let rx2 = rx * rx;
        let ry2 = ry * ry;
        let num = rx2 * ry2 - rx2 * y1p2 - ry2 * x1p2;
        let den = rx2 * y1p2 + ry2 * x1p2;
        let mut coef = 0.0;
        if den != 0.0 {
            let sign = if large_arc == sweep { -1.0 } else { 1.0 };
            coef = sign * libm::sqrtf((num / den).max(0.0));
        }
        let cxp = coef * (rx * y1p / ry);
        let cyp = coef * (-ry * x1p / rx);

        let cx = cos_phi * cxp - sin_phi * cyp + (from.x + to.x) / 2.0;
        let cy = sin_phi * cxp + cos_phi * cyp + (from.y + to.y) / 2.0;

        let ux = (x1p - cxp) / rx;
        let uy = (y1p - cyp) / ry;
        let vx = (-x1p - cxp) / rx;
        let vy = (-y1p - cyp) / ry;

        let start_angle = vector_angle(1.0, 0.0, ux, uy);
        let mut sweep_angle = vector_angle(ux, uy, vx, vy);
        if !sweep && sweep_angle > 0.0 {
            sweep_angle -= 2.0 * PI;
        } else if sweep && sweep_angle < 0.0 {
            sweep_angle += 2.0 * PI;
        }
        if sweep_angle == 0.0 || !sweep_angle.is_finite() {
            return None;
        }

        Some(Self {
            center: Point::new(cx, cy),
            rx,
            ry,
            rotation: phi,
            start_angle,
            sweep_angle,
        })
    }

    /// Segments used for this arc: proportional to its share of a full turn.
    pub fn segment_count(&self, circle_points: usize) -> usize {
        let share = self.sweep_angle.abs() / TAU;
        let n = libm::ceilf(circle_points.max(1) as f32 * share);
        (n as usize).max(1)
    }

    /// Sampled angles from `start_angle` to `start_angle + sweep_angle`,
    /// strictly monotonic in the sweep direction.
    pub fn angles(&self, circle_points: usize) -> Vec<f32> {
        let n = self.segment_count(circle_points);
        (0..=n)
            .map(|i| self.start_angle + self.sweep_angle * (i as f32 / n as f32))
            .collect()
    }

    pub fn point_at(&self, angle: f32) -> Point {
        let x = self.rx * libm::cosf(angle);
        let y = self.ry * libm::sinf(angle);
        let sin_phi = libm::sinf(self.rotation);
        let cos_phi = libm::cosf(self.rotation);
        Point::new(
            self.center.x + cos_phi * x - sin_phi * y,
            self.center.y + sin_phi * x + cos_phi * y,
        )
    }

    pub fn points(&self, circle_points: usize) -> Vec<Point> {
        self.angles(circle_points)
            .into_iter()
            .map(|a| self.point_at(a))
            .collect()
    }
}

fn vector_angle(ux: f32, uy: f32, vx: f32, vy: f32) -> f32 {
    let dot = ux * vx + uy * vy;
    let det = ux * vy - uy * vx;
    libm::atan2f(det, dot)
}

/// Flattens an SVG arc segment. Starts at `from` and ends at `to` exactly;
/// degenerate arcs become the straight segment `[from, to]`.
#[allow(clippy::too_many_arguments)]
pub fn flatten_arc(
    from: Point,
    rx: f32,
    ry: f32,
    x_axis_rotation_deg: f32,
    large_arc: bool,
    sweep: bool,
    to: Point,
    circle_points: usize,
) -> Vec<Point> {
    let Some(arc) = ArcParams::from_endpoints(from, rx, ry, x_axis_rotation_deg, large_arc, sweep, to)
    else {
        return vec![from, to];
    };
    let mut points = arc.points(circle_points);
    let last = points.len() - 1;
    points[0] = from;
    points[last] = to;
    points
}

/// Full revolution of an axis-aligned ellipse, without repeating the first
/// point at the end.
pub fn flatten_ellipse(center: Point, rx: f32, ry: f32, circle_points: usize) -> Vec<Point> {
    let n = circle_points.max(3);
    let arc = ArcParams::full(center, rx, ry);
    (0..n)
        .map(|i| arc.point_at(TAU * i as f32 / n as f32))
        .collect()
}

/// Drops points closer than `tolerance` to their predecessor. The first and
/// the final point survive verbatim unless the whole run collapses onto the
/// first point. Closed contours also lose a trailing duplicate of the start.
pub fn merge_close_points(points: &mut Vec<Point>, tolerance: f32, closed: bool) {
    if points.len() < 2 {
        return;
    }
    let far_enough = |a: Point, b: Point| {
        let d = a.distance(b);
        d > 0.0 && d >= tolerance
    };

    let end = points[points.len() - 1];
    let mut out: Vec<Point> = Vec::with_capacity(points.len());
    out.push(points[0]);
    for &p in &points[1..points.len() - 1] {
        if far_enough(p, out[out.len() - 1]) {
            out.push(p);
        }
    }
    while out.len() > 1 && !far_enough(end, out[out.len() - 1]) {
        out.pop();
    }
    if far_enough(end, out[out.len() - 1]) {
        out.push(end);
    }

    if closed {
        while out.len() > 2 && !far_enough(out[out.len() - 1], out[0]) {
            out.pop();
        }
    }
    *points = out;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Point, b: Point) -> bool {
        (a.x - b.x).abs() < 1e-3 && (a.y - b.y).abs() < 1e-3
    }

    #[test]
    fn cubic_yields_n_plus_one_points_with_exact_endpoints() {
        let p0 = Point::new(0.3, -1.7);
        let p1 = Point::new(10.0, 40.0);
        let p2 = Point::new(-25.0, 13.0);
        let p3 = Point::new(99.9, 0.1);
        for n in [2usize, 3, 7, 10, 64] {
            let pts = flatten_cubic(p0, p1, p2, p3, n);
            assert_eq!(pts.len(), n + 1);
            assert_eq!(pts[0], p0);
            assert_eq!(pts[n], p3);
        }
    }

    #[test]
    fn cubic_midpoint_matches_bernstein_form() {
        let pts = flatten_cubic(
            Point::new(0.0, 0.0),
            Point::new(0.0, 10.0),
            Point::new(10.0, 10.0),
            Point::new(10.0, 0.0),
            2,
        );
        assert!(approx(pts[1], Point::new(5.0, 7.5)));
    }

    #[test]
    fn coincident_control_points_collapse_to_one_point() {
        let p = Point::new(4.0, 4.0);
        let mut pts = flatten_cubic(p, p, p, p, 10);
        assert_eq!(pts.len(), 11);
        merge_close_points(&mut pts, 0.001, false);
        assert_eq!(pts, vec![p]);
    }

    #[test]
    fn quadratic_passes_through_endpoints() {
        let pts = flatten_quadratic(Point::new(0.0, 0.0), Point::new(5.0, 10.0), Point::new(10.0, 0.0), 4);
        assert_eq!(pts.len(), 5);
        assert_eq!(pts[4], Point::new(10.0, 0.0));
        // Peak of a symmetric quadratic is half the control height.
        assert!(approx(pts[2], Point::new(5.0, 5.0)));
    }

    #[test]
    fn positive_sweep_samples_increase() {
        let arc = ArcParams::from_endpoints(
            Point::new(10.0, 0.0),
            10.0,
            10.0,
            0.0,
            false,
            true,
            Point::new(0.0, 10.0),
        )
        .unwrap();
        assert!(arc.sweep_angle > 0.0);
        let angles = arc.angles(48);
        assert!(angles.len() >= 2);
        assert!(angles.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn negative_sweep_samples_decrease() {
        let arc = ArcParams::from_endpoints(
            Point::new(10.0, 0.0),
            10.0,
            10.0,
            0.0,
            true,
            false,
            Point::new(0.0, 10.0),
        )
        .unwrap();
        assert!(arc.sweep_angle < 0.0);
        let angles = arc.angles(48);
        assert!(angles.windows(2).all(|w| w[1] < w[0]));
    }

    #[test]
    fn large_arc_flag_picks_the_longer_way_round() {
        let from = Point::new(10.0, 0.0);
        let to = Point::new(0.0, 10.0);
        let small = ArcParams::from_endpoints(from, 10.0, 10.0, 0.0, false, true, to).unwrap();
        let large = ArcParams::from_endpoints(from, 10.0, 10.0, 0.0, true, true, to).unwrap();
        assert!((small.sweep_angle - PI / 2.0).abs() < 1e-3);
        assert!((large.sweep_angle - 3.0 * PI / 2.0).abs() < 1e-3);
        assert!(large.segment_count(24) > small.segment_count(24));
    }

    #[test]
    fn undersized_radii_are_scaled_up() {
        // A radius of 1 cannot span 20 units; the arc becomes a half circle.
        let arc = ArcParams::from_endpoints(
            Point::new(0.0, 0.0),
            1.0,
            1.0,
            0.0,
            false,
            true,
            Point::new(20.0, 0.0),
        )
        .unwrap();
        assert!((arc.rx - 10.0).abs() < 1e-3);
        assert!(approx(arc.center, Point::new(10.0, 0.0)));
    }

    #[test]
    fn arc_flattening_hits_both_endpoints_exactly() {
        let from = Point::new(1.5, 2.5);
        let to = Point::new(31.0, -7.25);
        let pts = flatten_arc(from, 20.0, 12.0, 30.0, false, true, to, 24);
        assert_eq!(pts[0], from);
        assert_eq!(*pts.last().unwrap(), to);
    }

    #[test]
    fn degenerate_arc_is_a_straight_line() {
        let from = Point::new(0.0, 0.0);
        let to = Point::new(5.0, 5.0);
        assert_eq!(flatten_arc(from, 0.0, 3.0, 0.0, false, true, to, 24), vec![from, to]);
        assert!(ArcParams::from_endpoints(from, 3.0, 3.0, 0.0, false, true, from).is_none());
    }

    #[test]
    fn ellipse_points_lie_on_the_ellipse() {
        let pts = flatten_ellipse(Point::new(5.0, 5.0), 4.0, 2.0, 16);
        assert_eq!(pts.len(), 16);
        for p in &pts {
            let nx = (p.x - 5.0) / 4.0;
            let ny = (p.y - 5.0) / 2.0;
            assert!((nx * nx + ny * ny - 1.0).abs() < 1e-3);
        }
    }

    #[test]
    fn merge_enforces_minimum_spacing_and_keeps_endpoint() {
        let mut pts = vec![
            Point::new(0.0, 0.0),
            Point::new(0.0005, 0.0),
            Point::new(1.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(2.0, 0.0),
            Point::new(2.0004, 0.0),
        ];
        merge_close_points(&mut pts, 0.001, false);
        assert_eq!(
            pts,
            vec![Point::new(0.0, 0.0), Point::new(1.0, 0.0), Point::new(2.0004, 0.0)]
        );
        assert!(pts.windows(2).all(|w| w[0].distance(w[1]) >= 0.001));
    }

    #[test]
    fn merge_drops_closing_duplicate_of_closed_contour() {
        let mut pts = vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 0.0),
        ];
        merge_close_points(&mut pts, 0.001, true);
        assert_eq!(pts.len(), 3);
    }
}
