//! Shape construction: one SVG shape element and its scope become a `Shape`
//! made of flattened contours.

use std::f32::consts::{FRAC_PI_2, PI};

use tracing::warn;

use crate::config::Config;
use crate::error::ParseError;
use crate::flatten::{
    ArcParams, flatten_arc, flatten_cubic, flatten_ellipse, flatten_quadratic, merge_close_points,
};
use crate::paint::{Paint, PaintSpec};
use crate::parse::{PathParser, attr_number, parse_number, parse_points, parse_transform};
use crate::scope::{ClipRef, Scope};
use crate::types::{FillRule, Matrix, Point, Rect};

pub(crate) const SHAPE_ELEMENTS: [&str; 7] =
    ["path", "rect", "circle", "ellipse", "line", "polygon", "polyline"];

pub(crate) fn is_shape_element(name: &str) -> bool {
    SHAPE_ELEMENTS.contains(&name)
}

/// A flattened subpath. Closed contours do not repeat their first point.
#[derive(Debug, Clone, PartialEq)]
pub struct Contour {
    pub points: Vec<Point>,
    pub closed: bool,
}

impl Contour {
    pub fn open(points: Vec<Point>) -> Self {
        Self {
            points,
            closed: false,
        }
    }

    pub fn closed(points: Vec<Point>) -> Self {
        Self {
            points,
            closed: true,
        }
    }

    pub fn transformed(&self, m: Matrix) -> Self {
        Self {
            points: self.points.iter().map(|p| m.apply(*p)).collect(),
            closed: self.closed,
        }
    }
}

/// One `<clipPath>` child: its contours in clip space and its winding rule.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipPart {
    pub contours: Vec<Contour>,
    pub rule: FillRule,
}

/// Clip geometry attached to a shape. The parts are united; `transform` maps
/// them into the document space the shape's own transform starts from.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipRegion {
    pub id: String,
    pub parts: Vec<ClipPart>,
    pub transform: Matrix,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Shape {
    pub id: Option<String>,
    pub element: String,
    /// Contours in the shape's own user space; `transform` maps them to the
    /// document.
    pub contours: Vec<Contour>,
    pub fill_spec: PaintSpec,
    pub stroke_spec: PaintSpec,
    pub fill: Paint,
    pub stroke: Paint,
    pub stroke_width: f32,
    pub fill_rule: FillRule,
    pub transform: Matrix,
    pub opacity: f32,
    pub fill_opacity: f32,
    pub stroke_opacity: f32,
    pub clip_ref: Option<ClipRef>,
    pub clip: Option<ClipRegion>,
    /// Tile rectangle of a `<pattern>`.
    pub is_pattern: bool,
    /// Content of a `<pattern>` tile.
    pub is_pattern_part: bool,
}

impl Shape {
    pub fn new(element: &str, contours: Vec<Contour>, scope: &Scope) -> Self {
        Self {
            id: None,
            element: element.to_string(),
            contours,
            fill_spec: scope.fill.clone(),
            stroke_spec: scope.stroke.clone(),
            fill: Paint::None,
            stroke: Paint::None,
            stroke_width: scope.stroke_width,
            fill_rule: scope.fill_rule,
            transform: scope.transform,
            opacity: scope.opacity,
            fill_opacity: scope.fill_opacity,
            stroke_opacity: scope.stroke_opacity,
            clip_ref: scope.clip.clone(),
            clip: None,
            is_pattern: false,
            is_pattern_part: false,
        }
    }

    /// Bounds of the contours in the shape's own user space.
    pub fn bbox(&self) -> Option<Rect> {
        Rect::from_points(self.contours.iter().flat_map(|c| c.points.iter()))
    }

    pub fn point_count(&self) -> usize {
        self.contours.iter().map(|c| c.points.len()).sum()
    }
}

/// Builds the shape for `node`, which must be one of `SHAPE_ELEMENTS`.
pub fn build_shape(
    node: roxmltree::Node<'_, '_>,
    scope: &Scope,
    config: &Config,
) -> Result<Shape, ParseError> {
    let element = node.tag_name().name();
    let mut contours = match element {
        "path" => {
            let d = node.attribute("d").ok_or(ParseError::MissingAttribute {
                element: element.to_string(),
                attribute: "d",
            })?;
            parse_path_data(d, config)?
        }
        "rect" => rect_contours(node, config),
        "circle" => {
            let r = attr_number(node, "r");
            ellipse_contours(node, r, r, config)
        }
        "ellipse" => ellipse_contours(node, attr_number(node, "rx"), attr_number(node, "ry"), config),
        "line" => vec![Contour::open(vec![
            Point::new(attr_number(node, "x1"), attr_number(node, "y1")),
            Point::new(attr_number(node, "x2"), attr_number(node, "y2")),
        ])],
        "polygon" | "polyline" => {
            let raw = node.attribute("points").ok_or(ParseError::MissingAttribute {
                element: element.to_string(),
                attribute: "points",
            })?;
            let points = parse_points(raw);
            if points.len() < 2 {
                return Err(ParseError::InvalidPoints {
                    element: element.to_string(),
                    found: points.len(),
                });
            }
            if element == "polygon" {
                vec![Contour::closed(points)]
            } else {
                vec![Contour::open(points)]
            }
        }
        other => {
            return Err(ParseError::InvalidPathData(format!(
                "<{other}> is not a shape element"
            )));
        }
    };

    for contour in &mut contours {
        merge_close_points(&mut contour.points, config.tolerance(), contour.closed);
    }
    contours.retain(|c| !c.points.is_empty());

    let mut shape = Shape::new(element, contours, scope);
    shape.id = node.attribute("id").map(str::to_string);
    Ok(shape)
}

fn rect_contours(node: roxmltree::Node<'_, '_>, config: &Config) -> Vec<Contour> {
    let x = attr_number(node, "x");
    let y = attr_number(node, "y");
    let w = attr_number(node, "width");
    let h = attr_number(node, "height");
    if w <= 0.0 || h <= 0.0 {
        return Vec::new();
    }

    let rx_attr = node.attribute("rx").and_then(parse_number);
    let ry_attr = node.attribute("ry").and_then(parse_number);
    let (rx, ry) = match (rx_attr, ry_attr) {
        (Some(rx), Some(ry)) => (rx, ry),
        (Some(r), None) | (None, Some(r)) => (r, r),
        (None, None) => (0.0, 0.0),
    };
    let rx = rx.clamp(0.0, w / 2.0);
    let ry = ry.clamp(0.0, h / 2.0);

    if rx <= 0.0 || ry <= 0.0 {
        return vec![Contour::closed(vec![
            Point::new(x, y),
            Point::new(x + w, y),
            Point::new(x + w, y + h),
            Point::new(x, y + h),
        ])];
    }

    // Clockwise in y-down space, one quarter arc per corner.
    let corners = [
        (Point::new(x + w - rx, y + ry), -FRAC_PI_2),
        (Point::new(x + w - rx, y + h - ry), 0.0),
        (Point::new(x + rx, y + h - ry), FRAC_PI_2),
        (Point::new(x + rx, y + ry), PI),
    ];
    let mut points = Vec::new();
    for (center, start_angle) in corners {
        let arc = ArcParams {
            center,
            rx,
            ry,
            rotation: 0.0,
            start_angle,
            sweep_angle: FRAC_PI_2,
        };
        points.extend(arc.points(config.circle_points()));
    }
    vec![Contour::closed(points)]
}

fn ellipse_contours(node: roxmltree::Node<'_, '_>, rx: f32, ry: f32, config: &Config) -> Vec<Contour> {
    if rx <= 0.0 || ry <= 0.0 {
        return Vec::new();
    }
    let center = Point::new(attr_number(node, "cx"), attr_number(node, "cy"));
    vec![Contour::closed(flatten_ellipse(center, rx, ry, config.circle_points()))]
}

#[derive(Debug, Clone, Copy)]
enum LastControl {
    None,
    Cubic(Point),
    Quad(Point),
}

/// Subpath assembly for `parse_path_data`.
struct PathBuilder {
    contours: Vec<Contour>,
    current: Vec<Point>,
    cur: Point,
    start: Point,
}

impl PathBuilder {
    fn new() -> Self {
        Self {
            contours: Vec::new(),
            current: Vec::new(),
            cur: Point::ZERO,
            start: Point::ZERO,
        }
    }

    fn flush(&mut self, closed: bool) {
        let points = std::mem::take(&mut self.current);
        if points.len() >= 2 {
            self.contours.push(Contour { points, closed });
        }
    }

    fn move_to(&mut self, p: Point) {
        self.flush(false);
        self.current.push(p);
        self.cur = p;
        self.start = p;
    }

    /// Appends points that continue from the pen; `points[0]` is the pen.
    fn extend(&mut self, points: &[Point]) {
        if self.current.is_empty() {
            self.current.push(self.cur);
        }
        self.current.extend_from_slice(points.get(1..).unwrap_or_default());
        if let Some(last) = points.last() {
            self.cur = *last;
        }
    }

    fn line_to(&mut self, p: Point) {
        self.extend(&[self.cur, p]);
    }

    fn close(&mut self) {
        self.flush(true);
        self.cur = self.start;
    }
}

fn arc_args(p: &mut PathParser<'_>) -> Option<(f32, f32, f32, bool, bool, Point)> {
    let rx = p.next_number()?;
    let ry = p.next_number()?;
    let rot = p.next_number()?;
    let large = p.next_flag()?;
    let sweep = p.next_flag()?;
    let end = p.next_point()?;
    Some((rx, ry, rot, large, sweep, end))
}

fn reflect(about: Point, p: Point) -> Point {
    Point::new(2.0 * about.x - p.x, 2.0 * about.y - p.y)
}

/// Flattens SVG path data into contours. A malformed tail is logged and
/// dropped; the geometry read before it is kept.
pub fn parse_path_data(d: &str, config: &Config) -> Result<Vec<Contour>, ParseError> {
    let mut p = PathParser::new(d);
    let mut b = PathBuilder::new();
    let mut repeat: Option<char> = None;
    let mut last = LastControl::None;
    let mut first = true;

    let bezier = config.bezier_points();
    let circle = config.circle_points();

    while !p.at_end() {
        let before = p.position();
        let cmd = match p.next_command() {
            Some(c) => c,
            None => match repeat {
                Some(c) if p.peek_is_number() => c,
                _ => {
                    warn!(offset = before, "unexpected token in path data, ignoring the rest");
                    break;
                }
            },
        };
        if first && !matches!(cmd, 'M' | 'm') {
            return Err(ParseError::InvalidPathData(format!(
                "path data must begin with a moveto, found {cmd:?}"
            )));
        }
        first = false;

        let rel = cmd.is_ascii_lowercase();
        let base = if rel { b.cur } else { Point::ZERO };
        let at = |q: Point| Point::new(base.x + q.x, base.y + q.y);

        let ok = match cmd.to_ascii_uppercase() {
            'M' => match p.next_point() {
                Some(q) => {
                    b.move_to(at(q));
                    repeat = Some(if rel { 'l' } else { 'L' });
                    last = LastControl::None;
                    true
                }
                None => false,
            },
            'L' => match p.next_point() {
                Some(q) => {
                    b.line_to(at(q));
                    repeat = Some(cmd);
                    last = LastControl::None;
                    true
                }
                None => false,
            },
            'H' => match p.next_number() {
                Some(v) => {
                    let x = if rel { b.cur.x + v } else { v };
                    b.line_to(Point::new(x, b.cur.y));
                    repeat = Some(cmd);
                    last = LastControl::None;
                    true
                }
                None => false,
            },
            'V' => match p.next_number() {
                Some(v) => {
                    let y = if rel { b.cur.y + v } else { v };
                    b.line_to(Point::new(b.cur.x, y));
                    repeat = Some(cmd);
                    last = LastControl::None;
                    true
                }
                None => false,
            },
            'C' => match (p.next_point(), p.next_point(), p.next_point()) {
                (Some(c1), Some(c2), Some(end)) => {
                    let (c1, c2, end) = (at(c1), at(c2), at(end));
                    b.extend(&flatten_cubic(b.cur, c1, c2, end, bezier));
                    repeat = Some(cmd);
                    last = LastControl::Cubic(c2);
                    true
                }
                _ => false,
            },
            'S' => match (p.next_point(), p.next_point()) {
                (Some(c2), Some(end)) => {
                    let c1 = match last {
                        LastControl::Cubic(prev) => reflect(b.cur, prev),
                        _ => b.cur,
                    };
                    let (c2, end) = (at(c2), at(end));
                    b.extend(&flatten_cubic(b.cur, c1, c2, end, bezier));
                    repeat = Some(cmd);
                    last = LastControl::Cubic(c2);
                    true
                }
                _ => false,
            },
            'Q' => match (p.next_point(), p.next_point()) {
                (Some(c), Some(end)) => {
                    let (c, end) = (at(c), at(end));
                    b.extend(&flatten_quadratic(b.cur, c, end, bezier));
                    repeat = Some(cmd);
                    last = LastControl::Quad(c);
                    true
                }
                _ => false,
            },
            'T' => match p.next_point() {
                Some(end) => {
                    let c = match last {
                        LastControl::Quad(prev) => reflect(b.cur, prev),
                        _ => b.cur,
                    };
                    let end = at(end);
                    b.extend(&flatten_quadratic(b.cur, c, end, bezier));
                    repeat = Some(cmd);
                    last = LastControl::Quad(c);
                    true
                }
                None => false,
            },
            'A' => {
                match arc_args(&mut p) {
                    Some((rx, ry, rot, large, sweep, end)) => {
                        let end = at(end);
                        b.extend(&flatten_arc(b.cur, rx, ry, rot, large, sweep, end, circle));
                        repeat = Some(cmd);
                        last = LastControl::None;
                        true
                    }
                    None => false,
                }
            }
            'Z' => {
                b.close();
                repeat = None;
                last = LastControl::None;
                true
            }
            _ => false,
        };

        if !ok || p.position() == before {
            warn!(command = %cmd, offset = before, "malformed path data, ignoring the rest");
            break;
        }
    }
    b.flush(false);

    if b.contours.is_empty() {
        return Err(ParseError::InvalidPathData(
            "path data produced no drawable contour".to_string(),
        ));
    }
    Ok(b.contours)
}

/// Geometry of a `<clipPath>`: every shape child, with its own transform and
/// the clipPath's `transform` baked into the points.
pub(crate) fn clip_parts(node: roxmltree::Node<'_, '_>, config: &Config) -> Vec<ClipPart> {
    let base = node.attribute("transform").map(parse_transform).unwrap_or_default();
    let default_rule = node
        .attribute("clip-rule")
        .and_then(FillRule::parse)
        .unwrap_or_default();
    let scope = Scope::root().with_transform(base);

    let mut parts = Vec::new();
    for child in node.children().filter(|n| n.is_element()) {
        if !is_shape_element(child.tag_name().name()) {
            continue;
        }
        let child_scope = scope.derive(child);
        match build_shape(child, &child_scope, config) {
            Ok(shape) => {
                let rule = child
                    .attribute("clip-rule")
                    .and_then(FillRule::parse)
                    .unwrap_or(default_rule);
                parts.push(ClipPart {
                    contours: shape
                        .contours
                        .iter()
                        .filter(|c| c.points.len() >= 3)
                        .map(|c| c.transformed(shape.transform))
                        .collect(),
                    rule,
                });
            }
            Err(err) => warn!(%err, "skipping clipPath child"),
        }
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape_of(fragment: &str) -> Result<Shape, ParseError> {
        let xml = format!(r#"<svg xmlns="http://www.w3.org/2000/svg">{fragment}</svg>"#);
        let doc = roxmltree::Document::parse(&xml).unwrap();
        let node = doc.root_element().first_element_child().unwrap();
        let scope = Scope::root().derive(node);
        build_shape(node, &scope, &Config::default())
    }

    #[test]
    fn plain_rect_is_four_corners() {
        let shape = shape_of(r#"<rect x="0" y="0" width="10" height="10"/>"#).unwrap();
        assert_eq!(
            shape.contours,
            vec![Contour::closed(vec![
                Point::new(0.0, 0.0),
                Point::new(10.0, 0.0),
                Point::new(10.0, 10.0),
                Point::new(0.0, 10.0),
            ])]
        );
        assert_eq!(shape.bbox(), Some(Rect::new(0.0, 0.0, 10.0, 10.0)));
    }

    #[test]
    fn rounded_rect_stays_inside_its_box() {
        let shape = shape_of(r#"<rect x="0" y="0" width="20" height="10" rx="4"/>"#).unwrap();
        let bbox = shape.bbox().unwrap();
        assert!((bbox.width - 20.0).abs() < 1e-3);
        assert!((bbox.height - 10.0).abs() < 1e-3);
        assert!(shape.contours[0].points.len() > 8);
        assert!(shape.contours[0].closed);
    }

    #[test]
    fn circle_is_closed_ring() {
        let shape = shape_of(r#"<circle cx="5" cy="5" r="5"/>"#).unwrap();
        let c = &shape.contours[0];
        assert!(c.closed);
        assert_eq!(c.points.len(), Config::default().circle_points());
        assert_ne!(c.points.first(), c.points.last());
    }

    #[test]
    fn polyline_needs_two_points() {
        assert!(matches!(
            shape_of(r#"<polyline points="3 4"/>"#),
            Err(ParseError::InvalidPoints { found: 1, .. })
        ));
        assert!(matches!(
            shape_of(r#"<polygon/>"#),
            Err(ParseError::MissingAttribute { attribute: "points", .. })
        ));
        let ok = shape_of(r#"<polygon points="0,0 10,0 5,5"/>"#).unwrap();
        assert!(ok.contours[0].closed);
    }

    #[test]
    fn path_without_d_is_an_error() {
        assert!(matches!(
            shape_of(r#"<path/>"#),
            Err(ParseError::MissingAttribute { attribute: "d", .. })
        ));
    }

    #[test]
    fn relative_and_shorthand_commands() {
        let contours = parse_path_data("m10 10 h10 v10 h-10 z", &Config::default()).unwrap();
        assert_eq!(contours.len(), 1);
        assert!(contours[0].closed);
        assert_eq!(
            contours[0].points,
            vec![
                Point::new(10.0, 10.0),
                Point::new(20.0, 10.0),
                Point::new(20.0, 20.0),
                Point::new(10.0, 20.0),
            ]
        );
    }

    #[test]
    fn implicit_lineto_after_moveto() {
        let contours = parse_path_data("M0 0 10 0 10 10", &Config::default()).unwrap();
        assert_eq!(contours[0].points.len(), 3);
        assert!(!contours[0].closed);
    }

    #[test]
    fn curves_end_exactly_at_their_endpoint() {
        let cfg = Config::default();
        let contours = parse_path_data("M0 0 C0 10 10 10 10 0 S 20 -10 20 0", &cfg).unwrap();
        let pts = &contours[0].points;
        assert_eq!(pts.len(), 2 * cfg.bezier_points() + 1);
        assert_eq!(pts[cfg.bezier_points()], Point::new(10.0, 0.0));
        assert_eq!(*pts.last().unwrap(), Point::new(20.0, 0.0));
    }

    #[test]
    fn arcs_and_quadratics_flatten() {
        let contours =
            parse_path_data("M0 0 Q 5 10 10 0 T 20 0 A5 5 0 01 30 0", &Config::default()).unwrap();
        assert_eq!(*contours[0].points.last().unwrap(), Point::new(30.0, 0.0));
        assert!(contours[0].points.len() > 20);
    }

    #[test]
    fn z_returns_pen_to_subpath_start() {
        let contours = parse_path_data("M0 0 L10 0 L10 10 Z l 5 5", &Config::default()).unwrap();
        assert_eq!(contours.len(), 2);
        assert_eq!(contours[1].points, vec![Point::new(0.0, 0.0), Point::new(5.0, 5.0)]);
    }

    #[test]
    fn data_must_start_with_moveto() {
        assert!(matches!(
            parse_path_data("L 10 10", &Config::default()),
            Err(ParseError::InvalidPathData(_))
        ));
        assert!(parse_path_data("M 5 5", &Config::default()).is_err());
    }

    #[test]
    fn malformed_tail_keeps_leading_geometry() {
        let contours = parse_path_data("M0 0 L10 0 L10 10 # L 50 50", &Config::default()).unwrap();
        assert_eq!(contours[0].points.len(), 3);
        let trailing = parse_path_data("M0 0 L10 0 C 1 2", &Config::default()).unwrap();
        assert_eq!(trailing[0].points.len(), 2);
    }

    #[test]
    fn clip_children_bake_in_transforms() {
        let xml = r#"<svg xmlns="http://www.w3.org/2000/svg">
            <clipPath id="c" transform="translate(1 0)" clip-rule="evenodd">
              <rect width="2" height="2" transform="scale(2)"/>
              <circle r="1" clip-rule="nonzero"/>
              <text>ignored</text>
            </clipPath>
        </svg>"#;
        let doc = roxmltree::Document::parse(xml).unwrap();
        let clip = doc.descendants().find(|n| n.has_tag_name("clipPath")).unwrap();
        let parts = clip_parts(clip, &Config::default());
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].rule, FillRule::EvenOdd);
        assert_eq!(parts[1].rule, FillRule::NonZero);
        assert_eq!(parts[0].contours[0].points[2], Point::new(5.0, 4.0));
    }
}
