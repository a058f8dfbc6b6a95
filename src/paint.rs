use std::collections::{BTreeMap, HashMap, HashSet};

use lightningcss::printer::PrinterOptions;
use lightningcss::stylesheet::{ParserOptions, StyleAttribute};
use tracing::warn;

use crate::error::{ReferenceKind, Warning};
use crate::parse::{Coord, href_id, parse_color, parse_coord, parse_offset, parse_transform, parse_url_ref};
use crate::pattern::Pattern;
use crate::types::{Color, Matrix, Point, Rect};

/// A fill or stroke value as declared, before references are looked up.
#[derive(Debug, Clone, PartialEq)]
pub enum PaintSpec {
    None,
    Color(Color),
    Url { id: String, fallback: Option<Color> },
}

impl PaintSpec {
    /// `None` for values that leave the inherited paint in place, such as
    /// `currentColor` or garbage.
    pub fn parse(input: &str) -> Option<PaintSpec> {
        let v = input.trim();
        if v.eq_ignore_ascii_case("none") {
            return Some(PaintSpec::None);
        }
        if let Some(id) = parse_url_ref(v) {
            let fallback = v
                .find(')')
                .map(|i| v[i + 1..].trim())
                .filter(|rest| !rest.is_empty())
                .and_then(parse_color);
            return Some(PaintSpec::Url { id, fallback });
        }
        parse_color(v).map(PaintSpec::Color)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Units {
    UserSpaceOnUse,
    #[default]
    ObjectBoundingBox,
}

impl Units {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim() {
            "userSpaceOnUse" => Some(Units::UserSpaceOnUse),
            "objectBoundingBox" => Some(Units::ObjectBoundingBox),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SpreadMethod {
    #[default]
    Pad,
    Reflect,
    Repeat,
}

impl SpreadMethod {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim() {
            "pad" => Some(SpreadMethod::Pad),
            "reflect" => Some(SpreadMethod::Reflect),
            "repeat" => Some(SpreadMethod::Repeat),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradientStop {
    pub offset: f32,
    pub color: Color,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GradientKind {
    Linear {
        x1: Coord,
        y1: Coord,
        x2: Coord,
        y2: Coord,
    },
    Radial {
        cx: Coord,
        cy: Coord,
        r: Coord,
        fx: Coord,
        fy: Coord,
    },
}

/// A `<linearGradient>` or `<radialGradient>` with its `href` chain already
/// folded in.
#[derive(Debug, Clone, PartialEq)]
pub struct Gradient {
    pub id: String,
    pub kind: GradientKind,
    pub units: Units,
    pub transform: Matrix,
    pub spread: SpreadMethod,
    /// Non-decreasing offsets in [0, 1].
    pub stops: Vec<GradientStop>,
}

/// Fill or stroke ready for the surface. Gradient and pattern geometry is in
/// its own space; `transform` maps it into the shape's user space.
#[derive(Debug, Clone, PartialEq)]
pub enum Paint {
    None,
    Solid(Color),
    LinearGradient {
        start: Point,
        end: Point,
        stops: Vec<GradientStop>,
        spread: SpreadMethod,
        transform: Matrix,
    },
    RadialGradient {
        center: Point,
        focal: Point,
        radius: f32,
        stops: Vec<GradientStop>,
        spread: SpreadMethod,
        transform: Matrix,
    },
    Pattern {
        id: String,
        tile: Rect,
        transform: Matrix,
    },
}

impl Paint {
    pub fn is_none(&self) -> bool {
        matches!(self, Paint::None)
    }
}

fn gradient_chain<'a, 'input>(
    start: roxmltree::Node<'a, 'input>,
    by_id: &HashMap<&'a str, roxmltree::Node<'a, 'input>>,
) -> Vec<roxmltree::Node<'a, 'input>> {
    let mut chain = vec![start];
    let mut seen: HashSet<roxmltree::NodeId> = HashSet::from([start.id()]);
    let mut node = start;
    while let Some(parent_id) = href_id(node) {
        let Some(&parent) = by_id.get(parent_id.as_str()) else {
            break;
        };
        if !seen.insert(parent.id()) {
            warn!(gradient = %parent_id, "gradient href cycle");
            break;
        }
        chain.push(parent);
        node = parent;
    }
    chain
}

fn is_gradient(node: &roxmltree::Node<'_, '_>) -> bool {
    node.has_tag_name("linearGradient") || node.has_tag_name("radialGradient")
}

fn inherited<'a>(chain: &[roxmltree::Node<'a, '_>], name: &str) -> Option<&'a str> {
    chain.iter().find_map(|n| n.attribute(name))
}

fn inherited_coord(chain: &[roxmltree::Node<'_, '_>], name: &str) -> Option<Coord> {
    inherited(chain, name).and_then(parse_coord)
}

fn stop_property(node: roxmltree::Node<'_, '_>, name: &str) -> Option<String> {
    node.attribute("style")
        .and_then(|style| style_property(style, name))
        .or_else(|| node.attribute(name).map(str::to_string))
}

// lightningcss has no typed `stop-*` properties; they come back as custom
// declarations and are matched by name. `!important` wins, then the last one.
fn style_property(style: &str, name: &str) -> Option<String> {
    let Ok(parsed) = StyleAttribute::parse(style, ParserOptions::default()) else {
        return style.split(';').rev().find_map(|decl| {
            let (k, v) = decl.split_once(':')?;
            k.trim().eq_ignore_ascii_case(name).then(|| v.trim().to_string())
        });
    };
    let block = &parsed.declarations;
    [&block.important_declarations, &block.declarations]
        .into_iter()
        .find_map(|props| {
            props
                .iter()
                .rev()
                .filter(|p| p.property_id().name().eq_ignore_ascii_case(name))
                .find_map(|p| p.value_to_css_string(PrinterOptions::default()).ok())
        })
        .map(|v| v.trim().to_string())
}

fn parse_stops(node: roxmltree::Node<'_, '_>) -> Vec<GradientStop> {
    let mut stops: Vec<GradientStop> = node
        .children()
        .filter(|n| n.has_tag_name("stop"))
        .map(|stop| {
            let offset = stop.attribute("offset").and_then(parse_offset).unwrap_or(0.0);
            let color = stop_property(stop, "stop-color")
                .as_deref()
                .and_then(parse_color)
                .unwrap_or(Color::BLACK);
            let opacity = stop_property(stop, "stop-opacity")
                .and_then(|v| v.trim().parse::<f32>().ok())
                .unwrap_or(1.0)
                .clamp(0.0, 1.0);
            GradientStop {
                offset,
                color: color.with_alpha(color.a * opacity),
            }
        })
        .collect();
    stops.sort_by(|a, b| a.offset.total_cmp(&b.offset));
    stops
}

/// Collects every gradient of the document, keyed by id. Attributes and stops
/// the element leaves unset come from the gradients its `href` chain names,
/// in either document order.
pub fn extract_gradients(doc: &roxmltree::Document<'_>) -> HashMap<String, Gradient> {
    let mut by_id: HashMap<&str, roxmltree::Node<'_, '_>> = HashMap::new();
    for node in doc.descendants().filter(|n| n.is_element() && is_gradient(n)) {
        if let Some(id) = node.attribute("id") {
            by_id.entry(id).or_insert(node);
        }
    }

    let mut out = HashMap::new();
    for (&id, &node) in &by_id {
        let chain = gradient_chain(node, &by_id);

        let kind = if node.has_tag_name("linearGradient") {
            GradientKind::Linear {
                x1: inherited_coord(&chain, "x1").unwrap_or(Coord::percent(0.0)),
                y1: inherited_coord(&chain, "y1").unwrap_or(Coord::percent(0.0)),
                x2: inherited_coord(&chain, "x2").unwrap_or(Coord::percent(1.0)),
                y2: inherited_coord(&chain, "y2").unwrap_or(Coord::percent(0.0)),
            }
        } else {
            let cx = inherited_coord(&chain, "cx").unwrap_or(Coord::percent(0.5));
            let cy = inherited_coord(&chain, "cy").unwrap_or(Coord::percent(0.5));
            GradientKind::Radial {
                cx,
                cy,
                r: inherited_coord(&chain, "r").unwrap_or(Coord::percent(0.5)),
                fx: inherited_coord(&chain, "fx").unwrap_or(cx),
                fy: inherited_coord(&chain, "fy").unwrap_or(cy),
            }
        };

        let stops = chain
            .iter()
            .map(|n| parse_stops(*n))
            .find(|s| !s.is_empty())
            .unwrap_or_default();

        out.insert(
            id.to_string(),
            Gradient {
                id: id.to_string(),
                kind,
                units: inherited(&chain, "gradientUnits")
                    .and_then(Units::parse)
                    .unwrap_or_default(),
                transform: inherited(&chain, "gradientTransform")
                    .map(parse_transform)
                    .unwrap_or_default(),
                spread: inherited(&chain, "spreadMethod")
                    .and_then(SpreadMethod::parse)
                    .unwrap_or_default(),
                stops,
            },
        );
    }
    out
}

/// Lookup tables and viewport the resolver works against.
pub struct PaintTables<'a> {
    pub gradients: &'a HashMap<String, Gradient>,
    pub patterns: &'a BTreeMap<String, Pattern>,
    pub viewport: Rect,
}

/// Resolves a declared paint for a shape with bounding box `bbox` (in the
/// shape's user space). Unknown references fall back and are reported.
pub fn resolve_paint(
    spec: &PaintSpec,
    bbox: Option<Rect>,
    tables: &PaintTables<'_>,
    warnings: &mut Vec<Warning>,
) -> Paint {
    match spec {
        PaintSpec::None => Paint::None,
        PaintSpec::Color(c) => Paint::Solid(*c),
        PaintSpec::Url { id, fallback } => {
            if let Some(gradient) = tables.gradients.get(id) {
                return resolve_gradient(gradient, bbox, tables.viewport);
            }
            if let Some(pattern) = tables.patterns.get(id) {
                return match pattern.tile_for(bbox, tables.viewport) {
                    Some(tile) => Paint::Pattern {
                        id: id.clone(),
                        tile,
                        transform: pattern.transform,
                    },
                    None => Paint::None,
                };
            }
            warn!(id = %id, "unresolved paint reference");
            warnings.push(Warning::UnresolvedReference {
                kind: ReferenceKind::Paint,
                id: id.clone(),
            });
            fallback.map_or(Paint::None, Paint::Solid)
        }
    }
}

pub fn resolve_gradient(gradient: &Gradient, bbox: Option<Rect>, viewport: Rect) -> Paint {
    let stops = &gradient.stops;
    let (Some(first), Some(last)) = (stops.first(), stops.last()) else {
        return Paint::None;
    };
    if stops.len() == 1 {
        return Paint::Solid(first.color);
    }

    // Percentages are fractions of the box for bounding-box units and of the
    // viewport otherwise.
    let (transform, ref_w, ref_h) = match gradient.units {
        Units::ObjectBoundingBox => {
            let Some(bbox) = bbox.filter(|b| !b.is_empty()) else {
                return Paint::None;
            };
            (bbox.unit_matrix().mul(gradient.transform), 1.0, 1.0)
        }
        Units::UserSpaceOnUse => (gradient.transform, viewport.width, viewport.height),
    };
    let ref_diag = libm::sqrtf((ref_w * ref_w + ref_h * ref_h) / 2.0);

    match gradient.kind {
        GradientKind::Linear { x1, y1, x2, y2 } => {
            let start = Point::new(x1.resolve(ref_w), y1.resolve(ref_h));
            let end = Point::new(x2.resolve(ref_w), y2.resolve(ref_h));
            if start == end {
                return Paint::Solid(last.color);
            }
            Paint::LinearGradient {
                start,
                end,
                stops: stops.clone(),
                spread: gradient.spread,
                transform,
            }
        }
        GradientKind::Radial { cx, cy, r, fx, fy } => {
            let radius = r.resolve(ref_diag);
            if radius <= 0.0 {
                return Paint::Solid(last.color);
            }
            Paint::RadialGradient {
                center: Point::new(cx.resolve(ref_w), cy.resolve(ref_h)),
                focal: Point::new(fx.resolve(ref_w), fy.resolve(ref_h)),
                radius,
                stops: stops.clone(),
                spread: gradient.spread,
                transform,
            }
        }
    }
}
