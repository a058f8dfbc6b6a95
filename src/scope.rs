use lightningcss::printer::PrinterOptions;
use lightningcss::properties::Property;
use lightningcss::properties::svg::{SVGPaint, SVGPaintFallback};
use lightningcss::stylesheet::{ParserOptions, StyleAttribute};
use lightningcss::traits::ToCss;
use lightningcss::values::alpha::AlphaValue;
use lightningcss::values::shape::FillRule as CssFillRule;

use crate::paint::PaintSpec;
use crate::parse::{css_color_to_color, parse_number, parse_transform, parse_url_ref};
use crate::types::{Color, FillRule, Matrix};

/// A `clip-path` reference together with the user space of the element that
/// declared it.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipRef {
    pub id: String,
    pub transform: Matrix,
}

/// Inherited presentation state of one element.
#[derive(Debug, Clone, PartialEq)]
pub struct Scope {
    pub fill: PaintSpec,
    pub stroke: PaintSpec,
    pub stroke_width: f32,
    pub opacity: f32,
    pub fill_opacity: f32,
    pub stroke_opacity: f32,
    pub fill_rule: FillRule,
    pub transform: Matrix,
    pub clip: Option<ClipRef>,
}

impl Default for Scope {
    fn default() -> Self {
        Self::root()
    }
}

impl Scope {
    /// Initial values: black fill, no stroke, identity transform.
    pub fn root() -> Self {
        Self {
            fill: PaintSpec::Color(Color::BLACK),
            stroke: PaintSpec::None,
            stroke_width: 1.0,
            opacity: 1.0,
            fill_opacity: 1.0,
            stroke_opacity: 1.0,
            fill_rule: FillRule::NonZero,
            transform: Matrix::identity(),
            clip: None,
        }
    }

    pub fn with_transform(&self, transform: Matrix) -> Self {
        Self {
            transform,
            ..self.clone()
        }
    }

    /// Scope of `node` inside `self`. Presentation attributes come first and
    /// `style` declarations override them; the element's `transform` is
    /// applied after the parent's.
    pub fn derive(&self, node: roxmltree::Node<'_, '_>) -> Scope {
        let mut scope = self.clone();
        if let Some(t) = node.attribute("transform") {
            scope.transform = self.transform.mul(parse_transform(t));
        }

        let mut own = Declared::default();
        own.apply_attributes(node);
        if let Some(style) = node.attribute("style") {
            own.apply_style(style);
        }

        if let Some(fill) = own.fill {
            scope.fill = fill;
        }
        if let Some(stroke) = own.stroke {
            scope.stroke = stroke;
        }
        if let Some(w) = own.stroke_width {
            scope.stroke_width = w;
        }
        if let Some(rule) = own.fill_rule {
            scope.fill_rule = rule;
        }
        if let Some(o) = own.fill_opacity {
            scope.fill_opacity = o;
        }
        if let Some(o) = own.stroke_opacity {
            scope.stroke_opacity = o;
        }
        // Group opacity accumulates down the tree.
        if let Some(o) = own.opacity {
            scope.opacity *= o;
        }
        if let Some(clip) = own.clip_path {
            scope.clip = clip.map(|id| ClipRef {
                id,
                transform: scope.transform,
            });
        }
        scope
    }
}

/// Values an element sets itself; `None` keeps the inherited value.
#[derive(Debug, Default)]
struct Declared {
    fill: Option<PaintSpec>,
    stroke: Option<PaintSpec>,
    stroke_width: Option<f32>,
    fill_rule: Option<FillRule>,
    opacity: Option<f32>,
    fill_opacity: Option<f32>,
    stroke_opacity: Option<f32>,
    clip_path: Option<Option<String>>,
}

fn unit_interval(input: &str) -> Option<f32> {
    parse_number(input).map(|v| v.clamp(0.0, 1.0))
}

impl Declared {
    fn set(&mut self, key: &str, value: &str) {
        match key {
            "fill" => {
                if let Some(p) = PaintSpec::parse(value) {
                    self.fill = Some(p);
                }
            }
            "stroke" => {
                if let Some(p) = PaintSpec::parse(value) {
                    self.stroke = Some(p);
                }
            }
            "stroke-width" => {
                if let Some(v) = parse_number(value) {
                    self.stroke_width = Some(v.max(0.0));
                }
            }
            "fill-rule" => {
                if let Some(rule) = FillRule::parse(value) {
                    self.fill_rule = Some(rule);
                }
            }
            "opacity" => {
                if let Some(v) = unit_interval(value) {
                    self.opacity = Some(v);
                }
            }
            "fill-opacity" => {
                if let Some(v) = unit_interval(value) {
                    self.fill_opacity = Some(v);
                }
            }
            "stroke-opacity" => {
                if let Some(v) = unit_interval(value) {
                    self.stroke_opacity = Some(v);
                }
            }
            "clip-path" => {
                let v = value.trim();
                if v.eq_ignore_ascii_case("none") {
                    self.clip_path = Some(None);
                } else if let Some(id) = parse_url_ref(v) {
                    self.clip_path = Some(Some(id));
                }
            }
            _ => {}
        }
    }

    fn apply_attributes(&mut self, node: roxmltree::Node<'_, '_>) {
        for attr in node.attributes() {
            if attr.namespace().is_none() {
                self.set(attr.name(), attr.value());
            }
        }
    }

    fn apply_style(&mut self, input: &str) {
        if let Ok(style) = StyleAttribute::parse(input, ParserOptions::default()) {
            self.apply_property_list(&style.declarations.declarations);
            self.apply_property_list(&style.declarations.important_declarations);
            // lightningcss keeps clip-path in its own value model; the url is
            // all that matters here.
            for (key, value) in declarations(input) {
                if key == "clip-path" {
                    self.set(&key, value);
                }
            }
            return;
        }
        for (key, value) in declarations(input) {
            self.set(&key, value);
        }
    }

    fn apply_property_list(&mut self, props: &[Property<'_>]) {
        for prop in props {
            self.apply_property(prop);
        }
    }

    fn apply_property(&mut self, prop: &Property<'_>) {
        match prop {
            Property::Fill(paint) => {
                if let Some(p) = svg_paint_to_spec(paint) {
                    self.fill = Some(p);
                }
            }
            Property::Stroke(paint) => {
                if let Some(p) = svg_paint_to_spec(paint) {
                    self.stroke = Some(p);
                }
            }
            Property::StrokeWidth(value) => {
                if let Ok(raw) = value.to_css_string(PrinterOptions::default()) {
                    if let Some(v) = parse_number(&raw) {
                        self.stroke_width = Some(v.max(0.0));
                    }
                }
            }
            Property::FillRule(value) => {
                self.fill_rule = Some(match value {
                    CssFillRule::Evenodd => FillRule::EvenOdd,
                    CssFillRule::Nonzero => FillRule::NonZero,
                });
            }
            Property::Opacity(value) => self.opacity = Some(alpha_value(value)),
            Property::FillOpacity(value) => self.fill_opacity = Some(alpha_value(value)),
            Property::StrokeOpacity(value) => self.stroke_opacity = Some(alpha_value(value)),
            _ => {}
        }
    }
}

fn declarations(input: &str) -> impl Iterator<Item = (String, &str)> {
    input.split(';').filter_map(|decl| {
        let (k, v) = decl.split_once(':')?;
        let key = k.trim().to_ascii_lowercase();
        (!key.is_empty()).then(|| (key, v.trim().trim_end_matches("!important").trim()))
    })
}

fn alpha_value(value: &AlphaValue) -> f32 {
    value.0.clamp(0.0, 1.0)
}

fn svg_paint_to_spec(paint: &SVGPaint<'_>) -> Option<PaintSpec> {
    match paint {
        SVGPaint::None => Some(PaintSpec::None),
        SVGPaint::Color(color) => css_color_to_color(color).map(PaintSpec::Color),
        SVGPaint::Url { url, fallback } => {
            let fallback_color = match fallback {
                Some(SVGPaintFallback::Color(color)) => css_color_to_color(color),
                _ => None,
            };
            let raw = url.url.as_ref().trim();
            match raw.strip_prefix('#').filter(|id| !id.is_empty()) {
                Some(id) => Some(PaintSpec::Url {
                    id: id.to_string(),
                    fallback: fallback_color,
                }),
                None => match fallback {
                    Some(SVGPaintFallback::None) => Some(PaintSpec::None),
                    _ => fallback_color.map(PaintSpec::Color),
                },
            }
        }
        SVGPaint::ContextFill | SVGPaint::ContextStroke => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Point;

    fn with_nodes(xml: &str, f: impl FnOnce(&roxmltree::Document<'_>)) {
        let doc = roxmltree::Document::parse(xml).unwrap();
        f(&doc);
    }

    fn by_id<'a, 'i>(doc: &'a roxmltree::Document<'i>, id: &str) -> roxmltree::Node<'a, 'i> {
        doc.descendants()
            .find(|n| n.attribute("id") == Some(id))
            .unwrap()
    }

    #[test]
    fn children_inherit_and_override() {
        with_nodes(
            r##"<svg xmlns="http://www.w3.org/2000/svg">
              <g id="g" fill="red" stroke="blue" stroke-width="3" fill-rule="evenodd">
                <rect id="r" fill="#00ff00"/>
              </g>
            </svg>"##,
            |doc| {
                let g = Scope::root().derive(by_id(doc, "g"));
                let r = g.derive(by_id(doc, "r"));
                assert_eq!(r.fill, PaintSpec::Color(Color::rgb(0.0, 1.0, 0.0)));
                assert_eq!(r.stroke, PaintSpec::Color(Color::rgb(0.0, 0.0, 1.0)));
                assert_eq!(r.stroke_width, 3.0);
                assert_eq!(r.fill_rule, FillRule::EvenOdd);
            },
        );
    }

    #[test]
    fn transforms_compose_parent_first() {
        with_nodes(
            r##"<svg xmlns="http://www.w3.org/2000/svg">
              <g id="g" transform="translate(10 0)"><rect id="r" transform="scale(2)"/></g>
            </svg>"##,
            |doc| {
                let g = Scope::root().derive(by_id(doc, "g"));
                let r = g.derive(by_id(doc, "r"));
                assert_eq!(r.transform.apply(Point::new(1.0, 1.0)), Point::new(12.0, 2.0));
            },
        );
    }

    #[test]
    fn style_overrides_presentation_attributes() {
        with_nodes(
            r##"<svg xmlns="http://www.w3.org/2000/svg">
              <rect id="r" fill="red" style="fill: blue; stroke-width: 4px; fill-opacity: 0.25"/>
            </svg>"##,
            |doc| {
                let r = Scope::root().derive(by_id(doc, "r"));
                assert_eq!(r.fill, PaintSpec::Color(Color::rgb(0.0, 0.0, 1.0)));
                assert_eq!(r.stroke_width, 4.0);
                assert!((r.fill_opacity - 0.25).abs() < 1e-6);
            },
        );
    }

    #[test]
    fn opacity_multiplies_through_groups() {
        with_nodes(
            r##"<svg xmlns="http://www.w3.org/2000/svg">
              <g id="g" opacity="0.5"><rect id="r" opacity="0.5"/></g>
            </svg>"##,
            |doc| {
                let g = Scope::root().derive(by_id(doc, "g"));
                let r = g.derive(by_id(doc, "r"));
                assert!((r.opacity - 0.25).abs() < 1e-6);
            },
        );
    }

    #[test]
    fn clip_reference_captures_declaring_space() {
        with_nodes(
            r##"<svg xmlns="http://www.w3.org/2000/svg">
              <g id="g" transform="translate(5 5)" clip-path="url(#c)"><rect id="r" transform="scale(2)"/></g>
            </svg>"##,
            |doc| {
                let g = Scope::root().derive(by_id(doc, "g"));
                let r = g.derive(by_id(doc, "r"));
                let clip = r.clip.unwrap();
                assert_eq!(clip.id, "c");
                assert_eq!(clip.transform, Matrix::translate(5.0, 5.0));
            },
        );
    }

    #[test]
    fn url_paint_in_style_keeps_fallback() {
        with_nodes(
            r##"<svg xmlns="http://www.w3.org/2000/svg">
              <rect id="r" style="fill: url(#grad) red"/>
            </svg>"##,
            |doc| {
                let r = Scope::root().derive(by_id(doc, "r"));
                assert_eq!(
                    r.fill,
                    PaintSpec::Url {
                        id: "grad".into(),
                        fallback: Some(Color::rgb(1.0, 0.0, 0.0)),
                    }
                );
            },
        );
    }
}
