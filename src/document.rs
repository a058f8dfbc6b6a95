//! Document loading: bytes to element tree to shapes, then paint resolution
//! and recording of the two render passes.

use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use flate2::read::GzDecoder;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{ReferenceKind, Result, SvgError, Warning};
use crate::metrics::RenderMetrics;
use crate::paint::{Gradient, Paint, PaintTables, Units, extract_gradients, resolve_paint};
use crate::parse::{attr_number, href_id, parse_number, parse_viewbox};
use crate::path::{ClipPart, ClipRegion, Shape, build_shape, clip_parts, is_shape_element};
use crate::pattern::Pattern;
use crate::render::{RenderContext, prerender_patterns, render};
use crate::scope::Scope;
use crate::surface::{DisplayList, RecordingSurface, Surface};
use crate::types::{Matrix, Rect};

const GZIP_MAGIC: [u8; 3] = [0x1f, 0x8b, 0x08];

// Source of per-document tile namespaces.
static NEXT_TILE_KEY: AtomicU64 = AtomicU64::new(1);

// Elements that never draw on their own.
const SILENT_ELEMENTS: [&str; 11] = [
    "clipPath",
    "linearGradient",
    "radialGradient",
    "style",
    "title",
    "desc",
    "metadata",
    "symbol",
    "mask",
    "filter",
    "marker",
];

/// Horizontal anchor of `Document::draw`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum AnchorX {
    #[default]
    Left,
    Center,
    Right,
    Offset(f32),
}

impl AnchorX {
    pub fn resolve(self, width: f32) -> f32 {
        match self {
            AnchorX::Left => 0.0,
            AnchorX::Center => width * 0.5,
            AnchorX::Right => width,
            AnchorX::Offset(v) => v,
        }
    }
}

impl FromStr for AnchorX {
    type Err = SvgError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "left" => Ok(AnchorX::Left),
            "center" => Ok(AnchorX::Center),
            "right" => Ok(AnchorX::Right),
            other => parse_number(other)
                .map(AnchorX::Offset)
                .ok_or_else(|| SvgError::Parse(format!("invalid horizontal anchor {other:?}"))),
        }
    }
}

/// Vertical anchor of `Document::draw`. `Bottom` is the document's y = 0
/// edge and `Top` its y = height edge.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum AnchorY {
    #[default]
    Bottom,
    Center,
    Top,
    Offset(f32),
}

impl AnchorY {
    pub fn resolve(self, height: f32) -> f32 {
        match self {
            AnchorY::Bottom => 0.0,
            AnchorY::Center => height * 0.5,
            AnchorY::Top => height,
            AnchorY::Offset(v) => v,
        }
    }
}

impl FromStr for AnchorY {
    type Err = SvgError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "bottom" => Ok(AnchorY::Bottom),
            "center" => Ok(AnchorY::Center),
            "top" => Ok(AnchorY::Top),
            other => parse_number(other)
                .map(AnchorY::Offset)
                .ok_or_else(|| SvgError::Parse(format!("invalid vertical anchor {other:?}"))),
        }
    }
}

/// Placement of one `Document::draw` call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawParams {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    /// Degrees.
    pub angle: f32,
    pub scale: (f32, f32),
}

impl Default for DrawParams {
    fn default() -> Self {
        Self::at(0.0, 0.0)
    }
}

impl DrawParams {
    pub fn at(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            z: 0.0,
            angle: 0.0,
            scale: (1.0, 1.0),
        }
    }

    pub fn z(mut self, z: f32) -> Self {
        self.z = z;
        self
    }

    pub fn angle(mut self, degrees: f32) -> Self {
        self.angle = degrees;
        self
    }

    pub fn scale(mut self, scale: f32) -> Self {
        self.scale = (scale, scale);
        self
    }

    pub fn scale_xy(mut self, sx: f32, sy: f32) -> Self {
        self.scale = (sx, sy);
        self
    }

    fn matrix(&self, anchor_x: f32, anchor_y: f32) -> Matrix {
        Matrix::translate(self.x, self.y)
            .mul(Matrix::rotate(self.angle))
            .mul(Matrix::scale(self.scale.0, self.scale.1))
            .mul(Matrix::translate(-anchor_x, -anchor_y))
    }
}

/// A loaded SVG document. Geometry, paint and both render passes are
/// computed once at load; `draw` only replays.
#[derive(Debug, Clone)]
pub struct Document {
    width: f32,
    height: f32,
    view_box: Option<Rect>,
    config: Config,
    shapes: Vec<Shape>,
    ids: HashMap<String, usize>,
    gradients: HashMap<String, Gradient>,
    patterns: BTreeMap<String, Pattern>,
    warnings: Vec<Warning>,
    anchor_x: AnchorX,
    anchor_y: AnchorY,
    prepare: DisplayList,
    main: DisplayList,
    metrics: RenderMetrics,
}

impl Document {
    pub fn load(path: impl AsRef<Path>, config: Config) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| SvgError::Load {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_bytes(&bytes, config)
    }

    /// Accepts plain or gzip-compressed (`.svgz`) SVG.
    pub fn from_bytes(bytes: &[u8], config: Config) -> Result<Self> {
        if bytes.starts_with(&GZIP_MAGIC) {
            let mut raw = Vec::new();
            GzDecoder::new(bytes)
                .read_to_end(&mut raw)
                .map_err(SvgError::Decompress)?;
            let text = String::from_utf8(raw)?;
            return Self::from_str(&text, config);
        }
        let text = String::from_utf8(bytes.to_vec())?;
        Self::from_str(&text, config)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(text: &str, config: Config) -> Result<Self> {
        let started = Instant::now();
        let options = roxmltree::ParsingOptions {
            allow_dtd: true,
            ..roxmltree::ParsingOptions::default()
        };
        let xml = roxmltree::Document::parse_with_options(text, options)?;
        let root = xml.root_element();
        if root.tag_name().name() != "svg" {
            return Err(SvgError::Parse(format!(
                "root element is <{}>, expected <svg>",
                root.tag_name().name()
            )));
        }

        let mut width = root.attribute("width").and_then(parse_number).unwrap_or(0.0);
        let mut height = root.attribute("height").and_then(parse_number).unwrap_or(0.0);
        let view_box = root.attribute("viewBox").and_then(parse_viewbox);
        let mut origin = Matrix::identity();
        if let Some(vb) = view_box {
            width = vb.width;
            height = vb.height;
            origin = Matrix::translate(-vb.x, -vb.y);
        }

        let mut loader = Loader::new(&xml, &config);
        let scope = Scope::root().with_transform(origin).derive(root);
        loader.visit_children(root, &scope, None);
        loader.resolve_clips();
        let Loader {
            mut shapes,
            ids,
            mut patterns,
            mut warnings,
            ..
        } = loader;

        let gradients = extract_gradients(&xml);
        resolve_paints(
            &mut shapes,
            &gradients,
            &mut patterns,
            Rect::new(0.0, 0.0, width, height),
            &mut warnings,
        );

        let mut doc = Self {
            width,
            height,
            view_box,
            config,
            shapes,
            ids,
            gradients,
            patterns,
            warnings,
            anchor_x: AnchorX::default(),
            anchor_y: AnchorY::default(),
            prepare: DisplayList::default(),
            main: DisplayList::default(),
            metrics: RenderMetrics::default(),
        };
        doc.record();
        doc.metrics.load_ms = started.elapsed().as_secs_f64() * 1000.0;
        debug!(
            shapes = doc.shapes.len(),
            patterns = doc.patterns.len(),
            gradients = doc.gradients.len(),
            warnings = doc.warnings.len(),
            load_ms = doc.metrics.load_ms,
            "svg document loaded"
        );
        Ok(doc)
    }

    // Tile ids are namespaced per load: pattern ids are only unique within
    // one document, while surfaces keep tiles across documents.
    fn record(&mut self) {
        let mut recorder = RecordingSurface::new(self.config.stencil_bits());
        let tile_key = NEXT_TILE_KEY.fetch_add(1, Ordering::Relaxed);

        let mut ctx = RenderContext::new(&mut recorder, &self.config).tile_namespace(tile_key);
        prerender_patterns(self, &mut ctx);
        let (prepare_metrics, mut warnings) = ctx.into_parts();
        let prepare = recorder.take_commands();

        let mut ctx = RenderContext::new(&mut recorder, &self.config).tile_namespace(tile_key);
        render(self, &mut ctx);
        let (main_metrics, main_warnings) = ctx.into_parts();
        let main = recorder.take_commands();
        warnings.extend(main_warnings);

        let mut metrics = RenderMetrics {
            prepare: prepare_metrics.prepare,
            main: main_metrics.main,
            masks_issued: prepare_metrics.masks_issued + main_metrics.masks_issued,
            stencil_clears: prepare_metrics.stencil_clears + main_metrics.stencil_clears,
            tiles_rendered: prepare_metrics.tiles_rendered,
            tiles_drawn: main_metrics.tiles_drawn,
            load_ms: 0.0,
        };
        metrics.prepare.command_count = prepare.len();
        metrics.main.command_count = main.len();

        self.warnings.extend(warnings);
        self.prepare = prepare;
        self.main = main;
        self.metrics = metrics;
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn height(&self) -> f32 {
        self.height
    }

    pub fn view_box(&self) -> Option<Rect> {
        self.view_box
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Every shape in document order, pattern tiles and content included.
    pub fn shapes(&self) -> &[Shape] {
        &self.shapes
    }

    /// Ids of all addressable shapes, sorted.
    pub fn path_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.ids.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn path_by_id(&self, id: &str) -> Result<&Shape> {
        self.ids
            .get(id)
            .and_then(|&i| self.shapes.get(i))
            .ok_or_else(|| SvgError::NotFound(id.to_string()))
    }

    pub fn gradient(&self, id: &str) -> Option<&Gradient> {
        self.gradients.get(id)
    }

    pub fn pattern(&self, id: &str) -> Option<&Pattern> {
        self.patterns.get(id)
    }

    pub fn patterns(&self) -> &BTreeMap<String, Pattern> {
        &self.patterns
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn is_stencil_enabled(&self) -> bool {
        self.config.stencil_enabled()
    }

    pub fn metrics(&self) -> &RenderMetrics {
        &self.metrics
    }

    pub fn prepare_list(&self) -> &DisplayList {
        &self.prepare
    }

    pub fn main_list(&self) -> &DisplayList {
        &self.main
    }

    pub fn anchor_x(&self) -> AnchorX {
        self.anchor_x
    }

    pub fn anchor_y(&self) -> AnchorY {
        self.anchor_y
    }

    pub fn set_anchor_x(&mut self, anchor: AnchorX) {
        self.anchor_x = anchor;
    }

    pub fn set_anchor_y(&mut self, anchor: AnchorY) {
        self.anchor_y = anchor;
    }

    /// Anchor point in document units.
    pub fn anchor(&self) -> (f32, f32) {
        (
            self.anchor_x.resolve(self.width),
            self.anchor_y.resolve(self.height),
        )
    }

    /// Replays the recorded passes onto `surface` at `params`. Pattern tiles
    /// are rendered only when the surface does not hold them yet.
    pub fn draw<S: Surface + ?Sized>(&self, surface: &mut S, params: DrawParams) {
        if self.prepare.tile_ids().any(|id| !surface.has_tile(id)) {
            self.prepare.replay(surface);
        }
        let (ax, ay) = self.anchor();
        surface.set_depth(params.z);
        surface.push_transform(params.matrix(ax, ay));
        self.main.replay(surface);
        surface.pop_transform();
    }
}

/// Paint resolution runs after traversal so forward references work. The
/// first shape using a pattern fixes its tile size.
fn resolve_paints(
    shapes: &mut [Shape],
    gradients: &HashMap<String, Gradient>,
    patterns: &mut BTreeMap<String, Pattern>,
    viewport: Rect,
    warnings: &mut Vec<Warning>,
) {
    let mut first_use: HashMap<String, (Rect, Option<Rect>)> = HashMap::new();
    {
        let tables = PaintTables {
            gradients,
            patterns,
            viewport,
        };
        for shape in shapes.iter_mut().filter(|s| !s.is_pattern) {
            let bbox = shape.bbox();
            shape.fill = resolve_paint(&shape.fill_spec, bbox, &tables, warnings);
            shape.stroke = resolve_paint(&shape.stroke_spec, bbox, &tables, warnings);
            if let Paint::Pattern { id, tile, .. } = &shape.fill {
                first_use.entry(id.clone()).or_insert((*tile, bbox));
            }
        }
    }
    for (id, (tile, bbox)) in first_use {
        if let Some(pattern) = patterns.get_mut(&id) {
            pattern.resolved_tile = Some(tile);
            pattern.resolved_bbox = bbox;
        }
    }
}

struct Loader<'a, 'input> {
    config: &'a Config,
    targets: HashMap<&'a str, roxmltree::Node<'a, 'input>>,
    shapes: Vec<Shape>,
    ids: HashMap<String, usize>,
    patterns: BTreeMap<String, Pattern>,
    warnings: Vec<Warning>,
    use_stack: Vec<roxmltree::NodeId>,
}

impl<'a, 'input> Loader<'a, 'input> {
    fn new(xml: &'a roxmltree::Document<'input>, config: &'a Config) -> Self {
        let mut targets = HashMap::new();
        for node in xml.descendants().filter(|n| n.is_element()) {
            if let Some(id) = node.attribute("id") {
                targets.entry(id).or_insert(node);
            }
        }
        Self {
            config,
            targets,
            shapes: Vec::new(),
            ids: HashMap::new(),
            patterns: BTreeMap::new(),
            warnings: Vec::new(),
            use_stack: Vec::new(),
        }
    }

    fn visit_children(
        &mut self,
        node: roxmltree::Node<'a, 'input>,
        scope: &Scope,
        pattern: Option<&str>,
    ) {
        for child in node.children().filter(|n| n.is_element()) {
            self.visit(child, scope, pattern);
        }
    }

    fn visit(&mut self, node: roxmltree::Node<'a, 'input>, parent: &Scope, pattern: Option<&str>) {
        let name = node.tag_name().name();
        match name {
            "g" | "a" | "switch" => {
                let scope = parent.derive(node);
                self.visit_children(node, &scope, pattern);
            }
            "svg" => {
                let scope = parent.derive(node);
                let offset = Matrix::translate(attr_number(node, "x"), attr_number(node, "y"));
                let scope = scope.with_transform(scope.transform.mul(offset));
                self.visit_children(node, &scope, pattern);
            }
            "defs" => {
                for child in node.descendants().filter(|n| n.has_tag_name("pattern")) {
                    self.visit_pattern(child);
                }
            }
            "pattern" => self.visit_pattern(node),
            "use" => self.visit_use(node, parent, pattern),
            _ if is_shape_element(name) => self.visit_shape(node, parent, pattern),
            _ if SILENT_ELEMENTS.contains(&name) => {}
            _ => {
                warn!(element = name, "unsupported element ignored");
                self.warnings.push(Warning::UnsupportedElement {
                    element: name.to_string(),
                });
            }
        }
    }

    fn visit_shape(&mut self, node: roxmltree::Node<'a, 'input>, parent: &Scope, pattern: Option<&str>) {
        let scope = parent.derive(node);
        match build_shape(node, &scope, self.config) {
            Ok(mut shape) => {
                shape.is_pattern_part = pattern.is_some();
                self.push_shape(shape, pattern);
            }
            Err(error) => {
                let element = node.tag_name().name().to_string();
                let id = node.attribute("id").map(str::to_string);
                warn!(%element, id = ?id, %error, "skipping element");
                self.warnings.push(Warning::ElementSkipped { element, id, error });
            }
        }
    }

    fn visit_pattern(&mut self, node: roxmltree::Node<'a, 'input>) {
        let Some(id) = node.attribute("id") else {
            debug!("pattern without id ignored");
            return;
        };
        if self.patterns.contains_key(id) {
            return;
        }
        let pattern = Pattern::parse(node, id);
        let mut tile = Shape::new("pattern", vec![pattern.definition_contour()], &Scope::root());
        tile.id = Some(id.to_string());
        tile.is_pattern = true;
        self.patterns.insert(id.to_string(), pattern);
        let index = self.push_shape(tile, None);
        if let Some(p) = self.patterns.get_mut(id) {
            p.definition = Some(index);
        }

        let scope = Scope::root().derive(node);
        self.visit_children(node, &scope, Some(id));
    }

    fn visit_use(&mut self, node: roxmltree::Node<'a, 'input>, parent: &Scope, pattern: Option<&str>) {
        let Some(id) = href_id(node) else {
            return;
        };
        let Some(&target) = self.targets.get(id.as_str()) else {
            warn!(%id, "unresolved use reference");
            self.warnings.push(Warning::UnresolvedReference {
                kind: ReferenceKind::Use,
                id,
            });
            return;
        };
        // `ancestors` starts at `node` itself.
        let inside_target = node.ancestors().any(|a| a == target);
        if inside_target || self.use_stack.contains(&target.id()) {
            warn!(%id, "recursive use reference ignored");
            return;
        }

        let scope = parent.derive(node);
        let offset = Matrix::translate(attr_number(node, "x"), attr_number(node, "y"));
        let scope = scope.with_transform(scope.transform.mul(offset));

        self.use_stack.push(target.id());
        if target.has_tag_name("symbol") {
            let scope = scope.derive(target);
            self.visit_children(target, &scope, pattern);
        } else {
            self.visit(target, &scope, pattern);
        }
        self.use_stack.pop();
    }

    fn push_shape(&mut self, shape: Shape, pattern: Option<&str>) -> usize {
        let index = self.shapes.len();
        if let Some(id) = shape.id.as_ref().filter(|_| !shape.is_pattern) {
            self.ids.entry(id.clone()).or_insert(index);
        }
        if let Some(p) = pattern.and_then(|p| self.patterns.get_mut(p)) {
            p.shapes.push(index);
        }
        self.shapes.push(shape);
        index
    }

    /// Attaches clip geometry to every shape with a `clip-path`. Each
    /// `<clipPath>` is flattened once.
    fn resolve_clips(&mut self) {
        let mut cache: HashMap<String, Option<(Vec<ClipPart>, Units)>> = HashMap::new();
        for shape in &mut self.shapes {
            let Some(clip_ref) = shape.clip_ref.clone() else {
                continue;
            };
            let entry = cache.entry(clip_ref.id.clone()).or_insert_with(|| {
                let node = self
                    .targets
                    .get(clip_ref.id.as_str())
                    .filter(|n| n.has_tag_name("clipPath"));
                match node {
                    Some(node) => {
                        let units = node
                            .attribute("clipPathUnits")
                            .and_then(Units::parse)
                            .unwrap_or(Units::UserSpaceOnUse);
                        Some((clip_parts(*node, self.config), units))
                    }
                    None => {
                        warn!(id = %clip_ref.id, "unresolved clip-path reference");
                        self.warnings.push(Warning::UnresolvedReference {
                            kind: ReferenceKind::ClipPath,
                            id: clip_ref.id.clone(),
                        });
                        None
                    }
                }
            });
            let Some((parts, units)) = entry else {
                continue;
            };

            let mut transform = clip_ref.transform;
            if *units == Units::ObjectBoundingBox {
                // Bounds of the shape in the space that declared the clip.
                let bbox = clip_ref
                    .transform
                    .invert()
                    .and_then(|inv| shape.bbox()?.transformed(inv.mul(shape.transform)));
                match bbox.filter(|b| !b.is_empty()) {
                    Some(b) => transform = transform.mul(b.unit_matrix()),
                    None => continue,
                }
            }
            shape.clip = Some(ClipRegion {
                id: clip_ref.id,
                parts: parts.clone(),
                transform,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::raster::RasterSurface;
    use crate::surface::Command;
    use crate::types::Color;

    fn load(svg: &str) -> Document {
        Document::from_str(svg, Config::default()).unwrap()
    }

    #[test]
    fn view_box_sets_size_and_origin() {
        let doc = load(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="300cm" height="10" viewBox="5 5 100 50">
                 <rect id="r" x="5" y="5" width="10" height="10"/>
               </svg>"#,
        );
        assert_eq!((doc.width(), doc.height()), (100.0, 50.0));
        let rect = doc.path_by_id("r").unwrap();
        let corner = rect.transform.apply(rect.contours[0].points[0]);
        assert_eq!((corner.x, corner.y), (0.0, 0.0));
    }

    #[test]
    fn size_units_are_stripped() {
        let doc = load(r#"<svg xmlns="http://www.w3.org/2000/svg" width="12cm" height="30px"/>"#);
        assert_eq!((doc.width(), doc.height()), (12.0, 30.0));
    }

    #[test]
    fn missing_paint_reference_draws_nothing() {
        let doc = load(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="10" height="10">
                 <rect id="r" width="10" height="10" fill="url(#missing)"/>
               </svg>"#,
        );
        assert_eq!(doc.path_by_id("r").unwrap().fill, Paint::None);
        assert!(doc.warnings().contains(&Warning::UnresolvedReference {
            kind: ReferenceKind::Paint,
            id: "missing".to_string(),
        }));
        assert!(
            !doc.main_list()
                .commands()
                .iter()
                .any(|c| matches!(c, Command::FillPolygons { .. }))
        );
    }

    #[test]
    fn pattern_tile_is_rendered_once_in_prepare_only() {
        let doc = load(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="40" height="40">
                 <defs>
                   <pattern id="dots" patternUnits="userSpaceOnUse" width="10" height="10">
                     <circle id="dot" cx="5" cy="5" r="3" fill="red"/>
                   </pattern>
                 </defs>
                 <rect id="box" width="40" height="40" fill="url(#dots)"/>
               </svg>"#,
        );
        let begins = |list: &DisplayList| {
            list.commands()
                .iter()
                .filter(|c| matches!(c, Command::BeginTile { .. }))
                .count()
        };
        let fills = |list: &DisplayList| {
            list.commands()
                .iter()
                .filter(|c| matches!(c, Command::FillPolygons { .. }))
                .count()
        };
        assert_eq!(begins(doc.prepare_list()), 1);
        assert_eq!(fills(doc.prepare_list()), 1);
        assert_eq!(begins(doc.main_list()), 0);
        assert_eq!(fills(doc.main_list()), 0);
        assert!(doc.main_list().commands().iter().any(|c| matches!(c, Command::DrawTile { .. })));
        assert!(doc.path_by_id("dot").unwrap().is_pattern_part);
        assert_eq!(doc.metrics().tiles_rendered, 1);
        assert_eq!(
            doc.pattern("dots").unwrap().resolved_tile,
            Some(Rect::new(0.0, 0.0, 10.0, 10.0))
        );
    }

    #[test]
    fn clipped_shape_writes_and_tests_a_mask() {
        let doc = load(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="20" height="20">
                 <clipPath id="c"><rect width="5" height="5"/></clipPath>
                 <rect width="20" height="20" clip-path="url(#c)"/>
               </svg>"#,
        );
        let cmds = doc.main_list().commands();
        let write = cmds.iter().position(|c| matches!(c, Command::WriteStencil { mask: 1, .. }));
        let test = cmds.iter().position(|c| *c == Command::SetStencilTest(Some(1)));
        let fill = cmds.iter().position(|c| matches!(c, Command::FillPolygons { .. }));
        assert!(write < test && test < fill);
        assert_eq!(cmds.last(), Some(&Command::SetStencilTest(None)));
        assert_eq!(doc.metrics().masks_issued, 1);
    }

    #[test]
    fn clips_are_skipped_without_stencil() {
        let config = Config::builder().allow_stencil(false).build();
        let doc = Document::from_str(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="20" height="20">
                 <clipPath id="c"><rect width="5" height="5"/></clipPath>
                 <rect width="20" height="20" clip-path="url(#c)"/>
               </svg>"#,
            config,
        )
        .unwrap();
        assert!(!doc.is_stencil_enabled());
        assert!(doc.warnings().contains(&Warning::StencilUnavailable));
        assert!(
            !doc.main_list()
                .commands()
                .iter()
                .any(|c| matches!(c, Command::WriteStencil { .. }))
        );
    }

    #[test]
    fn bad_elements_become_warnings() {
        let doc = load(
            r#"<svg xmlns="http://www.w3.org/2000/svg">
                 <path id="bad"/>
                 <text>hi</text>
                 <polyline points="1 2"/>
                 <rect id="ok" width="1" height="1"/>
               </svg>"#,
        );
        assert_eq!(doc.path_ids(), vec!["ok"]);
        let skipped = doc
            .warnings()
            .iter()
            .filter(|w| matches!(w, Warning::ElementSkipped { .. }))
            .count();
        assert_eq!(skipped, 2);
        assert!(doc.warnings().contains(&Warning::UnsupportedElement {
            element: "text".to_string()
        }));
    }

    #[test]
    fn use_instantiates_its_target_with_an_offset() {
        let doc = load(
            r##"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink">
                 <defs><rect id="cell" width="2" height="2"/></defs>
                 <use xlink:href="#cell" x="10" y="20"/>
                 <use href="#nowhere"/>
               </svg>"##,
        );
        let placed: Vec<_> = doc.shapes().iter().filter(|s| s.element == "rect").collect();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].transform, Matrix::translate(10.0, 20.0));
        assert!(doc.warnings().contains(&Warning::UnresolvedReference {
            kind: ReferenceKind::Use,
            id: "nowhere".to_string(),
        }));
    }

    #[test]
    fn gzip_input_is_detected() {
        let svg = r#"<svg xmlns="http://www.w3.org/2000/svg" width="7" height="3"/>"#;
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(svg.as_bytes()).unwrap();
        let bytes = encoder.finish().unwrap();
        let doc = Document::from_bytes(&bytes, Config::default()).unwrap();
        assert_eq!((doc.width(), doc.height()), (7.0, 3.0));
    }

    #[test]
    fn load_errors() {
        assert!(matches!(
            Document::from_str("<html/>", Config::default()),
            Err(SvgError::Parse(_))
        ));
        assert!(matches!(
            Document::from_str("<svg", Config::default()),
            Err(SvgError::Xml(_))
        ));
        assert!(matches!(
            Document::from_bytes(&[0xff, 0xfe, 0x00], Config::default()),
            Err(SvgError::Encoding(_))
        ));
        assert!(matches!(
            Document::load("/nonexistent/file.svg", Config::default()),
            Err(SvgError::Load { .. })
        ));
        let doc = load(r#"<svg xmlns="http://www.w3.org/2000/svg"/>"#);
        assert!(matches!(doc.path_by_id("nope"), Err(SvgError::NotFound(_))));
    }

    #[test]
    fn anchors_resolve_against_the_document_size() {
        assert_eq!("center".parse::<AnchorX>().unwrap(), AnchorX::Center);
        assert_eq!("12.5".parse::<AnchorY>().unwrap(), AnchorY::Offset(12.5));
        assert!("sideways".parse::<AnchorX>().is_err());

        let mut doc = load(r#"<svg xmlns="http://www.w3.org/2000/svg" width="40" height="20"/>"#);
        doc.set_anchor_x(AnchorX::Right);
        doc.set_anchor_y(AnchorY::Center);
        assert_eq!(doc.anchor(), (40.0, 10.0));
        doc.set_anchor_y(AnchorY::Offset(3.0));
        assert_eq!(doc.anchor(), (40.0, 3.0));
    }

    #[test]
    fn draw_wraps_the_main_pass_in_the_placement_transform() {
        let doc = load(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="10" height="10">
                 <rect width="10" height="10" fill="blue"/>
               </svg>"#,
        );
        let mut surface = RecordingSurface::new(8);
        doc.draw(&mut surface, DrawParams::at(5.0, 6.0).z(2.0));
        let cmds = surface.commands();
        assert_eq!(cmds[0], Command::SetDepth(2.0));
        assert_eq!(cmds[1], Command::PushTransform(Matrix::translate(5.0, 6.0)));
        assert_eq!(cmds.last(), Some(&Command::PopTransform));
    }

    #[test]
    fn draw_renders_pixels() {
        let doc = load(
            r##"<svg xmlns="http://www.w3.org/2000/svg" width="20" height="20">
                 <clipPath id="c"><rect width="10" height="20"/></clipPath>
                 <rect width="20" height="20" fill="#00ff00" clip-path="url(#c)"/>
               </svg>"##,
        );
        let mut surface = RasterSurface::new(20, 20).unwrap();
        surface.fill(Color::rgb(1.0, 1.0, 1.0));
        doc.draw(&mut surface, DrawParams::default());
        assert_eq!(surface.pixel(5, 10), Some([0, 255, 0, 255]));
        assert_eq!(surface.pixel(15, 10), Some([255, 255, 255, 255]));

        let png = surface.encode_png().unwrap();
        let decoded = image::load_from_memory(&png).unwrap().to_rgba8();
        assert_eq!(decoded.get_pixel(5, 10).0, [0, 255, 0, 255]);
    }

    #[test]
    fn pattern_fill_lands_inside_the_shape() {
        let doc = load(
            r##"<svg xmlns="http://www.w3.org/2000/svg" width="20" height="20">
                 <pattern id="p" patternUnits="userSpaceOnUse" width="4" height="4">
                   <rect width="4" height="4" fill="#ff0000"/>
                 </pattern>
                 <rect x="0" y="0" width="8" height="8" fill="url(#p)"/>
               </svg>"##,
        );
        let mut surface = RasterSurface::new(20, 20).unwrap();
        doc.draw(&mut surface, DrawParams::default());
        assert_eq!(surface.pixel(2, 2), Some([255, 0, 0, 255]));
        assert_eq!(surface.pixel(6, 6), Some([255, 0, 0, 255]));
        assert_eq!(surface.pixel(15, 15), Some([0, 0, 0, 0]));
    }

    #[test]
    fn degenerate_pattern_tile_skips_the_fill() {
        let doc = load(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="100" height="100">
                 <pattern id="p" patternUnits="userSpaceOnUse" width="1e-30" height="1e-30">
                   <rect width="1" height="1" fill="red"/>
                 </pattern>
                 <rect width="100" height="100" fill="url(#p)"/>
               </svg>"#,
        );
        assert!(
            !doc.main_list()
                .commands()
                .iter()
                .any(|c| matches!(c, Command::DrawTile { .. }))
        );
        assert_eq!(doc.metrics().tiles_drawn, 0);
        let mut surface = RasterSurface::new(10, 10).unwrap();
        doc.draw(&mut surface, DrawParams::default());
        assert_eq!(surface.pixel(5, 5), Some([0, 0, 0, 0]));
    }

    #[test]
    fn documents_sharing_a_surface_keep_their_own_tiles() {
        let solid = |color: &str| {
            load(&format!(
                r##"<svg xmlns="http://www.w3.org/2000/svg" width="20" height="20">
                     <pattern id="p" patternUnits="userSpaceOnUse" width="4" height="4">
                       <rect width="4" height="4" fill="{color}"/>
                     </pattern>
                     <rect width="20" height="20" fill="url(#p)"/>
                   </svg>"##
            ))
        };
        let red = solid("#ff0000");
        let blue = solid("#0000ff");
        let mut surface = RasterSurface::new(20, 20).unwrap();
        red.draw(&mut surface, DrawParams::default());
        assert_eq!(surface.pixel(10, 10), Some([255, 0, 0, 255]));
        blue.draw(&mut surface, DrawParams::default());
        assert_eq!(surface.pixel(10, 10), Some([0, 0, 255, 255]));
        red.draw(&mut surface, DrawParams::default());
        assert_eq!(surface.pixel(10, 10), Some([255, 0, 0, 255]));
    }

    #[test]
    fn bounding_box_clip_follows_the_shape() {
        let doc = load(
            r##"<svg xmlns="http://www.w3.org/2000/svg" width="40" height="20">
                 <clipPath id="c" clipPathUnits="objectBoundingBox">
                   <rect width="0.5" height="1"/>
                 </clipPath>
                 <rect x="10" width="20" height="20" fill="#00ff00" clip-path="url(#c)"/>
               </svg>"##,
        );
        let mut surface = RasterSurface::new(40, 20).unwrap();
        doc.draw(&mut surface, DrawParams::default());
        assert_eq!(surface.pixel(5, 10), Some([0, 0, 0, 0]));
        assert_eq!(surface.pixel(15, 10), Some([0, 255, 0, 255]));
        assert_eq!(surface.pixel(25, 10), Some([0, 0, 0, 0]));
    }

    #[test]
    fn clipped_pattern_fill_keeps_the_stroke_clipped() {
        let doc = load(
            r##"<svg xmlns="http://www.w3.org/2000/svg" width="20" height="20">
                 <pattern id="p" patternUnits="userSpaceOnUse" width="4" height="4">
                   <rect width="4" height="4" fill="#ff0000"/>
                 </pattern>
                 <clipPath id="c"><rect width="10" height="20"/></clipPath>
                 <rect x="2" y="2" width="16" height="16" fill="url(#p)"
                       stroke="#0000ff" stroke-width="2" clip-path="url(#c)"/>
               </svg>"##,
        );
        let mut surface = RasterSurface::new(20, 20).unwrap();
        doc.draw(&mut surface, DrawParams::default());
        assert_eq!(surface.pixel(6, 10), Some([255, 0, 0, 255]));
        assert_eq!(surface.pixel(2, 10), Some([0, 0, 255, 255]));
        assert_eq!(surface.pixel(14, 10), Some([0, 0, 0, 0]));
        assert_eq!(surface.pixel(18, 10), Some([0, 0, 0, 0]));
        assert_eq!(doc.metrics().masks_issued, 2);
    }

    #[test]
    fn patterns_are_skipped_without_framebuffers() {
        let config = Config::builder().has_framebuffer_objects(false).build();
        let doc = Document::from_str(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="20" height="20">
                 <pattern id="p" patternUnits="userSpaceOnUse" width="4" height="4">
                   <rect width="4" height="4" fill="red"/>
                 </pattern>
                 <rect width="20" height="20" fill="url(#p)"/>
               </svg>"#,
            config,
        )
        .unwrap();
        assert!(doc.warnings().contains(&Warning::PatternsUnavailable));
        let tiles = |list: &DisplayList| {
            list.commands()
                .iter()
                .filter(|c| matches!(c, Command::BeginTile { .. } | Command::DrawTile { .. }))
                .count()
        };
        assert_eq!(tiles(doc.prepare_list()), 0);
        assert_eq!(tiles(doc.main_list()), 0);
    }

    #[test]
    fn use_inside_its_own_target_is_ignored() {
        let doc = load(
            r##"<svg xmlns="http://www.w3.org/2000/svg">
                 <g id="a">
                   <rect width="1" height="1"/>
                   <use href="#a"/>
                 </g>
               </svg>"##,
        );
        assert_eq!(doc.shapes().len(), 1);
    }

    #[test]
    fn mutually_referencing_uses_terminate() {
        let doc = load(
            r##"<svg xmlns="http://www.w3.org/2000/svg">
                 <g id="a"><rect width="1" height="1"/><use href="#b"/></g>
                 <g id="b"><circle r="1"/><use href="#a"/></g>
               </svg>"##,
        );
        let rects = doc.shapes().iter().filter(|s| s.element == "rect").count();
        let circles = doc.shapes().iter().filter(|s| s.element == "circle").count();
        assert_eq!((rects, circles), (3, 3));
    }
}
