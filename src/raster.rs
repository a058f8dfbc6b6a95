use std::collections::HashMap;

use tiny_skia::{
    BlendMode, FillRule as SkFillRule, FilterQuality, GradientStop as SkGradientStop,
    LinearGradient, Mask, Paint as SkPaint, Path, PathBuilder, Pixmap, PixmapPaint, RadialGradient,
    SpreadMode, Stroke, Transform,
};

use crate::error::{Result, SvgError};
use crate::paint::{GradientStop, Paint, SpreadMethod};
use crate::path::Contour;
use crate::surface::Surface;
use crate::types::{Color, FillRule, Matrix, Rect};

const STENCIL_BITS: u8 = 8;
// Guards against absurd tile sizes from broken documents.
const MAX_TILE_SIDE: f32 = 4096.0;

struct Offscreen {
    id: String,
    pixmap: Pixmap,
    saved_transforms: Vec<Transform>,
}

/// `Surface` backed by a tiny-skia pixmap, with a per-pixel 8-bit stencil
/// plane kept next to it. Offscreen tiles have no stencil plane: stencil
/// writes and tests are ignored while a tile is open.
pub struct RasterSurface {
    pixmap: Pixmap,
    stencil: Vec<u8>,
    stencil_test: Option<u8>,
    blending: bool,
    transforms: Vec<Transform>,
    tiles: HashMap<String, Pixmap>,
    offscreen: Vec<Offscreen>,
}

impl RasterSurface {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        let pixmap = Pixmap::new(width, height).ok_or_else(|| {
            SvgError::Raster(format!("invalid raster size {width}x{height}"))
        })?;
        Ok(Self {
            pixmap,
            stencil: vec![0; width as usize * height as usize],
            stencil_test: None,
            blending: false,
            transforms: Vec::new(),
            tiles: HashMap::new(),
            offscreen: Vec::new(),
        })
    }

    pub fn width(&self) -> u32 {
        self.pixmap.width()
    }

    pub fn height(&self) -> u32 {
        self.pixmap.height()
    }

    pub fn fill(&mut self, color: Color) {
        self.pixmap.fill(to_sk_color(color, 1.0));
    }

    pub fn pixmap(&self) -> &Pixmap {
        &self.pixmap
    }

    pub fn encode_png(&self) -> Result<Vec<u8>> {
        self.pixmap
            .encode_png()
            .map_err(|e| SvgError::Raster(format!("png encode failed: {e}")))
    }

    /// Demultiplied RGBA of one pixel.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        let p = self.pixmap.pixel(x, y)?.demultiply();
        Some([p.red(), p.green(), p.blue(), p.alpha()])
    }

    pub fn stencil_at(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.width() || y >= self.height() {
            return None;
        }
        self.stencil.get((y * self.width() + x) as usize).copied()
    }

    fn transform(&self) -> Transform {
        self.transforms.last().copied().unwrap_or_default()
    }

    fn in_tile(&self) -> bool {
        !self.offscreen.is_empty()
    }

    /// Coverage mask of pixels passing the current stencil test.
    fn test_mask(&self) -> Option<Mask> {
        let reference = self.stencil_test?;
        if self.in_tile() {
            return None;
        }
        let mut mask = Mask::new(self.width(), self.height())?;
        for (dst, &id) in mask.data_mut().iter_mut().zip(&self.stencil) {
            *dst = if id == reference { 255 } else { 0 };
        }
        Some(mask)
    }

    fn sk_paint(&self, paint: &Paint, opacity: f32) -> Option<SkPaint<'static>> {
        let mut sk = SkPaint::default();
        sk.anti_alias = true;
        sk.blend_mode = if self.blending {
            BlendMode::SourceOver
        } else {
            BlendMode::Source
        };
        match paint {
            Paint::None | Paint::Pattern { .. } => return None,
            Paint::Solid(color) => sk.set_color(to_sk_color(*color, color.a * opacity)),
            Paint::LinearGradient {
                start,
                end,
                stops,
                spread,
                transform,
            } => {
                sk.shader = LinearGradient::new(
                    tiny_skia::Point::from_xy(start.x, start.y),
                    tiny_skia::Point::from_xy(end.x, end.y),
                    sk_stops(stops, opacity),
                    spread_mode(*spread),
                    to_transform(*transform),
                )?;
            }
            Paint::RadialGradient {
                center,
                focal,
                radius,
                stops,
                spread,
                transform,
            } => {
                sk.shader = RadialGradient::new(
                    tiny_skia::Point::from_xy(focal.x, focal.y),
                    tiny_skia::Point::from_xy(center.x, center.y),
                    *radius,
                    sk_stops(stops, opacity),
                    spread_mode(*spread),
                    to_transform(*transform),
                )?;
            }
        }
        Some(sk)
    }
}

fn target<'a>(main: &'a mut Pixmap, offscreen: &'a mut [Offscreen]) -> &'a mut Pixmap {
    match offscreen.last_mut() {
        Some(o) => &mut o.pixmap,
        None => main,
    }
}

fn to_transform(m: Matrix) -> Transform {
    Transform::from_row(m.a, m.b, m.c, m.d, m.e, m.f)
}

fn to_sk_color(color: Color, alpha: f32) -> tiny_skia::Color {
    tiny_skia::Color::from_rgba(
        color.r.clamp(0.0, 1.0),
        color.g.clamp(0.0, 1.0),
        color.b.clamp(0.0, 1.0),
        alpha.clamp(0.0, 1.0),
    )
    .unwrap_or(tiny_skia::Color::BLACK)
}

fn sk_stops(stops: &[GradientStop], opacity: f32) -> Vec<SkGradientStop> {
    stops
        .iter()
        .map(|s| SkGradientStop::new(s.offset, to_sk_color(s.color, s.color.a * opacity)))
        .collect()
}

fn spread_mode(spread: SpreadMethod) -> SpreadMode {
    match spread {
        SpreadMethod::Pad => SpreadMode::Pad,
        SpreadMethod::Reflect => SpreadMode::Reflect,
        SpreadMethod::Repeat => SpreadMode::Repeat,
    }
}

fn sk_fill_rule(rule: FillRule) -> SkFillRule {
    match rule {
        FillRule::NonZero => SkFillRule::Winding,
        FillRule::EvenOdd => SkFillRule::EvenOdd,
    }
}

fn build_path(contours: &[Contour], min_points: usize) -> Option<Path> {
    let mut pb = PathBuilder::new();
    for contour in contours.iter().filter(|c| c.points.len() >= min_points) {
        let (first, rest) = contour.points.split_first()?;
        pb.move_to(first.x, first.y);
        for p in rest {
            pb.line_to(p.x, p.y);
        }
        if contour.closed {
            pb.close();
        }
    }
    pb.finish()
}

impl Surface for RasterSurface {
    fn stencil_bits(&self) -> u8 {
        STENCIL_BITS
    }

    fn has_tile(&self, id: &str) -> bool {
        self.tiles.contains_key(id)
    }

    fn enable_blending(&mut self) {
        self.blending = true;
    }

    fn clear_stencil(&mut self) {
        self.stencil.fill(0);
    }

    fn push_transform(&mut self, m: Matrix) {
        let next = self.transform().pre_concat(to_transform(m));
        self.transforms.push(next);
    }

    fn pop_transform(&mut self) {
        self.transforms.pop();
    }

    fn fill_polygons(&mut self, contours: &[Contour], rule: FillRule, paint: &Paint, opacity: f32) {
        let Some(path) = build_path(contours, 3) else {
            return;
        };
        let Some(sk) = self.sk_paint(paint, opacity) else {
            return;
        };
        let mask = self.test_mask();
        let ts = self.transform();
        target(&mut self.pixmap, &mut self.offscreen).fill_path(
            &path,
            &sk,
            sk_fill_rule(rule),
            ts,
            mask.as_ref(),
        );
    }

    fn stroke_polylines(&mut self, contours: &[Contour], width: f32, paint: &Paint, opacity: f32) {
        if width <= 0.0 {
            return;
        }
        let Some(path) = build_path(contours, 2) else {
            return;
        };
        let Some(sk) = self.sk_paint(paint, opacity) else {
            return;
        };
        let stroke = Stroke {
            width,
            ..Stroke::default()
        };
        let mask = self.test_mask();
        let ts = self.transform();
        target(&mut self.pixmap, &mut self.offscreen).stroke_path(&path, &sk, &stroke, ts, mask.as_ref());
    }

    fn write_stencil(&mut self, mask: u8, contours: &[Contour], rule: FillRule) {
        if self.in_tile() {
            return;
        }
        let Some(path) = build_path(contours, 3) else {
            return;
        };
        let Some(mut coverage) = Mask::new(self.width(), self.height()) else {
            return;
        };
        coverage.fill_path(&path, sk_fill_rule(rule), false, self.transform());
        let test = self.stencil_test;
        for (id, &c) in self.stencil.iter_mut().zip(coverage.data()) {
            if c > 127 && test.is_none_or(|t| *id == t) {
                *id = mask;
            }
        }
    }

    fn set_stencil_test(&mut self, mask: Option<u8>) {
        self.stencil_test = mask;
    }

    fn begin_tile(&mut self, id: &str, width: f32, height: f32) {
        let w = width.ceil().clamp(1.0, MAX_TILE_SIDE) as u32;
        let h = height.ceil().clamp(1.0, MAX_TILE_SIDE) as u32;
        let Some(pixmap) = Pixmap::new(w, h) else {
            return;
        };
        let saved_transforms = std::mem::take(&mut self.transforms);
        self.offscreen.push(Offscreen {
            id: id.to_string(),
            pixmap,
            saved_transforms,
        });
    }

    fn end_tile(&mut self) {
        if let Some(done) = self.offscreen.pop() {
            self.transforms = done.saved_transforms;
            self.tiles.insert(done.id, done.pixmap);
        }
    }

    fn draw_tile(&mut self, id: &str, dest: Rect, opacity: f32) {
        let mask = self.test_mask();
        let Some(tile) = self.tiles.get(id) else {
            return;
        };
        let ts = self.transform().pre_concat(Transform::from_row(
            dest.width / tile.width() as f32,
            0.0,
            0.0,
            dest.height / tile.height() as f32,
            dest.x,
            dest.y,
        ));
        let paint = PixmapPaint {
            opacity: opacity.clamp(0.0, 1.0),
            quality: FilterQuality::Bilinear,
            blend_mode: if self.blending {
                BlendMode::SourceOver
            } else {
                BlendMode::Source
            },
        };
        target(&mut self.pixmap, &mut self.offscreen).draw_pixmap(
            0,
            0,
            tile.as_ref(),
            &paint,
            ts,
            mask.as_ref(),
        );
    }
}
