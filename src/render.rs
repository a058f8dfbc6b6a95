//! The two compositing passes: pattern tiles first, then every ordinary
//! shape in document order with stencil-masked clipping and pattern fills.

use tracing::{debug, warn};

use crate::config::Config;
use crate::document::Document;
use crate::error::Warning;
use crate::metrics::RenderMetrics;
use crate::paint::Paint;
use crate::path::Shape;
use crate::stencil::StencilAllocator;
use crate::surface::Surface;
use crate::types::{Matrix, Rect};

// More tiles than this for one shape means a degenerate tile size.
const MAX_TILES_PER_SHAPE: i64 = 65_536;

/// Render state for one pass over one surface.
pub struct RenderContext<'a, S: Surface + ?Sized> {
    surface: &'a mut S,
    stencil: StencilAllocator,
    stencil_enabled: bool,
    framebuffers: bool,
    metrics: RenderMetrics,
    warnings: Vec<Warning>,
    warned_stencil: bool,
    tile_namespace: Option<u64>,
}

impl<'a, S: Surface + ?Sized> RenderContext<'a, S> {
    pub fn new(surface: &'a mut S, config: &Config) -> Self {
        let bits = config.stencil_bits().min(surface.stencil_bits());
        Self {
            stencil: StencilAllocator::new(bits),
            stencil_enabled: config.stencil_enabled() && bits > 0,
            framebuffers: config.has_framebuffer_objects(),
            surface,
            metrics: RenderMetrics::default(),
            warnings: Vec::new(),
            warned_stencil: false,
            tile_namespace: None,
        }
    }

    /// Suffixes every tile id this context records with `key`, so tiles of
    /// different documents sharing one surface never collide.
    pub fn tile_namespace(mut self, key: u64) -> Self {
        self.tile_namespace = Some(key);
        self
    }

    fn tile_id(&self, pattern: &str) -> String {
        match self.tile_namespace {
            Some(key) => format!("{pattern}@{key}"),
            None => pattern.to_string(),
        }
    }

    pub fn stencil_enabled(&self) -> bool {
        self.stencil_enabled
    }

    pub fn metrics(&self) -> &RenderMetrics {
        &self.metrics
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn into_parts(self) -> (RenderMetrics, Vec<Warning>) {
        (self.metrics, self.warnings)
    }

    fn clear_stencil(&mut self) {
        self.surface.clear_stencil();
        self.stencil.reset();
        self.metrics.stencil_clears += 1;
    }

    /// Next unique stencil id. Clears the stencil buffer first when the ids
    /// wrapped around.
    pub fn next_mask(&mut self) -> Option<u8> {
        match self.stencil.next_mask() {
            Ok(alloc) => {
                if alloc.wrapped {
                    self.surface.clear_stencil();
                    self.metrics.stencil_clears += 1;
                }
                self.metrics.masks_issued += 1;
                Some(alloc.mask)
            }
            Err(err) => {
                self.stencil_problem(err);
                None
            }
        }
    }

    fn reserve(&mut self, count: u32) -> bool {
        match self.stencil.reserve(count) {
            Ok(wrapped) => {
                if wrapped {
                    self.surface.clear_stencil();
                    self.metrics.stencil_clears += 1;
                }
                true
            }
            Err(err) => {
                self.stencil_problem(err);
                false
            }
        }
    }

    fn release(&mut self, mask: u8) {
        self.stencil.release(mask);
    }

    fn stencil_problem(&mut self, err: crate::error::StencilError) {
        warn!(%err, "drawing shape without stencil masking");
        self.warnings.push(Warning::Stencil(err));
    }

    fn stencil_unavailable(&mut self) {
        if !self.warned_stencil {
            warn!("stencil buffer unavailable, clip paths are ignored");
            self.warnings.push(Warning::StencilUnavailable);
            self.warned_stencil = true;
        }
    }
}

/// Renders every used pattern into its offscreen tile, in id order.
pub fn prerender_patterns<S: Surface + ?Sized>(doc: &Document, ctx: &mut RenderContext<'_, S>) {
    ctx.surface.enable_blending();
    if ctx.stencil_enabled {
        ctx.clear_stencil();
    }
    if doc.patterns().is_empty() {
        return;
    }
    if !ctx.framebuffers {
        warn!("no offscreen targets, pattern fills are skipped");
        ctx.warnings.push(Warning::PatternsUnavailable);
        return;
    }

    for pattern in doc.patterns().values() {
        let Some(tile) = pattern.resolved_tile else {
            debug!(pattern = %pattern.id, "pattern is never used");
            continue;
        };
        let tile_id = ctx.tile_id(&pattern.id);
        ctx.surface.begin_tile(&tile_id, tile.width, tile.height);
        ctx.surface
            .push_transform(pattern.content_transform(tile, pattern.resolved_bbox));
        for &index in &pattern.shapes {
            if let Some(shape) = doc.shapes().get(index) {
                draw_shape(ctx, shape, true);
            }
        }
        ctx.surface.pop_transform();
        ctx.surface.end_tile();
        ctx.metrics.tiles_rendered += 1;
    }
    ctx.metrics.prepare = std::mem::take(&mut ctx.metrics.main);
}

/// Draws every shape that is not part of a pattern, in document order.
pub fn render<S: Surface + ?Sized>(doc: &Document, ctx: &mut RenderContext<'_, S>) {
    ctx.surface.enable_blending();
    if ctx.stencil_enabled {
        ctx.clear_stencil();
    }
    for shape in doc.shapes() {
        if shape.is_pattern || shape.is_pattern_part {
            continue;
        }
        draw_shape(ctx, shape, false);
    }
    debug!(
        drawn = ctx.metrics.main.shapes_drawn,
        skipped = ctx.metrics.main.shapes_skipped,
        masks = ctx.metrics.masks_issued,
        "main pass recorded"
    );
}

fn draw_shape<S: Surface + ?Sized>(ctx: &mut RenderContext<'_, S>, shape: &Shape, in_tile: bool) {
    let stroke_visible = !shape.stroke.is_none() && shape.stroke_width > 0.0;
    let pattern_fill = matches!(shape.fill, Paint::Pattern { .. });
    let fill_visible = !shape.fill.is_none() && (!pattern_fill || ctx.framebuffers);
    if shape.contours.is_empty() || (!fill_visible && !stroke_visible) {
        ctx.metrics.main.shapes_skipped += 1;
        return;
    }

    let clip = shape.clip.as_ref().filter(|c| !c.parts.is_empty());
    if clip.is_some() && !ctx.stencil_enabled && !in_tile {
        ctx.stencil_unavailable();
    }
    let use_clip = clip.is_some() && ctx.stencil_enabled && !in_tile;
    let use_pattern_mask = pattern_fill && fill_visible && ctx.stencil_enabled && !in_tile;
    let needed = u32::from(use_clip) + u32::from(use_pattern_mask);
    let masked = needed == 0 || ctx.reserve(needed);

    let mut clip_mask = None;
    if let (Some(clip), true) = (clip, use_clip && masked) {
        if let Some(mask) = ctx.next_mask() {
            ctx.surface.push_transform(clip.transform);
            for part in &clip.parts {
                ctx.surface.write_stencil(mask, &part.contours, part.rule);
            }
            ctx.surface.pop_transform();
            ctx.surface.set_stencil_test(Some(mask));
            clip_mask = Some(mask);
        }
    }

    ctx.surface.push_transform(shape.transform);
    if fill_visible {
        let opacity = shape.opacity * shape.fill_opacity;
        match &shape.fill {
            Paint::Pattern {
                id,
                tile,
                transform,
            } => {
                let masks = use_pattern_mask && masked;
                draw_pattern_fill(ctx, shape, id, *tile, *transform, opacity, masks, clip_mask);
            }
            paint => ctx
                .surface
                .fill_polygons(&shape.contours, shape.fill_rule, paint, opacity),
        }
    }
    if stroke_visible {
        ctx.surface.stroke_polylines(
            &shape.contours,
            shape.stroke_width,
            &shape.stroke,
            shape.opacity * shape.stroke_opacity,
        );
    }
    ctx.surface.pop_transform();

    if let Some(mask) = clip_mask {
        ctx.surface.set_stencil_test(None);
        ctx.release(mask);
    }
    ctx.metrics.main.shapes_drawn += 1;
    ctx.metrics.main.points += shape.point_count();
}

/// Covers the shape with copies of the tile, limited to the shape's outline
/// through a stencil mask. Runs inside the shape's transform.
#[allow(clippy::too_many_arguments)]
fn draw_pattern_fill<S: Surface + ?Sized>(
    ctx: &mut RenderContext<'_, S>,
    shape: &Shape,
    id: &str,
    tile: Rect,
    transform: Matrix,
    opacity: f32,
    use_mask: bool,
    clip_mask: Option<u8>,
) {
    let Some(area) = shape
        .bbox()
        .zip(transform.invert())
        .and_then(|(bbox, inv)| bbox.transformed(inv))
    else {
        return;
    };
    let Some((x0, x1)) = tile_span(area.x, area.right(), tile.x, tile.width) else {
        warn!(pattern = %id, "pattern tile grid out of range, fill skipped");
        return;
    };
    let Some((y0, y1)) = tile_span(area.y, area.bottom(), tile.y, tile.height) else {
        warn!(pattern = %id, "pattern tile grid out of range, fill skipped");
        return;
    };
    let count = (x1 - x0)
        .max(1)
        .checked_mul((y1 - y0).max(1))
        .filter(|&count| count <= MAX_TILES_PER_SHAPE);
    let Some(count) = count else {
        warn!(pattern = %id, "pattern tile too small, fill skipped");
        return;
    };
    debug!(pattern = %id, tiles = count, "tiling pattern fill");
    let tile_id = ctx.tile_id(id);

    let pattern_mask = if use_mask { ctx.next_mask() } else { None };
    if let Some(mask) = pattern_mask {
        ctx.surface.write_stencil(mask, &shape.contours, shape.fill_rule);
        ctx.surface.set_stencil_test(Some(mask));
    }

    ctx.surface.push_transform(transform);
    for j in y0..y1.max(y0 + 1) {
        for i in x0..x1.max(x0 + 1) {
            let dest = Rect::new(
                tile.x + i as f32 * tile.width,
                tile.y + j as f32 * tile.height,
                tile.width,
                tile.height,
            );
            ctx.surface.draw_tile(&tile_id, dest, opacity);
            ctx.metrics.tiles_drawn += 1;
        }
    }
    ctx.surface.pop_transform();

    if let Some(mask) = pattern_mask {
        // Hand the pixels back to the clip so the stroke still passes.
        if let Some(clip) = clip_mask {
            ctx.surface.write_stencil(clip, &shape.contours, shape.fill_rule);
        }
        ctx.surface.set_stencil_test(clip_mask);
        ctx.release(mask);
    }
}

/// First and one-past-last tile index covering `[lo, hi]`. `None` when the
/// grid is not finite or spans more than `MAX_TILES_PER_SHAPE` tiles.
fn tile_span(lo: f32, hi: f32, origin: f32, size: f32) -> Option<(i64, i64)> {
    let size = f64::from(size);
    let first = ((f64::from(lo) - f64::from(origin)) / size).floor();
    let last = ((f64::from(hi) - f64::from(origin)) / size).ceil();
    let limit = MAX_TILES_PER_SHAPE as f64;
    if !first.is_finite() || !last.is_finite() || first.abs() > limit * limit {
        return None;
    }
    if last - first > limit {
        return None;
    }
    Some((first as i64, last as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StencilError;
    use crate::surface::{Command, RecordingSurface};

    #[test]
    fn next_mask_clears_the_surface_on_wrap() {
        let config = Config::builder().stencil_bits(1).build();
        let mut surface = RecordingSurface::new(1);
        {
            let mut ctx = RenderContext::new(&mut surface, &config);
            assert_eq!(ctx.next_mask(), Some(1));
            ctx.release(1);
            assert_eq!(ctx.next_mask(), Some(1));
            assert_eq!(ctx.metrics().stencil_clears, 1);
        }
        assert_eq!(surface.commands(), &[Command::ClearStencil]);
    }

    #[test]
    fn depth_errors_become_warnings() {
        let config = Config::builder().stencil_bits(1).build();
        let mut surface = RecordingSurface::new(1);
        let mut ctx = RenderContext::new(&mut surface, &config);
        assert!(!ctx.reserve(2));
        assert_eq!(
            ctx.warnings(),
            &[Warning::Stencil(StencilError::DepthExceeded {
                requested: 2,
                available: 1
            })]
        );
    }

    #[test]
    fn tile_span_rejects_degenerate_grids() {
        assert_eq!(tile_span(0.0, 100.0, 0.0, 10.0), Some((0, 10)));
        assert_eq!(tile_span(-5.0, 5.0, 0.0, 10.0), Some((-1, 1)));
        assert_eq!(tile_span(0.0, 100.0, 0.0, 1e-30), None);
        assert_eq!(tile_span(0.0, 100.0, 0.0, 1e-40), None);
        assert_eq!(tile_span(0.0, 100.0, 0.0, 0.0), None);
        assert_eq!(tile_span(0.0, f32::INFINITY, 0.0, 10.0), None);
        assert_eq!(tile_span(1e30, 1e30, 0.0, 1.0), None);
    }

    #[test]
    fn tile_namespace_suffixes_ids() {
        let config = Config::default();
        let mut surface = RecordingSurface::new(8);
        let ctx = RenderContext::new(&mut surface, &config);
        assert_eq!(ctx.tile_id("p"), "p");
        let ctx = ctx.tile_namespace(7);
        assert_eq!(ctx.tile_id("p"), "p@7");
    }

    #[test]
    fn surface_without_stencil_disables_masking() {
        let config = Config::default();
        let mut surface = RecordingSurface::new(0);
        let ctx = RenderContext::new(&mut surface, &config);
        assert!(!ctx.stencil_enabled());
    }
}
