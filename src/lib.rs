mod config;
mod document;
mod error;
mod flatten;
mod metrics;
mod paint;
mod parse;
mod path;
mod pattern;
mod raster;
mod render;
mod scope;
mod stencil;
mod surface;
mod types;

pub use config::{
    BEZIER_POINTS, CIRCLE_POINTS, Config, ConfigBuilder, DEFAULT_STENCIL_BITS, TOLERANCE,
};
pub use document::{AnchorX, AnchorY, Document, DrawParams};
pub use error::{ParseError, ReferenceKind, Result, StencilError, SvgError, Warning};
pub use flatten::{
    ArcParams, flatten_arc, flatten_cubic, flatten_ellipse, flatten_quadratic, merge_close_points,
};
pub use metrics::{PassMetrics, RenderMetrics};
pub use paint::{
    Gradient, GradientKind, GradientStop, Paint, PaintSpec, PaintTables, SpreadMethod, Units,
    extract_gradients, resolve_gradient, resolve_paint,
};
pub use parse::Coord;
pub use path::{ClipPart, ClipRegion, Contour, Shape, build_shape, parse_path_data};
pub use pattern::Pattern;
pub use raster::RasterSurface;
pub use render::{RenderContext, prerender_patterns, render};
pub use scope::{ClipRef, Scope};
pub use stencil::{Allocation, StencilAllocator};
pub use surface::{Command, DisplayList, RecordingSurface, Surface};
pub use types::{Color, FillRule, Matrix, Point, Rect};

/// Loads the SVG (or gzip-compressed SVG) at `path` with default settings.
pub fn load(path: impl AsRef<std::path::Path>) -> Result<Document> {
    Document::load(path, Config::default())
}
