use crate::surface::Surface;

/// Line segments per Bézier curve.
pub const BEZIER_POINTS: usize = 10;
/// Line segments per full revolution of a circle or ellipse.
pub const CIRCLE_POINTS: usize = 24;
/// Neighbouring flattened points closer than this are merged.
pub const TOLERANCE: f32 = 0.001;
pub const DEFAULT_STENCIL_BITS: u8 = 8;

/// Immutable tessellation and compositing settings for one document.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    stencil_bits: u8,
    allow_stencil: bool,
    has_framebuffer_objects: bool,
    bezier_points: usize,
    circle_points: usize,
    tolerance: f32,
}

impl Default for Config {
    fn default() -> Self {
        ConfigBuilder::new().build()
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Default settings with the stencil depth the surface reports.
    pub fn probe<S: Surface + ?Sized>(surface: &S) -> Self {
        ConfigBuilder::new()
            .stencil_bits(surface.stencil_bits())
            .build()
    }

    /// Ten times the curve resolution and a hundredth of the merge tolerance.
    pub fn super_detailed(&self) -> Self {
        Self {
            bezier_points: self.bezier_points.saturating_mul(10),
            circle_points: self.circle_points.saturating_mul(10),
            tolerance: self.tolerance / 100.0,
            ..self.clone()
        }
    }

    pub fn stencil_bits(&self) -> u8 {
        self.stencil_bits
    }

    pub fn allow_stencil(&self) -> bool {
        self.allow_stencil
    }

    pub fn has_framebuffer_objects(&self) -> bool {
        self.has_framebuffer_objects
    }

    pub fn bezier_points(&self) -> usize {
        self.bezier_points
    }

    pub fn circle_points(&self) -> usize {
        self.circle_points
    }

    pub fn tolerance(&self) -> f32 {
        self.tolerance
    }

    pub fn stencil_enabled(&self) -> bool {
        self.allow_stencil && self.stencil_bits > 0
    }
}

#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    stencil_bits: u8,
    allow_stencil: Option<bool>,
    has_framebuffer_objects: bool,
    bezier_points: usize,
    circle_points: usize,
    tolerance: f32,
    super_detailed: bool,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            stencil_bits: DEFAULT_STENCIL_BITS,
            allow_stencil: None,
            has_framebuffer_objects: true,
            bezier_points: BEZIER_POINTS,
            circle_points: CIRCLE_POINTS,
            tolerance: TOLERANCE,
            super_detailed: false,
        }
    }

    // Capped at 8: mask ids are stored in an 8-bit stencil plane.
    pub fn stencil_bits(mut self, bits: u8) -> Self {
        self.stencil_bits = bits.min(8);
        self
    }

    // Left unset, stenciling is allowed whenever any stencil bits exist.
    pub fn allow_stencil(mut self, enabled: bool) -> Self {
        self.allow_stencil = Some(enabled);
        self
    }

    pub fn has_framebuffer_objects(mut self, enabled: bool) -> Self {
        self.has_framebuffer_objects = enabled;
        self
    }

    pub fn bezier_points(mut self, points: usize) -> Self {
        self.bezier_points = points.max(1);
        self
    }

    pub fn circle_points(mut self, points: usize) -> Self {
        self.circle_points = points.max(3);
        self
    }

    pub fn tolerance(mut self, tolerance: f32) -> Self {
        if tolerance.is_finite() {
            self.tolerance = tolerance.max(0.0);
        }
        self
    }

    pub fn super_detailed(mut self, enabled: bool) -> Self {
        self.super_detailed = enabled;
        self
    }

    pub fn build(self) -> Config {
        let config = Config {
            stencil_bits: self.stencil_bits,
            allow_stencil: self.allow_stencil.unwrap_or(true) && self.stencil_bits > 0,
            has_framebuffer_objects: self.has_framebuffer_objects,
            bezier_points: self.bezier_points,
            circle_points: self.circle_points,
            tolerance: self.tolerance,
        };
        if self.super_detailed {
            config.super_detailed()
        } else {
            config
        }
    }
}
