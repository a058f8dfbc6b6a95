/// Counters of one render pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassMetrics {
    pub shapes_drawn: usize,
    pub shapes_skipped: usize,
    pub points: usize,
    pub command_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderMetrics {
    pub prepare: PassMetrics,
    pub main: PassMetrics,
    pub masks_issued: usize,
    pub stencil_clears: usize,
    pub tiles_rendered: usize,
    pub tiles_drawn: usize,
    pub load_ms: f64,
}
