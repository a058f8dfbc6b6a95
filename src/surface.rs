use std::collections::HashSet;

use crate::paint::Paint;
use crate::path::Contour;
use crate::types::{FillRule, Matrix, Rect};

/// Drawing target of the compositor. Coordinates are in the current user
/// space: the product of every pushed transform.
///
/// The stencil plane holds one id per pixel. `write_stencil` stores `mask`
/// wherever the contours cover a pixel and the current stencil test passes;
/// once `set_stencil_test(Some(mask))` is active, drawing only touches pixels
/// whose id equals `mask`.
pub trait Surface {
    /// Stencil depth in bits; zero when the target has no stencil plane.
    fn stencil_bits(&self) -> u8;
    fn has_tile(&self, id: &str) -> bool;

    fn enable_blending(&mut self);
    fn clear_stencil(&mut self);
    /// Pre-concatenates `m` onto the current transform.
    fn push_transform(&mut self, m: Matrix);
    fn pop_transform(&mut self);
    fn set_depth(&mut self, _z: f32) {}

    fn fill_polygons(&mut self, contours: &[Contour], rule: FillRule, paint: &Paint, opacity: f32);
    fn stroke_polylines(&mut self, contours: &[Contour], width: f32, paint: &Paint, opacity: f32);

    fn write_stencil(&mut self, mask: u8, contours: &[Contour], rule: FillRule);
    fn set_stencil_test(&mut self, mask: Option<u8>);

    /// Redirects drawing into an offscreen tile of `width` x `height` user
    /// units until `end_tile`. Tile content starts from an identity transform.
    fn begin_tile(&mut self, id: &str, width: f32, height: f32);
    fn end_tile(&mut self);
    /// Stretches a finished tile over `dest`.
    fn draw_tile(&mut self, id: &str, dest: Rect, opacity: f32);
}

/// One recorded surface call.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    EnableBlending,
    ClearStencil,
    PushTransform(Matrix),
    PopTransform,
    SetDepth(f32),
    FillPolygons {
        contours: Vec<Contour>,
        rule: FillRule,
        paint: Paint,
        opacity: f32,
    },
    StrokePolylines {
        contours: Vec<Contour>,
        width: f32,
        paint: Paint,
        opacity: f32,
    },
    WriteStencil {
        mask: u8,
        contours: Vec<Contour>,
        rule: FillRule,
    },
    SetStencilTest(Option<u8>),
    BeginTile {
        id: String,
        width: f32,
        height: f32,
    },
    EndTile,
    DrawTile {
        id: String,
        dest: Rect,
        opacity: f32,
    },
}

impl Command {
    pub fn apply<S: Surface + ?Sized>(&self, surface: &mut S) {
        match self {
            Command::EnableBlending => surface.enable_blending(),
            Command::ClearStencil => surface.clear_stencil(),
            Command::PushTransform(m) => surface.push_transform(*m),
            Command::PopTransform => surface.pop_transform(),
            Command::SetDepth(z) => surface.set_depth(*z),
            Command::FillPolygons {
                contours,
                rule,
                paint,
                opacity,
            } => surface.fill_polygons(contours, *rule, paint, *opacity),
            Command::StrokePolylines {
                contours,
                width,
                paint,
                opacity,
            } => surface.stroke_polylines(contours, *width, paint, *opacity),
            Command::WriteStencil {
                mask,
                contours,
                rule,
            } => surface.write_stencil(*mask, contours, *rule),
            Command::SetStencilTest(mask) => surface.set_stencil_test(*mask),
            Command::BeginTile { id, width, height } => surface.begin_tile(id, *width, *height),
            Command::EndTile => surface.end_tile(),
            Command::DrawTile { id, dest, opacity } => surface.draw_tile(id, *dest, *opacity),
        }
    }
}

/// A recorded render pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DisplayList {
    commands: Vec<Command>,
}

impl DisplayList {
    pub fn new(commands: Vec<Command>) -> Self {
        Self { commands }
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Ids of the tiles this list renders.
    pub fn tile_ids(&self) -> impl Iterator<Item = &str> {
        self.commands.iter().filter_map(|c| match c {
            Command::BeginTile { id, .. } => Some(id.as_str()),
            _ => None,
        })
    }

    pub fn replay<S: Surface + ?Sized>(&self, surface: &mut S) {
        for command in &self.commands {
            command.apply(surface);
        }
    }
}

/// Surface that records every call. Used to capture the render passes at
/// load time and to inspect them in tests.
#[derive(Debug, Clone, Default)]
pub struct RecordingSurface {
    stencil_bits: u8,
    commands: Vec<Command>,
    tiles: HashSet<String>,
}

impl RecordingSurface {
    pub fn new(stencil_bits: u8) -> Self {
        Self {
            stencil_bits: stencil_bits.min(8),
            commands: Vec::new(),
            tiles: HashSet::new(),
        }
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Hands out the recording so far and starts a fresh one. Finished tiles
    /// are remembered.
    pub fn take_commands(&mut self) -> DisplayList {
        DisplayList::new(std::mem::take(&mut self.commands))
    }
}

impl Surface for RecordingSurface {
    fn stencil_bits(&self) -> u8 {
        self.stencil_bits
    }

    fn has_tile(&self, id: &str) -> bool {
        self.tiles.contains(id)
    }

    fn enable_blending(&mut self) {
        self.commands.push(Command::EnableBlending);
    }

    fn clear_stencil(&mut self) {
        self.commands.push(Command::ClearStencil);
    }

    fn push_transform(&mut self, m: Matrix) {
        self.commands.push(Command::PushTransform(m));
    }

    fn pop_transform(&mut self) {
        self.commands.push(Command::PopTransform);
    }

    fn set_depth(&mut self, z: f32) {
        self.commands.push(Command::SetDepth(z));
    }

    fn fill_polygons(&mut self, contours: &[Contour], rule: FillRule, paint: &Paint, opacity: f32) {
        self.commands.push(Command::FillPolygons {
            contours: contours.to_vec(),
            rule,
            paint: paint.clone(),
            opacity,
        });
    }

    fn stroke_polylines(&mut self, contours: &[Contour], width: f32, paint: &Paint, opacity: f32) {
        self.commands.push(Command::StrokePolylines {
            contours: contours.to_vec(),
            width,
            paint: paint.clone(),
            opacity,
        });
    }

    fn write_stencil(&mut self, mask: u8, contours: &[Contour], rule: FillRule) {
        self.commands.push(Command::WriteStencil {
            mask,
            contours: contours.to_vec(),
            rule,
        });
    }

    fn set_stencil_test(&mut self, mask: Option<u8>) {
        self.commands.push(Command::SetStencilTest(mask));
    }

    fn begin_tile(&mut self, id: &str, width: f32, height: f32) {
        self.commands.push(Command::BeginTile {
            id: id.to_string(),
            width,
            height,
        });
    }

    fn end_tile(&mut self) {
        // The id of the tile being closed is the last unmatched BeginTile.
        let mut depth = 0usize;
        let mut closing = None;
        for command in self.commands.iter().rev() {
            match command {
                Command::EndTile => depth += 1,
                Command::BeginTile { id, .. } if depth == 0 => {
                    closing = Some(id.clone());
                    break;
                }
                Command::BeginTile { .. } => depth -= 1,
                _ => {}
            }
        }
        if let Some(id) = closing {
            self.tiles.insert(id);
        }
        self.commands.push(Command::EndTile);
    }

    fn draw_tile(&mut self, id: &str, dest: Rect, opacity: f32) {
        self.commands.push(Command::DrawTile {
            id: id.to_string(),
            dest,
            opacity,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Color, Point};

    fn square() -> Vec<Contour> {
        vec![Contour::closed(vec![
            Point::new(0.0, 0.0),
            Point::new(4.0, 0.0),
            Point::new(4.0, 4.0),
            Point::new(0.0, 4.0),
        ])]
    }

    #[test]
    fn recording_replays_into_another_surface() {
        let mut first = RecordingSurface::new(8);
        first.enable_blending();
        first.push_transform(Matrix::translate(1.0, 2.0));
        first.fill_polygons(&square(), FillRule::EvenOdd, &Paint::Solid(Color::BLACK), 0.5);
        first.pop_transform();
        let list = first.take_commands();
        assert_eq!(list.len(), 4);
        assert!(first.commands().is_empty());

        let mut second = RecordingSurface::new(8);
        list.replay(&mut second);
        assert_eq!(second.commands(), list.commands());
    }

    #[test]
    fn finished_tiles_are_remembered() {
        let mut s = RecordingSurface::new(8);
        s.begin_tile("dots", 10.0, 10.0);
        assert!(!s.has_tile("dots"));
        s.fill_polygons(&square(), FillRule::NonZero, &Paint::Solid(Color::BLACK), 1.0);
        s.end_tile();
        assert!(s.has_tile("dots"));

        let list = s.take_commands();
        assert_eq!(list.tile_ids().collect::<Vec<_>>(), vec!["dots"]);
        assert!(s.has_tile("dots"));
    }
}
