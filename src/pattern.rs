use crate::paint::Units;
use crate::parse::{Coord, parse_coord, parse_transform, parse_viewbox};
use crate::path::Contour;
use crate::types::{Matrix, Point, Rect};

/// A `<pattern>` element: tile geometry plus the shapes drawn into the tile.
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    pub id: String,
    pub x: Coord,
    pub y: Coord,
    pub width: Coord,
    pub height: Coord,
    pub units: Units,
    pub content_units: Units,
    pub view_box: Option<Rect>,
    pub transform: Matrix,
    /// Content shapes, as indices into the document's shape list.
    pub shapes: Vec<usize>,
    /// Index of the shape holding the tile rectangle.
    pub definition: Option<usize>,
    /// Tile in user units, fixed by the first shape that uses the pattern.
    pub resolved_tile: Option<Rect>,
    /// Bounding box of that first shape; scales bounding-box content.
    pub resolved_bbox: Option<Rect>,
}

impl Pattern {
    pub fn parse(node: roxmltree::Node<'_, '_>, id: &str) -> Self {
        let coord = |name: &str| {
            node.attribute(name)
                .and_then(parse_coord)
                .unwrap_or(Coord::abs(0.0))
        };
        Self {
            id: id.to_string(),
            x: coord("x"),
            y: coord("y"),
            width: coord("width"),
            height: coord("height"),
            units: node
                .attribute("patternUnits")
                .and_then(Units::parse)
                .unwrap_or(Units::ObjectBoundingBox),
            content_units: node
                .attribute("patternContentUnits")
                .and_then(Units::parse)
                .unwrap_or(Units::UserSpaceOnUse),
            view_box: node.attribute("viewBox").and_then(parse_viewbox),
            transform: node
                .attribute("patternTransform")
                .map(parse_transform)
                .unwrap_or_default(),
            shapes: Vec::new(),
            definition: None,
            resolved_tile: None,
            resolved_bbox: None,
        }
    }

    /// Tile rectangle in the user space of a shape with bounds `bbox`.
    pub fn tile_for(&self, bbox: Option<Rect>, viewport: Rect) -> Option<Rect> {
        let tile = match self.units {
            Units::ObjectBoundingBox => {
                let b = bbox.filter(|b| !b.is_empty())?;
                Rect::new(
                    b.x + self.x.resolve(1.0) * b.width,
                    b.y + self.y.resolve(1.0) * b.height,
                    self.width.resolve(1.0) * b.width,
                    self.height.resolve(1.0) * b.height,
                )
            }
            Units::UserSpaceOnUse => Rect::new(
                self.x.resolve(viewport.width),
                self.y.resolve(viewport.height),
                self.width.resolve(viewport.width),
                self.height.resolve(viewport.height),
            ),
        };
        (!tile.is_empty()).then_some(tile)
    }

    /// Tile outline in pattern units, recorded as the pattern's own shape.
    pub fn definition_contour(&self) -> Contour {
        let x = self.x.value;
        let y = self.y.value;
        let w = self.width.value;
        let h = self.height.value;
        Contour::closed(vec![
            Point::new(x, y),
            Point::new(x + w, y),
            Point::new(x + w, y + h),
            Point::new(x, y + h),
        ])
    }

    /// Maps content coordinates into a tile of size `tile` whose origin is
    /// the tile's top-left corner.
    pub fn content_transform(&self, tile: Rect, bbox: Option<Rect>) -> Matrix {
        if let Some(vb) = self.view_box {
            return Matrix::scale(tile.width / vb.width, tile.height / vb.height)
                .mul(Matrix::translate(-vb.x, -vb.y));
        }
        match (self.content_units, bbox) {
            (Units::ObjectBoundingBox, Some(b)) => Matrix::scale(b.width, b.height),
            _ => Matrix::identity(),
        }
    }
}
