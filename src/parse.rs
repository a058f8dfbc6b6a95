//! Attribute micro-parsers shared by the loader, the scope and the path
//! builder.

use lightningcss::traits::Parse;
use lightningcss::values::color::{CssColor, SRGB};

use crate::types::{Color, Matrix, Point, Rect};

const UNIT_SUFFIXES: [&str; 9] = ["px", "pt", "pc", "mm", "cm", "in", "em", "ex", "%"];

/// Parses a number, dropping any unit suffix without converting it.
pub(crate) fn parse_number(input: &str) -> Option<f32> {
    let mut s = input.trim();
    for unit in UNIT_SUFFIXES {
        if let Some(stripped) = s.strip_suffix(unit) {
            s = stripped.trim_end();
            break;
        }
    }
    let v = s.parse::<f32>().ok()?;
    v.is_finite().then_some(v)
}

pub(crate) fn attr_number(node: roxmltree::Node<'_, '_>, name: &str) -> f32 {
    node.attribute(name).and_then(parse_number).unwrap_or(0.0)
}

pub(crate) fn parse_number_list(input: &str) -> Vec<f32> {
    input
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<f32>().ok())
        .collect()
}

/// Coordinate pairs of a `points` attribute. A trailing odd number is dropped.
pub(crate) fn parse_points(input: &str) -> Vec<Point> {
    let mut p = PathParser::new(input);
    let mut out = Vec::new();
    while let Some((x, y)) = p.next_pair() {
        out.push(Point::new(x, y));
    }
    out
}

/// `transform` attribute: a left-to-right list of matrix, translate, scale,
/// rotate, skewX and skewY. Unknown functions are identity.
pub(crate) fn parse_transform(input: &str) -> Matrix {
    let mut out = Matrix::identity();
    let mut s = input.trim();

    while !s.is_empty() {
        let Some(open) = s.find('(') else { break };
        let name = s[..open].trim().trim_start_matches(',').trim();
        let Some(close) = s[open + 1..].find(')') else {
            break;
        };
        let args = parse_number_list(&s[open + 1..open + 1 + close]);
        let arg = |i: usize, default: f32| args.get(i).copied().unwrap_or(default);

        let m = match name {
            "translate" => Matrix::translate(arg(0, 0.0), arg(1, 0.0)),
            "scale" => {
                let sx = arg(0, 1.0);
                Matrix::scale(sx, arg(1, sx))
            }
            "rotate" if args.len() >= 3 => {
                let (cx, cy) = (args[1], args[2]);
                Matrix::translate(cx, cy)
                    .mul(Matrix::rotate(args[0]))
                    .mul(Matrix::translate(-cx, -cy))
            }
            "rotate" => Matrix::rotate(arg(0, 0.0)),
            "skewX" => Matrix::skew_x(arg(0, 0.0)),
            "skewY" => Matrix::skew_y(arg(0, 0.0)),
            "matrix" if args.len() >= 6 => {
                Matrix::new(args[0], args[1], args[2], args[3], args[4], args[5])
            }
            _ => Matrix::identity(),
        };

        out = out.mul(m);
        s = s[open + 1 + close + 1..].trim_start();
    }

    out
}

/// `viewBox="min-x min-y width height"`; non-positive sizes are rejected.
pub(crate) fn parse_viewbox(input: &str) -> Option<Rect> {
    let v = parse_number_list(input);
    if v.len() != 4 || v[2] <= 0.0 || v[3] <= 0.0 {
        return None;
    }
    Some(Rect::new(v[0], v[1], v[2], v[3]))
}

/// `url(#id)` (quotes optional). Anything after the closing paren is ignored.
pub(crate) fn parse_url_ref(input: &str) -> Option<String> {
    let s = input.trim();
    if !s.get(..4)?.eq_ignore_ascii_case("url(") {
        return None;
    }
    let close = s.find(')')?;
    let inner = s[4..close].trim().trim_matches('"').trim_matches('\'');
    let id = inner.strip_prefix('#')?;
    if id.is_empty() {
        return None;
    }
    Some(id.to_string())
}

/// Reference of a `href` or `xlink:href` attribute.
pub(crate) fn href_id(node: roxmltree::Node<'_, '_>) -> Option<String> {
    let raw = node
        .attribute("href")
        .or_else(|| node.attribute(("http://www.w3.org/1999/xlink", "href")))?;
    let id = raw.trim().strip_prefix('#')?;
    if id.is_empty() {
        return None;
    }
    Some(id.to_string())
}

/// A gradient or pattern coordinate that may be a fraction of something.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coord {
    pub value: f32,
    pub percent: bool,
}

impl Coord {
    pub const fn abs(value: f32) -> Self {
        Self {
            value,
            percent: false,
        }
    }

    pub const fn percent(fraction: f32) -> Self {
        Self {
            value: fraction,
            percent: true,
        }
    }

    /// Percentages scale `reference`; plain numbers pass through.
    pub fn resolve(self, reference: f32) -> f32 {
        if self.percent {
            self.value * reference
        } else {
            self.value
        }
    }
}

pub(crate) fn parse_coord(input: &str) -> Option<Coord> {
    let s = input.trim();
    if let Some(p) = s.strip_suffix('%') {
        let v = p.trim().parse::<f32>().ok()?;
        return Some(Coord::percent(v / 100.0));
    }
    parse_number(s).map(Coord::abs)
}

/// Gradient stop offset, clamped to [0, 1].
pub(crate) fn parse_offset(input: &str) -> Option<f32> {
    let s = input.trim();
    let v = if let Some(p) = s.strip_suffix('%') {
        p.trim().parse::<f32>().ok()? / 100.0
    } else {
        s.parse::<f32>().ok()?
    };
    v.is_finite().then(|| v.clamp(0.0, 1.0))
}

/// Parses a CSS colour through lightningcss, falling back to hex and a few
/// names when it refuses the input.
pub(crate) fn parse_color(input: &str) -> Option<Color> {
    let v = input.trim();
    if v.is_empty() || v.eq_ignore_ascii_case("none") {
        return None;
    }
    if let Ok(color) = CssColor::parse_string(v) {
        if let Some(c) = css_color_to_color(&color) {
            return Some(c);
        }
    }
    parse_color_legacy(v)
}

pub(crate) fn css_color_to_color(color: &CssColor) -> Option<Color> {
    if let CssColor::RGBA(rgba) = color {
        let alpha = (rgba.alpha as f32 / 255.0).clamp(0.0, 1.0);
        return Some(Color::from_rgba8(rgba.red, rgba.green, rgba.blue, 255).with_alpha(alpha));
    }
    let srgb = SRGB::try_from(color).ok()?;
    Some(Color::rgb(
        srgb.r.clamp(0.0, 1.0),
        srgb.g.clamp(0.0, 1.0),
        srgb.b.clamp(0.0, 1.0),
    ))
}

fn parse_color_legacy(v: &str) -> Option<Color> {
    if let Some(hex) = v.strip_prefix('#') {
        let nibble = |i: usize| u8::from_str_radix(hex.get(i..i + 1)?, 16).ok().map(|n| n * 17);
        let byte = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
        return match hex.len() {
            3 => Some(Color::from_rgba8(nibble(0)?, nibble(1)?, nibble(2)?, 255)),
            4 => Some(Color::from_rgba8(nibble(0)?, nibble(1)?, nibble(2)?, nibble(3)?)),
            6 => Some(Color::from_rgba8(byte(0)?, byte(2)?, byte(4)?, 255)),
            8 => Some(Color::from_rgba8(byte(0)?, byte(2)?, byte(4)?, byte(6)?)),
            _ => None,
        };
    }
    if let Some(args) = v
        .strip_prefix("rgb(")
        .or_else(|| v.strip_prefix("rgba("))
        .and_then(|s| s.strip_suffix(')'))
    {
        let parts: Vec<&str> = args.split(',').map(str::trim).collect();
        if parts.len() < 3 {
            return None;
        }
        let channel = |s: &str| -> Option<f32> {
            match s.strip_suffix('%') {
                Some(p) => p.trim().parse::<f32>().ok().map(|v| v / 100.0),
                None => s.parse::<f32>().ok().map(|v| v / 255.0),
            }
        };
        let alpha = match parts.get(3) {
            Some(a) => a.parse::<f32>().ok()?,
            None => 1.0,
        };
        return Some(Color::rgba(
            channel(parts[0])?.clamp(0.0, 1.0),
            channel(parts[1])?.clamp(0.0, 1.0),
            channel(parts[2])?.clamp(0.0, 1.0),
            alpha.clamp(0.0, 1.0),
        ));
    }
    match v.to_ascii_lowercase().as_str() {
        "black" => Some(Color::BLACK),
        "white" => Some(Color::rgb(1.0, 1.0, 1.0)),
        "red" => Some(Color::rgb(1.0, 0.0, 0.0)),
        "green" => Some(Color::from_rgba8(0, 128, 0, 255)),
        "blue" => Some(Color::rgb(0.0, 0.0, 1.0)),
        "transparent" => Some(Color::TRANSPARENT),
        _ => None,
    }
}

/// Tokenizer for path data and point lists. Commas and whitespace separate
/// tokens; numbers may run together (`1.5.5`, `10-5`).
pub(crate) struct PathParser<'a> {
    bytes: &'a [u8],
    i: usize,
}

impl<'a> PathParser<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            bytes: input.as_bytes(),
            i: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.i
    }

    pub fn skip_ws(&mut self) {
        while self.i < self.bytes.len() {
            match self.bytes[self.i] {
                b' ' | b'\n' | b'\r' | b'\t' | b',' => self.i += 1,
                _ => break,
            }
        }
    }

    pub fn at_end(&mut self) -> bool {
        self.skip_ws();
        self.i >= self.bytes.len()
    }

    /// Consumes a command letter if one is next.
    pub fn next_command(&mut self) -> Option<char> {
        self.skip_ws();
        let b = *self.bytes.get(self.i)?;
        // `e`/`E` only appear inside numbers.
        if b.is_ascii_alphabetic() && !matches!(b, b'e' | b'E') {
            self.i += 1;
            return Some(b as char);
        }
        None
    }

    pub fn peek_is_number(&mut self) -> bool {
        self.skip_ws();
        matches!(
            self.bytes.get(self.i),
            Some(b'0'..=b'9' | b'+' | b'-' | b'.')
        )
    }

    pub fn next_number(&mut self) -> Option<f32> {
        self.skip_ws();
        if self.i >= self.bytes.len() {
            return None;
        }
        let start = self.i;
        let mut has = false;

        if matches!(self.bytes[self.i], b'+' | b'-') {
            self.i += 1;
        }
        while self.i < self.bytes.len() && self.bytes[self.i].is_ascii_digit() {
            self.i += 1;
            has = true;
        }
        if self.i < self.bytes.len() && self.bytes[self.i] == b'.' {
            self.i += 1;
            while self.i < self.bytes.len() && self.bytes[self.i].is_ascii_digit() {
                self.i += 1;
                has = true;
            }
        }
        if has && self.i < self.bytes.len() && matches!(self.bytes[self.i], b'e' | b'E') {
            let mark = self.i;
            self.i += 1;
            if self.i < self.bytes.len() && matches!(self.bytes[self.i], b'+' | b'-') {
                self.i += 1;
            }
            let digits = self.i;
            while self.i < self.bytes.len() && self.bytes[self.i].is_ascii_digit() {
                self.i += 1;
            }
            if self.i == digits {
                self.i = mark;
            }
        }

        if !has {
            self.i = start;
            return None;
        }

        let s = std::str::from_utf8(&self.bytes[start..self.i]).ok()?;
        match s.parse::<f32>() {
            Ok(v) if v.is_finite() => Some(v),
            _ => {
                self.i = start;
                None
            }
        }
    }

    /// Arc flags may be written without separators (`a5 5 0 01 20 20`).
    pub fn next_flag(&mut self) -> Option<bool> {
        self.skip_ws();
        match self.bytes.get(self.i)? {
            b'0' => {
                self.i += 1;
                Some(false)
            }
            b'1' => {
                self.i += 1;
                Some(true)
            }
            _ => None,
        }
    }

    pub fn next_pair(&mut self) -> Option<(f32, f32)> {
        let start = self.i;
        let Some(x) = self.next_number() else {
            self.i = start;
            return None;
        };
        let Some(y) = self.next_number() else {
            self.i = start;
            return None;
        };
        Some((x, y))
    }

    pub fn next_point(&mut self) -> Option<Point> {
        self.next_pair().map(|(x, y)| Point::new(x, y))
    }
}
