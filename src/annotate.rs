//! Detection overlay drawing.
//!
//! Boxes are drawn as hollow rectangles and captions with a 3x5 bitmap font
//! scaled up by `AnnotationStyle::font_scale`. Everything is written in place
//! into the frame's pixel grid; pixels outside the grid are skipped.

use crate::detect::Detection;
use crate::frame::Frame;

const GLYPH_W: u32 = 3;
const GLYPH_H: u32 = 5;

/// Colour and stroke settings for overlays.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AnnotationStyle {
    pub color: [u8; 3],
    /// Box border thickness in pixels.
    pub thickness: u32,
    /// Pixels per font cell.
    pub font_scale: u32,
    /// Gap between the caption's bottom edge and the box's top edge.
    pub label_offset: u32,
}

impl Default for AnnotationStyle {
    fn default() -> Self {
        Self {
            color: [0, 255, 0],
            thickness: 2,
            font_scale: 2,
            label_offset: 10,
        }
    }
}

/// Draw every detection's box and caption onto the frame.
pub fn annotate(frame: &mut Frame, detections: &[Detection], style: &AnnotationStyle) {
    let (width, height) = frame.dimensions();
    for detection in detections {
        let Some(bbox) = detection.bbox.to_pixels(width, height) else {
            continue;
        };
        draw_rect(frame, bbox, style.color, style.thickness);

        let caption = detection.caption();
        let text_h = GLYPH_H * style.font_scale;
        let top = bbox[1]
            .saturating_sub(style.label_offset)
            .saturating_sub(text_h);
        let left = bbox[0].min(width.saturating_sub(label_width(&caption, style)));
        draw_label(frame, left, top, &caption, style);
    }
}

/// Draw a rectangle border with the given thickness. Corners are inclusive.
pub fn draw_rect(frame: &mut Frame, bbox_px: [u32; 4], color: [u8; 3], thickness: u32) {
    let [x0, y0, x1, y1] = bbox_px;
    for t in 0..thickness {
        let xx0 = x0.saturating_add(t);
        let yy0 = y0.saturating_add(t);
        let xx1 = x1.saturating_sub(t);
        let yy1 = y1.saturating_sub(t);
        if xx0 > xx1 || yy0 > yy1 {
            break;
        }
        for x in xx0..=xx1 {
            frame.set_pixel(x, yy0, color);
            frame.set_pixel(x, yy1, color);
        }
        for y in yy0..=yy1 {
            frame.set_pixel(xx0, y, color);
            frame.set_pixel(xx1, y, color);
        }
    }
}

/// Draw `text` with its top-left corner at (x, y).
pub fn draw_label(frame: &mut Frame, x: u32, y: u32, text: &str, style: &AnnotationStyle) {
    let scale = style.font_scale.max(1);
    let advance = (GLYPH_W + 1) * scale;
    let mut cursor = x;
    for ch in text.chars() {
        let rows = glyph(ch);
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..GLYPH_W {
                if bits & (1 << (GLYPH_W - 1 - col)) == 0 {
                    continue;
                }
                let px = cursor + col * scale;
                let py = y + row as u32 * scale;
                for dy in 0..scale {
                    for dx in 0..scale {
                        frame.set_pixel(px + dx, py + dy, style.color);
                    }
                }
            }
        }
        cursor = cursor.saturating_add(advance);
        if cursor >= frame.width() {
            break;
        }
    }
}

/// Width in pixels of `text` rendered with `style`.
fn label_width(text: &str, style: &AnnotationStyle) -> u32 {
    let n = text.chars().count() as u32;
    if n == 0 {
        return 0;
    }
    let scale = style.font_scale.max(1);
    n * (GLYPH_W + 1) * scale - scale
}

fn glyph(ch: char) -> [u8; 5] {
    match ch.to_ascii_lowercase() {
        '0' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b111, 0b001, 0b111, 0b100, 0b111],
        '3' => [0b111, 0b001, 0b111, 0b001, 0b111],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b111, 0b001, 0b111],
        '6' => [0b111, 0b100, 0b111, 0b101, 0b111],
        '7' => [0b111, 0b001, 0b001, 0b010, 0b010],
        '8' => [0b111, 0b101, 0b111, 0b101, 0b111],
        '9' => [0b111, 0b101, 0b111, 0b001, 0b111],
        'a' => [0b010, 0b101, 0b111, 0b101, 0b101],
        'b' => [0b110, 0b101, 0b110, 0b101, 0b110],
        'c' => [0b011, 0b100, 0b100, 0b100, 0b011],
        'd' => [0b110, 0b101, 0b101, 0b101, 0b110],
        'e' => [0b111, 0b100, 0b110, 0b100, 0b111],
        'f' => [0b111, 0b100, 0b110, 0b100, 0b100],
        'g' => [0b011, 0b100, 0b101, 0b101, 0b011],
        'h' => [0b101, 0b101, 0b111, 0b101, 0b101],
        'i' => [0b111, 0b010, 0b010, 0b010, 0b111],
        'j' => [0b001, 0b001, 0b001, 0b101, 0b010],
        'k' => [0b101, 0b101, 0b110, 0b101, 0b101],
        'l' => [0b100, 0b100, 0b100, 0b100, 0b111],
        'm' => [0b101, 0b111, 0b111, 0b101, 0b101],
        'n' => [0b110, 0b101, 0b101, 0b101, 0b101],
        'o' => [0b010, 0b101, 0b101, 0b101, 0b010],
        'p' => [0b110, 0b101, 0b110, 0b100, 0b100],
        'q' => [0b010, 0b101, 0b101, 0b110, 0b011],
        'r' => [0b110, 0b101, 0b110, 0b101, 0b101],
        's' => [0b011, 0b100, 0b010, 0b001, 0b110],
        't' => [0b111, 0b010, 0b010, 0b010, 0b010],
        'u' => [0b101, 0b101, 0b101, 0b101, 0b111],
        'v' => [0b101, 0b101, 0b101, 0b101, 0b010],
        'w' => [0b101, 0b101, 0b111, 0b111, 0b101],
        'x' => [0b101, 0b101, 0b010, 0b101, 0b101],
        'y' => [0b101, 0b101, 0b010, 0b010, 0b010],
        'z' => [0b111, 0b001, 0b010, 0b100, 0b111],
        '.' => [0b000, 0b000, 0b000, 0b000, 0b010],
        '-' => [0b000, 0b000, 0b111, 0b000, 0b000],
        '_' => [0b000, 0b000, 0b000, 0b000, 0b111],
        ':' => [0b000, 0b010, 0b000, 0b010, 0b000],
        ' ' => [0; 5],
        _ => [0b111, 0b001, 0b010, 0b000, 0b010],
    }
}
