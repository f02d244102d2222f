use serde::Serialize;

use super::OverlayOptions;

/// Extra vertical space added to the font size to get one line's advance.
pub const LINE_GAP: u32 = 6;
pub const ELLIPSIS: &str = "...";
const FONT_SIZE_STEP: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoxPx {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

/// One quadrant of the composite image and the text box at its bottom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PanelGeometry {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub box_height: u32,
}

impl PanelGeometry {
    /// Quadrants in panel order: top-left, top-right, bottom-left, bottom-right.
    pub fn quadrants(image_width: u32, image_height: u32, box_height_ratio: f64) -> [Self; 4] {
        let width = image_width / 2;
        let height = image_height / 2;
        let box_height = (height as f64 * box_height_ratio) as u32;
        [(0, 0), (width, 0), (0, height), (width, height)].map(|(x, y)| Self {
            x,
            y,
            width,
            height,
            box_height,
        })
    }

    pub fn box_top(&self) -> u32 {
        self.y + self.height - self.box_height
    }

    pub fn text_box(&self) -> BoxPx {
        BoxPx {
            x: self.x,
            y: self.box_top(),
            w: self.width,
            h: self.box_height,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayoutResult {
    pub font_size: u32,
    pub lines: Vec<String>,
    pub truncated: bool,
}

/// Greedy wrap by character count.
///
/// Words are packed onto lines of at most `width` characters joined by a
/// single space; a word longer than `width` is split into `width`-sized
/// chunks. Scripts without spaces between words are therefore only broken at
/// the character budget.
pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for word in text.split_whitespace() {
        let mut chars: Vec<char> = word.chars().collect();
        loop {
            let room = if current_len == 0 {
                width
            } else {
                width.saturating_sub(current_len + 1)
            };
            if chars.len() <= room {
                if current_len > 0 {
                    current.push(' ');
                    current_len += 1;
                }
                current.extend(chars.iter());
                current_len += chars.len();
                break;
            }
            if current_len > 0 && (chars.len() <= width || room == 0) {
                lines.push(std::mem::take(&mut current));
                current_len = 0;
                continue;
            }
            // long word: fill what is left of this line, carry the rest over
            let rest = chars.split_off(room);
            if current_len > 0 {
                current.push(' ');
            }
            current.extend(chars.iter());
            lines.push(std::mem::take(&mut current));
            current_len = 0;
            chars = rest;
        }
    }

    if current_len > 0 {
        lines.push(current);
    }
    lines
}

pub fn line_advance(font_size: u32) -> u32 {
    font_size + LINE_GAP
}

pub fn block_height(line_count: usize, font_size: u32, padding: u32) -> u32 {
    line_count as u32 * line_advance(font_size) + padding * 2
}

/// Picks the largest font size whose wrapped block fits `box_height`.
///
/// Wrapping uses a character budget, so the wrapped lines are the same at
/// every candidate size and only the line advance changes. When no size fits,
/// the smallest size is used and the lines are cut to what the box holds
/// (never more than `max_lines`), marking the cut with an ellipsis.
///
/// The fallback keeps `min(max_lines, lines that fit at the smallest size)`
/// rather than cutting at `max_lines` alone, so the kept block never runs
/// past the bottom of the box. A 112px box with 20px padding holds 3 lines
/// at size 14 even though `max_lines` is 5.
pub fn fit_text(text: &str, box_height: u32, options: &OverlayOptions) -> LayoutResult {
    let lines = wrap_text(text, options.max_chars_per_line);

    let candidates = (options.min_font_size..=options.base_font_size)
        .rev()
        .step_by(FONT_SIZE_STEP);
    for font_size in candidates {
        if block_height(lines.len(), font_size, options.padding) <= box_height {
            return keep_lines(font_size, lines, options.max_lines);
        }
    }

    let font_size = options.min_font_size;
    let budget = fitting_line_budget(box_height, font_size, options.padding).min(options.max_lines);
    keep_lines(font_size, lines, budget)
}

fn fitting_line_budget(box_height: u32, font_size: u32, padding: u32) -> usize {
    let inner = box_height.saturating_sub(padding * 2);
    ((inner / line_advance(font_size)) as usize).max(1)
}

fn keep_lines(font_size: u32, mut lines: Vec<String>, keep: usize) -> LayoutResult {
    let keep = keep.max(1);
    if lines.len() <= keep {
        return LayoutResult {
            font_size,
            lines,
            truncated: false,
        };
    }
    lines.truncate(keep);
    if let Some(last) = lines.last_mut() {
        let trimmed_len = last.trim_end().len();
        last.truncate(trimmed_len);
        last.push_str(ELLIPSIS);
    }
    LayoutResult {
        font_size,
        lines,
        truncated: true,
    }
}
