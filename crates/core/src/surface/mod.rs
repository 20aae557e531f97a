//! The rendering surface the core draws on, and a character-grid
//! implementation of it for headless use.

use crate::drawing::{Note, Point};
use crate::{Result, SketchpadError};

/// What the core needs from whatever displays the drawing.
pub trait RenderSurface {
    /// Small raster snapshot of what is currently drawn.
    fn thumbnail(&self) -> Result<String>;

    /// Clears the surface and draws `points` from scratch.
    fn redraw(&mut self, points: &[Point]);

    /// Current pixel dimensions as `(width, height)`.
    fn dimensions(&self) -> (u32, u32);
}

const BLANK: char = ' ';
const THUMBNAIL_COLS: usize = 24;
const THUMBNAIL_ROWS: usize = 8;

/// Canvas rasterised onto a grid of note glyphs.
#[derive(Debug, Clone)]
pub struct TextSurface {
    width: u32,
    height: u32,
    cols: usize,
    rows: usize,
    cells: Vec<char>,
    redraws: usize,
}

impl TextSurface {
    /// `width`/`height` are the canvas dimensions in pixels, `cols`/`rows`
    /// the size of the character grid they are drawn onto.
    pub fn new(width: u32, height: u32, cols: usize, rows: usize) -> Self {
        Self {
            width,
            height,
            cols,
            rows,
            cells: vec![BLANK; cols * rows],
            redraws: 0,
        }
    }

    pub fn redraw_count(&self) -> usize {
        self.redraws
    }

    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(|cell| *cell == BLANK)
    }

    /// The grid as text, one line per row.
    pub fn render_text(&self) -> String {
        if self.cols == 0 {
            return String::new();
        }
        self.cells
            .chunks(self.cols)
            .map(|row| row.iter().collect::<String>())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn glyph(note: Note) -> char {
        match note {
            Note::C => 'c',
            Note::D => 'd',
            Note::E => 'e',
            Note::G => 'g',
            Note::A => 'a',
            Note::C2 => 'C',
        }
    }

    fn to_cell(&self, x: f32, y: f32) -> Option<(i64, i64)> {
        if self.width == 0 || self.height == 0 || !x.is_finite() || !y.is_finite() {
            return None;
        }
        let col = (x / self.width as f32 * self.cols as f32).floor() as i64;
        let row = (y / self.height as f32 * self.rows as f32).floor() as i64;
        Some((col, row))
    }

    fn plot(&mut self, col: i64, row: i64, glyph: char) {
        if col < 0 || row < 0 || col >= self.cols as i64 || row >= self.rows as i64 {
            return;
        }
        self.cells[row as usize * self.cols + col as usize] = glyph;
    }

    fn line(&mut self, from: (i64, i64), to: (i64, i64), glyph: char) {
        let (mut x0, mut y0) = from;
        let (x1, y1) = to;
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;

        loop {
            self.plot(x0, y0, glyph);
            if x0 == x1 && y0 == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x0 += sx;
            }
            if e2 <= dx {
                err += dx;
                y0 += sy;
            }
        }
    }
}

impl RenderSurface for TextSurface {
    fn thumbnail(&self) -> Result<String> {
        if self.cols == 0 || self.rows == 0 {
            return Err(SketchpadError::InvalidInput("surface has no area"));
        }

        let mut lines = Vec::with_capacity(THUMBNAIL_ROWS);
        for thumb_row in 0..THUMBNAIL_ROWS {
            let row_start = thumb_row * self.rows / THUMBNAIL_ROWS;
            let row_end = ((thumb_row + 1) * self.rows / THUMBNAIL_ROWS).max(row_start + 1);
            let mut line = String::with_capacity(THUMBNAIL_COLS);
            for thumb_col in 0..THUMBNAIL_COLS {
                let col_start = thumb_col * self.cols / THUMBNAIL_COLS;
                let col_end = ((thumb_col + 1) * self.cols / THUMBNAIL_COLS).max(col_start + 1);
                let glyph = (row_start..row_end.min(self.rows))
                    .flat_map(|row| {
                        (col_start..col_end.min(self.cols)).map(move |col| (row, col))
                    })
                    .map(|(row, col)| self.cells[row * self.cols + col])
                    .find(|cell| *cell != BLANK)
                    .unwrap_or('.');
                line.push(glyph);
            }
            lines.push(line);
        }
        Ok(lines.join("\n"))
    }

    fn redraw(&mut self, points: &[Point]) {
        self.cells.fill(BLANK);
        self.redraws += 1;

        let mut previous: Option<(&Point, (i64, i64))> = None;
        for point in points {
            let Some(cell) = self.to_cell(point.x, point.y) else {
                previous = None;
                continue;
            };
            let glyph = Self::glyph(point.note);
            match previous {
                Some((last, last_cell)) if last.color == point.color => {
                    self.line(last_cell, cell, glyph);
                }
                _ => self.plot(cell.0, cell.1, glyph),
            }
            previous = Some((point, cell));
        }
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
