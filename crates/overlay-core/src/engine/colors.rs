use crate::core::models::color::{Color, DEFAULT_PALETTE};

/// Hands out palette colors in a fixed cyclic order.
///
/// The cursor only moves forward; deleting an item never gives its color back.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorAssigner {
    palette: Vec<Color>,
    cursor: u64,
}

impl Default for ColorAssigner {
    fn default() -> Self {
        Self::new(DEFAULT_PALETTE.to_vec())
    }
}

impl ColorAssigner {
    /// Creates an assigner over `palette`, falling back to the default palette
    /// when it is empty.
    pub fn new(palette: Vec<Color>) -> Self {
        let palette = if palette.is_empty() {
            DEFAULT_PALETTE.to_vec()
        } else {
            palette
        };
        Self { palette, cursor: 0 }
    }

    /// The color the next call to [`Self::next_color`] will return.
    pub fn peek(&self) -> Color {
        let index = (self.cursor % self.palette.len() as u64) as usize;
        self.palette[index]
    }

    pub fn advance(&mut self) {
        self.cursor += 1;
    }

    pub fn next_color(&mut self) -> Color {
        let color = self.peek();
        self.advance();
        color
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn palette(&self) -> &[Color] {
        &self.palette
    }
}
