/// Top-down BGRA test pattern: a white bar sweeping across a dark background.
pub struct MovingBar {
    width: usize,
    height: usize,
    bar_width: usize,
    buf: Vec<u8>,
}

impl MovingBar {
    pub fn new(width: u32, height: u32) -> Self {
        let width = width as usize;
        let height = height as usize;
        Self {
            width,
            height,
            bar_width: (width / 16).max(1),
            buf: vec![0; width * height * 4],
        }
    }

    pub fn linesize(&self) -> usize {
        self.width * 4
    }

    /// Renders frame `index` and returns the pixels.
    pub fn render(&mut self, index: i64) -> &[u8] {
        let linesize = self.linesize();
        if linesize == 0 {
            return &self.buf;
        }
        let offset = (index.rem_euclid(self.width as i64)) as usize;
        for (y, row) in self.buf.chunks_exact_mut(linesize).enumerate() {
            let shade = (y * 255 / self.height.max(1)) as u8 / 4;
            for (x, px) in row.chunks_exact_mut(4).enumerate() {
                let in_bar = (x + self.width - offset) % self.width < self.bar_width;
                let value = if in_bar { 0xFF } else { shade };
                px.copy_from_slice(&[value, value, value, 0xFF]);
            }
        }
        &self.buf
    }
}
