/// The downsampled light grid: `columns x rows` values packed `0x00RRGGBB`,
/// rows ordered top to bottom.
///
/// Every odd-indexed row is stored horizontally mirrored so the flat value
/// sequence follows a serpentine LED strip without host-side reshuffling.
/// That mirroring is part of the output contract, not a rendering detail.
#[derive(Clone, Debug)]
pub struct LightGrid {
    columns: usize,
    rows: usize,
    values: Vec<u32>,
}

impl LightGrid {
    /// Starts out all black; values are meaningful after the first sample.
    pub fn new(columns: usize, rows: usize) -> Self {
        Self {
            columns,
            rows,
            values: vec![0; columns * rows],
        }
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn values(&self) -> &[u32] {
        &self.values
    }

    /// Copies up to `out.len()` values and returns how many were written.
    pub fn copy_into(&self, out: &mut [u32]) -> usize {
        let n = out.len().min(self.values.len());
        out[..n].copy_from_slice(&self.values[..n]);
        n
    }

    pub fn copy_from(&mut self, other: &LightGrid) {
        debug_assert_eq!(self.values.len(), other.values.len());
        self.values.copy_from_slice(&other.values);
    }

    /// Repacks one mapped B8G8R8A8 staging surface into the grid. `data`
    /// holds at least `rows` rows of `row_pitch` bytes each; the pitch may
    /// exceed `columns * 4` (driver row alignment).
    pub fn load_bgra_rows(&mut self, data: &[u8], row_pitch: usize) {
        for row in 0..self.rows {
            let line = &data[row * row_pitch..];
            for col in 0..self.columns {
                let px = &line[col * 4..col * 4 + 4];
                let value =
                    ((px[2] as u32) << 16) | ((px[1] as u32) << 8) | px[0] as u32;
                let dest_col = if row % 2 == 1 {
                    self.columns - 1 - col
                } else {
                    col
                };
                self.values[row * self.columns + dest_col] = value;
            }
        }
    }

    pub fn clear(&mut self) {
        self.values.fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bgra_rows(pixels: &[&[u32]], pitch: usize) -> Vec<u8> {
        let mut data = Vec::new();
        for row in pixels {
            let mut line = vec![0u8; pitch];
            for (col, rgb) in row.iter().enumerate() {
                line[col * 4] = (rgb & 0xFF) as u8; // B
                line[col * 4 + 1] = ((rgb >> 8) & 0xFF) as u8; // G
                line[col * 4 + 2] = ((rgb >> 16) & 0xFF) as u8; // R
                line[col * 4 + 3] = 0xFF; // A, must be dropped
            }
            data.extend_from_slice(&line);
        }
        data
    }

    #[test]
    fn uniform_input_yields_uniform_grid() {
        let mut grid = LightGrid::new(4, 3);
        let colour = 0x0080FF; // R=0x00 G=0x80 B=0xFF
        let rows: Vec<Vec<u32>> = (0..3).map(|_| vec![colour; 4]).collect();
        let refs: Vec<&[u32]> = rows.iter().map(|r| r.as_slice()).collect();
        grid.load_bgra_rows(&bgra_rows(&refs, 16), 16);
        assert!(grid.values().iter().all(|v| *v == colour));
    }

    #[test]
    fn odd_rows_are_mirrored() {
        let mut grid = LightGrid::new(3, 2);
        let top: &[u32] = &[1, 2, 3];
        let bottom: &[u32] = &[4, 5, 6];
        grid.load_bgra_rows(&bgra_rows(&[top, bottom], 12), 12);
        assert_eq!(grid.values(), &[1, 2, 3, 6, 5, 4]);
    }

    #[test]
    fn alpha_byte_never_reaches_the_packed_value() {
        let mut grid = LightGrid::new(1, 1);
        grid.load_bgra_rows(&bgra_rows(&[&[0xFFFFFF]], 4), 4);
        assert_eq!(grid.values()[0], 0x00FF_FFFF);
    }

    #[test]
    fn row_pitch_padding_is_skipped() {
        let mut grid = LightGrid::new(2, 2);
        let top: &[u32] = &[0x111111, 0x222222];
        let bottom: &[u32] = &[0x333333, 0x444444];
        // 32-byte pitch for 8 bytes of pixels per row.
        grid.load_bgra_rows(&bgra_rows(&[top, bottom], 32), 32);
        assert_eq!(
            grid.values(),
            &[0x111111, 0x222222, 0x444444, 0x333333]
        );
    }

    #[test]
    fn copy_into_truncates_to_caller_buffer() {
        let mut grid = LightGrid::new(2, 2);
        let top: &[u32] = &[7, 8];
        let bottom: &[u32] = &[9, 10];
        grid.load_bgra_rows(&bgra_rows(&[top, bottom], 8), 8);

        let mut small = [0u32; 3];
        assert_eq!(grid.copy_into(&mut small), 3);
        assert_eq!(small, [7, 8, 10]);
    }
}
