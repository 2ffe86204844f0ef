//! The immutable screenshot value object and its pixel projections.

use std::fmt;

use crate::error::{Result, ScreenCaptureError};
use crate::monitor::Monitor;

/// Where a capture originated, in global screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pos {
    pub left: i32,
    pub top: i32,
}

/// Captured area dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

/// Zero-copy descriptor for numeric-array interop, version 3 of the
/// de-facto array-interface protocol: C-contiguous `(height, width, 4)`
/// unsigned bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayInterface {
    pub shape: (usize, usize, usize),
    pub typestr: &'static str,
    pub version: u32,
    /// `(address, read_only)`: the address of the first BGRA byte. Only
    /// valid while the owning [`Screenshot`] is alive.
    pub data: (usize, bool),
}

/// Raw BGRA pixels plus the geometry of the captured area.
///
/// `raw` is row-major with no padding between rows, exactly
/// `width * height * 4` bytes. The alpha channel comes straight from
/// the OS and may or may not hold meaningful data.
#[derive(Clone, PartialEq, Eq)]
pub struct Screenshot {
    raw: Vec<u8>,
    pos: Pos,
    size: Size,
}

impl Screenshot {
    /// Wrap a BGRA buffer captured from `monitor`.
    ///
    /// Fails with `invalid-argument` when the buffer length does not
    /// match the monitor geometry.
    pub fn new(raw: Vec<u8>, monitor: &Monitor) -> Result<Self> {
        Self::with_geometry(
            raw,
            Pos {
                left: monitor.left,
                top: monitor.top,
            },
            Size {
                width: monitor.width,
                height: monitor.height,
            },
        )
    }

    /// Wrap a BGRA buffer anchored at the origin.
    pub fn from_size(raw: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        Self::with_geometry(raw, Pos { left: 0, top: 0 }, Size { width, height })
    }

    pub(crate) fn with_geometry(raw: Vec<u8>, pos: Pos, size: Size) -> Result<Self> {
        let expected = size.width as usize * size.height as usize * 4;
        if raw.len() != expected {
            return Err(ScreenCaptureError::invalid_argument(format!(
                "pixel buffer is {} bytes, expected {} for {}x{} BGRA",
                raw.len(),
                expected,
                size.width,
                size.height
            )));
        }
        Ok(Self { raw, pos, size })
    }

    /// The raw BGRA bytes.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Alias of [`raw`](Self::raw); the capture format is BGRx and the
    /// name mirrors that.
    pub fn bgra(&self) -> &[u8] {
        &self.raw
    }

    pub(crate) fn raw_mut(&mut self) -> &mut [u8] {
        &mut self.raw
    }

    pub fn pos(&self) -> Pos {
        self.pos
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn left(&self) -> i32 {
        self.pos.left
    }

    pub fn top(&self) -> i32 {
        self.pos.top
    }

    pub fn width(&self) -> u32 {
        self.size.width
    }

    pub fn height(&self) -> u32 {
        self.size.height
    }

    /// The pixels re-ordered to `R,G,B,R,G,B,…`, three bytes per pixel.
    ///
    /// Computed on demand; one sequential pass over `raw`.
    pub fn rgb(&self) -> Vec<u8> {
        let pixels = self.raw.len() / 4;
        let mut rgb = vec![0u8; pixels * 3];
        for (dst, src) in rgb.chunks_exact_mut(3).zip(self.raw.chunks_exact(4)) {
            dst[0] = src[2];
            dst[1] = src[1];
            dst[2] = src[0];
        }
        rgb
    }

    /// The `(r, g, b)` value at `(x, y)`.
    ///
    /// Fails with `invalid-argument` when the coordinate is outside the
    /// captured area.
    pub fn pixel(&self, x: u32, y: u32) -> Result<(u8, u8, u8)> {
        if x >= self.size.width || y >= self.size.height {
            return Err(ScreenCaptureError::invalid_argument(format!(
                "pixel location ({x}, {y}) is out of range for {}x{}",
                self.size.width, self.size.height
            )));
        }
        let offset = (y as usize * self.size.width as usize + x as usize) * 4;
        let bgra = &self.raw[offset..offset + 4];
        Ok((bgra[2], bgra[1], bgra[0]))
    }

    /// Row-grouped pixels: one `Vec` per row, each entry an `(r, g, b)`
    /// triple.
    pub fn pixels(&self) -> Vec<Vec<(u8, u8, u8)>> {
        let width = self.size.width as usize;
        self.raw
            .chunks_exact(width * 4)
            .map(|row| {
                row.chunks_exact(4)
                    .map(|bgra| (bgra[2], bgra[1], bgra[0]))
                    .collect()
            })
            .collect()
    }

    /// Array-interface descriptor for zero-copy hand-off to numeric
    /// libraries. The address stays valid only as long as `self` does.
    pub fn array_interface(&self) -> ArrayInterface {
        ArrayInterface {
            shape: (
                self.size.height as usize,
                self.size.width as usize,
                4,
            ),
            typestr: "|u1",
            version: 3,
            data: (self.raw.as_ptr() as usize, true),
        }
    }
}

impl fmt::Debug for Screenshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<Screenshot pos={},{} size={}x{}>",
            self.pos.left, self.pos.top, self.size.width, self.size.height
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn checkerboard(width: u32, height: u32) -> Vec<u8> {
        let mut raw = Vec::with_capacity((width * height * 4) as usize);
        for y in 0..height {
            for x in 0..width {
                let v = if (x + y) % 2 == 0 { 0xFF } else { 0x00 };
                raw.extend_from_slice(&[v, !v, v, 0xFF]);
            }
        }
        raw
    }

    #[test]
    fn length_invariant_enforced() {
        let err = Screenshot::from_size(vec![0u8; 5], 1, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(Screenshot::from_size(vec![0u8; 4], 1, 1).is_ok());
    }

    #[test]
    fn rgb_projection_reorders_channels() {
        // blue, green
        let raw = vec![0xFF, 0x00, 0x00, 0xFF, 0x00, 0xFF, 0x00, 0xFF];
        let shot = Screenshot::from_size(raw, 2, 1).unwrap();
        assert_eq!(shot.rgb(), vec![0x00, 0x00, 0xFF, 0x00, 0xFF, 0x00]);
    }

    #[test]
    fn rgb_index_identity_holds_for_every_pixel() {
        let shot = Screenshot::from_size(checkerboard(7, 5), 7, 5).unwrap();
        let rgb = shot.rgb();
        let bgra = shot.raw();
        for i in 0..(7 * 5) {
            assert_eq!(rgb[3 * i], bgra[4 * i + 2]);
            assert_eq!(rgb[3 * i + 1], bgra[4 * i + 1]);
            assert_eq!(rgb[3 * i + 2], bgra[4 * i]);
        }
    }

    #[test]
    fn pixel_accessor_matches_rows() {
        let shot = Screenshot::from_size(checkerboard(4, 3), 4, 3).unwrap();
        let rows = shot.pixels();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].len(), 4);
        for (y, row) in rows.iter().enumerate() {
            for (x, &rgb) in row.iter().enumerate() {
                assert_eq!(shot.pixel(x as u32, y as u32).unwrap(), rgb);
            }
        }
        assert_eq!(
            shot.pixel(4, 0).unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
    }

    #[test]
    fn array_interface_describes_hwc_bytes() {
        let shot = Screenshot::from_size(checkerboard(6, 2), 6, 2).unwrap();
        let iface = shot.array_interface();
        assert_eq!(iface.shape, (2, 6, 4));
        assert_eq!(iface.typestr, "|u1");
        assert_eq!(iface.version, 3);
        assert_eq!(iface.data, (shot.raw().as_ptr() as usize, true));
    }

    #[test]
    fn capture_origin_is_preserved() {
        let region = Monitor::new(10, 20, 100, 50);
        let shot = Screenshot::new(vec![0u8; 100 * 50 * 4], &region).unwrap();
        assert_eq!(shot.raw().len(), 20_000);
        assert_eq!(shot.pos(), Pos { left: 10, top: 20 });
        assert_eq!(
            shot.size(),
            Size {
                width: 100,
                height: 50
            }
        );
    }
}
