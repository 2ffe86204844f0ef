//! Pure PNG encoder: BGRA pixels in, deflate-compressed PNG bytes out.
//!
//! Output layout: the 8-byte signature, an IHDR chunk (bit depth 8,
//! colour type 2 = RGB truecolour, compression 0, filter 0, interlace
//! 0), a single IDAT chunk holding every scanline prefixed with filter
//! byte 0, and IEND. No imaging crate is involved; only the generic
//! deflate implementation.

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::{Compression, Crc};

use crate::error::{Result, ScreenCaptureError};

/// The PNG file signature.
const SIGNATURE: [u8; 8] = [137, 80, 78, 71, 13, 10, 26, 10];

/// Highest deflate compression level.
pub const MAX_COMPRESSION_LEVEL: u32 = 9;

/// Default deflate compression level.
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Validate a deflate compression level.
pub fn validate_level(level: u32) -> Result<()> {
    if level > MAX_COMPRESSION_LEVEL {
        return Err(ScreenCaptureError::invalid_argument(format!(
            "compression level {level} out of range 0..={MAX_COMPRESSION_LEVEL}"
        )));
    }
    Ok(())
}

/// Encode a BGRA buffer as a complete PNG byte stream.
pub fn to_png(data: &[u8], size: (u32, u32), level: u32) -> Result<Vec<u8>> {
    let (width, height) = size;
    // Signature + IHDR + IEND overhead, plus a rough guess for IDAT.
    let mut out = Vec::with_capacity(64 + data.len() / 4);
    write_png(&mut out, data, (width, height), level)?;
    Ok(out)
}

/// Encode a BGRA buffer and stream the PNG into `output`.
pub fn write_png<W: Write>(output: &mut W, data: &[u8], size: (u32, u32), level: u32) -> Result<()> {
    let (width, height) = size;
    validate_level(level)?;
    if width == 0 || height == 0 {
        return Err(ScreenCaptureError::invalid_argument(format!(
            "cannot encode a zero-sized image ({width}x{height})"
        )));
    }
    let expected = width as usize * height as usize * 4;
    if data.len() != expected {
        return Err(ScreenCaptureError::invalid_argument(format!(
            "pixel buffer is {} bytes, expected {} for {}x{} BGRA",
            data.len(),
            expected,
            width,
            height
        )));
    }

    let idat = deflate_scanlines(data, width, height, level)?;

    let mut ihdr = Vec::with_capacity(13);
    ihdr.extend_from_slice(&width.to_be_bytes());
    ihdr.extend_from_slice(&height.to_be_bytes());
    // bit depth, colour type, compression, filter, interlace
    ihdr.extend_from_slice(&[8, 2, 0, 0, 0]);

    write_all(output, &SIGNATURE)?;
    write_chunk(output, b"IHDR", &ihdr)?;
    write_chunk(output, b"IDAT", &idat)?;
    write_chunk(output, b"IEND", &[])?;
    output
        .flush()
        .map_err(|e| ScreenCaptureError::encoder(format!("flushing PNG output: {e}")))?;
    Ok(())
}

/// BGRA→RGB scanline assembly (one sequential pass) followed by one
/// zlib-wrapped deflate stream at `level`.
fn deflate_scanlines(data: &[u8], width: u32, height: u32, level: u32) -> Result<Vec<u8>> {
    let row_pixels = width as usize;
    let mut scanlines = Vec::with_capacity(height as usize * (1 + row_pixels * 3));
    for row in data.chunks_exact(row_pixels * 4) {
        // Filter byte 0 = None.
        scanlines.push(0);
        for bgra in row.chunks_exact(4) {
            scanlines.push(bgra[2]);
            scanlines.push(bgra[1]);
            scanlines.push(bgra[0]);
        }
    }

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level));
    encoder
        .write_all(&scanlines)
        .map_err(|e| ScreenCaptureError::encoder(format!("deflate failed: {e}")))?;
    encoder
        .finish()
        .map_err(|e| ScreenCaptureError::encoder(format!("deflate failed: {e}")))
}

fn write_chunk<W: Write>(output: &mut W, tag: &[u8; 4], data: &[u8]) -> Result<()> {
    let mut crc = Crc::new();
    crc.update(tag);
    crc.update(data);

    write_all(output, &(data.len() as u32).to_be_bytes())?;
    write_all(output, tag)?;
    write_all(output, data)?;
    write_all(output, &crc.sum().to_be_bytes())
}

fn write_all<W: Write>(output: &mut W, bytes: &[u8]) -> Result<()> {
    output
        .write_all(bytes)
        .map_err(|e| ScreenCaptureError::encoder(format!("writing PNG output: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn rejects_out_of_range_levels() {
        let bgra = [0u8; 4];
        assert_eq!(
            to_png(&bgra, (1, 1), 10).unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
        for level in 0..=MAX_COMPRESSION_LEVEL {
            assert!(to_png(&bgra, (1, 1), level).is_ok());
        }
    }

    #[test]
    fn rejects_geometry_mismatch() {
        let err = to_png(&[0u8; 8], (3, 1), 6).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        let err = to_png(&[], (0, 0), 6).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn starts_with_signature_and_ihdr() {
        let png = to_png(&[0u8; 4 * 6], (3, 2), 6).unwrap();
        assert_eq!(&png[..8], &SIGNATURE);
        // IHDR length is always 13.
        assert_eq!(&png[8..12], &13u32.to_be_bytes());
        assert_eq!(&png[12..16], b"IHDR");
        assert_eq!(&png[16..20], &3u32.to_be_bytes());
        assert_eq!(&png[20..24], &2u32.to_be_bytes());
        // depth 8, colour 2, compression 0, filter 0, interlace 0
        assert_eq!(&png[24..29], &[8, 2, 0, 0, 0]);
    }

    #[test]
    fn ends_with_iend() {
        let png = to_png(&[0u8; 4], (1, 1), 0).unwrap();
        let tail = &png[png.len() - 12..];
        assert_eq!(&tail[..4], &0u32.to_be_bytes());
        assert_eq!(&tail[4..8], b"IEND");
    }

    #[test]
    fn streaming_and_buffered_variants_agree() {
        let bgra: Vec<u8> = (0..4 * 12).map(|i| (i * 7) as u8).collect();
        let buffered = to_png(&bgra, (4, 3), 6).unwrap();
        let mut streamed = Vec::new();
        write_png(&mut streamed, &bgra, (4, 3), 6).unwrap();
        assert_eq!(buffered, streamed);
    }
}
