use std::io::Read;

use sct::{to_png, Screenshot};

const SIGNATURE: [u8; 8] = [137, 80, 78, 71, 13, 10, 26, 10];

/// Minimal PNG reader for the encoder's own output: walks the chunk
/// stream, verifies CRCs, inflates IDAT and strips the per-row filter
/// bytes.
fn decode(png: &[u8]) -> (u32, u32, Vec<u8>) {
    assert_eq!(&png[..8], &SIGNATURE, "bad signature");

    let mut width = 0u32;
    let mut height = 0u32;
    let mut idat = Vec::new();
    let mut saw_iend = false;
    let mut offset = 8;

    while offset + 12 <= png.len() {
        let len = u32::from_be_bytes(png[offset..offset + 4].try_into().unwrap()) as usize;
        let tag = &png[offset + 4..offset + 8];
        let data = &png[offset + 8..offset + 8 + len];
        let crc = u32::from_be_bytes(png[offset + 8 + len..offset + 12 + len].try_into().unwrap());

        let mut check = flate2::Crc::new();
        check.update(tag);
        check.update(data);
        assert_eq!(check.sum(), crc, "bad CRC for chunk {:?}", tag);

        match tag {
            b"IHDR" => {
                assert_eq!(len, 13);
                width = u32::from_be_bytes(data[0..4].try_into().unwrap());
                height = u32::from_be_bytes(data[4..8].try_into().unwrap());
                // bit depth 8, colour type 2, compression 0, filter 0,
                // interlace 0
                assert_eq!(&data[8..13], &[8, 2, 0, 0, 0]);
            }
            b"IDAT" => idat.extend_from_slice(data),
            b"IEND" => {
                assert_eq!(len, 0);
                saw_iend = true;
            }
            other => panic!("unexpected chunk {other:?}"),
        }
        offset += 12 + len;
    }
    assert!(saw_iend, "missing IEND");

    let mut inflated = Vec::new();
    flate2::read::ZlibDecoder::new(&idat[..])
        .read_to_end(&mut inflated)
        .expect("IDAT must inflate");

    let row_bytes = width as usize * 3;
    assert_eq!(inflated.len(), height as usize * (1 + row_bytes));
    let mut pixels = Vec::with_capacity(height as usize * row_bytes);
    for row in inflated.chunks_exact(1 + row_bytes) {
        assert_eq!(row[0], 0, "scanline filter must be None");
        pixels.extend_from_slice(&row[1..]);
    }
    (width, height, pixels)
}

fn pseudo_random_bgra(len: usize, mut seed: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity(len);
    for _ in 0..len {
        seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        data.push((seed >> 24) as u8);
    }
    data
}

#[test]
fn two_pixel_buffer_encodes_to_expected_rgb() {
    // blue, green
    let bgra = [0xFF, 0x00, 0x00, 0xFF, 0x00, 0xFF, 0x00, 0xFF];
    let png = to_png(&bgra, (2, 1), 6).unwrap();
    let (width, height, pixels) = decode(&png);
    assert_eq!((width, height), (2, 1));
    assert_eq!(pixels, vec![0x00, 0x00, 0xFF, 0x00, 0xFF, 0x00]);
}

#[test]
fn round_trip_preserves_the_rgb_projection_at_every_level() {
    let (width, height) = (21u32, 13u32);
    let bgra = pseudo_random_bgra((width * height * 4) as usize, 0xC0FF_EE00);
    let shot = Screenshot::from_size(bgra.clone(), width, height).unwrap();

    for level in 0..=9 {
        let png = to_png(&bgra, (width, height), level).unwrap();
        let (w, h, pixels) = decode(&png);
        assert_eq!((w, h), (width, height));
        assert_eq!(pixels, shot.rgb(), "level {level} corrupted pixels");
    }
}

#[test]
fn level_zero_stores_rows_verbatim() {
    let bgra = pseudo_random_bgra(16 * 4, 7);
    let png_fast = to_png(&bgra, (16, 1), 0).unwrap();
    let png_dense = to_png(&bgra, (16, 1), 9).unwrap();
    // Same pixels on both ends regardless of how hard deflate worked.
    assert_eq!(decode(&png_fast).2, decode(&png_dense).2);
}

#[test]
fn single_row_and_single_column_images_survive() {
    for (w, h) in [(1u32, 64u32), (64, 1), (1, 1)] {
        let bgra = pseudo_random_bgra((w * h * 4) as usize, w ^ h);
        let png = to_png(&bgra, (w, h), 6).unwrap();
        let (dw, dh, pixels) = decode(&png);
        assert_eq!((dw, dh), (w, h));
        assert_eq!(pixels.len(), (w * h * 3) as usize);
    }
}
