use sct::{ErrorKind, Monitor, Screenshot};

fn gradient_bgra(width: u32, height: u32) -> Vec<u8> {
    let mut raw = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            raw.extend_from_slice(&[
                (x * 3) as u8,
                (y * 5) as u8,
                (x + y) as u8,
                0xFF,
            ]);
        }
    }
    raw
}

#[test]
fn raw_length_tracks_geometry() {
    let region = Monitor::new(10, 20, 100, 50);
    let shot = Screenshot::new(gradient_bgra(100, 50), &region).unwrap();
    assert_eq!(shot.raw().len(), 4 * 100 * 50);
    assert_eq!(shot.bgra(), shot.raw());
    assert_eq!((shot.left(), shot.top()), (10, 20));
}

#[test]
fn mismatched_buffer_is_invalid() {
    let err = Screenshot::new(vec![0; 11], &Monitor::new(0, 0, 2, 2)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn rgb_projection_follows_the_channel_identity() {
    let shot = Screenshot::from_size(gradient_bgra(9, 4), 9, 4).unwrap();
    let rgb = shot.rgb();
    let raw = shot.raw();
    assert_eq!(rgb.len(), 9 * 4 * 3);
    for i in 0..(9 * 4) {
        assert_eq!(rgb[3 * i], raw[4 * i + 2]);
        assert_eq!(rgb[3 * i + 1], raw[4 * i + 1]);
        assert_eq!(rgb[3 * i + 2], raw[4 * i]);
    }
}

#[test]
fn pixels_rows_match_single_pixel_reads() {
    let shot = Screenshot::from_size(gradient_bgra(5, 3), 5, 3).unwrap();
    let rows = shot.pixels();
    assert_eq!(rows.len(), 3);
    for (y, row) in rows.iter().enumerate() {
        assert_eq!(row.len(), 5);
        for (x, &pixel) in row.iter().enumerate() {
            assert_eq!(shot.pixel(x as u32, y as u32).unwrap(), pixel);
        }
    }
}

#[test]
fn out_of_range_pixel_reads_fail_cleanly() {
    let shot = Screenshot::from_size(gradient_bgra(4, 4), 4, 4).unwrap();
    for (x, y) in [(4, 0), (0, 4), (100, 100)] {
        assert_eq!(
            shot.pixel(x, y).unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
    }
}

#[test]
fn array_interface_matches_the_protocol() {
    let shot = Screenshot::from_size(gradient_bgra(7, 2), 7, 2).unwrap();
    let iface = shot.array_interface();
    assert_eq!(iface.shape, (2, 7, 4));
    assert_eq!(iface.typestr, "|u1");
    assert_eq!(iface.version, 3);
    let (address, read_only) = iface.data;
    assert_eq!(address, shot.raw().as_ptr() as usize);
    assert!(read_only);

    // The descriptor is zero-copy: the first BGRA word is readable at
    // the advertised address while the screenshot is alive.
    let first = unsafe { std::slice::from_raw_parts(address as *const u8, 4) };
    assert_eq!(first, &shot.raw()[..4]);
}
