//! macOS CoreGraphics (Quartz) backend.
//!
//! Stateless apart from the session options: every grab creates one
//! CGImage for the requested rectangle and extracts its pixels through
//! a bitmap context in BGRA premultiplied-first little-endian layout.
//! Every CF object is owned by a releasing wrapper, so nothing leaks on
//! error paths.

use std::ffi::c_void;

use cocoa::base::{id, nil};
use cocoa::foundation::{NSPoint, NSSize};
use core_foundation::base::CFRelease;
use core_graphics::base::kCGImageAlphaPremultipliedFirst;
use core_graphics::color_space::CGColorSpace;
use core_graphics::context::CGContext;
use core_graphics::geometry::{CGPoint, CGRect, CGSize};
use core_graphics::image::CGImage;
use core_graphics::window::{kCGNullWindowID, kCGWindowListOptionOnScreenOnly};
use foreign_types_shared::ForeignType;
use log::debug;
use objc::rc::autoreleasepool;
use objc::{class, msg_send, sel, sel_impl};

use crate::error::{Result, ScreenCaptureError};
use crate::monitor::{Monitor, MonitorList};
use crate::screenshot::{Pos, Screenshot, Size};

use super::{ensure_grabbable, repack_rows, CaptureBackend, BYTES_PER_PIXEL};

/// CGBitmapInfo byte-order flag for 32-bit little-endian words; paired
/// with alpha-premultiplied-first this yields B,G,R,A bytes in memory.
const K_CG_BITMAP_BYTE_ORDER_32_LITTLE: u32 = 2 << 12;

/// Capture at the nominal (non-Retina) resolution for speed.
const K_CG_WINDOW_IMAGE_NOMINAL_RESOLUTION: u32 = 1 << 4;

/// Widths are rounded up to this alignment by the readback API; any
/// smaller surplus is padding to crop, anything larger is a scaled
/// (Retina) capture.
const WIDTH_ALIGNMENT: usize = 16;

#[link(name = "CoreGraphics", kind = "framework")]
extern "C" {
    fn CGGetActiveDisplayList(
        max_displays: u32,
        active_displays: *mut u32,
        display_count: *mut u32,
    ) -> i32;
    fn CGDisplayBounds(display: u32) -> CGRect;
    fn CGDisplayRotation(display: u32) -> f64;
    fn CGMainDisplayID() -> u32;
    fn CGWindowListCreateImage(
        screen_bounds: CGRect,
        list_option: u32,
        window_id: u32,
        image_option: u32,
    ) -> *mut core_graphics::sys::CGImage;
    fn CGEventCreate(source: *mut c_void) -> *mut c_void;
    fn CGEventGetLocation(event: *mut c_void) -> CGPoint;
}

#[link(name = "ImageIO", kind = "framework")]
extern "C" {
    fn CGImageSourceCreateWithData(data: *const c_void, options: *const c_void) -> *mut c_void;
    fn CGImageSourceCreateImageAtIndex(
        isrc: *mut c_void,
        index: usize,
        options: *const c_void,
    ) -> *mut core_graphics::sys::CGImage;
}

/// Quartz capture backend.
pub struct QuartzBackend {
    max_displays: usize,
    image_options: u32,
    with_cursor: bool,
}

impl QuartzBackend {
    /// `image_options` overrides the CGWindowList image options; 0
    /// forces scaled (Retina) capture instead of the default nominal
    /// resolution.
    pub(crate) fn open(
        max_displays: usize,
        with_cursor: bool,
        image_options: Option<u32>,
    ) -> Result<Self> {
        let backend = Self {
            max_displays: max_displays.max(1),
            image_options: image_options.unwrap_or(K_CG_WINDOW_IMAGE_NOMINAL_RESOLUTION),
            with_cursor,
        };
        // Fail fast when no display is reachable (headless session).
        if backend.active_displays()?.is_empty() {
            return Err(ScreenCaptureError::display_unavailable(
                "no active display",
            ));
        }
        Ok(backend)
    }

    fn active_displays(&self) -> Result<Vec<u32>> {
        let mut ids = vec![0u32; self.max_displays];
        let mut count = 0u32;
        let err = unsafe {
            CGGetActiveDisplayList(self.max_displays as u32, ids.as_mut_ptr(), &mut count)
        };
        if err != 0 {
            return Err(ScreenCaptureError::native(
                "CGGetActiveDisplayList",
                "cannot enumerate active displays",
            )
            .with_detail("cg_error", err.to_string()));
        }
        ids.truncate(count as usize);
        Ok(ids)
    }
}

impl CaptureBackend for QuartzBackend {
    fn monitors(&mut self) -> Result<MonitorList> {
        let main_id = unsafe { CGMainDisplayID() };
        let mut physical = Vec::new();
        let mut primary = None;

        for display in self.active_displays()? {
            let bounds = unsafe { CGDisplayBounds(display) };
            let rotation = unsafe { CGDisplayRotation(display) };
            let (mut width, mut height) = (bounds.size.width, bounds.size.height);
            // Bounds are reported pre-rotation; a quarter turn swaps
            // the emitted dimensions.
            if rotation == 90.0 || rotation == -90.0 || rotation == 270.0 {
                std::mem::swap(&mut width, &mut height);
            }
            if display == main_id {
                primary = Some(physical.len());
            }
            physical.push(Monitor::new(
                bounds.origin.x as i32,
                bounds.origin.y as i32,
                width as u32,
                height as u32,
            ));
        }

        Ok(MonitorList::build(physical, primary))
    }

    fn grab(&mut self, region: &Monitor) -> Result<Screenshot> {
        ensure_grabbable(region)?;

        let rect = CGRect {
            origin: CGPoint {
                x: region.left as f64,
                y: region.top as f64,
            },
            size: CGSize {
                width: region.width as f64,
                height: region.height as f64,
            },
        };

        let image_ptr = unsafe {
            CGWindowListCreateImage(
                rect,
                kCGWindowListOptionOnScreenOnly,
                kCGNullWindowID,
                self.image_options,
            )
        };
        if image_ptr.is_null() {
            return Err(ScreenCaptureError::native(
                "CGWindowListCreateImage",
                "no image returned; screen-recording permission may be missing",
            ));
        }
        let image = unsafe { CGImage::from_ptr(image_ptr) };

        let (bgra, img_w, img_h) = cg_image_to_bgra(&image);

        let req_w = region.width as usize;
        let req_h = region.height as usize;
        if img_w == req_w && img_h == req_h {
            return Screenshot::new(bgra, region);
        }

        // The API rounds widths up to a 16-pixel boundary and appends
        // black pixels; crop those. A larger delta means the capture
        // came back scaled, and the screenshot keeps the image size.
        let delta = img_w.saturating_sub(req_w);
        if delta > 0 && delta < WIDTH_ALIGNMENT && img_h >= req_h {
            let raw = repack_rows(&bgra, img_w * BYTES_PER_PIXEL, req_h, req_w * BYTES_PER_PIXEL);
            return Screenshot::new(raw, region);
        }

        debug!(
            "scaled capture: requested {req_w}x{req_h}, got {img_w}x{img_h}"
        );
        Screenshot::with_geometry(
            bgra,
            Pos {
                left: region.left,
                top: region.top,
            },
            Size {
                width: img_w as u32,
                height: img_h as u32,
            },
        )
    }

    fn cursor(&mut self) -> Result<Option<Screenshot>> {
        if !self.with_cursor {
            return Ok(None);
        }
        Ok(autoreleasepool(|| unsafe { snapshot_cursor() }))
    }

    fn close(&mut self) {
        // Stateless: every CF object lives within a single grab.
    }
}

/// Draw a CGImage into a freshly allocated bitmap context and return
/// its pixels as tightly packed BGRA rows.
fn cg_image_to_bgra(image: &CGImage) -> (Vec<u8>, usize, usize) {
    let width = image.width() as usize;
    let height = image.height() as usize;
    let stride = width * BYTES_PER_PIXEL;

    let mut pixels = vec![0u8; stride * height];
    let color_space = CGColorSpace::create_device_rgb();
    let context = CGContext::create_bitmap_context(
        Some(pixels.as_mut_ptr() as *mut _),
        width,
        height,
        8,
        stride,
        &color_space,
        kCGImageAlphaPremultipliedFirst | K_CG_BITMAP_BYTE_ORDER_32_LITTLE,
    );
    context.draw_image(
        CGRect {
            origin: CGPoint { x: 0.0, y: 0.0 },
            size: CGSize {
                width: width as f64,
                height: height as f64,
            },
        },
        image,
    );

    (pixels, width, height)
}

/// Snapshot the current AppKit cursor, positioned at its hot spot in
/// global coordinates, as straight-alpha BGRA. Any failure along the
/// AppKit/ImageIO path degrades to "no cursor".
unsafe fn snapshot_cursor() -> Option<Screenshot> {
    let cursor: id = msg_send![class!(NSCursor), currentSystemCursor];
    let cursor: id = if cursor == nil {
        msg_send![class!(NSCursor), currentCursor]
    } else {
        cursor
    };
    if cursor == nil {
        return None;
    }

    let ns_image: id = msg_send![cursor, image];
    if ns_image == nil {
        return None;
    }
    let hot_spot: NSPoint = msg_send![cursor, hotSpot];
    let size_points: NSSize = msg_send![ns_image, size];

    // TIFF + ImageIO is the stable route from NSImage to CGImage.
    let tiff: id = msg_send![ns_image, TIFFRepresentation];
    if tiff == nil {
        return None;
    }
    let source = CGImageSourceCreateWithData(tiff as *const c_void, std::ptr::null());
    if source.is_null() {
        return None;
    }
    let cursor_ptr = CGImageSourceCreateImageAtIndex(source, 0, std::ptr::null());
    CFRelease(source);
    if cursor_ptr.is_null() {
        return None;
    }
    let cursor_image = CGImage::from_ptr(cursor_ptr);

    let (mut bgra, width, height) = cg_image_to_bgra(&cursor_image);
    if width == 0 || height == 0 {
        return None;
    }
    // The bitmap context hands back premultiplied alpha; the shared
    // merge expects straight alpha.
    for px in bgra.chunks_exact_mut(4) {
        let alpha = px[3] as u16;
        if alpha > 0 && alpha < 255 {
            for channel in &mut px[..3] {
                *channel = ((*channel as u16 * 255 + alpha / 2) / alpha).min(255) as u8;
            }
        }
    }

    // Hot spot is reported in points; scale into image pixels.
    let scale_x = if size_points.width > 0.0 {
        width as f64 / size_points.width
    } else {
        1.0
    };
    let scale_y = if size_points.height > 0.0 {
        height as f64 / size_points.height
    } else {
        1.0
    };

    let event = CGEventCreate(std::ptr::null_mut());
    if event.is_null() {
        return None;
    }
    let location = CGEventGetLocation(event);
    CFRelease(event);

    let region = Monitor::new(
        location.x as i32 - (hot_spot.x * scale_x).round() as i32,
        location.y as i32 - (hot_spot.y * scale_y).round() as i32,
        width as u32,
        height as u32,
    );

    Screenshot::new(bgra, &region).ok()
}
