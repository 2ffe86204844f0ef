//! Windows GDI backend.
//!
//! GDI device contexts are not safe to share between threads, so the
//! backend keeps one source/memory DC pair per OS thread, created on
//! first use and torn down only when the session closes. Concurrent
//! grabs from distinct threads therefore never touch the same GDI
//! resources.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::ffi::c_void;
use std::mem::size_of;
use std::sync::Mutex;

use log::debug;
use windows::Win32::Foundation::{BOOL, LPARAM, RECT};
use windows::Win32::Graphics::Gdi::{
    BitBlt, CreateCompatibleBitmap, CreateCompatibleDC, DeleteDC, DeleteObject,
    EnumDisplayMonitors, GetDC, GetDIBits, GetMonitorInfoW, ReleaseDC, SelectObject, BITMAPINFO,
    BITMAPINFOHEADER, BI_RGB, CAPTUREBLT, DIB_RGB_COLORS, HBITMAP, HDC, HGDIOBJ, HMONITOR,
    MONITORINFO, MONITORINFOF_PRIMARY, ROP_CODE, SRCCOPY,
};
use windows::Win32::System::Threading::GetCurrentThreadId;
use windows::Win32::UI::HiDpi::{
    GetScaleFactorForDevice, SetProcessDPIAware, SetProcessDpiAwareness, DEVICE_PRIMARY,
    PROCESS_PER_MONITOR_DPI_AWARE,
};
use windows::Win32::UI::WindowsAndMessaging::{
    DrawIcon, GetCursorInfo, GetIconInfo, CURSORINFO, CURSOR_SHOWING, ICONINFO,
};

use crate::error::{Result, ScreenCaptureError};
use crate::monitor::{Monitor, MonitorList};
use crate::screenshot::Screenshot;

use super::{ensure_grabbable, CaptureBackend, BYTES_PER_PIXEL};

/// System cursors are drawn into a fixed 32x32 surface.
const CURSOR_EDGE: i32 = 32;

/// GDI state owned by exactly one OS thread.
struct ThreadGdi {
    srcdc: HDC,
    memdc: HDC,
    bitmap: HBITMAP,
    old_bitmap: HGDIOBJ,
    dims: (i32, i32),
}

// Entries are only used from their owning thread; the map itself is
// protected by the mutex.
unsafe impl Send for ThreadGdi {}

impl ThreadGdi {
    fn create() -> Result<Self> {
        unsafe {
            let srcdc = GetDC(None);
            if srcdc.0.is_null() {
                return Err(ScreenCaptureError::native("GetDC", "no screen DC"));
            }
            let memdc = CreateCompatibleDC(Some(srcdc));
            if memdc.0.is_null() {
                let _ = ReleaseDC(None, srcdc);
                return Err(ScreenCaptureError::native(
                    "CreateCompatibleDC",
                    "no memory DC",
                ));
            }
            Ok(Self {
                srcdc,
                memdc,
                bitmap: HBITMAP(std::ptr::null_mut()),
                old_bitmap: HGDIOBJ(std::ptr::null_mut()),
                dims: (0, 0),
            })
        }
    }

    /// (Re)create the cached bitmap when the requested size changes.
    fn ensure_bitmap(&mut self, width: i32, height: i32) -> Result<()> {
        if self.dims == (width, height) && !self.bitmap.0.is_null() {
            return Ok(());
        }
        unsafe {
            let bitmap = CreateCompatibleBitmap(self.srcdc, width, height);
            if bitmap.0.is_null() {
                return Err(ScreenCaptureError::native(
                    "CreateCompatibleBitmap",
                    format!("cannot allocate a {width}x{height} bitmap"),
                ));
            }
            let old = SelectObject(self.memdc, bitmap.into());
            if self.old_bitmap.0.is_null() {
                self.old_bitmap = old;
            }
            if !self.bitmap.0.is_null() {
                let _ = DeleteObject(self.bitmap.into());
            }
            self.bitmap = bitmap;
            self.dims = (width, height);
        }
        Ok(())
    }

    fn release(&mut self) {
        unsafe {
            if !self.old_bitmap.0.is_null() {
                SelectObject(self.memdc, self.old_bitmap);
            }
            if !self.bitmap.0.is_null() {
                let _ = DeleteObject(self.bitmap.into());
                self.bitmap = HBITMAP(std::ptr::null_mut());
            }
            if !self.memdc.0.is_null() {
                let _ = DeleteDC(self.memdc);
            }
            if !self.srcdc.0.is_null() {
                let _ = ReleaseDC(None, self.srcdc);
            }
        }
    }
}

/// A top-down 32-bpp DIB header for `width` x `height` pixels.
fn bitmap_info(width: i32, height: i32) -> BITMAPINFO {
    BITMAPINFO {
        bmiHeader: BITMAPINFOHEADER {
            biSize: size_of::<BITMAPINFOHEADER>() as u32,
            biWidth: width,
            // Negative height selects top-down row order.
            biHeight: -height,
            biPlanes: 1,
            biBitCount: 32,
            biCompression: BI_RGB.0,
            ..Default::default()
        },
        ..Default::default()
    }
}

/// GDI capture backend with per-thread device contexts.
pub struct GdiBackend {
    contexts: Mutex<HashMap<u32, ThreadGdi>>,
    with_cursor: bool,
}

impl GdiBackend {
    pub(crate) fn open(with_cursor: bool) -> Result<Self> {
        // Announce DPI awareness once so monitor rectangles and blits
        // use physical pixels. Both calls fail harmlessly when another
        // component already chose an awareness level.
        unsafe {
            if SetProcessDpiAwareness(PROCESS_PER_MONITOR_DPI_AWARE).is_err() {
                let _ = SetProcessDPIAware();
            }
        }

        Ok(Self {
            contexts: Mutex::new(HashMap::new()),
            with_cursor,
        })
    }

    fn with_thread_gdi<T>(&self, f: impl FnOnce(&mut ThreadGdi) -> Result<T>) -> Result<T> {
        let mut contexts = self.contexts.lock().unwrap();
        let thread_id = unsafe { GetCurrentThreadId() };
        let gdi = match contexts.entry(thread_id) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(slot) => {
                debug!("creating GDI contexts for thread {thread_id}");
                slot.insert(ThreadGdi::create()?)
            }
        };
        f(gdi)
    }
}

unsafe extern "system" fn push_monitor(
    hmonitor: HMONITOR,
    _hdc: HDC,
    _rect: *mut RECT,
    lparam: LPARAM,
) -> BOOL {
    let found = &mut *(lparam.0 as *mut Vec<(Monitor, bool)>);
    let mut info = MONITORINFO {
        cbSize: size_of::<MONITORINFO>() as u32,
        ..Default::default()
    };
    if GetMonitorInfoW(hmonitor, &mut info).as_bool() {
        let r = info.rcMonitor;
        found.push((
            Monitor::new(
                r.left,
                r.top,
                (r.right - r.left).max(0) as u32,
                (r.bottom - r.top).max(0) as u32,
            ),
            info.dwFlags & MONITORINFOF_PRIMARY != 0,
        ));
    }
    BOOL(1)
}

impl CaptureBackend for GdiBackend {
    fn monitors(&mut self) -> Result<MonitorList> {
        let mut found: Vec<(Monitor, bool)> = Vec::new();
        let ok = unsafe {
            EnumDisplayMonitors(
                None,
                None,
                Some(push_monitor),
                LPARAM(&mut found as *mut _ as isize),
            )
        };
        if !ok.as_bool() {
            return Err(ScreenCaptureError::native(
                "EnumDisplayMonitors",
                "monitor enumeration failed",
            ));
        }

        let primary = found.iter().position(|(_, is_primary)| *is_primary);
        let physical = found.into_iter().map(|(monitor, _)| monitor).collect();
        Ok(MonitorList::build(physical, primary))
    }

    fn grab(&mut self, region: &Monitor) -> Result<Screenshot> {
        ensure_grabbable(region)?;
        let width = region.width as i32;
        let height = region.height as i32;

        self.with_thread_gdi(|gdi| {
            gdi.ensure_bitmap(width, height)?;

            unsafe {
                // CAPTUREBLT picks up layered windows at the price of a
                // brief cursor flicker on some systems.
                BitBlt(
                    gdi.memdc,
                    0,
                    0,
                    width,
                    height,
                    Some(gdi.srcdc),
                    region.left,
                    region.top,
                    ROP_CODE(SRCCOPY.0 | CAPTUREBLT.0),
                )
                .map_err(|e| {
                    ScreenCaptureError::native("BitBlt", "screen blit failed")
                        .with_detail("code", format!("{:#x}", e.code().0))
                })?;

                let mut buffer =
                    vec![0u8; region.width as usize * region.height as usize * BYTES_PER_PIXEL];
                let mut bmi = bitmap_info(width, height);
                let lines = GetDIBits(
                    gdi.memdc,
                    gdi.bitmap,
                    0,
                    region.height,
                    Some(buffer.as_mut_ptr() as *mut c_void),
                    &mut bmi,
                    DIB_RGB_COLORS,
                );
                if lines != height {
                    return Err(ScreenCaptureError::native(
                        "GetDIBits",
                        format!("read {lines} scanlines, expected {height}"),
                    ));
                }

                Screenshot::new(buffer, region)
            }
        })
    }

    fn cursor(&mut self) -> Result<Option<Screenshot>> {
        if !self.with_cursor {
            return Ok(None);
        }

        unsafe {
            let mut info = CURSORINFO {
                cbSize: size_of::<CURSORINFO>() as u32,
                ..Default::default()
            };
            if GetCursorInfo(&mut info).is_err() || info.flags.0 & CURSOR_SHOWING.0 == 0 {
                return Ok(None);
            }

            let mut icon = ICONINFO::default();
            if GetIconInfo(info.hCursor.into(), &mut icon).is_err() {
                return Ok(None);
            }
            // GetIconInfo hands out copies of the cursor bitmaps; they
            // must be deleted here or they leak per call.
            let monochrome = icon.hbmColor.0.is_null();
            let hotspot = (icon.xHotspot as i32, icon.yHotspot as i32);
            if !icon.hbmMask.0.is_null() {
                let _ = DeleteObject(icon.hbmMask.into());
            }
            if !icon.hbmColor.0.is_null() {
                let _ = DeleteObject(icon.hbmColor.into());
            }

            let shot = self.with_thread_gdi(|gdi| unsafe {
                let memdc = CreateCompatibleDC(Some(gdi.srcdc));
                if memdc.0.is_null() {
                    return Err(ScreenCaptureError::native(
                        "CreateCompatibleDC",
                        "no cursor DC",
                    ));
                }
                let bitmap = CreateCompatibleBitmap(gdi.srcdc, CURSOR_EDGE, CURSOR_EDGE);
                if bitmap.0.is_null() {
                    let _ = DeleteDC(memdc);
                    return Err(ScreenCaptureError::native(
                        "CreateCompatibleBitmap",
                        "no cursor bitmap",
                    ));
                }
                let old = SelectObject(memdc, bitmap.into());

                let draw = DrawIcon(memdc, 0, 0, info.hCursor.into());

                let mut buffer =
                    vec![0u8; (CURSOR_EDGE * CURSOR_EDGE) as usize * BYTES_PER_PIXEL];
                let mut bmi = bitmap_info(CURSOR_EDGE, CURSOR_EDGE);
                let lines = GetDIBits(
                    memdc,
                    bitmap,
                    0,
                    CURSOR_EDGE as u32,
                    Some(buffer.as_mut_ptr() as *mut c_void),
                    &mut bmi,
                    DIB_RGB_COLORS,
                );

                SelectObject(memdc, old);
                let _ = DeleteObject(bitmap.into());
                let _ = DeleteDC(memdc);

                draw.map_err(|e| {
                    ScreenCaptureError::native("DrawIcon", "cursor draw failed")
                        .with_detail("code", format!("{:#x}", e.code().0))
                })?;
                if lines != CURSOR_EDGE {
                    return Err(ScreenCaptureError::native(
                        "GetDIBits",
                        format!("read {lines} cursor scanlines, expected {CURSOR_EDGE}"),
                    ));
                }

                // Monochrome cursors come back with a zeroed alpha
                // channel; rebuild it from the colour bits.
                if monochrome {
                    for px in buffer.chunks_exact_mut(4) {
                        px[3] = if px[..3] == [0, 0, 0] { 0 } else { 255 };
                    }
                }

                // The reported cursor position is in logical units;
                // scale it to physical pixels before anchoring the hot
                // spot.
                let ratio = GetScaleFactorForDevice(DEVICE_PRIMARY)
                    .map(|factor| factor.0 as f64 / 100.0)
                    .unwrap_or(1.0);
                let region = Monitor::new(
                    (info.ptScreenPos.x as f64 * ratio - hotspot.0 as f64).round() as i32,
                    (info.ptScreenPos.y as f64 * ratio - hotspot.1 as f64).round() as i32,
                    CURSOR_EDGE as u32,
                    CURSOR_EDGE as u32,
                );
                Screenshot::new(buffer, &region)
            })?;

            Ok(Some(shot))
        }
    }

    fn close(&mut self) {
        let mut contexts = self.contexts.lock().unwrap();
        for (_, mut gdi) in contexts.drain() {
            gdi.release();
        }
    }
}

impl Drop for GdiBackend {
    fn drop(&mut self) {
        self.close();
    }
}
