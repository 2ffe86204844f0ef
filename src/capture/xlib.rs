//! Legacy Xlib backend, kept for environments without working XCB
//! libraries.
//!
//! Xlib reports asynchronous errors through a process-wide handler
//! whose default implementation terminates the process. A trapping
//! handler is installed once per process (reference counted across
//! sessions) and every trapped error is turned into a structured
//! [`ScreenCaptureError`] on the thread that triggered it.

use std::collections::HashMap;
use std::ffi::{c_char, c_int, c_uint, CStr, CString};
use std::sync::Mutex;
use std::thread::{self, ThreadId};

use lazy_static::lazy_static;
use log::debug;
use x11::{xlib, xrandr};

use crate::error::{Result, ScreenCaptureError};
use crate::monitor::{Monitor, MonitorList};
use crate::screenshot::Screenshot;

use super::{ensure_grabbable, repack_rows, resolve_display_name, CaptureBackend, BYTES_PER_PIXEL};

/// XFixes cursor snapshot, per X11/extensions/Xfixes.h.
#[repr(C)]
struct XFixesCursorImage {
    x: libc::c_short,
    y: libc::c_short,
    width: libc::c_ushort,
    height: libc::c_ushort,
    xhot: libc::c_ushort,
    yhot: libc::c_ushort,
    cursor_serial: libc::c_ulong,
    pixels: *mut libc::c_ulong,
    atom: xlib::Atom,
    name: *const c_char,
}

#[link(name = "Xfixes")]
extern "C" {
    fn XFixesGetCursorImage(display: *mut xlib::Display) -> *mut XFixesCursorImage;
}

// XDestroyImage is a macro in Xutil.h but libX11 also exports it as a
// real symbol for bindings; declaring it here keeps the call explicit.
#[link(name = "X11")]
extern "C" {
    fn XDestroyImage(image: *mut xlib::XImage) -> c_int;
}

/// Details trapped by the error handler for one failed request.
#[derive(Debug, Clone)]
struct XErrorDetails {
    message: String,
    error_code: u8,
    request_code: u8,
    minor_code: u8,
    serial: u64,
    resourceid: u64,
}

struct HandlerState {
    refs: usize,
    previous: Option<unsafe extern "C" fn(*mut xlib::Display, *mut xlib::XErrorEvent) -> c_int>,
}

// Safety: the previous-handler pointer is only read or written while
// holding the mutex, and only ever passed back to XSetErrorHandler.
unsafe impl Send for HandlerState {}

lazy_static! {
    static ref HANDLER: Mutex<HandlerState> = Mutex::new(HandlerState {
        refs: 0,
        previous: None,
    });
    static ref TRAPPED: Mutex<HashMap<ThreadId, XErrorDetails>> = Mutex::new(HashMap::new());
}

unsafe extern "C" fn trap_error(
    display: *mut xlib::Display,
    event: *mut xlib::XErrorEvent,
) -> c_int {
    let evt = &*event;
    let mut text = [0 as c_char; 1024];
    xlib::XGetErrorText(
        display,
        evt.error_code as c_int,
        text.as_mut_ptr(),
        text.len() as c_int,
    );
    let message = CStr::from_ptr(text.as_ptr()).to_string_lossy().into_owned();

    let details = XErrorDetails {
        message,
        error_code: evt.error_code,
        request_code: evt.request_code,
        minor_code: evt.minor_code,
        serial: evt.serial as u64,
        resourceid: evt.resourceid as u64,
    };
    if let Ok(mut trapped) = TRAPPED.lock() {
        trapped.insert(thread::current().id(), details);
    }
    0
}

/// Install the trapping handler; the first session in the process does
/// the actual installation, later sessions only bump the count.
fn install_handler() {
    let mut state = HANDLER.lock().unwrap();
    if state.refs == 0 {
        state.previous = unsafe { xlib::XSetErrorHandler(Some(trap_error)) };
    }
    state.refs += 1;
}

/// Counterpart of [`install_handler`]; the last session to close
/// restores whatever handler was in place before the first install.
/// Leaving the trap installed would break toolkits that expect their
/// own handler back (historically: Tk).
fn uninstall_handler() {
    let mut state = HANDLER.lock().unwrap();
    state.refs = state.refs.saturating_sub(1);
    if state.refs == 0 {
        unsafe { xlib::XSetErrorHandler(state.previous) };
        state.previous = None;
        if let Ok(mut trapped) = TRAPPED.lock() {
            trapped.clear();
        }
    }
}

/// Surface an error trapped on this thread, if any.
fn take_trapped(call: &'static str) -> Result<()> {
    let details = TRAPPED
        .lock()
        .ok()
        .and_then(|mut trapped| trapped.remove(&thread::current().id()));
    match details {
        None => Ok(()),
        Some(d) => Err(ScreenCaptureError::native(call, d.message)
            .with_detail("error_code", d.error_code.to_string())
            .with_detail("request_code", d.request_code.to_string())
            .with_detail("minor_code", d.minor_code.to_string())
            .with_detail("serial", d.serial.to_string())
            .with_detail("resourceid", d.resourceid.to_string())),
    }
}

/// Backend built on Xlib + Xrandr, with optional XFixes cursor support.
pub struct XlibBackend {
    display: *mut xlib::Display,
    root: xlib::Window,
    cursor_enabled: bool,
}

// The raw display pointer is confined to the session lock.
unsafe impl Send for XlibBackend {}

impl XlibBackend {
    pub(crate) fn open(display: Option<&str>, with_cursor: bool) -> Result<Self> {
        let name = resolve_display_name(display)?;
        let c_name = CString::new(name.clone())
            .map_err(|_| ScreenCaptureError::invalid_argument("display name contains NUL"))?;

        install_handler();

        let display = unsafe { xlib::XOpenDisplay(c_name.as_ptr()) };
        if display.is_null() {
            uninstall_handler();
            return Err(ScreenCaptureError::display_unavailable(format!(
                "unable to open display {name:?}"
            )));
        }

        let mut backend = Self {
            display,
            root: unsafe { xlib::XDefaultRootWindow(display) },
            cursor_enabled: false,
        };

        if !backend.has_extension(c"RANDR") {
            backend.close();
            return Err(ScreenCaptureError::display_unavailable(
                "Xrandr not enabled on this server",
            ));
        }

        if with_cursor {
            backend.cursor_enabled = backend.has_extension(c"XFIXES");
            if !backend.cursor_enabled {
                debug!("XFixes not present; cursor capture disabled");
            }
        }

        Ok(backend)
    }

    fn has_extension(&self, name: &CStr) -> bool {
        let mut major_opcode = 0;
        let mut first_event = 0;
        let mut first_error = 0;
        let enabled = unsafe {
            xlib::XQueryExtension(
                self.display,
                name.as_ptr(),
                &mut major_opcode,
                &mut first_event,
                &mut first_error,
            )
        } != 0;
        // The query itself can trap an error on exotic servers.
        let _ = take_trapped("XQueryExtension");
        enabled
    }
}

impl CaptureBackend for XlibBackend {
    fn monitors(&mut self) -> Result<MonitorList> {
        let mut major = 0;
        let mut minor = 0;
        unsafe { xrandr::XRRQueryVersion(self.display, &mut major, &mut minor) };

        // XRRGetScreenResourcesCurrent skips the output re-probe and is
        // dramatically faster, but needs RandR 1.3 on both ends.
        let resources = unsafe {
            if (major, minor) >= (1, 3) {
                xrandr::XRRGetScreenResourcesCurrent(self.display, self.root)
            } else {
                xrandr::XRRGetScreenResources(self.display, self.root)
            }
        };
        take_trapped("XRRGetScreenResources")?;
        if resources.is_null() {
            return Err(ScreenCaptureError::native(
                "XRRGetScreenResources",
                "no screen resources returned",
            ));
        }

        let primary_output = unsafe { xrandr::XRRGetOutputPrimary(self.display, self.root) };

        let mut physical = Vec::new();
        let mut primary = None;
        unsafe {
            let crtcs = std::slice::from_raw_parts((*resources).crtcs, (*resources).ncrtc as usize);
            for &crtc in crtcs {
                let info = xrandr::XRRGetCrtcInfo(self.display, resources, crtc);
                if info.is_null() {
                    continue;
                }
                if (*info).noutput == 0 {
                    xrandr::XRRFreeCrtcInfo(info);
                    continue;
                }
                let outputs =
                    std::slice::from_raw_parts((*info).outputs, (*info).noutput as usize);
                if primary_output != 0 && outputs.contains(&primary_output) {
                    primary = Some(physical.len());
                }
                physical.push(Monitor::new(
                    (*info).x,
                    (*info).y,
                    (*info).width,
                    (*info).height,
                ));
                xrandr::XRRFreeCrtcInfo(info);
            }
            xrandr::XRRFreeScreenResources(resources);
        }
        take_trapped("XRRGetCrtcInfo")?;

        Ok(MonitorList::build(physical, primary))
    }

    fn grab(&mut self, region: &Monitor) -> Result<Screenshot> {
        ensure_grabbable(region)?;

        let image = unsafe {
            xlib::XGetImage(
                self.display,
                self.root,
                region.left,
                region.top,
                region.width as c_uint,
                region.height as c_uint,
                xlib::XAllPlanes(),
                xlib::ZPixmap,
            )
        };
        take_trapped("XGetImage")?;
        if image.is_null() {
            return Err(ScreenCaptureError::native(
                "XGetImage",
                "no image returned",
            ));
        }

        let result = unsafe {
            let bits_per_pixel = (*image).bits_per_pixel as u32;
            if bits_per_pixel != 32 {
                Err(ScreenCaptureError::unsupported_depth(bits_per_pixel))
            } else if (*image).red_mask != 0x00FF_0000
                || (*image).green_mask != 0x0000_FF00
                || (*image).blue_mask != 0x0000_00FF
            {
                Err(ScreenCaptureError::native(
                    "XGetImage",
                    format!(
                        "unexpected channel masks r={:#x} g={:#x} b={:#x}",
                        (*image).red_mask,
                        (*image).green_mask,
                        (*image).blue_mask
                    ),
                ))
            } else {
                let stride = (*image).bytes_per_line as usize;
                let row_bytes = region.width as usize * BYTES_PER_PIXEL;
                let rows = region.height as usize;
                let total = stride * rows;
                let data = std::slice::from_raw_parts((*image).data as *const u8, total);
                let raw = if stride == row_bytes {
                    data.to_vec()
                } else {
                    repack_rows(data, stride, rows, row_bytes)
                };
                Screenshot::new(raw, region)
            }
        };
        unsafe { XDestroyImage(image) };
        result
    }

    fn cursor(&mut self) -> Result<Option<Screenshot>> {
        if !self.cursor_enabled {
            return Ok(None);
        }

        let image = unsafe { XFixesGetCursorImage(self.display) };
        take_trapped("XFixesGetCursorImage")?;
        if image.is_null() {
            return Err(ScreenCaptureError::native(
                "XFixesGetCursorImage",
                "no cursor image returned",
            ));
        }

        let (region, raw) = unsafe {
            let img = &*image;
            let region = Monitor::new(
                i32::from(img.x) - i32::from(img.xhot),
                i32::from(img.y) - i32::from(img.yhot),
                u32::from(img.width),
                u32::from(img.height),
            );
            let count = region.width as usize * region.height as usize;
            // Each pixel is an unsigned long holding 32-bit ARGB with
            // straight alpha; only the low word is meaningful.
            let pixels = std::slice::from_raw_parts(img.pixels, count);
            let mut raw = Vec::with_capacity(count * BYTES_PER_PIXEL);
            for &word in pixels {
                let argb = word as u32;
                raw.push((argb & 0xFF) as u8);
                raw.push((argb >> 8 & 0xFF) as u8);
                raw.push((argb >> 16 & 0xFF) as u8);
                raw.push((argb >> 24 & 0xFF) as u8);
            }
            (region, raw)
        };
        unsafe { xlib::XFree(image as *mut std::ffi::c_void) };

        Ok(Some(Screenshot::new(raw, &region)?))
    }

    fn close(&mut self) {
        if !self.display.is_null() {
            unsafe { xlib::XCloseDisplay(self.display) };
            self.display = std::ptr::null_mut();
            uninstall_handler();
        }
    }
}

impl Drop for XlibBackend {
    fn drop(&mut self) {
        self.close();
    }
}
