//! XCB connection core and the XGetImage backend.
//!
//! Error trapping uses the XCB reply/error discriminator: every request
//! cookie resolves to either a reply or a structured X error, so no
//! process-wide handler is involved. The MIT-SHM backend in
//! [`super::xshm`] builds on the same core.

use log::debug;
use x11rb::connection::{Connection, RequestConnection};
use x11rb::errors::{ConnectionError, ReplyError};
use x11rb::protocol::randr::{self, ConnectionExt as _};
use x11rb::protocol::xfixes::{self, ConnectionExt as _};
use x11rb::protocol::xproto::{ConnectionExt as _, ImageFormat, Window};
use x11rb::rust_connection::RustConnection;

use crate::error::{Result, ScreenCaptureError};
use crate::monitor::{Monitor, MonitorList};
use crate::screenshot::Screenshot;

use super::{ensure_grabbable, resolve_display_name, CaptureBackend, BYTES_PER_PIXEL};

const ALL_PLANES: u32 = !0;

/// Shared libxcb state: one connection, the root window of the
/// preferred screen, and the negotiated extension surface.
pub(crate) struct XcbCore {
    conn: RustConnection,
    root: Window,
    root_width: u16,
    root_height: u16,
    cursor_enabled: bool,
}

impl XcbCore {
    /// Connect to the X server and negotiate RandR (required) and
    /// XFixes (optional, only when the caller wants the cursor).
    pub(crate) fn connect(display: Option<&str>, with_cursor: bool) -> Result<Self> {
        let name = resolve_display_name(display)?;
        let (conn, screen_num) = x11rb::connect(Some(&name)).map_err(|e| {
            ScreenCaptureError::display_unavailable(format!("unable to open display {name:?}: {e}"))
        })?;

        let setup = conn.setup();
        let screen = &setup.roots[screen_num];
        let root = screen.root;
        let root_width = screen.width_in_pixels;
        let root_height = screen.height_in_pixels;
        let root_depth = screen.root_depth;

        // The server must hand pixels back as 32-bit ZPixmap words.
        let bits_per_pixel = setup
            .pixmap_formats
            .iter()
            .find(|format| format.depth == root_depth)
            .map(|format| u32::from(format.bits_per_pixel))
            .unwrap_or(u32::from(root_depth));
        if bits_per_pixel != 32 {
            return Err(ScreenCaptureError::unsupported_depth(bits_per_pixel));
        }

        if conn
            .extension_information(randr::X11_EXTENSION_NAME)
            .map_err(|e| connection_error("QueryExtension", e))?
            .is_none()
        {
            return Err(ScreenCaptureError::display_unavailable(
                "RandR extension not enabled on this server",
            ));
        }

        let mut core = Self {
            conn,
            root,
            root_width,
            root_height,
            cursor_enabled: false,
        };

        if with_cursor {
            core.cursor_enabled = core.negotiate_xfixes();
        }

        Ok(core)
    }

    /// XFixes needs a one-time version handshake before cursor
    /// requests are legal. Absence is not an error: cursor capture
    /// silently degrades to a no-op.
    fn negotiate_xfixes(&self) -> bool {
        let present = matches!(
            self.conn.extension_information(xfixes::X11_EXTENSION_NAME),
            Ok(Some(_))
        );
        if !present {
            debug!("XFixes not present; cursor capture disabled");
            return false;
        }
        match self
            .conn
            .xfixes_query_version(4, 0)
            .map_err(ReplyError::from)
            .and_then(|cookie| cookie.reply())
        {
            Ok(_) => true,
            Err(err) => {
                debug!("XFixes version handshake failed: {err}");
                false
            }
        }
    }

    pub(crate) fn conn(&self) -> &RustConnection {
        &self.conn
    }

    pub(crate) fn root(&self) -> Window {
        self.root
    }

    /// Root geometry, used to size the shared-memory segment.
    pub(crate) fn root_size(&self) -> (u16, u16) {
        (self.root_width, self.root_height)
    }

    /// Enumerate CRTCs through RandR; CRTCs with no connected output
    /// are skipped. `GetScreenResourcesCurrent` avoids a server
    /// re-probe and is preferred when the server speaks RandR 1.3.
    pub(crate) fn monitors(&self) -> Result<MonitorList> {
        let version = self
            .conn
            .randr_query_version(1, 3)
            .map_err(|e| connection_error("RRQueryVersion", e))?
            .reply()
            .map_err(|e| reply_error("RRQueryVersion", e))?;

        let (timestamp, crtcs) = if (version.major_version, version.minor_version) >= (1, 3) {
            let res = self
                .conn
                .randr_get_screen_resources_current(self.root)
                .map_err(|e| connection_error("RRGetScreenResourcesCurrent", e))?
                .reply()
                .map_err(|e| reply_error("RRGetScreenResourcesCurrent", e))?;
            (res.config_timestamp, res.crtcs)
        } else {
            let res = self
                .conn
                .randr_get_screen_resources(self.root)
                .map_err(|e| connection_error("RRGetScreenResources", e))?
                .reply()
                .map_err(|e| reply_error("RRGetScreenResources", e))?;
            (res.config_timestamp, res.crtcs)
        };

        let primary_output = self
            .conn
            .randr_get_output_primary(self.root)
            .map_err(|e| connection_error("RRGetOutputPrimary", e))?
            .reply()
            .map_err(|e| reply_error("RRGetOutputPrimary", e))?
            .output;

        let mut physical = Vec::with_capacity(crtcs.len());
        let mut primary = None;
        for crtc in crtcs {
            let info = self
                .conn
                .randr_get_crtc_info(crtc, timestamp)
                .map_err(|e| connection_error("RRGetCrtcInfo", e))?
                .reply()
                .map_err(|e| reply_error("RRGetCrtcInfo", e))?;
            if info.outputs.is_empty() {
                continue;
            }
            if primary_output != 0 && info.outputs.contains(&primary_output) {
                primary = Some(physical.len());
            }
            // CRTC geometry is already rotated into screen space.
            physical.push(Monitor::new(
                i32::from(info.x),
                i32::from(info.y),
                u32::from(info.width),
                u32::from(info.height),
            ));
        }

        Ok(MonitorList::build(physical, primary))
    }

    /// Fetch pixels for `region` through a plain GetImage round trip.
    pub(crate) fn grab_get_image(&self, region: &Monitor) -> Result<Screenshot> {
        ensure_grabbable(region)?;

        let reply = self
            .conn
            .get_image(
                ImageFormat::Z_PIXMAP,
                self.root,
                region.left as i16,
                region.top as i16,
                region.width as u16,
                region.height as u16,
                ALL_PLANES,
            )
            .map_err(|e| connection_error("GetImage", e))?
            .reply()
            .map_err(|e| reply_error("GetImage", e))?;

        let expected = region.width as usize * region.height as usize * BYTES_PER_PIXEL;
        let mut data = reply.data;
        if data.len() < expected {
            return Err(ScreenCaptureError::native(
                "GetImage",
                format!(
                    "server returned {} bytes, expected {expected}",
                    data.len()
                ),
            ));
        }
        data.truncate(expected);

        Screenshot::new(data, region)
    }

    /// Snapshot the pointer through XFixes. The server hands pixels
    /// back as 32-bit ARGB words with straight alpha.
    pub(crate) fn cursor(&self) -> Result<Option<Screenshot>> {
        if !self.cursor_enabled {
            return Ok(None);
        }

        let image = self
            .conn
            .xfixes_get_cursor_image()
            .map_err(|e| connection_error("XFixesGetCursorImage", e))?
            .reply()
            .map_err(|e| reply_error("XFixesGetCursorImage", e))?;

        let region = Monitor::new(
            i32::from(image.x) - i32::from(image.xhot),
            i32::from(image.y) - i32::from(image.yhot),
            u32::from(image.width),
            u32::from(image.height),
        );

        let mut data = Vec::with_capacity(image.cursor_image.len() * BYTES_PER_PIXEL);
        for argb in &image.cursor_image {
            data.push((argb & 0xFF) as u8);
            data.push((argb >> 8 & 0xFF) as u8);
            data.push((argb >> 16 & 0xFF) as u8);
            data.push((argb >> 24 & 0xFF) as u8);
        }

        Ok(Some(Screenshot::new(data, &region)?))
    }
}

/// A request could not even be sent.
pub(crate) fn connection_error(call: &'static str, err: ConnectionError) -> ScreenCaptureError {
    ScreenCaptureError::native(call, format!("connection failure: {err}"))
}

/// The server answered a request with an error instead of a reply.
pub(crate) fn reply_error(call: &'static str, err: ReplyError) -> ScreenCaptureError {
    match err {
        ReplyError::X11Error(e) => {
            ScreenCaptureError::native(call, format!("X error {:?}", e.error_kind))
                .with_detail("error_code", e.error_code.to_string())
                .with_detail("major_opcode", e.major_opcode.to_string())
                .with_detail("minor_opcode", e.minor_opcode.to_string())
                .with_detail("sequence", e.sequence.to_string())
                .with_detail("bad_value", e.bad_value.to_string())
        }
        ReplyError::ConnectionError(e) => connection_error(call, e),
    }
}

/// Whether a failed reply was a protocol-level X error (as opposed to a
/// dead connection); the SHM fallback logic only reacts to the former.
pub(crate) fn is_x11_error(err: &ScreenCaptureError) -> bool {
    err.details().contains_key("error_code")
}

/// Backend issuing one XCB `GetImage` request per grab.
///
/// Works against any X connection, including remote ones, at the cost
/// of a full pixel copy through the wire.
pub struct XGetImageBackend {
    core: XcbCore,
}

impl XGetImageBackend {
    pub(crate) fn open(display: Option<&str>, with_cursor: bool) -> Result<Self> {
        Ok(Self {
            core: XcbCore::connect(display, with_cursor)?,
        })
    }
}

impl CaptureBackend for XGetImageBackend {
    fn monitors(&mut self) -> Result<MonitorList> {
        self.core.monitors()
    }

    fn grab(&mut self, region: &Monitor) -> Result<Screenshot> {
        self.core.grab_get_image(region)
    }

    fn cursor(&mut self) -> Result<Option<Screenshot>> {
        self.core.cursor()
    }

    fn close(&mut self) {
        // Dropping the connection releases everything server-side.
    }
}
