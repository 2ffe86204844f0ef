//! MIT-SHM fast path with automatic XGetImage fallback.
//!
//! The segment is created once, sized for the whole root (virtual
//! monitor), and reused for every grab. FD-passing attach requires
//! MIT-SHM 1.2; anything older, and any runtime SHM failure before the
//! first successful capture, drops the backend down to the plain
//! GetImage path and records why.

use std::os::fd::{FromRawFd, OwnedFd};

use log::{debug, warn};
use x11rb::connection::{Connection, RequestConnection};
use x11rb::protocol::shm::{self, ConnectionExt as _, Seg};
use x11rb::protocol::xproto::ImageFormat;

use crate::error::{Result, ScreenCaptureError};
use crate::monitor::{Monitor, MonitorList};
use crate::screenshot::Screenshot;

use super::xcb::{connection_error, is_x11_error, reply_error, XcbCore};
use super::{ensure_grabbable, CaptureBackend, BYTES_PER_PIXEL};

const ALL_PLANES: u32 = !0;

/// Availability of the MIT-SHM transport for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShmStatus {
    /// The probe succeeded but no capture has gone through yet.
    Unknown,
    /// At least one ShmGetImage has succeeded.
    Available,
    /// SHM is unusable; every grab uses GetImage. The reason is kept in
    /// [`XShmBackend::shm_fallback_reason`].
    Unavailable,
}

struct ShmSegment {
    shmseg: Seg,
    addr: *mut libc::c_void,
    size: usize,
}

// The mapping is only touched under the session lock.
unsafe impl Send for ShmSegment {}

/// Default Linux backend: XShmGetImage with a GetImage escape hatch.
pub struct XShmBackend {
    core: XcbCore,
    segment: Option<ShmSegment>,
    status: ShmStatus,
    fallback_reason: Option<String>,
}

impl XShmBackend {
    pub(crate) fn open(display: Option<&str>, with_cursor: bool) -> Result<Self> {
        let core = XcbCore::connect(display, with_cursor)?;
        let mut backend = Self {
            core,
            segment: None,
            status: ShmStatus::Unknown,
            fallback_reason: None,
        };
        if let Err(reason) = backend.setup_shm() {
            backend.disable_shm(reason.message().to_owned());
        }
        Ok(backend)
    }

    pub fn shm_status(&self) -> ShmStatus {
        self.status
    }

    /// Why SHM was abandoned, when it was.
    pub fn shm_fallback_reason(&self) -> Option<&str> {
        self.fallback_reason.as_deref()
    }

    /// Probe the extension and wire up the segment. Every failure here
    /// is non-fatal: the backend simply runs on GetImage.
    fn setup_shm(&mut self) -> std::result::Result<(), ScreenCaptureError> {
        let conn = self.core.conn();

        if conn
            .extension_information(shm::X11_EXTENSION_NAME)
            .ok()
            .flatten()
            .is_none()
        {
            return Err(ScreenCaptureError::shm_unavailable(
                "MIT-SHM extension not present",
            ));
        }

        let version = conn
            .shm_query_version()
            .map_err(|e| connection_error("ShmQueryVersion", e))?
            .reply()
            .map_err(|e| reply_error("ShmQueryVersion", e))?;
        if (version.major_version, version.minor_version) < (1, 2) {
            return Err(ScreenCaptureError::shm_unavailable(format!(
                "MIT-SHM {}.{} too old for FD attach (need 1.2)",
                version.major_version, version.minor_version
            )));
        }

        // Large enough for the whole virtual monitor, so resizes and
        // sub-rectangle grabs never need a new segment.
        let (root_w, root_h) = self.core.root_size();
        let size = root_w as usize * root_h as usize * BYTES_PER_PIXEL;

        let fd = unsafe {
            libc::memfd_create(
                c"sct-shm-buf".as_ptr(),
                libc::MFD_CLOEXEC,
            )
        };
        if fd < 0 {
            return Err(ScreenCaptureError::shm_unavailable(format!(
                "memfd_create failed: errno {}",
                std::io::Error::last_os_error()
            )));
        }

        if unsafe { libc::ftruncate(fd, size as libc::off_t) } != 0 {
            let err = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(ScreenCaptureError::shm_unavailable(format!(
                "ftruncate failed: {err}"
            )));
        }

        let addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            let err = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(ScreenCaptureError::shm_unavailable(format!(
                "mmap failed: {err}"
            )));
        }

        let shmseg: Seg = match conn.generate_id() {
            Ok(id) => id,
            Err(e) => {
                unsafe { libc::munmap(addr, size) };
                unsafe { libc::close(fd) };
                return Err(ScreenCaptureError::shm_unavailable(format!(
                    "cannot allocate XID: {e}"
                )));
            }
        };

        // The attach consumes the fd; the server writes into the
        // mapping, so it must not be attached read-only.
        let owned = unsafe { OwnedFd::from_raw_fd(fd) };
        let attach = conn
            .shm_attach_fd(shmseg, owned, false)
            .map_err(|e| connection_error("ShmAttachFd", e))
            .and_then(|cookie| cookie.check().map_err(|e| reply_error("ShmAttachFd", e)));
        if let Err(err) = attach {
            unsafe { libc::munmap(addr, size) };
            return Err(ScreenCaptureError::shm_unavailable(format!(
                "cannot attach MIT-SHM segment: {err}"
            )));
        }

        debug!("MIT-SHM segment attached ({size} bytes)");
        self.segment = Some(ShmSegment { shmseg, addr, size });
        Ok(())
    }

    fn disable_shm(&mut self, reason: String) {
        warn!("falling back to XGetImage: {reason}");
        self.release_segment();
        self.status = ShmStatus::Unavailable;
        self.fallback_reason = Some(reason);
    }

    fn release_segment(&mut self) {
        if let Some(seg) = self.segment.take() {
            // Best effort; the server detaches on disconnect anyway.
            if let Ok(cookie) = self.core.conn().shm_detach(seg.shmseg) {
                let _ = cookie.check();
            }
            unsafe { libc::munmap(seg.addr, seg.size) };
        }
    }

    fn grab_shm(&self, region: &Monitor) -> Result<Screenshot> {
        let seg = self
            .segment
            .as_ref()
            .ok_or_else(|| ScreenCaptureError::shm_unavailable("segment was released"))?;

        self.core
            .conn()
            .shm_get_image(
                self.core.root(),
                region.left as i16,
                region.top as i16,
                region.width as u16,
                region.height as u16,
                ALL_PLANES,
                u8::from(ImageFormat::Z_PIXMAP),
                seg.shmseg,
                0,
            )
            .map_err(|e| connection_error("ShmGetImage", e))?
            .reply()
            .map_err(|e| reply_error("ShmGetImage", e))?;

        // Snapshot the server-written prefix of the mapping.
        let expected = region.width as usize * region.height as usize * BYTES_PER_PIXEL;
        let data = unsafe { std::slice::from_raw_parts(seg.addr as *const u8, expected) }.to_vec();
        Screenshot::new(data, region)
    }
}

impl CaptureBackend for XShmBackend {
    fn monitors(&mut self) -> Result<MonitorList> {
        self.core.monitors()
    }

    fn grab(&mut self, region: &Monitor) -> Result<Screenshot> {
        ensure_grabbable(region)?;

        let required = region.width as usize * region.height as usize * BYTES_PER_PIXEL;
        let fits = self.segment.as_ref().is_some_and(|seg| required <= seg.size);
        if self.status == ShmStatus::Unavailable || !fits {
            // Oversized requests stay on the wire path; the segment
            // remains sized for the virtual monitor.
            return self.core.grab_get_image(region);
        }

        match self.grab_shm(region) {
            Ok(shot) => {
                self.status = ShmStatus::Available;
                Ok(shot)
            }
            Err(err) if self.status == ShmStatus::Unknown && is_x11_error(&err) => {
                // SHM never worked on this connection. Check whether the
                // request itself was bad by retrying through GetImage:
                // if that also fails, the error propagates untouched and
                // the SHM verdict stays open.
                let shot = self.core.grab_get_image(region)?;
                self.disable_shm(format!("MIT-SHM GetImage failed: {err}"));
                Ok(shot)
            }
            Err(err) => Err(err),
        }
    }

    fn cursor(&mut self) -> Result<Option<Screenshot>> {
        self.core.cursor()
    }

    fn close(&mut self) {
        self.release_segment();
    }
}

impl Drop for XShmBackend {
    fn drop(&mut self) {
        self.release_segment();
    }
}
