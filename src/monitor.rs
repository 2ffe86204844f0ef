//! Monitor geometry and the virtual-monitor model.
//!
//! A monitor list always has 1 + N entries: index 0 is the virtual
//! monitor (the bounding box of every physical monitor), indices 1..N
//! are the physical monitors in the order the OS reported them.

use serde::{Deserialize, Serialize};

/// An axis-aligned display rectangle in global screen coordinates.
///
/// `left`/`top` may be negative: secondary monitors can sit left of or
/// above the primary. This exact four-field shape is the public schema
/// returned by `Session::monitors`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Monitor {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

impl Monitor {
    pub fn new(left: i32, top: i32, width: u32, height: u32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// Build a monitor from a `(left, top, right, bottom)` bounding box.
    ///
    /// Coordinates with `right <= left` or `bottom <= top` produce a
    /// zero-sized rectangle, which `grab` rejects.
    pub fn from_bbox(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            width: (right - left).max(0) as u32,
            height: (bottom - top).max(0) as u32,
        }
    }

    pub fn right(&self) -> i32 {
        self.left + self.width as i32
    }

    pub fn bottom(&self) -> i32 {
        self.top + self.height as i32
    }

    pub fn has_area(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// Compute the axis-aligned bounding box of a set of physical monitors.
///
/// Rotation must already have been applied by the backend, so the
/// arithmetic here only ever sees final rectangles.
pub fn virtual_monitor(physical: &[Monitor]) -> Monitor {
    let mut iter = physical.iter();
    let Some(first) = iter.next() else {
        return Monitor::new(0, 0, 0, 0);
    };

    let mut left = first.left;
    let mut top = first.top;
    let mut right = first.right();
    let mut bottom = first.bottom();
    for m in iter {
        left = left.min(m.left);
        top = top.min(m.top);
        right = right.max(m.right());
        bottom = bottom.max(m.bottom());
    }

    Monitor::from_bbox(left, top, right, bottom)
}

/// The ordered monitor list a backend reports, with the virtual monitor
/// synthesised at index 0 and the OS primary (if known) annotated.
#[derive(Debug, Clone)]
pub struct MonitorList {
    monitors: Vec<Monitor>,
    primary: Option<usize>,
}

impl MonitorList {
    /// Build the list from physical monitors in OS-reported order.
    ///
    /// `primary` is the zero-based index into `physical` of the monitor
    /// the OS marks as primary, when the platform reports one.
    pub fn build(physical: Vec<Monitor>, primary: Option<usize>) -> Self {
        let mut monitors = Vec::with_capacity(physical.len() + 1);
        monitors.push(virtual_monitor(&physical));
        monitors.extend(physical);
        // Shift past the virtual entry.
        let primary = primary.map(|idx| idx + 1);
        Self { monitors, primary }
    }

    pub fn monitors(&self) -> &[Monitor] {
        &self.monitors
    }

    pub fn get(&self, index: usize) -> Option<&Monitor> {
        self.monitors.get(index)
    }

    /// Number of entries including the virtual monitor.
    pub fn len(&self) -> usize {
        self.monitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.monitors.is_empty()
    }

    /// The OS-designated primary monitor, falling back to the first
    /// physical monitor; `None` when no physical monitor is attached.
    pub fn primary(&self) -> Option<&Monitor> {
        if self.monitors.len() <= 1 {
            return None;
        }
        self.primary
            .and_then(|idx| self.monitors.get(idx))
            .or_else(|| self.monitors.get(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_monitor_of_single_display_is_identity() {
        let only = Monitor::new(0, 0, 1920, 1080);
        assert_eq!(virtual_monitor(&[only]), only);
    }

    #[test]
    fn virtual_monitor_spans_negative_origins() {
        // Secondary sits left of and above the primary.
        let physical = [
            Monitor::new(0, 0, 1920, 1080),
            Monitor::new(-1280, -24, 1280, 1024),
        ];
        let all = virtual_monitor(&physical);
        assert_eq!(all, Monitor::new(-1280, -24, 3200, 1104));
    }

    #[test]
    fn virtual_monitor_of_nothing_is_zero() {
        assert_eq!(virtual_monitor(&[]), Monitor::new(0, 0, 0, 0));
    }

    #[test]
    fn list_places_virtual_entry_first() {
        let list = MonitorList::build(vec![Monitor::new(0, 0, 1920, 1080)], None);
        assert_eq!(list.len(), 2);
        assert_eq!(list.monitors()[0], list.monitors()[1]);
    }

    #[test]
    fn virtual_area_bounds_every_physical_monitor() {
        let physical = vec![
            Monitor::new(0, 0, 1920, 1080),
            Monitor::new(1920, 200, 1280, 720),
            Monitor::new(-640, 0, 640, 480),
        ];
        let list = MonitorList::build(physical.clone(), None);
        let all = list.monitors()[0];
        for m in &physical {
            assert!((all.width * all.height) >= m.width * m.height);
            assert!(all.left <= m.left && all.top <= m.top);
            assert!(all.right() >= m.right() && all.bottom() >= m.bottom());
        }
    }

    #[test]
    fn primary_prefers_annotation_then_first_physical() {
        let physical = vec![
            Monitor::new(-1280, 0, 1280, 1024),
            Monitor::new(0, 0, 1920, 1080),
        ];
        let annotated = MonitorList::build(physical.clone(), Some(1));
        assert_eq!(annotated.primary(), Some(&Monitor::new(0, 0, 1920, 1080)));

        let unannotated = MonitorList::build(physical, None);
        assert_eq!(
            unannotated.primary(),
            Some(&Monitor::new(-1280, 0, 1280, 1024))
        );

        let empty = MonitorList::build(Vec::new(), None);
        assert!(empty.primary().is_none());
    }

    #[test]
    fn from_bbox_clamps_inverted_boxes() {
        let m = Monitor::from_bbox(10, 20, 110, 70);
        assert_eq!(m, Monitor::new(10, 20, 100, 50));
        assert!(!Monitor::from_bbox(10, 10, 10, 40).has_area());
    }
}
