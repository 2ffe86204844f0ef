use sct::save::resolve_template;
use sct::{Monitor, DEFAULT_DATE_FORMAT, DEFAULT_TEMPLATE};

#[test]
fn monitor_template_resolves_dimensions() {
    let monitor = Monitor::new(0, 0, 1920, 1080);
    assert_eq!(
        resolve_template(
            "sct-{mon}-{width}x{height}.png",
            1,
            &monitor,
            DEFAULT_DATE_FORMAT
        ),
        "sct-1-1920x1080.png"
    );
}

#[test]
fn default_template_numbers_monitors() {
    let monitor = Monitor::new(0, 0, 640, 480);
    assert_eq!(
        resolve_template(DEFAULT_TEMPLATE, 2, &monitor, DEFAULT_DATE_FORMAT),
        "monitor-2.png"
    );
}

#[test]
fn geometry_placeholders_keep_signs() {
    let monitor = Monitor::new(-1280, -24, 1280, 1024);
    assert_eq!(
        resolve_template(
            "sct-{top}x{left}_{width}x{height}.png",
            0,
            &monitor,
            DEFAULT_DATE_FORMAT
        ),
        "sct--24x-1280_1280x1024.png"
    );
}

#[test]
fn literal_text_passes_through_untouched() {
    let monitor = Monitor::new(0, 0, 1, 1);
    assert_eq!(
        resolve_template("plain-name.png", 9, &monitor, DEFAULT_DATE_FORMAT),
        "plain-name.png"
    );
}

#[test]
fn date_placeholder_is_expanded() {
    let monitor = Monitor::new(0, 0, 1, 1);
    let resolved = resolve_template("shot-{date}.png", 0, &monitor, "%Y");
    assert!(resolved.starts_with("shot-2"), "unexpected: {resolved}");
    assert!(!resolved.contains("{date}"));
}
