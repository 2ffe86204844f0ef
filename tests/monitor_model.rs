use sct::{virtual_monitor, Monitor, MonitorList};

#[test]
fn virtual_entry_is_the_bounding_box() {
    let physical = vec![
        Monitor::new(0, 0, 1920, 1080),
        Monitor::new(1920, -120, 2560, 1440),
        Monitor::new(-1024, 300, 1024, 768),
    ];
    let list = MonitorList::build(physical.clone(), None);

    let all = list.monitors()[0];
    assert_eq!(all, virtual_monitor(&physical));
    // left edge -1024, right edge 1920 + 2560; top edge -120, bottom
    // edge -120 + 1440.
    assert_eq!(all, Monitor::new(-1024, -120, 5504, 1440));
}

#[test]
fn virtual_monitor_area_dominates_every_physical_area() {
    let physical = vec![
        Monitor::new(0, 0, 800, 600),
        Monitor::new(800, 0, 1920, 1200),
        Monitor::new(-640, -480, 640, 480),
    ];
    let list = MonitorList::build(physical, None);
    let monitors = list.monitors();
    let all_area = u64::from(monitors[0].width) * u64::from(monitors[0].height);
    for m in &monitors[1..] {
        assert!(all_area >= u64::from(m.width) * u64::from(m.height));
    }
}

#[test]
fn physical_order_is_preserved_after_the_virtual_entry() {
    let physical = vec![
        Monitor::new(100, 0, 640, 480),
        Monitor::new(0, 0, 800, 600),
    ];
    let list = MonitorList::build(physical.clone(), None);
    assert_eq!(&list.monitors()[1..], &physical[..]);
}

#[test]
fn bbox_constructor_round_trips_through_edges() {
    let m = Monitor::from_bbox(-10, -20, 90, 40);
    assert_eq!((m.left, m.top, m.width, m.height), (-10, -20, 100, 60));
    assert_eq!((m.right(), m.bottom()), (90, 40));
}

#[test]
fn serde_schema_is_exactly_four_fields() {
    let m = Monitor::new(-5, 10, 640, 480);
    let json = serde_json::to_value(&m).unwrap();
    assert_eq!(
        json,
        serde_json::json!({"left": -5, "top": 10, "width": 640, "height": 480})
    );
    let back: Monitor = serde_json::from_value(json).unwrap();
    assert_eq!(back, m);
}
