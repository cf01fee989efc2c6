use bunch_counter::{
    BoundingBox, BunchClass, CountingEngine, Detection, EngineConfig, EngineError, EngineState,
};

const LINE_Y: u32 = 240;
const FRAME_HEIGHT: u32 = 480;

fn running_engine() -> CountingEngine {
    let mut engine = CountingEngine::new(EngineConfig {
        confidence_threshold: 0.5,
        line_y: Some(LINE_Y),
        tracking_distance: 80,
        crossing_tolerance: 5.0,
        cooldown_frames: 30,
        ..EngineConfig::default()
    })
    .expect("valid config");
    engine.start().expect("start");
    engine
}

fn ripe_on_line() -> Detection {
    Detection::new(0, 0.9, BoundingBox::new(100.0, 235.0, 140.0, 245.0))
}

fn bunch_at(class_id: i64, center_x: f32, center_y: f32) -> Detection {
    Detection::new(
        class_id,
        0.9,
        BoundingBox::new(center_x - 20.0, center_y - 5.0, center_x + 20.0, center_y + 5.0),
    )
}

fn empty_frames(engine: &mut CountingEngine, n: u64) {
    for _ in 0..n {
        engine.process_frame(&[], FRAME_HEIGHT);
    }
}

#[test]
fn conveyor_scenario_counts_once_then_again_after_cooldown() {
    let mut engine = running_engine();

    let frame1 = engine.process_frame(&[], FRAME_HEIGHT);
    assert_eq!(frame1.frame_number, 1);
    assert_eq!(frame1.suitable_count, 0);
    assert!(frame1.count_delta().is_none());

    let frame2 = engine.process_frame(&[ripe_on_line()], FRAME_HEIGHT);
    assert_eq!(frame2.suitable_count, 1);
    let delta = frame2.count_delta().expect("delta on frame 2");
    assert_eq!(delta.class, BunchClass::Suitable);
    assert_eq!(delta.new_total, 1);
    assert_eq!(frame2.line_y, Some(240));

    let frame3 = engine.process_frame(&[ripe_on_line()], FRAME_HEIGHT);
    assert_eq!(frame3.suitable_count, 1);
    assert!(frame3.count_deltas.is_empty());
    assert_eq!(frame3.annotated.len(), 1);
    assert!(!frame3.annotated[0].counted);

    empty_frames(&mut engine, 36);
    let frame40 = engine.process_frame(&[ripe_on_line()], FRAME_HEIGHT);
    assert_eq!(frame40.frame_number, 40);
    assert_eq!(frame40.suitable_count, 2);
    assert_eq!(frame40.count_delta().map(|d| d.new_total), Some(2));
}

#[test]
fn reappearance_inside_cooldown_is_not_counted() {
    let mut engine = running_engine();
    engine.process_frame(&[ripe_on_line()], FRAME_HEIGHT);
    empty_frames(&mut engine, 10);
    let again = engine.process_frame(&[ripe_on_line()], FRAME_HEIGHT);
    assert!(again.count_deltas.is_empty());
    assert_eq!(engine.counters().suitable, 1);
}

#[test]
fn nothing_counts_outside_the_band() {
    let mut engine = running_engine();
    for frame in 0..200u32 {
        let y = (frame * 7 % 480) as f32;
        let y = if (y - 240.0).abs() < 5.0 { y + 10.0 } else { y };
        let detections = [bunch_at(0, 100.0, y), bunch_at(1, 400.0, 480.0 - y)];
        let result = engine.process_frame(&detections, FRAME_HEIGHT);
        assert!(result.count_deltas.is_empty());
    }
    assert_eq!(engine.counters().total(), 0);
}

#[test]
fn band_edges_are_exclusive() {
    let mut engine = running_engine();
    let at_edges = [bunch_at(0, 100.0, 235.0), bunch_at(1, 300.0, 245.0)];
    engine.process_frame(&at_edges, FRAME_HEIGHT);
    assert_eq!(engine.counters().total(), 0);

    let inside = [bunch_at(0, 500.0, 235.5)];
    engine.process_frame(&inside, FRAME_HEIGHT);
    assert_eq!(engine.counters().suitable, 1);
}

#[test]
fn duplicate_signature_in_one_frame_counts_once() {
    let mut engine = running_engine();
    // Same class, same 80px region, both on the line, different rounded rows.
    let detections = [bunch_at(0, 100.0, 239.0), bunch_at(0, 150.0, 241.0)];
    let result = engine.process_frame(&detections, FRAME_HEIGHT);
    assert_eq!(result.count_deltas.len(), 1);
    assert_eq!(result.annotated.len(), 2);
    assert_eq!(engine.counters().suitable, 1);
}

#[test]
fn distinct_regions_and_classes_count_in_the_same_frame() {
    let mut engine = running_engine();
    let detections = [
        bunch_at(0, 100.0, 240.0),
        bunch_at(0, 300.0, 240.0),
        bunch_at(1, 100.0, 240.0),
    ];
    let result = engine.process_frame(&detections, FRAME_HEIGHT);
    assert_eq!(result.count_deltas.len(), 3);
    assert_eq!(result.suitable_count, 2);
    assert_eq!(result.unsuitable_count, 1);
    assert_eq!(result.count_delta().map(|d| d.class), Some(BunchClass::Unsuitable));
}

#[test]
fn low_confidence_is_neither_counted_nor_annotated() {
    let mut engine = running_engine();
    let faint = Detection::new(0, 0.3, BoundingBox::new(100.0, 235.0, 140.0, 245.0));
    let result = engine.process_frame(&[faint], FRAME_HEIGHT);
    assert!(result.annotated.is_empty());
    assert_eq!(engine.counters().total(), 0);
}

#[test]
fn unknown_class_is_annotated_but_not_counted() {
    let mut engine = running_engine();
    let result = engine.process_frame(&[bunch_at(7, 100.0, 240.0)], FRAME_HEIGHT);
    assert_eq!(result.annotated.len(), 1);
    assert!(result.count_deltas.is_empty());
    assert_eq!(engine.counters().total(), 0);
}

#[test]
fn degenerate_box_is_rejected_without_aborting_the_frame() {
    let mut engine = running_engine();
    let broken = Detection::new(0, 0.9, BoundingBox::new(140.0, 235.0, 100.0, 245.0));
    let result = engine.process_frame(&[broken, bunch_at(1, 300.0, 240.0)], FRAME_HEIGHT);
    assert_eq!(result.rejected.len(), 1);
    assert_eq!(result.rejected[0].index, 0);
    assert!(matches!(
        result.rejected[0].error,
        EngineError::InvalidDetection(_)
    ));
    assert_eq!(result.unsuitable_count, 1);
}

#[test]
fn counters_never_decrease_until_stop_resets_them() {
    let mut engine = running_engine();
    let mut last_total = 0;
    for frame in 0..300u32 {
        let x = (frame % 8) as f32 * 80.0 + 40.0;
        let class = (frame % 2) as i64;
        let y = if frame % 3 == 0 { 240.0 } else { 100.0 };
        engine.process_frame(&[bunch_at(class, x, y)], FRAME_HEIGHT);
        let total = engine.counters().total();
        assert!(total >= last_total);
        last_total = total;
    }
    assert!(last_total > 0);

    let summary = engine.stop().expect("stop");
    assert_eq!(summary.suitable_count + summary.unsuitable_count, last_total);
    assert_eq!(summary.frames_processed, 300);
    assert_eq!(engine.state(), EngineState::Stopped);
    assert_eq!(engine.counters().total(), 0);
    assert_eq!(engine.frame_count(), 0);
    assert_eq!(engine.previous_object_count(), 0);
    assert_eq!(engine.cooldown_entries(), 0);
}

#[test]
fn frames_while_paused_change_nothing() {
    let mut engine = running_engine();
    engine.process_frame(&[bunch_at(0, 100.0, 100.0)], FRAME_HEIGHT);
    engine.pause().expect("pause");

    let paused = engine.process_frame(&[ripe_on_line()], FRAME_HEIGHT);
    assert!(!paused.processed);
    assert_eq!(paused.frame_number, 1);
    assert_eq!(engine.frame_count(), 1);
    assert_eq!(engine.previous_object_count(), 1);
    assert_eq!(engine.counters().total(), 0);

    engine.resume().expect("resume");
    let resumed = engine.process_frame(&[bunch_at(0, 100.0, 100.0)], FRAME_HEIGHT);
    assert!(resumed.processed);
    assert_eq!(resumed.frame_number, 2);
    assert_eq!(engine.counters().total(), 0);
}

#[test]
fn idle_sweep_empties_cooldowns_by_frame_100() {
    let mut engine = running_engine();
    engine.process_frame(&[ripe_on_line()], FRAME_HEIGHT);
    assert_eq!(engine.cooldown_entries(), 1);

    for _ in 0..150 {
        engine.process_frame(&[], FRAME_HEIGHT);
        if engine.frame_count() == 99 {
            assert_eq!(engine.cooldown_entries(), 1);
        }
        if engine.frame_count() >= 100 {
            assert_eq!(engine.cooldown_entries(), 0);
        }
    }
    assert_eq!(engine.frame_count(), 151);
}

#[test]
fn lifecycle_rejects_invalid_transitions() {
    let mut engine = CountingEngine::new(EngineConfig::default()).expect("config");
    assert_eq!(engine.state(), EngineState::Idle);
    assert!(matches!(
        engine.pause(),
        Err(EngineError::InvalidTransition { .. })
    ));
    assert!(engine.stop().is_err());

    engine.start().expect("start");
    assert!(engine.start().is_err());
    engine.pause().expect("pause");
    assert!(engine.pause().is_err());
    engine.resume().expect("resume");
    engine.stop().expect("stop");
    assert!(engine.resume().is_err());
    engine.reset().expect("reset");
    assert_eq!(engine.state(), EngineState::Idle);
    engine.start().expect("restart");
    assert_eq!(engine.state(), EngineState::Running);
}

#[test]
fn invalid_configuration_fails_at_construction() {
    for cfg in [
        EngineConfig {
            tracking_distance: 0,
            ..EngineConfig::default()
        },
        EngineConfig {
            cooldown_frames: 0,
            ..EngineConfig::default()
        },
        EngineConfig {
            confidence_threshold: 1.2,
            ..EngineConfig::default()
        },
    ] {
        assert!(matches!(
            CountingEngine::new(cfg),
            Err(EngineError::Configuration(_))
        ));
    }
}
