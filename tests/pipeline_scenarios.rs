use std::path::Path;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use impurity_watch::config::InspectorConfig;
use impurity_watch::control;
use impurity_watch::ingest::synthetic::{render_scene, Stone};
use impurity_watch::{
    quality_score, Frame, FrameSource, Pipeline, SessionEnd, SourceOptions, VideoSource,
};

fn config(root: &Path) -> InspectorConfig {
    let mut cfg = InspectorConfig::default();
    cfg.alert.detections_dir = root.join("detections");
    cfg.alert.log_path = root.join("impurity_log.txt");
    cfg
}

fn clean_frame(seed: u64) -> Frame {
    Frame::from_rgb(render_scene(seed, &[]))
}

fn dirty_frame(seed: u64) -> Frame {
    Frame::from_rgb(render_scene(
        seed,
        &[Stone::square(200, 330, 24), Stone::rect(470, 140, 26, 16)],
    ))
}

fn lines_with_prefix<'a>(out: &'a str, prefix: &'a str) -> impl Iterator<Item = &'a str> {
    out.lines().filter_map(move |line| line.strip_prefix(prefix))
}

#[test]
fn debounce_alerts_on_third_frame_and_after_a_clean_frame() {
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = Pipeline::new(&config(dir.path()), Vec::new());
    let start = Instant::now();

    let script = [true, true, true, false, true, true, true];
    let mut alert_frames = Vec::new();
    for (i, dirty) in script.iter().enumerate() {
        let frame = if *dirty {
            dirty_frame(i as u64)
        } else {
            clean_frame(i as u64)
        };
        let outcome = pipeline.process_frame(&frame, start + Duration::from_millis(100 * i as u64));
        assert_eq!(outcome.report.count() > 0, *dirty, "frame {}", i + 1);
        if outcome.alert.is_some() {
            alert_frames.push(i + 1);
        }
    }
    assert_eq!(alert_frames, vec![3, 7]);

    let snapshots = std::fs::read_dir(dir.path().join("detections"))
        .unwrap()
        .count();
    // Both alerts can land in the same wall-clock second and share a name.
    assert!((1..=2).contains(&snapshots));
    let log = std::fs::read_to_string(dir.path().join("impurity_log.txt")).unwrap();
    assert_eq!(log.lines().count(), 2);
    assert!(log
        .lines()
        .all(|line| line.ends_with("- ALERT - 2 impurities detected")));
}

#[test]
fn frame_records_are_capped_at_five_per_second() {
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = Pipeline::new(&config(dir.path()), Vec::new());
    let start = Instant::now();
    let frame = clean_frame(1);

    // 50 frames over two seconds, 40 ms apart.
    for i in 0..50u64 {
        pipeline.process_frame(&frame, start + Duration::from_millis(40 * i));
    }
    let out = String::from_utf8(pipeline.into_output()).unwrap();

    assert!(out
        .lines()
        .all(|l| l.starts_with("DATA:") || l.starts_with("FRAME:")));

    let mut frame_times = Vec::new();
    let mut data_seen = 0u64;
    for line in out.lines() {
        if line.starts_with("DATA:") {
            data_seen += 1;
        } else if line.starts_with("FRAME:") {
            // A FRAME line precedes the DATA line of the same frame.
            frame_times.push(40 * data_seen);
        }
    }
    assert_eq!(data_seen, 50);
    for window_start in (0..2000).step_by(40) {
        let in_window = frame_times
            .iter()
            .filter(|t| **t >= window_start && **t < window_start + 1000)
            .count();
        assert!(in_window <= 5, "{} frames in window at {}", in_window, window_start);
    }
    assert!(frame_times.len() >= 9);
}

#[test]
fn frame_payload_is_a_640x480_jpeg() {
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = Pipeline::new(&config(dir.path()), Vec::new());
    pipeline.process_frame(&dirty_frame(3), Instant::now());
    let out = String::from_utf8(pipeline.into_output()).unwrap();

    let payload = lines_with_prefix(&out, "FRAME:").next().expect("frame line");
    let jpeg = STANDARD.decode(payload).expect("standard base64");
    assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    let decoded = image::load_from_memory(&jpeg).expect("jpeg");
    assert_eq!((decoded.width(), decoded.height()), (640, 480));
}

#[test]
fn data_records_follow_calibration_and_quality_formula() {
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = Pipeline::new(&config(dir.path()), Vec::new());
    let start = Instant::now();
    for i in 0..4u64 {
        let frame = if i % 2 == 0 { clean_frame(i) } else { dirty_frame(i) };
        pipeline.process_frame(&frame, start + Duration::from_millis(50 * i));
    }
    let out = String::from_utf8(pipeline.into_output()).unwrap();

    let records: Vec<serde_json::Value> = lines_with_prefix(&out, "DATA:")
        .map(|json| serde_json::from_str(json).expect("valid json"))
        .collect();
    assert_eq!(records.len(), 4);
    for record in &records {
        let count = record["impurities_count"].as_u64().unwrap() as usize;
        assert_eq!(record["quality_score"].as_u64().unwrap(), quality_score(count) as u64);
        assert_eq!(record["detections"].as_array().unwrap().len(), count);
        assert!(record["background_intensity"].as_f64().unwrap() > 0.0);
        let expected_status = if count == 0 { "CLEAN" } else { "CONTAMINATION DETECTED" };
        assert_eq!(record["status"], expected_status);
    }
    assert_eq!(records[1]["impurities_count"], 2);
    assert_eq!(records[1]["stability"], 1);
    assert_eq!(records[2]["stability"], 0);
    for detection in records[1]["detections"].as_array().unwrap() {
        let confidence = detection["confidence"].as_u64().unwrap();
        assert!((40..=90).contains(&confidence));
        assert!(detection["area"].as_u64().unwrap() >= 100);
        assert!(detection["darkness_diff"].as_f64().unwrap() >= 10.0);
    }
}

#[test]
fn image_directory_runs_to_end_of_stream() {
    let dir = tempfile::tempdir().unwrap();
    let frames_dir = dir.path().join("frames");
    std::fs::create_dir_all(&frames_dir).unwrap();
    render_scene(0, &[])
        .save(frames_dir.join("frame_00.png"))
        .unwrap();
    for i in 1..=5u64 {
        render_scene(i, &[Stone::square(200, 330, 24)])
            .save(frames_dir.join(format!("frame_{:02}.png", i)))
            .unwrap();
    }

    let cfg = config(dir.path());
    let mut source =
        VideoSource::open(frames_dir.to_str().unwrap(), &SourceOptions::default()).unwrap();
    source.connect().unwrap();
    let (_tx, rx) = control::channel();
    let mut pipeline = Pipeline::new(&cfg, Vec::new());

    let summary = pipeline.run(&mut source, &rx).unwrap();
    assert_eq!(summary.end, SessionEnd::EndOfStream);
    assert_eq!(summary.frames_processed, 6);
    assert_eq!(summary.alerts, 1);
    assert!(!source.is_healthy());

    let log = std::fs::read_to_string(&cfg.alert.log_path).unwrap();
    assert_eq!(log.lines().count(), 1);
    let out = String::from_utf8(pipeline.into_output()).unwrap();
    assert_eq!(lines_with_prefix(&out, "DATA:").count(), 6);
}

#[test]
fn synthetic_source_session_terminates_on_command() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let mut source = VideoSource::open("stub://belt", &SourceOptions::default()).unwrap();
    source.connect().unwrap();

    let (tx, rx) = control::channel();
    tx.send(control::ControlCommand::Recalibrate).unwrap();
    tx.send(control::ControlCommand::Terminate).unwrap();
    let mut pipeline = Pipeline::new(&cfg, Vec::new());
    let summary = pipeline.run(&mut source, &rx).unwrap();
    assert_eq!(summary.end, SessionEnd::Terminated);
    assert_eq!(summary.frames_processed, 0);
    assert!(pipeline.session().profile().is_none());
}
