mod common;

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use batch_detect::output::count_y4m_frames;
use batch_detect::{
    consume_video, is_complete, read_detections, run_batch, BackendRegistry, BatchProgress,
    CaptureOpener, DetectorBackend, DetectorConfig, Frame, Predictor, Proposal, RunConfig,
    SyntheticOpener, VideoCapture,
};
use common::Project;

fn load(project: &Project, overrides: &[&str]) -> RunConfig {
    let overrides: Vec<String> = overrides.iter().map(|s| s.to_string()).collect();
    RunConfig::load(
        Some(&project.path("settings.toml")),
        project.root(),
        &overrides,
    )
    .expect("load config")
}

fn predictor(cfg: &RunConfig) -> Predictor {
    let detector = Arc::new(cfg.detector_config().expect("detector config"));
    Predictor::new(detector, cfg.parallel, cfg.workers).expect("predictor")
}

fn run(cfg: &RunConfig, opener: &dyn CaptureOpener) -> Result<batch_detect::BatchSummary> {
    let mut predictor = predictor(cfg);
    run_batch(cfg, &mut predictor, opener, &mut BatchProgress::hidden())
}

#[test]
fn writes_one_document_per_video_covering_every_frame() {
    let project = Project::new(false);
    let cfg = load(&project, &[]);

    let summary = run(&cfg, &SyntheticOpener::new(3)).unwrap();
    assert_eq!(summary.total, 2);
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.skipped, 0);

    for (action, stem) in [("walk", "walk"), ("run", "run_01")] {
        let path = project.json_out(action, stem);
        let doc = read_detections(&path).expect("read document");
        let keys: Vec<u64> = doc.keys().copied().collect();
        assert_eq!(keys, vec![0, 1, 2]);
        for records in doc.values() {
            assert_eq!(records.len(), 1);
        }
    }
    assert!(!project.path("data/toy/unidet/detect/json/run/notes.json").exists());
}

#[test]
fn document_shape_is_box_score_class() {
    let project = Project::new(false);
    let cfg = load(&project, &[]);
    run(&cfg, &SyntheticOpener::new(3)).unwrap();

    let raw = std::fs::read_to_string(project.json_out("walk", "walk")).unwrap();
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    let object = value.as_object().expect("top-level object");
    let keys: Vec<&str> = object.keys().map(|k| k.as_str()).collect();
    assert_eq!(keys, vec!["0", "1", "2"]);

    for records in object.values() {
        let record = &records.as_array().unwrap()[0];
        let parts = record.as_array().unwrap();
        assert_eq!(parts.len(), 3);
        let bbox = parts[0].as_array().unwrap();
        assert_eq!(bbox.len(), 4);
        assert!(bbox.iter().all(|v| v.is_f64()));
        let score = parts[1].as_f64().unwrap();
        assert!((0.5..=1.0).contains(&score));
        assert!(parts[2].is_u64());
    }
}

#[test]
fn rerun_leaves_finished_outputs_untouched() {
    let project = Project::new(false);
    let cfg = load(&project, &[]);
    run(&cfg, &SyntheticOpener::new(3)).unwrap();

    // A marker document proves the file is not rewritten.
    let walk = project.json_out("walk", "walk");
    std::fs::write(&walk, "{}").unwrap();
    let run_doc = std::fs::read(project.json_out("run", "run_01")).unwrap();

    let summary = run(&cfg, &SyntheticOpener::new(5)).unwrap();
    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.processed, 0);
    assert_eq!(std::fs::read_to_string(&walk).unwrap(), "{}");
    assert_eq!(std::fs::read(project.json_out("run", "run_01")).unwrap(), run_doc);
}

#[test]
fn empty_or_missing_outputs_are_regenerated() {
    let project = Project::new(false);
    let cfg = load(&project, &[]);
    run(&cfg, &SyntheticOpener::new(3)).unwrap();

    std::fs::write(project.json_out("walk", "walk"), "").unwrap();
    std::fs::remove_file(project.json_out("run", "run_01")).unwrap();

    let summary = run(&cfg, &SyntheticOpener::new(4)).unwrap();
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.skipped, 0);
    for (action, stem) in [("walk", "walk"), ("run", "run_01")] {
        let doc = read_detections(&project.json_out(action, stem)).unwrap();
        assert_eq!(doc.len(), 4);
    }
}

#[test]
fn no_video_output_when_generation_disabled() {
    let project = Project::new(false);
    let cfg = load(&project, &[]);
    run(&cfg, &SyntheticOpener::new(2)).unwrap();
    assert!(!project.video_out_dir().exists());
}

#[test]
fn generated_videos_keep_every_frame() {
    let project = Project::new(true);
    let cfg = load(&project, &[]);
    run(&cfg, &SyntheticOpener::new(6)).unwrap();

    for (action, stem) in [("walk", "walk"), ("run", "run_01")] {
        let path = project
            .video_out_dir()
            .join(action)
            .join(format!("{}.y4m", stem));
        assert_eq!(count_y4m_frames(&path).unwrap(), 6);
    }
}

#[test]
fn parallel_run_matches_sequential_predictor() {
    let project = Project::new(false);
    let cfg = load(&project, &["parallel=true", "workers=3"]);
    run(&cfg, &SyntheticOpener::new(9)).unwrap();

    // Synthetic frames are seeded by path, so replaying the same inputs through
    // a single-threaded predictor must give identical documents.
    let mut sequential = predictor(&load(&project, &["parallel=false"]));
    for (action, stem) in [("walk", "walk"), ("run", "run_01")] {
        let doc = read_detections(&project.json_out(action, stem)).unwrap();
        assert_eq!(doc.len(), 9);

        let input = project.path(&format!("videos/{}/{}.mp4", action, stem));
        let mut capture = SyntheticOpener::new(9).open(&input).unwrap();
        let outcome = consume_video(
            &mut sequential,
            capture.as_mut(),
            false,
            &BatchProgress::hidden(),
        )
        .unwrap();
        assert_eq!(doc, outcome.detections);
    }
}

/// Fails on any path containing `poison`.
struct PoisonOpener {
    inner: SyntheticOpener,
    poison: &'static str,
}

impl CaptureOpener for PoisonOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn VideoCapture>> {
        if path.to_string_lossy().contains(self.poison) {
            return Err(anyhow!("decode error"));
        }
        self.inner.open(path)
    }
}

#[test]
fn failure_stops_the_run_without_partial_output() {
    let project = Project::new(false);
    let cfg = load(&project, &[]);
    let opener = PoisonOpener {
        inner: SyntheticOpener::new(3),
        poison: "walk",
    };

    let err = run(&cfg, &opener).unwrap_err();
    assert!(format!("{:#}", err).contains("decode error"));

    // "run" sorts before "walk" and was written; "walk" was not.
    assert!(project.json_out("run", "run_01").exists());
    assert!(!project.json_out("walk", "walk").exists());

    // Next run only redoes the failed video.
    let summary = run(&cfg, &SyntheticOpener::new(3)).unwrap();
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.processed, 1);
}

#[test]
fn video_writer_failure_leaves_the_video_pending() {
    let project = Project::new(true);
    let cfg = load(&project, &[]);
    // A plain file where the action's video directory should go.
    let blocker = project.video_out_dir().join("run");
    project.write("data/toy/unidet/detect/videos/run", "in the way");

    let err = run(&cfg, &SyntheticOpener::new(3)).unwrap_err();
    assert!(format!("{:#}", err).contains("run_01.y4m"), "{:#}", err);
    assert!(!is_complete(&project.json_out("run", "run_01")));

    std::fs::remove_file(&blocker).unwrap();
    let summary = run(&cfg, &SyntheticOpener::new(3)).unwrap();
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.skipped, 0);
    let video = project.video_out_dir().join("run").join("run_01.y4m");
    assert_eq!(count_y4m_frames(&video).unwrap(), 3);
}

#[test]
fn zero_frame_video_writes_empty_document_and_no_video() {
    let project = Project::new(true);
    let cfg = load(&project, &[]);

    let summary = run(&cfg, &SyntheticOpener::new(0)).unwrap();
    assert_eq!(summary.processed, 2);
    for (action, stem) in [("walk", "walk"), ("run", "run_01")] {
        let path = project.json_out(action, stem);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");
        assert!(read_detections(&path).unwrap().is_empty());
    }
    assert!(!project.video_out_dir().exists());

    let summary = run(&cfg, &SyntheticOpener::new(0)).unwrap();
    assert_eq!(summary.skipped, 2);
}

#[test]
fn video_at_input_root_is_labelled_with_the_root_name() {
    let project = Project::new(false);
    project.write("videos/top.mp4", "not really a video");
    let cfg = load(&project, &[]);

    let summary = run(&cfg, &SyntheticOpener::new(2)).unwrap();
    assert_eq!(summary.total, 3);
    let doc = read_detections(&project.json_out("videos", "top")).unwrap();
    assert_eq!(doc.len(), 2);
}

/// Fails every frame.
struct BrokenBackend;

impl DetectorBackend for BrokenBackend {
    fn name(&self) -> &'static str {
        "broken"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Proposal>> {
        Err(anyhow!("inference failed"))
    }
}

fn build_broken(_cfg: &DetectorConfig) -> Result<Box<dyn DetectorBackend>> {
    Ok(Box::new(BrokenBackend))
}

#[test]
fn pooled_detector_failure_stops_the_run() {
    let project = Project::new(false);
    let cfg = load(&project, &["parallel=true", "workers=2"]);
    let mut registry = BackendRegistry::with_builtin();
    registry.register("broken", build_broken);
    let detector = DetectorConfig {
        backend: "broken".to_string(),
        ..cfg.detector_config().unwrap()
    };
    let mut predictor =
        Predictor::with_registry(&registry, Arc::new(detector), cfg.parallel, cfg.workers).unwrap();

    let err = run_batch(
        &cfg,
        &mut predictor,
        &SyntheticOpener::new(5),
        &mut BatchProgress::hidden(),
    )
    .unwrap_err();
    assert!(format!("{:#}", err).contains("inference failed"));
    assert!(!project.json_out("run", "run_01").exists());
    assert!(!project.json_out("walk", "walk").exists());

    let summary = run(&cfg, &SyntheticOpener::new(5)).unwrap();
    assert_eq!(summary.processed, 2);
}
