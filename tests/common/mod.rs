#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// A throwaway project root:
///
/// ```text
/// settings.toml
/// videos/run/run_01.mp4
/// videos/run/notes.txt
/// videos/walk/walk.mp4
/// UniDet/configs/stub.json
/// UniDet/models/stub.bin
/// ```
pub struct Project {
    pub dir: TempDir,
}

impl Project {
    pub fn new(generate_videos: bool) -> Self {
        let dir = tempfile::tempdir().expect("temp project");
        let project = Self { dir };
        project.write(
            "settings.toml",
            &format!(
                r#"
[active]
dataset = "toy"
detector = "unidet"

[active.video]
writer = "y4m"

[datasets.toy]
path = "videos"
ext = ".mp4"

[detectors.unidet]
dir = "UniDet"
config = "configs/stub.json"
checkpoint = "models/stub.bin"
confidence = 0.5
parallel = false
generate_videos = {}
"#,
                generate_videos
            ),
        );
        project.write("videos/run/run_01.mp4", "not really a video");
        project.write("videos/run/notes.txt", "ignored");
        project.write("videos/walk/walk.mp4", "not really a video");
        project.write(
            "UniDet/configs/stub.json",
            r#"{"backend": "stub", "max_detections": 10}"#,
        );
        project.write("UniDet/models/stub.bin", "weights");
        project
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.root().join(rel)
    }

    pub fn write(&self, rel: &str, contents: &str) {
        let path = self.path(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("create parent");
        fs::write(path, contents).expect("write fixture");
    }

    pub fn json_out(&self, action: &str, stem: &str) -> PathBuf {
        self.path(&format!("data/toy/unidet/detect/json/{}/{}.json", action, stem))
    }

    pub fn video_out_dir(&self) -> PathBuf {
        self.path("data/toy/unidet/detect/videos")
    }
}
