use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::detect::{Instance, Predictions};

/// One detection as stored on disk: `[[x1, y1, x2, y2], score, class_id]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord(pub [f32; 4], pub f32, pub u32);

impl From<&Instance> for InstanceRecord {
    fn from(instance: &Instance) -> Self {
        Self(instance.bbox.as_array(), instance.score, instance.class_id)
    }
}

/// Per-video detections keyed by frame index. Keys serialize as strings
/// (`"0"`, `"1"`, ...) and iterate in frame order.
pub type DetectionMap = BTreeMap<u64, Vec<InstanceRecord>>;

pub fn records_for(predictions: &Predictions) -> Vec<InstanceRecord> {
    predictions.instances.iter().map(InstanceRecord::from).collect()
}

/// Write the whole document for one video.
///
/// The bytes go to a sibling `.tmp` file that is renamed over `path`, so `path`
/// is either absent, the previous document, or the complete new one.
pub fn write_detections(path: &Path, detections: &DetectionMap) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating output directory {}", parent.display()))?;
    }
    let tmp_path = tmp_path_for(path);
    {
        let file = File::create(&tmp_path)
            .with_context(|| format!("creating {}", tmp_path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, detections)
            .with_context(|| format!("serializing detections to {}", tmp_path.display()))?;
        writer
            .flush()
            .with_context(|| format!("flushing {}", tmp_path.display()))?;
    }
    std::fs::rename(&tmp_path, path).with_context(|| {
        format!(
            "moving {} into place at {}",
            tmp_path.display(),
            path.display()
        )
    })?;
    Ok(())
}

pub fn read_detections(path: &Path) -> Result<DetectionMap> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| anyhow!("invalid detections document {}: {}", path.display(), e))
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
