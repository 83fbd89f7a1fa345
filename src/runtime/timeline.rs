//! Per-shot timeline artifact.

use serde::ser::Serializer as _;
use serde::{Deserialize, Serialize};

use std::path::Path;

use crate::{LoadflameResult, ShotOutcome};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShotRecord {
    pub index: usize,
    pub target_index: usize,
    /// Milliseconds since the first shot was fired.
    pub offset_ms: u64,
    #[serde(flatten)]
    pub outcome: ShotOutcome,
}

pub fn write_timeline(records: &[ShotRecord], out_path: &Path) -> LoadflameResult<()> {
    if let Some(parent) = out_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let mut buf = Vec::with_capacity(records.len().saturating_mul(96));
    {
        let mut ser = serde_json::Serializer::new(&mut buf);
        use serde::ser::SerializeSeq as _;
        let mut seq = ser.serialize_seq(Some(records.len()))?;
        for record in records {
            seq.serialize_element(record)?;
        }
        seq.end()?;
    }
    std::fs::write(out_path, buf)?;
    Ok(())
}
