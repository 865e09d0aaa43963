//! Producer that replays serialized results from disk
//!
//! Layout: `<root>/<segment id>/<producer id>.json`. A repair request for
//! attempt `n` reads `<producer id>.repair-<n>.json` when that file exists
//! and the original file otherwise, so recorded repair conversations can be
//! replayed offline.

use super::{parse_result, ProduceRequest, Producer, ProducerError};
use crate::types::ExtractionResult;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct FileProducer {
    root: PathBuf,
    producer_id: String,
}

impl FileProducer {
    pub fn new(root: impl Into<PathBuf>, producer_id: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            producer_id: producer_id.into(),
        }
    }

    fn original_path(&self, segment_id: &str) -> PathBuf {
        self.root
            .join(segment_id)
            .join(format!("{}.json", self.producer_id))
    }

    fn repair_path(&self, segment_id: &str, attempt: u32) -> PathBuf {
        self.root
            .join(segment_id)
            .join(format!("{}.repair-{}.json", self.producer_id, attempt))
    }
}

#[async_trait]
impl Producer for FileProducer {
    async fn produce(&self, request: &ProduceRequest<'_>) -> Result<ExtractionResult, ProducerError> {
        let segment_id = &request.segment.id;
        let path = match request.feedback {
            Some(feedback) => {
                let repair = self.repair_path(segment_id, feedback.attempt);
                if tokio::fs::try_exists(&repair).await.unwrap_or(false) {
                    repair
                } else {
                    self.original_path(segment_id)
                }
            }
            None => self.original_path(segment_id),
        };

        debug!(producer_id = %self.producer_id, path = %path.display(), "Reading result file");
        let payload = read_payload(&path).await?;
        parse_result(&payload)
    }
}

/// Producer ids found under a results root
///
/// Every `<producer>.json` file in any segment directory names a producer;
/// `.repair-<n>.json` files are skipped. Sorted and deduplicated.
pub fn discover_producers(root: &Path) -> std::io::Result<Vec<String>> {
    let mut ids = BTreeSet::new();
    for segment_dir in std::fs::read_dir(root)? {
        let segment_dir = segment_dir?;
        if !segment_dir.file_type()?.is_dir() {
            continue;
        }
        for entry in std::fs::read_dir(segment_dir.path())? {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(stem) = name.strip_suffix(".json") {
                if !stem.is_empty() && !stem.contains(".repair-") {
                    ids.insert(stem.to_string());
                }
            }
        }
    }
    Ok(ids.into_iter().collect())
}

async fn read_payload(path: &Path) -> Result<String, ProducerError> {
    tokio::fs::read_to_string(path).await.map_err(|e| match e.kind() {
        ErrorKind::NotFound => ProducerError::Unavailable(format!("no result at {}", path.display())),
        _ => ProducerError::Internal(format!("{}: {}", path.display(), e)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Segment;
    use crate::workflow::repair::RepairFeedback;

    const RESULT: &str = r#"{"segment_id": "s1", "units": [], "groupings": []}"#;

    #[tokio::test]
    async fn test_reads_original_and_repair_files() {
        let dir = tempfile::tempdir().unwrap();
        let seg_dir = dir.path().join("s1");
        std::fs::create_dir_all(&seg_dir).unwrap();
        std::fs::write(seg_dir.join("a.json"), RESULT).unwrap();
        std::fs::write(
            seg_dir.join("a.repair-1.json"),
            r#"{"segment_id": "s1", "units": [], "groupings": [], "exclusions": []}"#,
        )
        .unwrap();

        let producer = FileProducer::new(dir.path(), "a");
        let segment = Segment::new("s1");

        let first = producer
            .produce(&ProduceRequest { segment: &segment, feedback: None })
            .await
            .unwrap();
        assert_eq!(first.segment_id, "s1");

        let feedback = RepairFeedback { attempt: 2, findings: vec![] };
        let fallback = producer
            .produce(&ProduceRequest { segment: &segment, feedback: Some(&feedback) })
            .await;
        assert!(fallback.is_ok());
    }

    #[tokio::test]
    async fn test_missing_file_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let producer = FileProducer::new(dir.path(), "b");
        let segment = Segment::new("s1");
        let outcome = producer
            .produce(&ProduceRequest { segment: &segment, feedback: None })
            .await;
        assert!(matches!(outcome, Err(ProducerError::Unavailable(_))));
    }

    #[test]
    fn test_discover_producers_skips_repair_files() {
        let dir = tempfile::tempdir().unwrap();
        for seg in ["s1", "s2"] {
            std::fs::create_dir_all(dir.path().join(seg)).unwrap();
        }
        std::fs::write(dir.path().join("s1").join("beta.json"), RESULT).unwrap();
        std::fs::write(dir.path().join("s1").join("beta.repair-1.json"), RESULT).unwrap();
        std::fs::write(dir.path().join("s2").join("alpha.json"), RESULT).unwrap();
        std::fs::write(dir.path().join("s2").join("notes.txt"), "x").unwrap();
        std::fs::write(dir.path().join("segments.json"), "[]").unwrap();

        let ids = discover_producers(dir.path()).unwrap();
        assert_eq!(ids, vec!["alpha".to_string(), "beta".to_string()]);
    }

    #[tokio::test]
    async fn test_garbage_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("s1")).unwrap();
        std::fs::write(dir.path().join("s1").join("c.json"), "<html>").unwrap();
        let producer = FileProducer::new(dir.path(), "c");
        let segment = Segment::new("s1");
        let outcome = producer
            .produce(&ProduceRequest { segment: &segment, feedback: None })
            .await;
        assert!(matches!(outcome, Err(ProducerError::Malformed(_))));
    }
}
