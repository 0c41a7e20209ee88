//! On-disk format for trained whisker tables.
//!
//! A table file is a bincode-encoded `u32` format version followed by the
//! list of [`WhiskerRecord`]s, in insertion order. The record types are the
//! stable external schema; conversion to and from the in-memory [`Whisker`]
//! happens only at this boundary.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::memory::{Memory, MemoryRange};

use super::{Whisker, WhiskerError, WhiskerTree};

/// Version written by [`save_whiskers`] and accepted by [`load_whiskers`].
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),
    #[error("unsupported whisker table version {found}, expected {}", FORMAT_VERSION)]
    UnsupportedVersion { found: u32 },
    #[error("whisker record is missing field `{0}`")]
    MissingField(&'static str),
    #[error("invalid config: {0}")]
    Config(#[from] toml::de::Error),
    #[error("whisker #{index} rejected: {source}")]
    Insert {
        index: usize,
        #[source]
        source: WhiskerError,
    },
}

/// How [`load_whiskers`] treats insertion conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadMode {
    /// The first conflicting record aborts the load.
    #[default]
    Strict,
    /// Conflicting records are logged and skipped.
    SkipConflicts,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub recv_send_ewma: f64,
    pub recv_rec_ewma: f64,
    pub rtt_ratio: f64,
    pub slow_rec_ewma: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemoryRangeRecord {
    pub lower: Option<MemoryRecord>,
    pub upper: Option<MemoryRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WhiskerRecord {
    pub generation: u32,
    pub window_increment: i32,
    pub window_multiple: f64,
    pub intersend: f64,
    pub domain: Option<MemoryRangeRecord>,
}

impl From<&Memory> for MemoryRecord {
    fn from(memory: &Memory) -> Self {
        Self {
            recv_send_ewma: memory.recv_rate(),
            recv_rec_ewma: memory.send_rate(),
            rtt_ratio: memory.latest_delay(),
            slow_rec_ewma: memory.inter_packet_delay(),
        }
    }
}

impl From<MemoryRecord> for Memory {
    fn from(record: MemoryRecord) -> Self {
        Memory::from_coordinates(
            record.recv_send_ewma,
            record.recv_rec_ewma,
            record.rtt_ratio,
            record.slow_rec_ewma,
        )
    }
}

impl From<&MemoryRange> for MemoryRangeRecord {
    fn from(range: &MemoryRange) -> Self {
        Self {
            lower: Some(range.lower().into()),
            upper: Some(range.upper().into()),
        }
    }
}

impl TryFrom<MemoryRangeRecord> for MemoryRange {
    type Error = PersistenceError;

    fn try_from(record: MemoryRangeRecord) -> Result<Self, Self::Error> {
        let lower = record.lower.ok_or(PersistenceError::MissingField("lower"))?;
        let upper = record.upper.ok_or(PersistenceError::MissingField("upper"))?;
        Ok(MemoryRange::new(lower.into(), upper.into()))
    }
}

impl From<&Whisker> for WhiskerRecord {
    fn from(whisker: &Whisker) -> Self {
        Self {
            generation: whisker.generation(),
            window_increment: whisker.window_increment(),
            window_multiple: whisker.window_multiple(),
            intersend: whisker.intersend(),
            domain: Some(whisker.domain().into()),
        }
    }
}

impl TryFrom<WhiskerRecord> for Whisker {
    type Error = PersistenceError;

    fn try_from(record: WhiskerRecord) -> Result<Self, Self::Error> {
        let domain = record.domain.ok_or(PersistenceError::MissingField("domain"))?;
        Ok(Whisker::new(
            record.generation,
            record.window_increment,
            record.window_multiple,
            record.intersend,
            domain.try_into()?,
        ))
    }
}

/// Writes `whiskers` to `writer` in table format.
pub fn write_whiskers<W: Write>(whiskers: &[Whisker], mut writer: W) -> Result<(), PersistenceError> {
    let records: Vec<WhiskerRecord> = whiskers.iter().map(WhiskerRecord::from).collect();
    bincode::serialize_into(&mut writer, &FORMAT_VERSION)?;
    bincode::serialize_into(&mut writer, &records)?;
    writer.flush()?;
    Ok(())
}

/// Reads the whiskers of a table, in file order.
pub fn read_whiskers<R: Read>(mut reader: R) -> Result<Vec<Whisker>, PersistenceError> {
    let found: u32 = bincode::deserialize_from(&mut reader)?;
    if found != FORMAT_VERSION {
        return Err(PersistenceError::UnsupportedVersion { found });
    }
    let records: Vec<WhiskerRecord> = bincode::deserialize_from(&mut reader)?;
    records.into_iter().map(Whisker::try_from).collect()
}

pub fn save_whiskers(whiskers: &[Whisker], path: impl AsRef<Path>) -> Result<(), PersistenceError> {
    let path = path.as_ref();
    let file = File::create(path)?;
    write_whiskers(whiskers, BufWriter::new(file))?;
    tracing::debug!(path = %path.display(), count = whiskers.len(), "whisker table saved");
    Ok(())
}

/// Loads a table file into a fresh tree, inserting records in file order.
pub fn load_whiskers(path: impl AsRef<Path>, mode: LoadMode) -> Result<WhiskerTree, PersistenceError> {
    load_whiskers_into(WhiskerTree::new(), path, mode)
}

/// Like [`load_whiskers`], but inserts into `tree`, keeping its root and
/// its [`InsertMode`](super::InsertMode).
pub fn load_whiskers_into(
    mut tree: WhiskerTree,
    path: impl AsRef<Path>,
    mode: LoadMode,
) -> Result<WhiskerTree, PersistenceError> {
    let path = path.as_ref();
    let whiskers = read_whiskers(BufReader::new(File::open(path)?))?;
    extend_tree(&mut tree, whiskers, mode)?;
    tracing::info!(path = %path.display(), nodes = tree.len(), "whisker table loaded");
    Ok(tree)
}

/// Inserts `whiskers` into `tree` in order. Under [`LoadMode::SkipConflicts`]
/// conflicting whiskers are dropped; otherwise the first conflict fails.
pub fn extend_tree(
    tree: &mut WhiskerTree,
    whiskers: impl IntoIterator<Item = Whisker>,
    mode: LoadMode,
) -> Result<(), PersistenceError> {
    for (index, whisker) in whiskers.into_iter().enumerate() {
        match tree.insert(whisker) {
            Ok(_) => {}
            Err(err) if mode == LoadMode::SkipConflicts => {
                tracing::debug!(index, %err, "skipping conflicting whisker");
            }
            Err(source) => return Err(PersistenceError::Insert { index, source }),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use testresult::TestResult;

    use super::*;
    use crate::whisker::InsertMode;

    fn sample() -> Vec<Whisker> {
        let narrow = MemoryRange::new(
            Memory::from_coordinates(0.5, 1.0, 1.0, 0.0),
            Memory::from_coordinates(2.0, 4.0, 1.5, 0.25),
        );
        vec![
            Whisker::new(1, 2, 1.0, 0.001, MemoryRange::full()),
            Whisker::new(2, -1, 0.5, 0.0, narrow),
        ]
    }

    #[test]
    fn test_save_then_load_builds_tree_in_file_order() -> TestResult {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("table.dna");
        save_whiskers(&sample(), &path)?;

        let tree = load_whiskers(&path, LoadMode::Strict)?;
        // both records intersect the root; the newer one ends up holding it
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.root().generation(), 2);
        assert_eq!(tree.root().window_increment(), -1);
        assert_eq!(tree.root().window_multiple(), 0.5);
        Ok(())
    }

    #[test]
    fn test_records_keep_every_field() -> TestResult {
        let mut buf = Vec::new();
        write_whiskers(&sample(), &mut buf)?;
        let decoded = read_whiskers(buf.as_slice())?;
        assert_eq!(decoded, sample());
        Ok(())
    }

    #[test]
    fn test_record_field_mapping() {
        let memory = Memory::from_coordinates(1.0, 2.0, 3.0, 4.0);
        let record = MemoryRecord::from(&memory);
        assert_eq!(record.recv_send_ewma, 1.0);
        assert_eq!(record.recv_rec_ewma, 2.0);
        assert_eq!(record.rtt_ratio, 3.0);
        assert_eq!(record.slow_rec_ewma, 4.0);
        assert_eq!(Memory::from(record), memory);
    }

    #[test]
    fn test_strict_load_fails_on_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dup.dna");
        let whisker = Whisker::new(3, 1, 1.0, 0.0, MemoryRange::full());
        save_whiskers(&[whisker, whisker], &path).unwrap();

        let err = load_whiskers(&path, LoadMode::Strict).unwrap_err();
        assert!(matches!(
            err,
            PersistenceError::Insert {
                index: 1,
                source: WhiskerError::Conflict { incoming: 3, existing: 3 }
            }
        ));

        let tree = load_whiskers(&path, LoadMode::SkipConflicts).unwrap();
        assert_eq!(tree.root().generation(), 3);
    }

    #[test]
    fn test_load_into_keeps_insert_mode() -> TestResult {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("table.dna");
        save_whiskers(&sample(), &path)?;

        let base = WhiskerTree::new().with_mode(InsertMode::Diagnostic);
        let tree = load_whiskers_into(base, &path, LoadMode::Strict)?;
        assert_eq!(tree.mode(), InsertMode::Diagnostic);
        assert_eq!(tree.root().generation(), 2);
        assert_eq!(tree.log_overlaps(), 0);
        Ok(())
    }

    #[test]
    fn test_extend_tree_reports_conflict_index() {
        let whisker = Whisker::new(4, 1, 1.0, 0.0, MemoryRange::full());
        let mut tree = WhiskerTree::new().with_mode(InsertMode::Diagnostic);
        extend_tree(&mut tree, [whisker], LoadMode::Strict).unwrap();
        let err = extend_tree(&mut tree, [whisker], LoadMode::Strict).unwrap_err();
        assert!(matches!(err, PersistenceError::Insert { index: 0, .. }));
        extend_tree(&mut tree, [whisker], LoadMode::SkipConflicts).unwrap();
        assert_eq!(tree.root().generation(), 4);
    }

    #[test]
    fn test_unknown_version_is_rejected() {
        let mut buf = Vec::new();
        bincode::serialize_into(&mut buf, &2u32).unwrap();
        bincode::serialize_into(&mut buf, &Vec::<WhiskerRecord>::new()).unwrap();
        let err = read_whiskers(buf.as_slice()).unwrap_err();
        assert!(matches!(err, PersistenceError::UnsupportedVersion { found: 2 }));
    }

    #[test]
    fn test_missing_domain_is_reported() {
        let record = WhiskerRecord {
            generation: 1,
            window_increment: 1,
            window_multiple: 1.0,
            intersend: 0.0,
            domain: None,
        };
        let mut buf = Vec::new();
        bincode::serialize_into(&mut buf, &FORMAT_VERSION).unwrap();
        bincode::serialize_into(&mut buf, &vec![record]).unwrap();
        let err = read_whiskers(buf.as_slice()).unwrap_err();
        assert!(matches!(err, PersistenceError::MissingField("domain")));
    }

    #[test]
    fn test_truncated_file_is_an_error() {
        let mut buf = Vec::new();
        write_whiskers(&sample(), &mut buf).unwrap();
        buf.truncate(buf.len() - 3);
        assert!(matches!(
            read_whiskers(buf.as_slice()),
            Err(PersistenceError::Serialization(_))
        ));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_whiskers(dir.path().join("absent.dna"), LoadMode::Strict).unwrap_err();
        assert!(matches!(err, PersistenceError::Io(_)));
    }
}
