//! The `ProctableReader` seam: production code reads a launched job's
//! per-rank process table through the frontend daemon; tests substitute
//! [`MockProctableReader`] to exercise App/Session logic without a real
//! MPIR-capable launcher.

use cti_core::Result;
use cti_fe_daemon::{MpirHandle, ProctableEntry};

use crate::controller::MpirController;

pub trait ProctableReader {
    fn read_proctable(&self, handle: MpirHandle) -> Result<Vec<ProctableEntry>>;
}

/// Reads the proctable by round-tripping through a live [`MpirController`]
/// connection to `fe-daemond`.
pub struct DaemonProctableReader<'a> {
    controller: &'a MpirController,
}

impl<'a> DaemonProctableReader<'a> {
    pub fn new(controller: &'a MpirController) -> Self {
        Self { controller }
    }
}

impl ProctableReader for DaemonProctableReader<'_> {
    fn read_proctable(&self, handle: MpirHandle) -> Result<Vec<ProctableEntry>> {
        self.controller.read_proctable(handle)
    }
}

/// A canned proctable keyed by [`MpirHandle`], for tests that need a
/// deterministic rank/host/pid layout without spawning a real launcher.
#[derive(Default)]
pub struct MockProctableReader {
    tables: std::collections::HashMap<u64, Vec<ProctableEntry>>,
}

impl MockProctableReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, handle: MpirHandle, entries: Vec<ProctableEntry>) -> Self {
        self.tables.insert(handle.0, entries);
        self
    }
}

impl ProctableReader for MockProctableReader {
    fn read_proctable(&self, handle: MpirHandle) -> Result<Vec<ProctableEntry>> {
        self.tables
            .get(&handle.0)
            .cloned()
            .ok_or_else(|| cti_core::CtiError::MpirError(format!("no mock proctable for handle {}", handle.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_reader_returns_registered_table() {
        let handle = MpirHandle(1);
        let reader = MockProctableReader::new().with_table(
            handle,
            vec![ProctableEntry {
                pid: 100,
                rank: 0,
                hostname: "nid001".into(),
                executable_name: "a.out".into(),
            }],
        );
        let table = reader.read_proctable(handle).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table[0].rank, 0);
    }

    #[test]
    fn mock_reader_errors_on_unknown_handle() {
        let reader = MockProctableReader::new();
        assert!(reader.read_proctable(MpirHandle(99)).is_err());
    }
}
