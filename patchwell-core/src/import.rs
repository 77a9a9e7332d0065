//! Loading patches from `.syx` files.
//!
//! Single files load synchronously. `import_files` walks a selection on a
//! worker thread and hands the finished report back over a channel; the
//! worker never touches librarian state.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use chrono::Utc;
use crossbeam_channel::{bounded, Receiver, TryRecvError};

use patchwell_types::{split_sysex, MidiMessage, PatchRecord, ProgramNumber, Provenance};

use crate::error::ImportError;
use crate::progress::ProgressHandler;
use crate::synth::Synth;

/// Read a file and split it into complete sysex messages. Bytes outside
/// F0..F7 frames are dropped.
pub fn load_sysex_file(path: &Path) -> Result<Vec<MidiMessage>, ImportError> {
    let data = fs::read(path)?;
    let messages = split_sysex(&data);
    if messages.is_empty() {
        return Err(ImportError::NoSysex(path.display().to_string()));
    }
    log::debug!(target: "import", "{}: {} sysex messages", path.display(), messages.len());
    Ok(messages)
}

/// Decode one file with `synth`. Each record remembers the file and its
/// position inside it.
pub fn load_patches_from_file(synth: &dyn Synth, path: &Path) -> Result<Vec<PatchRecord>, ImportError> {
    let messages = load_sysex_file(path)?;
    let patches = synth.decode(&messages);
    if patches.is_empty() {
        log::warn!(
            target: "import",
            "{}: no {} patches in {} messages",
            path.display(),
            synth.name(),
            messages.len()
        );
    }

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let fullpath = path.display().to_string();

    Ok(patches
        .into_iter()
        .enumerate()
        .map(|(position, mut patch)| {
            let position = position as u32;
            if patch.program.is_none() {
                patch.program = Some(ProgramNumber::new(position));
            }
            let relevant = synth.filter_voice_relevant_data(&patch.data);
            let provenance = Provenance::FromFile {
                filename: filename.clone(),
                fullpath: fullpath.clone(),
                program: position,
            };
            PatchRecord::new(synth.name(), patch, &relevant, Some(provenance))
        })
        .collect())
}

/// First synth claiming any of `messages`. Several claimants is suspicious
/// and gets a warning; the earliest in `synths` wins.
pub fn sniff_synth<'a>(synths: &'a [Arc<dyn Synth>], messages: &[MidiMessage]) -> Option<&'a Arc<dyn Synth>> {
    let mut claimants = synths
        .iter()
        .filter(|synth| messages.iter().any(|m| synth.is_own_sysex(m)));
    let first = claimants.next()?;
    let others: Vec<&str> = claimants.map(|s| s.name()).collect();
    if !others.is_empty() {
        log::warn!(
            target: "import",
            "messages claimed by {} and also {}; using {}",
            first.name(),
            others.join(", "),
            first.name()
        );
    }
    Some(first)
}

#[derive(Debug, Default)]
pub struct ImportReport {
    pub records: Vec<PatchRecord>,
    /// Files that could not be read, with the reason.
    pub failed: Vec<(PathBuf, ImportError)>,
    pub cancelled: bool,
}

/// A running bulk import.
pub struct ImportJob {
    receiver: Receiver<ImportReport>,
    handle: Option<JoinHandle<()>>,
}

impl ImportJob {
    /// Non-blocking; `None` until the worker is done.
    pub fn try_report(&self) -> Option<ImportReport> {
        match self.receiver.try_recv() {
            Ok(report) => Some(report),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Block until the worker is done. `None` if it died without reporting.
    pub fn wait(mut self) -> Option<ImportReport> {
        let report = self.receiver.recv().ok();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!(target: "import", "import worker panicked");
            }
        }
        report
    }
}

/// Load every file in `paths` on a worker thread. When more than one file
/// was chosen, all records are wrapped as one bulk import.
pub fn import_files(synth: Arc<dyn Synth>, paths: Vec<PathBuf>, progress: Arc<dyn ProgressHandler>) -> ImportJob {
    let (sender, receiver) = bounded(1);
    let handle = thread::spawn(move || {
        let report = run_import(synth.as_ref(), &paths, progress.as_ref());
        if report.cancelled {
            progress.on_cancel();
        } else {
            progress.on_success();
        }
        if sender.send(report).is_err() {
            log::debug!(target: "import", "import finished after its job was dropped");
        }
    });
    ImportJob {
        receiver,
        handle: Some(handle),
    }
}

fn run_import(synth: &dyn Synth, paths: &[PathBuf], progress: &dyn ProgressHandler) -> ImportReport {
    let mut report = ImportReport::default();
    for (i, path) in paths.iter().enumerate() {
        if progress.should_abort() {
            log::info!(target: "import", "import cancelled after {} of {} files", i, paths.len());
            return ImportReport {
                cancelled: true,
                ..ImportReport::default()
            };
        }
        progress.set_progress(i as f64 / paths.len() as f64);
        match load_patches_from_file(synth, path) {
            Ok(records) => report.records.extend(records),
            Err(e) => {
                log::warn!(target: "import", "skipping {}: {}", path.display(), e);
                report.failed.push((path.clone(), e));
            }
        }
    }

    if paths.len() > 1 {
        let now = Utc::now();
        for record in &mut report.records {
            let individual = record.provenance().cloned();
            record.set_provenance(Some(Provenance::bulk(now, individual)));
        }
    }
    progress.set_progress(1.0);
    log::info!(
        target: "import",
        "imported {} {} patches from {} files",
        report.records.len(),
        synth.name(),
        paths.len()
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use patchwell_types::{BankNumber, Patch};
    use std::io::Write;

    struct OnePerMessage;

    impl Synth for OnePerMessage {
        fn name(&self) -> &str {
            "OnePer"
        }
        fn decode(&self, messages: &[MidiMessage]) -> Vec<Patch> {
            messages
                .iter()
                .map(|m| Patch::new(m.bytes().to_vec()))
                .collect()
        }
        fn patches_per_bank(&self, _bank: BankNumber) -> usize {
            8
        }
    }

    #[test]
    fn test_load_sysex_file_splits_messages() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0xF0, 1, 0xF7, 0x00, 0xF0, 2, 3, 0xF7]).unwrap();
        let messages = load_sysex_file(file.path()).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].bytes(), &[0xF0, 2, 3, 0xF7]);
    }

    #[test]
    fn test_file_without_sysex_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"not midi").unwrap();
        assert!(matches!(load_sysex_file(file.path()), Err(ImportError::NoSysex(_))));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone.syx");
        assert!(matches!(load_sysex_file(&missing), Err(ImportError::Io(_))));
    }

    #[test]
    fn test_records_tagged_with_file_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bank.syx");
        fs::write(&path, [0xF0, 1, 0xF7, 0xF0, 2, 0xF7]).unwrap();

        let records = load_patches_from_file(&OnePerMessage, &path).unwrap();
        assert_eq!(records.len(), 2);
        match records[1].provenance() {
            Some(Provenance::FromFile { filename, program, .. }) => {
                assert_eq!(filename, "bank.syx");
                assert_eq!(*program, 1);
            }
            other => panic!("unexpected provenance {:?}", other),
        }
        assert_eq!(records[1].program(), Some(ProgramNumber::new(1)));
    }
}
