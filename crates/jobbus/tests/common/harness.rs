//! Test harness for isolated deposit pipeline runs.

#![allow(dead_code)]

use std::fs::File;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use jobbus::archive::{self, ArchiveEntry};
use jobbus::deposit::DepositRoot;

/// Temporary deposit roots, one per application.
pub struct TestHarness {
    temp_dir: TempDir,
    roots: Vec<DepositRoot>,
}

impl TestHarness {
    /// Creates one deposit root per application name. Directories are not
    /// created up front; the pipeline creates them on demand.
    pub fn new(applications: &[&str]) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let roots = applications
            .iter()
            .map(|app| {
                DepositRoot::new(temp_dir.path().join(app), *app).expect("Invalid application")
            })
            .collect();
        Self { temp_dir, roots }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn root(&self) -> &DepositRoot {
        &self.roots[0]
    }

    pub fn roots(&self) -> &[DepositRoot] {
        &self.roots
    }

    pub fn ensure_directories(&self) {
        for root in &self.roots {
            root.ensure_directories().expect("Failed to create deposit directories");
        }
    }

    /// Drops a zip with `entries` into the inbox, written under a temporary
    /// name and renamed so watchers never see a partial file.
    pub fn deposit(&self, name: &str, entries: &[ArchiveEntry]) -> PathBuf {
        let packed = archive::pack(entries).expect("Failed to pack deposit");
        let bytes = std::fs::read(&packed).expect("Failed to read packed deposit");
        self.deposit_bytes(name, &bytes)
    }

    pub fn deposit_bytes(&self, name: &str, content: &[u8]) -> PathBuf {
        let inbox = self.root().jobs_dir();
        std::fs::create_dir_all(&inbox).expect("Failed to create inbox");
        let partial = inbox.join(format!(".{}.part", name));
        std::fs::write(&partial, content).expect("Failed to write deposit");
        let path = inbox.join(name);
        std::fs::rename(&partial, &path).expect("Failed to publish deposit");
        path
    }

    pub fn stage(&self, name: &str, entries: &[ArchiveEntry]) -> PathBuf {
        let accepted = self.root().accepted_dir();
        std::fs::create_dir_all(&accepted).expect("Failed to create staging");
        let packed = archive::pack(entries).expect("Failed to pack deposit");
        let path = accepted.join(name);
        std::fs::copy(&packed, &path).expect("Failed to stage deposit");
        path
    }

    pub fn inbox(&self) -> Vec<String> {
        list(&self.root().jobs_dir())
    }

    pub fn staging(&self) -> Vec<String> {
        list(&self.root().accepted_dir())
    }

    pub fn outbox(&self) -> Vec<String> {
        list(&self.root().results_dir())
    }

    pub fn published_entries(&self, name: &str) -> Vec<ArchiveEntry> {
        let file = File::open(self.root().results_dir().join(name))
            .expect("Failed to open published artifact");
        archive::unpack(file).expect("Published artifact is not a valid archive")
    }

    pub fn published_text(&self, name: &str) -> String {
        std::fs::read_to_string(self.root().results_dir().join(name))
            .expect("Failed to read published artifact")
    }

    pub fn wait_until(&self, timeout: Duration, condition: impl FnMut() -> bool) -> bool {
        wait_until(timeout, condition)
    }
}

/// Polls `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// Sorted file names in `dir`, or nothing if it does not exist.
pub fn list(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}
