use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::DepositConfig;
use crate::error::{ConfigError, DepositError, ValidationError};
use crate::message::is_valid_application_name;

/// Inbox where producers drop job archives.
pub const JOBS_SUBDIR: &str = "jobs";
/// Staging area for claimed archives.
pub const ACCEPTED_SUBDIR: &str = "accepted";
/// Outbox where results are published.
pub const RESULTS_SUBDIR: &str = "results";

/// A filesystem root bound to one application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositRoot {
    path: PathBuf,
    application_name: String,
}

impl DepositRoot {
    pub fn new(
        path: impl Into<PathBuf>,
        application_name: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let application_name = application_name.into();
        if application_name.is_empty() {
            return Err(ValidationError::EmptyApplicationName);
        }
        if !is_valid_application_name(&application_name) {
            return Err(ValidationError::InvalidApplicationName(application_name));
        }
        Ok(Self {
            path: path.into(),
            application_name,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn application_name(&self) -> &str {
        &self.application_name
    }

    pub fn jobs_dir(&self) -> PathBuf {
        self.path.join(JOBS_SUBDIR)
    }

    pub fn accepted_dir(&self) -> PathBuf {
        self.path.join(ACCEPTED_SUBDIR)
    }

    pub fn results_dir(&self) -> PathBuf {
        self.path.join(RESULTS_SUBDIR)
    }

    pub fn ensure_directories(&self) -> Result<(), DepositError> {
        ensure_directory(&self.jobs_dir())?;
        ensure_directory(&self.accepted_dir())?;
        ensure_directory(&self.results_dir())
    }
}

/// Read-only mapping from deposit root path to its application.
#[derive(Debug, Clone, Default)]
pub struct DepositRegistry {
    roots: BTreeMap<PathBuf, DepositRoot>,
}

impl DepositRegistry {
    pub fn new<I: IntoIterator<Item = DepositRoot>>(roots: I) -> Self {
        Self {
            roots: roots
                .into_iter()
                .map(|root| (root.path.clone(), root))
                .collect(),
        }
    }

    pub fn from_config(config: &DepositConfig) -> Result<Self, ConfigError> {
        let mut roots = Vec::with_capacity(config.roots.len());
        for root in &config.roots {
            let path = root.resolved_path();
            let deposit_root = DepositRoot::new(path.clone(), root.application_name.clone())
                .map_err(|e| ConfigError::InvalidDepositRoot {
                    path,
                    reason: e.to_string(),
                })?;
            roots.push(deposit_root);
        }
        Ok(Self::new(roots))
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn roots(&self) -> impl Iterator<Item = &DepositRoot> {
        self.roots.values()
    }

    pub fn get(&self, path: &Path) -> Option<&DepositRoot> {
        self.roots.get(path)
    }

    pub fn application_name(&self, path: &Path) -> Option<&str> {
        self.get(path).map(DepositRoot::application_name)
    }

    /// Resolves the root owning a file sitting directly in a `jobs/` inbox.
    pub fn root_of_inbox_file(&self, file: &Path) -> Result<&DepositRoot, DepositError> {
        let inbox = file
            .parent()
            .filter(|dir| dir.file_name().is_some_and(|name| name == JOBS_SUBDIR))
            .ok_or_else(|| DepositError::NotAnInboxFile(file.to_path_buf()))?;
        let root = inbox
            .parent()
            .ok_or_else(|| DepositError::NotAnInboxFile(file.to_path_buf()))?;
        self.get(root)
            .ok_or_else(|| DepositError::UnknownRoot(root.to_path_buf()))
    }
}

/// Name of the outbox artifact for a deposit: `result-<stem>.<artifact ext>`.
pub fn result_file_name(original_filename: &str, artifact: &Path) -> String {
    let base = Path::new(original_filename)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| original_filename.to_string());

    match artifact.extension() {
        Some(ext) => format!("result-{}.{}", base, ext.to_string_lossy()),
        None => format!("result-{}", base),
    }
}

pub(crate) fn ensure_directory(path: &Path) -> Result<(), DepositError> {
    if !path.exists() {
        std::fs::create_dir_all(path).map_err(|e| DepositError::CreateDirectory {
            path: path.to_path_buf(),
            source: e,
        })?;
    }
    Ok(())
}

/// Removes `path`, treating an already missing file as success.
pub(crate) fn remove_if_exists(path: &Path) -> Result<(), DepositError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(DepositError::RemoveFile {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Moves a file with `rename`. When the source lives on another filesystem
/// (temporary storage usually does) the file is copied next to `dst`, synced
/// and then renamed, so `dst` never shows a partial file.
pub(crate) fn move_file(src: &Path, dst: &Path) -> Result<(), DepositError> {
    let move_error = |e: std::io::Error| DepositError::MoveFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    };

    match std::fs::rename(src, dst) {
        Ok(()) => return Ok(()),
        Err(e) if e.kind() != std::io::ErrorKind::CrossesDevices => return Err(move_error(e)),
        Err(_) => {}
    }

    let name = dst
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let partial = dst.with_file_name(format!(".{}.partial", name));

    let published = std::fs::copy(src, &partial)
        .and_then(|_| std::fs::File::open(&partial))
        .and_then(|file| file.sync_all())
        .and_then(|()| std::fs::rename(&partial, dst));
    if let Err(e) = published {
        let _ = std::fs::remove_file(&partial);
        return Err(move_error(e));
    }
    std::fs::remove_file(src).map_err(move_error)?;
    Ok(())
}
