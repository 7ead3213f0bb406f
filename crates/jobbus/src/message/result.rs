use std::fmt::Write as _;
use std::io::Read;
use std::ops::Deref;
use std::path::PathBuf;

use crate::archive;
use crate::error::ArchiveError;
use crate::message::catalog::Messages;
use crate::message::store::{FileStore, StoredFile};
use crate::message::WorkItem;

/// Text published in place of output files when a job failed outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPayload {
    pub file_name: String,
    pub body: String,
}

/// Outcome of a multi-file job: named output files, or an error payload.
#[derive(Debug)]
pub struct MultiFilesResult {
    item: WorkItem,
    success: bool,
    files: FileStore,
    error: Option<ErrorPayload>,
}

impl MultiFilesResult {
    pub fn new(item: WorkItem, success: bool) -> Self {
        Self {
            item,
            success,
            files: FileStore::new("jobbus-result-"),
            error: None,
        }
    }

    /// Successful result for the job identified by `job`.
    pub fn success_for(job: &WorkItem) -> Self {
        Self::new(job.stamped_now(), true)
    }

    /// Error result for `job`, rendered with message `message_id`.
    pub fn error(
        job: &WorkItem,
        message_id: &str,
        cause: &dyn std::error::Error,
        messages: &Messages,
    ) -> Self {
        let item = job.stamped_now();
        let message = messages.format(message_id, &item, &cause.to_string());

        let mut body = message;
        body.push_str("\n\n");
        let _ = writeln!(body, "job-id: {}", item.job_id());
        let _ = writeln!(body, "application: {}", item.application_name());
        let _ = writeln!(body, "source: {}", item.source());
        let _ = writeln!(body, "error-message-id: {}", item.error_message_id());
        let _ = writeln!(body, "abort-message-id: {}", item.abort_message_id());

        let payload = ErrorPayload {
            file_name: format!("{}.txt", item.job_id()),
            body,
        };

        Self {
            item,
            success: false,
            files: FileStore::new("jobbus-result-"),
            error: Some(payload),
        }
    }

    pub fn item(&self) -> &WorkItem {
        &self.item
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    /// True when this result is a top-level error rather than job output.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn error_payload(&self) -> Option<&ErrorPayload> {
        self.error.as_ref()
    }

    pub fn add_file(&mut self, name: &str, content: &mut dyn Read) -> Result<(), ArchiveError> {
        self.files.add(name, content)?;
        Ok(())
    }

    pub fn files(&self) -> &[StoredFile] {
        self.files.files()
    }

    pub fn read_file(&self, name: &str) -> Result<Option<Vec<u8>>, ArchiveError> {
        self.files.read(name)
    }

    /// Produces the single artifact to publish for this result.
    ///
    /// Output files are packed into a zip; an error result yields its error
    /// payload as a text file. The artifact lives in this result's temporary
    /// store and is removed by [`MultiFilesResult::destroy`] unless moved away.
    pub fn zip_result_files_if_not_error(&mut self) -> Result<PathBuf, ArchiveError> {
        if let Some(payload) = &self.error {
            let path = self.files.artifact_path(&payload.file_name)?;
            std::fs::write(&path, payload.body.as_bytes())
                .map_err(|e| ArchiveError::io(&path, e))?;
            return Ok(path);
        }

        let destination = self
            .files
            .artifact_path(&format!("{}.zip", self.item.job_id()))?;
        archive::pack_files(
            &destination,
            self.files
                .files()
                .iter()
                .map(|f| (f.name.as_str(), f.path.as_path())),
        )?;
        Ok(destination)
    }

    /// Releases output files and any packed artifact. Safe to call repeatedly.
    pub fn destroy(&mut self) {
        self.files.release();
    }

    pub fn is_destroyed(&self) -> bool {
        self.files.is_released()
    }
}

impl Deref for MultiFilesResult {
    type Target = WorkItem;

    fn deref(&self) -> &WorkItem {
        &self.item
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Meta, Source};
    use std::fs::File;

    fn job_item() -> WorkItem {
        WorkItem::generate(Source::Rest, "lab1", Meta::new()).unwrap()
    }

    #[test]
    fn test_success_result_packs_outputs() {
        let job = job_item();
        let mut result = MultiFilesResult::success_for(&job);
        result.add_file("out.txt", &mut &b"42"[..]).unwrap();
        result.add_file("plot.png", &mut &b"\x89PNG"[..]).unwrap();

        let artifact = result.zip_result_files_if_not_error().unwrap();
        assert_eq!(artifact.extension().unwrap(), "zip");

        let entries = archive::unpack(File::open(&artifact).unwrap()).unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["out.txt", "plot.png"]);

        result.destroy();
        assert!(!artifact.exists());
    }

    #[test]
    fn test_error_result_yields_text_payload() {
        let job = job_item();
        let cause = std::io::Error::other("disk on fire");
        let mut result = MultiFilesResult::error(&job, job.abort_message_id(), &cause, &Messages::default());

        let artifact = result.zip_result_files_if_not_error().unwrap();
        assert_eq!(artifact.extension().unwrap(), "txt");

        let body = std::fs::read_to_string(&artifact).unwrap();
        assert!(body.contains("was aborted: disk on fire"));
        assert!(body.contains(&format!("job-id: {}", job.job_id())));

        result.destroy();
        assert!(!artifact.exists());
    }

    #[test]
    fn test_destroy_is_idempotent_without_files() {
        let mut result = MultiFilesResult::success_for(&job_item());
        result.destroy();
        result.destroy();
        assert!(result.is_destroyed());
    }
}
