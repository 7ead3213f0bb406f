use std::io::{Read, Seek};
use std::ops::Deref;

use crate::archive;
use crate::error::ArchiveError;
use crate::message::catalog::Messages;
use crate::message::result::MultiFilesResult;
use crate::message::store::{FileStore, StoredFile};
use crate::message::WorkItem;

/// A job made of several named input files.
#[derive(Debug)]
pub struct MultiFilesJob {
    item: WorkItem,
    files: FileStore,
}

impl MultiFilesJob {
    pub fn new(item: WorkItem) -> Self {
        Self {
            item,
            files: FileStore::new("jobbus-job-"),
        }
    }

    pub fn item(&self) -> &WorkItem {
        &self.item
    }

    pub fn add_file(&mut self, name: &str, content: &mut dyn Read) -> Result<(), ArchiveError> {
        self.files.add(name, content)?;
        Ok(())
    }

    /// Extracts every file of a zip container into this job.
    /// Returns the number of files added.
    pub fn add_archive<R: Read + Seek>(&mut self, reader: R) -> Result<usize, ArchiveError> {
        let files = &mut self.files;
        archive::for_each_entry(reader, |name, content| {
            files.add(name, content)?;
            Ok(())
        })
    }

    pub fn files(&self) -> &[StoredFile] {
        self.files.files()
    }

    pub fn file_names(&self) -> Vec<&str> {
        self.files().iter().map(|f| f.name.as_str()).collect()
    }

    pub fn read_file(&self, name: &str) -> Result<Option<Vec<u8>>, ArchiveError> {
        self.files.read(name)
    }

    /// Converts this job and the failure that stopped it into an error result
    /// routed to the same destination.
    pub fn build_error_result(
        &self,
        error: &dyn std::error::Error,
        messages: &Messages,
    ) -> MultiFilesResult {
        MultiFilesResult::error(&self.item, self.item.error_message_id(), error, messages)
    }

    /// Releases the extracted input files. Safe to call repeatedly.
    pub fn destroy(&mut self) {
        self.files.release();
    }

    pub fn is_destroyed(&self) -> bool {
        self.files.is_released()
    }
}

impl Deref for MultiFilesJob {
    type Target = WorkItem;

    fn deref(&self) -> &WorkItem {
        &self.item
    }
}
