pub mod catalog;
pub mod job;
pub mod result;
pub mod source;
mod store;
pub mod work_item;

pub use catalog::Messages;
pub use job::MultiFilesJob;
pub use result::{ErrorPayload, MultiFilesResult};
pub use source::{MessageIds, Source};
pub use store::StoredFile;
pub use work_item::{is_valid_application_name, Meta, WorkItem, WorkItemBuilder};
