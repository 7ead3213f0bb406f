use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use uuid::Uuid;

use crate::error::ValidationError;
use crate::message::Source;

static RE_APPLICATION_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\w+$").expect("static regex"));

/// Transport-specific provenance attached to a work item.
pub type Meta = BTreeMap<String, serde_json::Value>;

/// Returns true if `name` may be used as an application name.
pub fn is_valid_application_name(name: &str) -> bool {
    RE_APPLICATION_NAME.is_match(name)
}

/// Identity, origin and provenance of a job or result.
///
/// All fields are validated at construction and never change afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkItem {
    source: Source,
    application_name: String,
    job_id: Uuid,
    submission_time: DateTime<Utc>,
    meta: Meta,
}

impl WorkItem {
    pub fn new(
        source: Source,
        application_name: impl Into<String>,
        job_id: Uuid,
        submission_time: DateTime<Utc>,
        meta: Meta,
    ) -> Result<Self, ValidationError> {
        let application_name = application_name.into();

        if application_name.is_empty() {
            return Err(ValidationError::EmptyApplicationName);
        }
        if !is_valid_application_name(&application_name) {
            return Err(ValidationError::InvalidApplicationName(application_name));
        }

        Ok(Self {
            source,
            application_name,
            job_id,
            submission_time,
            meta,
        })
    }

    /// Creates a work item with a fresh job id and the current time.
    pub fn generate(
        source: Source,
        application_name: impl Into<String>,
        meta: Meta,
    ) -> Result<Self, ValidationError> {
        Self::new(source, application_name, Uuid::new_v4(), Utc::now(), meta)
    }

    pub fn builder() -> WorkItemBuilder {
        WorkItemBuilder::default()
    }

    pub fn source(&self) -> Source {
        self.source
    }

    pub fn application_name(&self) -> &str {
        &self.application_name
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn submission_time(&self) -> DateTime<Utc> {
        self.submission_time
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    /// Returns a metadata value if it is present and a string.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.meta.get(key).and_then(|v| v.as_str())
    }

    pub fn error_message_id(&self) -> &'static str {
        self.source.error_message_id()
    }

    pub fn abort_message_id(&self) -> &'static str {
        self.source.abort_message_id()
    }

    /// Copy of this item with a new submission time, used for results.
    pub(crate) fn stamped_now(&self) -> Self {
        Self {
            submission_time: Utc::now(),
            ..self.clone()
        }
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "WorkItem[source={}, application={}, job_id={}, submitted={}, meta_keys=[",
            self.source,
            self.application_name,
            self.job_id,
            self.submission_time.to_rfc3339()
        )?;
        for (i, key) in self.meta.keys().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(key)?;
        }
        f.write_str("]]")
    }
}

/// Builder for callers that assemble a work item field by field.
///
/// `build` fails on the first missing field instead of defaulting it.
#[derive(Debug, Default, Clone)]
pub struct WorkItemBuilder {
    source: Option<Source>,
    application_name: Option<String>,
    job_id: Option<Uuid>,
    submission_time: Option<DateTime<Utc>>,
    meta: Option<Meta>,
}

impl WorkItemBuilder {
    pub fn source(mut self, source: Source) -> Self {
        self.source = Some(source);
        self
    }

    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }

    pub fn job_id(mut self, job_id: Uuid) -> Self {
        self.job_id = Some(job_id);
        self
    }

    pub fn submission_time(mut self, time: DateTime<Utc>) -> Self {
        self.submission_time = Some(time);
        self
    }

    pub fn meta(mut self, meta: Meta) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn build(self) -> Result<WorkItem, ValidationError> {
        let source = self.source.ok_or(ValidationError::MissingField("source"))?;
        let application_name = self
            .application_name
            .ok_or(ValidationError::EmptyApplicationName)?;
        let job_id = self.job_id.ok_or(ValidationError::MissingField("jobId"))?;
        let submission_time = self
            .submission_time
            .ok_or(ValidationError::MissingField("submissionTime"))?;
        let meta = self.meta.ok_or(ValidationError::MissingField("meta"))?;

        WorkItem::new(source, application_name, job_id, submission_time, meta)
    }
}
