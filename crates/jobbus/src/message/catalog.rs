use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::message::WorkItem;

static RE_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([a-zA-Z_][a-zA-Z0-9_]*)\}").expect("static regex"));

const DEFAULT_TEMPLATES: &[(&str, &str)] = &[
    (
        "job.error",
        "Job {job_id} for application {application_name} submitted at {submission_time} failed: {error}",
    ),
    (
        "job.abort",
        "Job {job_id} for application {application_name} submitted at {submission_time} was aborted: {error}",
    ),
    (
        "email.job.error",
        "Your job {job_id} for application {application_name} could not be processed: {error}",
    ),
    (
        "email.job.abort",
        "Your job {job_id} for application {application_name} was aborted: {error}",
    ),
    (
        "directory.job.error",
        "Deposited job {original_filename} ({job_id}) for application {application_name} failed: {error}",
    ),
    (
        "directory.job.abort",
        "Deposited job {original_filename} ({job_id}) for application {application_name} was aborted: {error}",
    ),
];

/// Catalog of message templates keyed by message id.
///
/// Templates may reference `{job_id}`, `{application_name}`,
/// `{submission_time}`, `{source}`, `{error}` and any string entry of the
/// work item's metadata by key.
#[derive(Debug, Clone)]
pub struct Messages {
    templates: HashMap<String, String>,
}

impl Default for Messages {
    fn default() -> Self {
        Self {
            templates: DEFAULT_TEMPLATES
                .iter()
                .map(|(id, template)| (id.to_string(), template.to_string()))
                .collect(),
        }
    }
}

impl Messages {
    /// Built-in templates with `overrides` layered on top.
    pub fn with_overrides(overrides: &HashMap<String, String>) -> Self {
        let mut messages = Self::default();
        for (id, template) in overrides {
            messages.templates.insert(id.clone(), template.clone());
        }
        messages
    }

    pub fn template(&self, id: &str) -> Option<&str> {
        self.templates.get(id).map(String::as_str)
    }

    /// Renders message `id` for `item`. Unknown ids render as `id: error`.
    pub fn format(&self, id: &str, item: &WorkItem, error: &str) -> String {
        let Some(template) = self.templates.get(id) else {
            return format!("{}: {}", id, error);
        };

        RE_PLACEHOLDER
            .replace_all(template, |caps: &Captures| {
                let key = &caps[1];
                match key {
                    "job_id" => item.job_id().to_string(),
                    "application_name" => item.application_name().to_string(),
                    "submission_time" => item.submission_time().to_rfc3339(),
                    "source" => item.source().to_string(),
                    "error" => error.to_string(),
                    other => item.meta_str(other).unwrap_or_default().to_string(),
                }
            })
            .into_owned()
    }
}
