use std::fmt;

use serde::{Deserialize, Serialize};

/// Intake channel a work item originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Source {
    Rest,
    Soap,
    Email,
    Directory,
}

/// Message identifiers used to format user-facing failure text for a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageIds {
    pub error: &'static str,
    pub abort: &'static str,
}

const REST_IDS: MessageIds = MessageIds {
    error: "job.error",
    abort: "job.abort",
};

const SOAP_IDS: MessageIds = MessageIds {
    error: "job.error",
    abort: "job.abort",
};

const EMAIL_IDS: MessageIds = MessageIds {
    error: "email.job.error",
    abort: "email.job.abort",
};

const DIRECTORY_IDS: MessageIds = MessageIds {
    error: "directory.job.error",
    abort: "directory.job.abort",
};

impl Source {
    pub const ALL: [Source; 4] = [Source::Rest, Source::Soap, Source::Email, Source::Directory];

    pub fn message_ids(self) -> MessageIds {
        match self {
            Source::Rest => REST_IDS,
            Source::Soap => SOAP_IDS,
            Source::Email => EMAIL_IDS,
            Source::Directory => DIRECTORY_IDS,
        }
    }

    pub fn error_message_id(self) -> &'static str {
        self.message_ids().error
    }

    pub fn abort_message_id(self) -> &'static str {
        self.message_ids().abort
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Source::Rest => "REST",
            Source::Soap => "SOAP",
            Source::Email => "EMAIL",
            Source::Directory => "DIRECTORY",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
