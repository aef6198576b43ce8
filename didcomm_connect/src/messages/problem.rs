use serde::{Deserialize, Serialize};

use super::{Header, MessageType};
use crate::{Error, handshake::Version};

/// Problem codes of the connection protocols
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ProblemCode {
    RequestNotAccepted,
    RequestProcessingError,
    ResponseNotAccepted,
    ResponseProcessingError,
}

impl ProblemCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProblemCode::RequestNotAccepted => "request_not_accepted",
            ProblemCode::RequestProcessingError => "request_processing_error",
            ProblemCode::ResponseNotAccepted => "response_not_accepted",
            ProblemCode::ResponseProcessingError => "response_processing_error",
        }
    }

    /// Classify an error raised while handling a request (`responding == false`)
    /// or a response (`responding == true`)
    pub fn classify(error: &Error, responding: bool) -> Self {
        match (responding, error.is_rejection()) {
            (false, true) => ProblemCode::RequestNotAccepted,
            (false, false) => ProblemCode::RequestProcessingError,
            (true, true) => ProblemCode::ResponseNotAccepted,
            (true, false) => ProblemCode::ResponseProcessingError,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemReport {
    #[serde(flatten)]
    pub header: Header,
    #[serde(rename = "problem-code")]
    pub problem_code: String,
    #[serde(default)]
    pub explain: String,
}

impl ProblemReport {
    pub fn new(version: Version, thid: &str, code: ProblemCode, explain: &str) -> Self {
        let message_type = match version {
            Version::Legacy => MessageType::ConnectionProblemReport,
            Version::Current => MessageType::ExchangeProblemReport,
        };

        Self {
            header: Header::new(message_type).with_thread(thid),
            problem_code: code.as_str().to_string(),
            explain: explain.to_string(),
        }
    }
}
