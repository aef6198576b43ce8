use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::MessageType;

/// Members every DIDComm message carries, composed into each message variant
///
/// Decorators this crate does not interpret are kept in `decorators` and
/// written back unchanged. Unknown members that are not decorators are dropped
/// on decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    #[serde(rename = "@type")]
    pub message_type: MessageType,
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "~thread", default, skip_serializing_if = "Option::is_none")]
    pub thread: Option<Thread>,
    #[serde(flatten)]
    pub decorators: BTreeMap<String, serde_json::Value>,
}

/// `~thread` decorator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pthid: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Header {
    /// Header with a fresh random message id
    pub fn new(message_type: MessageType) -> Self {
        Self {
            message_type,
            id: uuid::Uuid::new_v4().to_string(),
            thread: None,
            decorators: BTreeMap::new(),
        }
    }

    pub fn with_thread(mut self, thid: &str) -> Self {
        self.thread.get_or_insert_with(Thread::default).thid = Some(thid.to_string());
        self
    }

    pub fn with_parent_thread(mut self, pthid: &str) -> Self {
        self.thread.get_or_insert_with(Thread::default).pthid = Some(pthid.to_string());
        self
    }

    /// The thread this message belongs to; a message without `~thread.thid` starts
    /// a thread named after its own id
    pub fn thread_id(&self) -> &str {
        self.thread
            .as_ref()
            .and_then(|t| t.thid.as_deref())
            .unwrap_or(&self.id)
    }

    pub fn parent_thread_id(&self) -> Option<&str> {
        self.thread.as_ref().and_then(|t| t.pthid.as_deref())
    }

    /// Keep only `~`-prefixed members in `decorators`
    pub(crate) fn retain_decorators(&mut self) {
        self.decorators.retain(|name, _| name.starts_with('~'));
    }
}
