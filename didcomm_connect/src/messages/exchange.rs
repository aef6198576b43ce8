use serde::{Deserialize, Serialize};

use super::{Header, MessageType};
use crate::attachment::Attachment;

/// Current request: the invitee's DID and its signed document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRequest {
    #[serde(flatten)]
    pub header: Header,
    #[serde(default)]
    pub label: String,
    pub did: String,
    #[serde(rename = "did_doc~attach", default, skip_serializing_if = "Option::is_none")]
    pub did_doc_attach: Option<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeResponse {
    #[serde(flatten)]
    pub header: Header,
    pub did: String,
    #[serde(rename = "did_doc~attach", default, skip_serializing_if = "Option::is_none")]
    pub did_doc_attach: Option<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Complete {
    #[serde(flatten)]
    pub header: Header,
}

impl ExchangeRequest {
    pub fn new(thid: &str, pthid: &str, label: &str, did: &str, attachment: Attachment) -> Self {
        Self {
            header: Header::new(MessageType::ExchangeRequest)
                .with_thread(thid)
                .with_parent_thread(pthid),
            label: label.to_string(),
            did: did.to_string(),
            did_doc_attach: Some(attachment),
        }
    }
}

impl ExchangeResponse {
    pub fn new(thid: &str, did: &str, attachment: Attachment) -> Self {
        Self {
            header: Header::new(MessageType::ExchangeResponse).with_thread(thid),
            did: did.to_string(),
            did_doc_attach: Some(attachment),
        }
    }
}

impl Complete {
    pub fn new(thid: &str, pthid: Option<&str>) -> Self {
        let header = Header::new(MessageType::ExchangeComplete).with_thread(thid);

        Self {
            header: match pthid {
                Some(pthid) => header.with_parent_thread(pthid),
                None => header,
            },
        }
    }
}
