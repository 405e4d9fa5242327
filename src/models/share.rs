use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// One stored share event: the unit of handoff between the interceptor
/// and whichever page later claims it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareRecord {
    pub id: String,
    pub title: Option<String>,
    pub text: Option<String>,
    pub shared_url: Option<String>,
    pub files: Vec<ShareFile>,
    /// Capture time in unix milliseconds. Used only for expiry.
    pub timestamp: i64,
}

/// A shared attachment in its serialized form. The raw bytes are carried
/// inline because the record has to survive a store/retrieve round trip
/// across contexts that cannot pass live file handles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareFile {
    pub name: String,
    #[serde(rename = "type")]
    pub mime: String,
    pub size: i64,
    pub data: Vec<u8>,
}

/// Share fields as extracted from an inbound request, before an id and
/// timestamp have been assigned.
#[derive(Debug, Clone, Default)]
pub struct SharePayload {
    pub title: Option<String>,
    pub text: Option<String>,
    pub shared_url: Option<String>,
    pub files: Vec<ShareFile>,
}

/// Client-normalized shape handed to the transaction-entry UI after any
/// retrieval path succeeds. Page-lifetime, in-memory only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SharedDataView {
    pub title: Option<String>,
    pub text: Option<String>,
    pub url: Option<String>,
    pub images: Vec<SharedImage>,
}

/// A reconstructed, live attachment handle built from a deserialized
/// [`ShareFile`].
#[derive(Debug, Clone, PartialEq)]
pub struct SharedImage {
    pub name: String,
    pub mime: String,
    pub bytes: Bytes,
}

impl SharedDataView {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.text.is_none() && self.url.is_none() && self.images.is_empty()
    }
}

impl From<ShareRecord> for SharedDataView {
    fn from(record: ShareRecord) -> Self {
        SharedDataView {
            title: record.title,
            text: record.text,
            url: record.shared_url,
            images: record
                .files
                .into_iter()
                .map(|f| SharedImage {
                    name: f.name,
                    mime: f.mime,
                    bytes: Bytes::from(f.data),
                })
                .collect(),
        }
    }
}
