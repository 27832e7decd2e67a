//! Stored events and their descriptors.

use crate::types::StreamVersion;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Ordered string headers carried by events, commits and messages.
pub type Headers = BTreeMap<String, String>;

/// Header naming the OOB channel an event belongs to.
pub const OOB_CHANNEL_HEADER: &str = "streamstore.oob-channel";

/// Header marking a message as part of a bulk drain of the named channel key.
pub const CHANNEL_KEY_HEADER: &str = "streamstore.channel-key";

/// Which partition of a stream an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamType {
    /// The aggregate's primary, permanent event log.
    Domain,
    /// An out-of-band side channel.
    #[serde(rename = "OOB")]
    Oob,
}

impl StreamType {
    /// The tag used for this partition in stream names.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Domain => "DOMAIN",
            Self::Oob => "OOB",
        }
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything about a stored event except its payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDescriptor {
    /// Version of the event within its stream.
    pub version: StreamVersion,
    /// Domain or OOB.
    pub stream_type: StreamType,
    /// Event headers, including [`OOB_CHANNEL_HEADER`] for OOB events.
    pub headers: Headers,
    /// The commit that wrote this event, once written.
    pub commit_id: Option<Uuid>,
}

impl EventDescriptor {
    /// Returns the OOB channel named in the headers, if any.
    pub fn oob_channel(&self) -> Option<&str> {
        self.headers.get(OOB_CHANNEL_HEADER).map(String::as_str)
    }
}

/// A stored (or about to be stored) event: descriptor plus payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullEvent {
    /// The event id, assigned at write time.
    pub event_id: Option<Uuid>,
    /// Version, partition, headers and commit.
    pub descriptor: EventDescriptor,
    /// The serialized event body.
    pub payload: serde_json::Value,
}

/// Derives the id of the `sequence`th event written by `commit_id`.
///
/// The same commit and sequence always yield the same id, so retrying a
/// commit produces identical event ids.
pub fn event_id_for(commit_id: Uuid, sequence: u32) -> Uuid {
    Uuid::from_u128(commit_id.as_u128().wrapping_add(u128::from(sequence)))
}
