//! Stream naming.
//!
//! A stream name is a pure function of the aggregate kind, partition, bucket,
//! id and ordered parents. OOB channels are sharded into physical partitions
//! named `{oob stream}-{channel}.{n}` with `n` in `1..=shards`.

use crate::event::StreamType;
use crate::id::Id;
use std::fmt::Write;
use std::sync::Arc;

/// The logical address of a stream.
#[derive(Debug, Clone, Copy)]
pub struct StreamKey<'a> {
    /// The aggregate kind, see [`EventSource::NAME`](crate::EventSource::NAME).
    pub kind: &'a str,
    /// Domain or OOB partition.
    pub stream_type: StreamType,
    /// The bucket (tenant / namespace) the stream lives in.
    pub bucket: &'a str,
    /// The stream id.
    pub id: &'a Id,
    /// Ordered parent ids, outermost first.
    pub parents: &'a [Id],
}

/// Generates the physical name of a stream.
pub type StreamNamer = Arc<dyn Fn(&StreamKey<'_>) -> String + Send + Sync>;

/// The default naming scheme: `{bucket}.{kind}[.OOB][.{parent}...].{id}`.
pub fn default_stream_name(key: &StreamKey<'_>) -> String {
    let mut name = format!("{}.{}", key.bucket, key.kind);
    if key.stream_type == StreamType::Oob {
        name.push_str(".OOB");
    }
    for parent in key.parents {
        let _ = write!(name, ".{parent}");
    }
    let _ = write!(name, ".{}", key.id);
    name
}

/// Returns the default [`StreamNamer`].
pub fn default_namer() -> StreamNamer {
    Arc::new(default_stream_name)
}

/// Name of one physical shard of an OOB channel.
pub fn oob_partition_name(oob_stream: &str, channel: &str, shard: usize) -> String {
    format!("{oob_stream}-{channel}.{shard}")
}
