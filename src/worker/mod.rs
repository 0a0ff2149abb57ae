//! Worker process supervision and line-delimited JSON stream handling.
//!
//! One supervised worker talks to this crate over its standard streams:
//! commands go to stdin as NDJSON, output comes back on stdout and stderr
//! as lines that are framed, decoded and delivered as ordered events.
//!
//! Submodules:
//! - `framer`: chunk-to-line framing with a bounded pending fragment.
//! - `decoder`: line-to-[`ProtocolMessage`](crate::models::message::ProtocolMessage)
//!   decoding for each protocol variant.
//! - `codec`: [`LinesCodec`](tokio_util::codec::LinesCodec)-based command encoder.
//! - `writer`: the command channel to the worker's stdin.
//! - `reader`: async read task forwarding raw chunks from one stream.
//! - `spawner`: process launch and exit monitoring.
//! - `supervisor`: the lifecycle state machine and its request handle.

pub mod codec;
pub mod decoder;
pub mod framer;
pub mod reader;
pub mod spawner;
pub mod supervisor;
pub mod writer;
