//! RTP payload format for JPEG 2000 codestreams, per RFC 5371/5372.
//!
//! This module fragments a complete J2K codestream into RTP-sized packets
//! on the way out (`payload`) and reassembles them on the way in
//! (`Depayloader`). The wire header and J2K marker grammar live in
//! `header` and `markers`; the byte-accumulator shared by both directions
//! lives in `buffer`.

mod buffer;
mod depayloader;
mod header;
mod markers;
mod payloader;

pub use buffer::ByteQueue;
pub use depayloader::{DepayloadError, Depayloader, MH_SLOTS};
pub use header::{J2kHeader, MainHeaderFragment};
pub use payloader::{payload, J2kPacket, PayloadError, DEFAULT_MTU};

/// RTP J2K payload header size in bytes (RFC 5371 Section 3).
pub const RTP_J2K_HEADER_SIZE: usize = J2kHeader::SIZE;
