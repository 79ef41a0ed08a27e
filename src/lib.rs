//! RTP payloader/depayloader for JPEG 2000 codestreams (RFC 5371/5372)
//!
//! This library provides bit-exact RFC 5371 packetization and reassembly:
//! - Zero-copy packet construction and reassembly using `bytes::Bytes`
//! - A scanning payloader that fragments a complete J2K codestream into
//!   MTU-sized RTP payloads
//! - A depayloader that reassembles codestreams from packets arriving in
//!   order, tolerating loss by resynchronizing at the next SOP/SOT/SOC
//!
//! # Example
//!
//! ```
//! use rust_j2k_rtp::rtp::{payload, Depayloader};
//!
//! // SOC, a tiny SIZ segment, one SOT/SOD tile-part, EOC.
//! let codestream: &[u8] = &[
//!     0xFF, 0x4F,
//!     0xFF, 0x51, 0x00, 0x04, 0xAA, 0xBB,
//!     0xFF, 0x90, 0x00, 0x0A, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01,
//!     0xFF, 0x93, 1, 2, 3, 4, 5,
//!     0xFF, 0xD9,
//! ];
//! let packets = payload(codestream, 0, 1500).unwrap();
//! let mut depay = Depayloader::new();
//! for p in &packets {
//!     let _frames = depay.ingest(&p.to_bytes(), p.timestamp, p.marker);
//! }
//! ```

pub mod config;
pub mod rtp;

pub use rtp::{
    payload, Depayloader, DepayloadError, J2kHeader, J2kPacket, MainHeaderFragment, PayloadError,
};
