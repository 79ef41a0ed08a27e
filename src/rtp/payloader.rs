//! RTP/J2K payloader — packetization-unit scanning and MTU fragmentation
//! (RFC 5371 Section 4, spec Section 4.1).

use bytes::Bytes;
use thiserror::Error;
use tracing::warn;

use super::header::{J2kHeader, MainHeaderFragment};
use super::markers;

/// Default MTU used when the caller has no stronger opinion.
pub const DEFAULT_MTU: usize = 1500;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PayloadError {
    #[error("empty codestream")]
    EmptyCodestream,
    #[error("invalid MTU: {0} (must be greater than the {1}-byte header)")]
    InvalidMtu(usize, usize),
}

/// One packetized RTP/J2K packet: the 8-byte payload header, the codestream
/// slice it carries, and whether the RTP marker bit is set.
///
/// The caller attaches the RTP-layer fields (sequence number, SSRC, the
/// generic 12-byte RTP header) — out of scope for this crate. `timestamp` is
/// carried here purely so a `Depayloader` can be fed directly from this
/// packet list without the caller re-threading it through.
#[derive(Debug, Clone)]
pub struct J2kPacket {
    pub header: J2kHeader,
    pub payload: Bytes,
    pub marker: bool,
    pub timestamp: u32,
}

impl J2kPacket {
    /// Serializes the 8-byte payload header followed by the payload bytes.
    pub fn to_bytes(&self) -> Bytes {
        let mut out = Vec::with_capacity(J2kHeader::SIZE + self.payload.len());
        out.extend_from_slice(&self.header.to_bytes());
        out.extend_from_slice(&self.payload);
        Bytes::from(out)
    }
}

/// Scan cursor over the codestream (spec Section 3.3).
#[derive(Debug, Default)]
struct ScannerState {
    bitstream: bool,
    n_tiles: u32,
    next_sot: usize,
    force_packet: bool,
    /// Armed after SOD/a PU's own leading SOP; the next SOP ends the PU.
    cut_sop: bool,
    mhf: MainHeaderFragment,
    tile: u16,
    tile_invalid: bool,
}

impl ScannerState {
    fn new() -> Self {
        Self {
            tile_invalid: true,
            ..Default::default()
        }
    }
}

/// Advances the scan cursor from `start` to the next legal PU boundary.
///
/// Returns the offset where the current packetization unit should end.
/// Malformed length prefixes make the scanner bail by returning `data.len()`
/// (spec Section 4.1.3): the remaining bytes become one final packet instead
/// of aborting the stream.
fn scan_boundary(data: &[u8], start: usize, state: &mut ScannerState) -> usize {
    let size = data.len();
    let mut pos = start;

    loop {
        if pos >= size {
            return size;
        }

        if !state.bitstream {
            let marker = match markers::is_marker(data, pos) {
                Some(m) => m,
                None => return size, // not positioned on a marker: malformed, bail
            };
            let after = pos + 2;

            match marker {
                markers::SOC => {
                    state.mhf = MainHeaderFragment::Start;
                    pos = after;
                }
                markers::SOT => {
                    if state.mhf != MainHeaderFragment::None {
                        state.force_packet = true;
                        return pos;
                    }
                    if after + 8 > size {
                        warn!("SOT segment runs past end of codestream, bailing");
                        return size;
                    }
                    let lsot = markers::be16(data, after) as usize;
                    if lsot < 8 || after + lsot >= size {
                        warn!(lsot, "malformed Lsot, bailing");
                        return size;
                    }
                    state.tile_invalid = state.n_tiles != 0;
                    state.tile = markers::be16(data, after + 2);
                    let psot = markers::be32(data, after + 4);
                    state.next_sot = if psot == 0 {
                        size
                    } else {
                        pos + psot as usize
                    };
                    state.n_tiles += 1;
                    pos = after + lsot;
                }
                markers::SOD => {
                    state.n_tiles = 0;
                    state.bitstream = true;
                    state.cut_sop = true;
                    state.force_packet = true;
                    return after;
                }
                markers::EOC => {
                    return pos;
                }
                _ => {
                    if after + 2 > size {
                        return size;
                    }
                    let length = markers::be16(data, after) as usize;
                    pos = after + length;
                }
            }
        } else {
            if pos >= state.next_sot {
                state.bitstream = false;
                state.force_packet = true;
                return if markers::is_eoc_at(data, state.next_sot) {
                    state.next_sot + 2
                } else {
                    state.next_sot
                };
            }

            match markers::is_marker(data, pos) {
                Some(markers::SOP) => {
                    if state.cut_sop {
                        state.cut_sop = false;
                        return pos;
                    }
                    state.cut_sop = true;
                    pos += 2;
                }
                Some(markers::EPH) => {
                    pos += 2;
                }
                _ => {
                    pos += 1;
                }
            }
        }
    }
}

/// Fragments a complete JPEG 2000 codestream into MTU-sized RTP/J2K packets.
///
/// `timestamp` is carried through to every emitted [`J2kPacket`] for
/// convenience (see its docs) but is not itself encoded by the payload
/// header. The payloader retains no state across calls (spec Section 5).
pub fn payload(
    codestream: &[u8],
    timestamp: u32,
    mtu: usize,
) -> Result<Vec<J2kPacket>, PayloadError> {
    if mtu <= J2kHeader::SIZE {
        return Err(PayloadError::InvalidMtu(mtu, J2kHeader::SIZE));
    }
    if codestream.is_empty() {
        return Err(PayloadError::EmptyCodestream);
    }

    let max_payload = mtu - J2kHeader::SIZE;
    let size = codestream.len();
    let mut packets = Vec::new();
    let mut state = ScannerState::new();
    let mut offset = 0usize;

    while offset < size {
        state.force_packet = false;
        let (chunk_end, header_fields) = accumulate_pu_run(codestream, offset, max_payload, &mut state);

        let mut cur = offset;
        while cur < chunk_end {
            let data_size = (chunk_end - cur).min(max_payload);
            let is_last_in_run = cur + data_size >= chunk_end;

            let mut mhf = if cur == offset {
                header_fields.mhf
            } else {
                MainHeaderFragment::None
            };
            if is_last_in_run && header_fields.mhf.is_header() {
                mhf = if offset == 0 {
                    MainHeaderFragment::Entire
                } else {
                    MainHeaderFragment::End
                };
            }

            let header = J2kHeader {
                tp: 0,
                mhf,
                mh_id: 0,
                tile_invalid: header_fields.tile_invalid,
                priority: J2kHeader::DEFAULT_PRIORITY,
                tile: header_fields.tile,
                offset: cur as u32,
            };

            let marker = cur + data_size >= size;
            packets.push(J2kPacket {
                header,
                payload: Bytes::copy_from_slice(&codestream[cur..cur + data_size]),
                marker,
                timestamp,
            });

            cur += data_size;
        }

        offset = chunk_end;
    }

    Ok(packets)
}

struct PuHeaderFields {
    mhf: MainHeaderFragment,
    tile: u16,
    tile_invalid: bool,
}

/// Runs the scanner to gather as many PUs as fit under `max_payload`,
/// rolling back to the last confirmed PU boundary on overflow (spec
/// Section 4.1.2 step 1).
fn accumulate_pu_run(
    data: &[u8],
    offset: usize,
    max_payload: usize,
    state: &mut ScannerState,
) -> (usize, PuHeaderFields) {
    let size = data.len();
    let mut pos = offset;
    let mut end = offset;

    loop {
        if end == size {
            break;
        }
        let candidate = scan_boundary(data, end, state);
        let accumulated = candidate - offset;

        if accumulated > max_payload {
            end = if pos != offset { pos } else { offset + max_payload };
            break;
        }

        pos = candidate;
        end = candidate;

        if state.force_packet || end == size {
            break;
        }
    }

    // Header fields reflect whatever the scan above just parsed (SOC's MHF,
    // or a freshly-read Isot/T) — capture before resetting for next time.
    let fields = PuHeaderFields {
        mhf: state.mhf,
        tile: state.tile,
        tile_invalid: state.tile_invalid,
    };

    // Reset per-packet header fields for the next accumulation run.
    state.mhf = MainHeaderFragment::None;
    state.tile_invalid = true;
    state.tile = 0;

    (end, fields)
}
