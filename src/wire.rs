//! Packet header encoding/decoding and multi-part fragmentation.

use crate::error::Error;

/// Maximum amount of payload bytes that fits into a single fragment.
pub const MAX_PAYLOAD: usize = 1400;

/// Maximum size, header included, of any single wire datagram.
pub const MAX_DATAGRAM: usize = 1450;

pub(crate) type SeqId = u8;

/// Packet type tags, as laid out on the wire.
pub struct Type;

#[rustfmt::skip]
impl Type {
    pub const INIT: u8          = 1;
    pub const INIT_ACK: u8       = 2;
    pub const INIT_FIN: u8       = 3;
    pub const NON_RELIABLE: u8   = 10;
    pub const RELIABLE: u8       = 11;
    pub const MULTI: u8          = 12;
    pub const ACK: u8            = 20;
    pub const PING: u8           = 25;
    pub const PING_ACK: u8       = 26;
    pub const DISCONNECT: u8     = 30;
}

/// Returns the length of the fixed header for a given packet type, or `None`
/// if the type is outside `[INIT .. DISCONNECT]`.
pub fn header_len(packet_type: u8) -> Option<usize> {
    match packet_type {
        Type::NON_RELIABLE
        | Type::INIT
        | Type::INIT_ACK
        | Type::INIT_FIN
        | Type::PING
        | Type::PING_ACK
        | Type::DISCONNECT => Some(1),
        Type::RELIABLE | Type::ACK => Some(2),
        Type::MULTI => Some(3),
        _ => None,
    }
}

/// Splits a raw datagram into its header bytes and payload bytes.
pub fn split_header(pkt: &[u8]) -> Result<(&[u8], &[u8]), Error> {
    let packet_type = *pkt.first().ok_or(Error::MalformedPacket("empty packet"))?;
    let len = header_len(packet_type).ok_or(Error::MalformedPacket("unknown packet type"))?;
    if pkt.len() < len {
        return Err(Error::MalformedPacket("header too short"));
    }
    Ok((&pkt[.. len], &pkt[len ..]))
}

/// Splits an outbound payload into one or more `MULTI` fragments wrapping
/// `inner_header`. Always produces at least one fragment, even for an empty
/// payload.
pub fn fragment(inner_header: &[u8], payload: &[u8]) -> Vec<Vec<u8>> {
    let total_parts = payload.len().div_ceil(MAX_PAYLOAD).max(1);

    (0 .. total_parts)
        .map(|i| {
            let start = i * MAX_PAYLOAD;
            let stop = ((i + 1) * MAX_PAYLOAD).min(payload.len());

            let mut buf = Vec::with_capacity(3 + inner_header.len() + (stop - start));
            buf.push(Type::MULTI);
            buf.push(total_parts as u8);
            buf.push((i + 1) as u8);
            buf.extend_from_slice(inner_header);
            buf.extend_from_slice(&payload[start .. stop]);
            buf
        })
        .collect()
}

/// Reassembly state for the single in-flight multi-part stream a connection
/// may be receiving from its peer at any given time.
pub struct MultiBuf {
    total_parts: u8,
    inner_header: Vec<u8>,
    slots: Vec<Option<Vec<u8>>>,
}

/// Feeds one `MULTI` fragment's body (everything after the 3-byte
/// `[MULTI, total, index]` header, i.e. the repeated inner header plus this
/// fragment's payload slice) into the connection's reassembly slot.
///
/// Returns the reassembled inner packet (header + payload) once every slot
/// has been filled, resetting `state` in the process. A fragment carrying a
/// `total_parts` that conflicts with an in-progress stream overwrites it,
/// per the single-slot-per-connection design (see design notes).
pub fn reassemble(
    state: &mut Option<MultiBuf>,
    total_parts: u8,
    part_index: u8,
    body: &[u8],
) -> Result<Option<Vec<u8>>, Error> {
    if part_index == 0 || part_index > total_parts {
        return Err(Error::MalformedPacket("multi-part index out of range"));
    }

    let (inner_header, chunk) = split_header(body)?;

    let needs_reset = match state {
        Some(buf) => buf.total_parts != total_parts,
        None => true,
    };

    if needs_reset {
        *state = Some(MultiBuf {
            total_parts,
            inner_header: inner_header.to_vec(),
            slots: vec![None; total_parts as usize],
        });
    }

    let buf = state.as_mut().unwrap();
    let index = (part_index - 1) as usize;
    buf.slots[index] = Some(chunk.to_vec());

    if buf.slots.iter().all(Option::is_some) {
        let MultiBuf {
            inner_header,
            mut slots,
            ..
        } = state.take().unwrap();

        let mut out = inner_header;
        for slot in slots.iter_mut() {
            out.extend_from_slice(slot.take().unwrap().as_slice());
        }
        return Ok(Some(out));
    }

    Ok(None)
}

/// Builds a full datagram out of a header and body, transmitting it whole if
/// it fits in a single datagram, or splitting it into `MULTI` fragments
/// otherwise.
pub fn frame(header: &[u8], body: &[u8]) -> Vec<Vec<u8>> {
    let total = header.len() + body.len();
    if total <= MAX_DATAGRAM {
        let mut buf = Vec::with_capacity(total);
        buf.extend_from_slice(header);
        buf.extend_from_slice(body);
        vec![buf]
    } else {
        fragment(header, body)
    }
}
