// WebSocket frame codec (RFC 6455 subset)
//
// Text, ping/pong and close are all this server needs: clients never send
// application data, so there is no fragmentation reassembly or compression.
// The parser is incremental: it consumes exactly one frame from the front of
// an accumulating buffer, or leaves the buffer untouched when a frame is not
// complete yet, so frames may arrive split across reads or several per read.

/// A single parsed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
    /// Reserved opcodes are parsed and then ignored by the dispatcher.
    Reserved(u8),
}

impl Opcode {
    pub fn from_bits(bits: u8) -> Opcode {
        match bits & 0x0f {
            0x0 => Opcode::Continuation,
            0x1 => Opcode::Text,
            0x2 => Opcode::Binary,
            0x8 => Opcode::Close,
            0x9 => Opcode::Ping,
            0xA => Opcode::Pong,
            other => Opcode::Reserved(other),
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
            Opcode::Reserved(bits) => bits & 0x0f,
        }
    }
}

/// Parse one frame off the front of `buffer`, or return None when the buffer
/// does not yet hold a complete frame. Consumed bytes are removed; a None
/// leaves the buffer untouched so the caller can keep accumulating.
pub fn parse_frame(buffer: &mut Vec<u8>) -> Option<Frame> {
    if buffer.len() < 2 {
        return None;
    }
    let b1 = buffer[0];
    let b2 = buffer[1];
    let fin = b1 & 0x80 != 0;
    let opcode = Opcode::from_bits(b1);
    let masked = b2 & 0x80 != 0;
    let mut payload_len = (b2 & 0x7f) as usize;
    let mut offset = 2usize;

    if payload_len == 126 {
        if buffer.len() < 4 {
            return None;
        }
        payload_len = u16::from_be_bytes([buffer[2], buffer[3]]) as usize;
        offset = 4;
    } else if payload_len == 127 {
        if buffer.len() < 10 {
            return None;
        }
        // Only the low 32 bits of the 64-bit length are trusted; nothing in
        // this protocol legitimately exceeds that.
        payload_len = u32::from_be_bytes([buffer[6], buffer[7], buffer[8], buffer[9]]) as usize;
        offset = 10;
    }

    let mask = if masked {
        if buffer.len() < offset + 4 {
            return None;
        }
        let key = [
            buffer[offset],
            buffer[offset + 1],
            buffer[offset + 2],
            buffer[offset + 3],
        ];
        offset += 4;
        Some(key)
    } else {
        None
    };

    if buffer.len() < offset + payload_len {
        return None;
    }

    let mut payload = buffer[offset..offset + payload_len].to_vec();
    buffer.drain(..offset + payload_len);

    if let Some(key) = mask {
        apply_mask(&mut payload, key);
    }

    Some(Frame {
        fin,
        opcode,
        payload,
    })
}

/// The 4-byte rolling XOR mask; its own inverse.
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

/// Encode a server-to-client frame. Server frames are never masked.
pub fn encode_frame(payload: &[u8], opcode: Opcode) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 10);
    frame.push(0x80 | opcode.bits());
    let len = payload.len();
    if len <= 125 {
        frame.push(len as u8);
    } else if len <= 65535 {
        frame.push(126);
        frame.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        frame.push(127);
        frame.extend_from_slice(&(len as u64).to_be_bytes());
    }
    frame.extend_from_slice(payload);
    frame
}

/// Encode a close frame with a 2-byte big-endian status code prefix.
pub fn encode_close(code: u16, reason: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(2 + reason.len());
    payload.extend_from_slice(&code.to_be_bytes());
    payload.extend_from_slice(reason.as_bytes());
    encode_frame(&payload, Opcode::Close)
}

/// Client-side framing: client-to-server frames always carry a mask.
/// The server never sends masked frames; this exists for test clients.
pub fn encode_masked_frame(payload: &[u8], opcode: Opcode, key: [u8; 4]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 14);
    frame.push(0x80 | opcode.bits());
    let len = payload.len();
    if len <= 125 {
        frame.push(0x80 | len as u8);
    } else if len <= 65535 {
        frame.push(0x80 | 126);
        frame.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        frame.push(0x80 | 127);
        frame.extend_from_slice(&(len as u64).to_be_bytes());
    }
    frame.extend_from_slice(&key);
    let start = frame.len();
    frame.extend_from_slice(payload);
    apply_mask(&mut frame[start..], key);
    frame
}
