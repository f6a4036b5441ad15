use std::fmt::Display;

use tracing::warn;

/// First byte of the two-byte header prefixing traffic for a multiplexed
/// child device. The second byte is the channel letter.
pub const MUX_HEADER_MARKER: u8 = b'^';

/// Longest line accepted before the receive buffer is discarded.
const MAX_FRAME_SIZE: usize = 1024;

/// Address of one multiplexed child device. The hub routes child traffic on
/// channels `A` (0x41) through `T` (0x54).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MuxChannel(u8);

impl MuxChannel {
    pub const FIRST_ADDRESS: u8 = 0x41;
    pub const LAST_ADDRESS: u8 = 0x54;

    pub fn new(address: u8) -> Option<Self> {
        (Self::FIRST_ADDRESS..=Self::LAST_ADDRESS)
            .contains(&address)
            .then_some(Self(address))
    }

    /// All 20 child channels in address order.
    pub fn all() -> impl Iterator<Item = Self> {
        (Self::FIRST_ADDRESS..=Self::LAST_ADDRESS).map(Self)
    }

    pub fn address(&self) -> u8 {
        self.0
    }

    pub fn letter(&self) -> char {
        char::from(self.0)
    }
}

impl Display for MuxChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// One complete line received from the hub, attributed either to the hub
/// itself (`channel: None`) or to a child channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub channel: Option<MuxChannel>,
    pub payload: String,
}

/// Encodes one outbound line, prefixing the mux header for child traffic.
pub fn encode(channel: Option<MuxChannel>, payload: &str) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 3);
    if let Some(channel) = channel {
        frame.push(MUX_HEADER_MARKER);
        frame.push(channel.address());
    }
    frame.extend_from_slice(payload.as_bytes());
    frame.push(b'\n');
    frame
}

/// Splits a raw byte stream into newline-terminated frames. Bytes after the
/// last newline are held until the next push.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        for &byte in bytes {
            if byte == b'\n' {
                if let Some(frame) = decode_line(&self.buffer) {
                    frames.push(frame);
                }
                self.buffer.clear();
                continue;
            }
            self.buffer.push(byte);
            if self.buffer.len() > MAX_FRAME_SIZE {
                warn!("Receive buffer overrun. Discarding {} bytes.", self.buffer.len());
                self.buffer.clear();
            }
        }
        frames
    }
}

fn decode_line(line: &[u8]) -> Option<Frame> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    if line.is_empty() {
        return None;
    }
    if line.len() >= 2 && line[0] == MUX_HEADER_MARKER {
        if let Some(channel) = MuxChannel::new(line[1]) {
            return Some(Frame {
                channel: Some(channel),
                payload: String::from_utf8_lossy(&line[2..]).into_owned(),
            });
        }
    }
    Some(Frame {
        channel: None,
        payload: String::from_utf8_lossy(line).into_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(address: u8) -> MuxChannel {
        MuxChannel::new(address).unwrap()
    }

    #[test]
    fn test_channel_range() {
        assert!(MuxChannel::new(0x40).is_none());
        assert!(MuxChannel::new(0x55).is_none());
        assert_eq!(channel(0x41).letter(), 'A');
        assert_eq!(channel(0x54).letter(), 'T');
        assert_eq!(MuxChannel::all().count(), 20);
    }

    #[test]
    fn test_encode_child_frame() {
        assert_eq!(
            encode(Some(channel(0x41)), "{\"ping\":null}"),
            b"^A{\"ping\":null}\n"
        );
    }

    #[test]
    fn test_encode_hub_frame() {
        assert_eq!(encode(None, "{\"save\":null}"), b"{\"save\":null}\n");
    }

    #[test]
    fn test_decode_routes_by_header() {
        let mut decoder = FrameDecoder::default();
        let frames = decoder.push(b"^B{\"apply\":null}\n{\"serial_number\":\"Unknown\"}\n");
        assert_eq!(
            frames,
            vec![
                Frame {
                    channel: Some(channel(0x42)),
                    payload: "{\"apply\":null}".to_string(),
                },
                Frame {
                    channel: None,
                    payload: "{\"serial_number\":\"Unknown\"}".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_decode_across_split_reads() {
        let mut decoder = FrameDecoder::default();
        assert!(decoder.push(b"^TI,1,0,0").is_empty());
        let frames = decoder.push(b",0,0,0,0\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].channel, Some(channel(0x54)));
        assert_eq!(frames[0].payload, "I,1,0,0,0,0,0,0");
    }

    #[test]
    fn test_decode_skips_blank_lines() {
        let mut decoder = FrameDecoder::default();
        assert!(decoder.push(b"\r\n\n").is_empty());
    }

    #[test]
    fn test_invalid_header_letter_is_hub_traffic() {
        let mut decoder = FrameDecoder::default();
        let frames = decoder.push(b"^z{\"x\":null}\n");
        assert_eq!(frames[0].channel, None);
        assert_eq!(frames[0].payload, "^z{\"x\":null}");
    }
}
