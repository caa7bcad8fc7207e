//! pkt-line framing: Git's length-prefixed wire format.

use thiserror::Error;

/// Largest payload a data pkt-line can carry: `0xffff` minus the four-byte
/// length prefix.
pub const MAX_PKT_PAYLOAD: usize = 65516;

const FLUSH_PKT: &[u8] = b"0000";
const DELIM_PKT: &[u8] = b"0001";
const RESPONSE_END_PKT: &[u8] = b"0002";

/// One frame of a pkt-line stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pkt {
    Data(Vec<u8>),
    Flush,
    Delim,
    ResponseEnd,
    /// Wire length `0003`, reserved by the protocol. Parsed, never emitted.
    Reserved,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed pkt-line length prefix '{0}'")]
pub struct BadLengthPrefix(String);

impl Pkt {
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Pkt::Data(payload) => {
                assert!(
                    payload.len() <= MAX_PKT_PAYLOAD,
                    "pkt-line payload of {} bytes exceeds the wire limit",
                    payload.len()
                );
                out.extend_from_slice(format!("{:04x}", payload.len() + 4).as_bytes());
                out.extend_from_slice(payload);
            }
            Pkt::Flush => out.extend_from_slice(FLUSH_PKT),
            Pkt::Delim => out.extend_from_slice(DELIM_PKT),
            Pkt::ResponseEnd => out.extend_from_slice(RESPONSE_END_PKT),
            Pkt::Reserved => panic!("the reserved pkt-line marker is never emitted"),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }
}

/// Frame `data` as a single data pkt-line.
pub fn encode_pkt_line(data: &[u8]) -> Vec<u8> {
    Pkt::Data(data.to_vec()).encode()
}

/// Decode as many complete pkt-lines as `data` holds, returning them together
/// with the undecoded tail. A truncated final frame is not an error: it comes
/// back as the remainder so the caller can resume once more bytes arrive.
pub fn decode_pkt_lines(data: &[u8]) -> Result<(Vec<Pkt>, &[u8]), BadLengthPrefix> {
    let mut pkts = Vec::new();
    let mut offset = 0;
    loop {
        let Some(prefix) = data.get(offset..offset + 4) else {
            return Ok((pkts, &data[offset..]));
        };
        let len = parse_length(prefix)?;
        match len {
            0 => pkts.push(Pkt::Flush),
            1 => pkts.push(Pkt::Delim),
            2 => pkts.push(Pkt::ResponseEnd),
            3 => pkts.push(Pkt::Reserved),
            _ => {
                let Some(payload) = data.get(offset + 4..offset + len) else {
                    return Ok((pkts, &data[offset..]));
                };
                pkts.push(Pkt::Data(payload.to_vec()));
                offset += len;
                continue;
            }
        }
        offset += 4;
    }
}

fn parse_length(prefix: &[u8]) -> Result<usize, BadLengthPrefix> {
    let bad = || BadLengthPrefix(String::from_utf8_lossy(prefix).into_owned());
    let hex = std::str::from_utf8(prefix).map_err(|_| bad())?;
    usize::from_str_radix(hex, 16).map_err(|_| bad())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_data_pkt() {
        let pkt = Pkt::Data(b"hello\n".to_vec());
        let enc = pkt.encode();
        assert_eq!(&enc[..4], b"000a");
        let (pkts, tail) = decode_pkt_lines(&enc).unwrap();
        assert_eq!(pkts, vec![pkt]);
        assert!(tail.is_empty());
    }

    #[test]
    fn roundtrip_control_pkts() {
        for pkt in [Pkt::Flush, Pkt::Delim, Pkt::ResponseEnd] {
            let encoded = pkt.encode();
            let (pkts, tail) = decode_pkt_lines(&encoded).unwrap();
            assert_eq!(pkts, vec![pkt]);
            assert!(tail.is_empty());
        }
    }

    #[test]
    fn reserved_marker_is_decoded() {
        let (pkts, tail) = decode_pkt_lines(b"0003").unwrap();
        assert_eq!(pkts, vec![Pkt::Reserved]);
        assert!(tail.is_empty());
    }

    #[test]
    fn length_prefix_is_lowercase_hex() {
        let pkt = Pkt::Data(vec![b'x'; 0xab]);
        let enc = pkt.encode();
        assert_eq!(&enc[..4], b"00af");
    }

    #[test]
    fn decode_is_lossless() {
        let mut buf = Vec::new();
        Pkt::Data(b"command=ls-refs\n".to_vec()).encode_into(&mut buf);
        Pkt::Delim.encode_into(&mut buf);
        Pkt::Data(b"ref-prefix refs/heads/\n".to_vec()).encode_into(&mut buf);
        Pkt::Flush.encode_into(&mut buf);
        buf.extend_from_slice(b"00");

        let (pkts, tail) = decode_pkt_lines(&buf).unwrap();
        let mut rebuilt = Vec::new();
        for pkt in &pkts {
            pkt.encode_into(&mut rebuilt);
        }
        rebuilt.extend_from_slice(tail);
        assert_eq!(rebuilt, buf);
        assert_eq!(tail, b"00");
    }

    #[test]
    fn truncated_data_frame_is_remainder() {
        let enc = encode_pkt_line(b"0123456789");
        let (pkts, tail) = decode_pkt_lines(&enc[..8]).unwrap();
        assert!(pkts.is_empty());
        assert_eq!(tail, &enc[..8]);
    }

    #[test]
    fn decode_resumes_across_splits() {
        let mut buf = Vec::new();
        Pkt::Data(b"first\n".to_vec()).encode_into(&mut buf);
        Pkt::Data(b"second\n".to_vec()).encode_into(&mut buf);
        Pkt::Flush.encode_into(&mut buf);
        let (expected, _) = decode_pkt_lines(&buf).unwrap();

        for split in 0..buf.len() {
            let (mut pkts, tail) = decode_pkt_lines(&buf[..split]).unwrap();
            let mut rest = tail.to_vec();
            rest.extend_from_slice(&buf[split..]);
            let (more, tail) = decode_pkt_lines(&rest).unwrap();
            pkts.extend(more);
            assert_eq!(pkts, expected, "split at {split}");
            assert!(tail.is_empty(), "split at {split}");
        }
    }

    #[test]
    fn malformed_length_prefix_is_an_error() {
        assert!(decode_pkt_lines(b"zzzz").is_err());
        assert!(decode_pkt_lines(b"00g4data").is_err());
    }

    #[test]
    fn empty_data_pkt_is_valid() {
        let (pkts, tail) = decode_pkt_lines(b"0004").unwrap();
        assert_eq!(pkts, vec![Pkt::Data(Vec::new())]);
        assert!(tail.is_empty());
    }

    #[test]
    #[should_panic]
    fn overlong_payload_is_rejected() {
        Pkt::Data(vec![0; MAX_PKT_PAYLOAD + 1]).encode();
    }
}
