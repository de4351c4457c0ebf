//! Length-prefixed multipart framing for TCP endpoints.
//!
//! Wire format, all integers big-endian:
//!
//! ```text
//! u32 body_len | u16 frame_count | (u32 frame_len | frame_bytes)*
//! ```
//!
//! `body_len` counts everything after itself, so a decoder can reserve the
//! whole message before parsing frames.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::Frames;

/// Upper bound on a single message; a chunked transfer never needs more
/// than chunk_size plus small headers, so anything larger is hostile.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Codec turning a TCP byte stream into multipart messages.
#[derive(Debug, Default, Clone, Copy)]
pub struct MultipartCodec;

impl Decoder for MultipartCodec {
    type Item = Frames;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frames>, Self::Error> {
        if src.len() < 4 {
            return Ok(None);
        }
        let body_len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if body_len > MAX_MESSAGE_SIZE {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("message of {body_len} bytes exceeds limit"),
            ));
        }
        if src.len() < 4 + body_len {
            src.reserve(4 + body_len - src.len());
            return Ok(None);
        }
        src.advance(4);
        let mut body = src.split_to(body_len);
        if body.len() < 2 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "truncated frame count",
            ));
        }
        let frame_count = body.get_u16() as usize;
        let mut frames = Vec::with_capacity(frame_count);
        for _ in 0..frame_count {
            if body.len() < 4 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "truncated frame length",
                ));
            }
            let frame_len = body.get_u32() as usize;
            if body.len() < frame_len {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "truncated frame body",
                ));
            }
            frames.push(body.split_to(frame_len).freeze());
        }
        if !body.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "trailing bytes after final frame",
            ));
        }
        Ok(Some(frames))
    }
}

impl Encoder<Frames> for MultipartCodec {
    type Error = std::io::Error;

    fn encode(&mut self, frames: Frames, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body_len: usize = 2 + frames.iter().map(|f| 4 + f.len()).sum::<usize>();
        if body_len > MAX_MESSAGE_SIZE {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("message of {body_len} bytes exceeds limit"),
            ));
        }
        dst.reserve(4 + body_len);
        dst.put_u32(body_len as u32);
        dst.put_u16(frames.len() as u16);
        for frame in frames {
            dst.put_u32(frame.len() as u32);
            dst.put_slice(&frame);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn roundtrip(frames: Frames) -> Frames {
        let mut buf = BytesMut::new();
        MultipartCodec.encode(frames, &mut buf).expect("encode");
        MultipartCodec
            .decode(&mut buf)
            .expect("decode")
            .expect("complete message")
    }

    #[test]
    fn roundtrips_multiple_frames() {
        let frames = vec![
            Bytes::from_static(b"CHUNK"),
            Bytes::from_static(b"65536"),
            Bytes::from(vec![0u8; 1000]),
        ];
        assert_eq!(roundtrip(frames.clone()), frames);
    }

    #[test]
    fn roundtrips_empty_frame() {
        let frames = vec![Bytes::from_static(b"SENT"), Bytes::new()];
        assert_eq!(roundtrip(frames.clone()), frames);
    }

    #[test]
    fn partial_input_yields_none() {
        let mut buf = BytesMut::new();
        MultipartCodec
            .encode(vec![Bytes::from_static(b"HELLO")], &mut buf)
            .expect("encode");
        let mut partial = BytesMut::from(&buf[..buf.len() - 2]);
        assert!(MultipartCodec.decode(&mut partial).expect("decode").is_none());
    }

    #[test]
    fn oversized_message_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_MESSAGE_SIZE + 1) as u32);
        buf.put_u16(1);
        assert!(MultipartCodec.decode(&mut buf).is_err());
    }

    #[test]
    fn trailing_garbage_is_rejected() {
        let mut buf = BytesMut::new();
        // body: frame count 1, one empty frame, plus a stray byte.
        buf.put_u32(2 + 4 + 1);
        buf.put_u16(1);
        buf.put_u32(0);
        buf.put_u8(0xFF);
        assert!(MultipartCodec.decode(&mut buf).is_err());
    }

    #[test]
    fn two_messages_decode_in_sequence() {
        let mut buf = BytesMut::new();
        MultipartCodec
            .encode(vec![Bytes::from_static(b"ONE")], &mut buf)
            .expect("encode");
        MultipartCodec
            .encode(vec![Bytes::from_static(b"TWO")], &mut buf)
            .expect("encode");
        let first = MultipartCodec.decode(&mut buf).expect("decode").expect("msg");
        let second = MultipartCodec.decode(&mut buf).expect("decode").expect("msg");
        assert_eq!(first, vec![Bytes::from_static(b"ONE")]);
        assert_eq!(second, vec![Bytes::from_static(b"TWO")]);
        assert!(buf.is_empty());
    }
}
