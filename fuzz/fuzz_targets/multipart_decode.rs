#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use tokio_util::codec::{Decoder, Encoder};
use wheelhouse_transport::MultipartCodec;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes must decode to a message, "need more", or a
    // clean error. A decoded message must re-encode and re-decode.
    let mut buf = BytesMut::from(data);
    if let Ok(Some(frames)) = MultipartCodec.decode(&mut buf) {
        let mut reencoded = BytesMut::new();
        if MultipartCodec.encode(frames.clone(), &mut reencoded).is_ok() {
            let decoded = MultipartCodec
                .decode(&mut reencoded)
                .expect("re-decode")
                .expect("complete");
            assert_eq!(decoded, frames);
        }
    }
});
