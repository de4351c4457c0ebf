#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use wheelhouse_protocol::{FileRequest, SlaveRequest};
use wheelhouse_transport::Wire;

fuzz_target!(|data: Vec<Vec<u8>>| {
    let frames: Vec<Bytes> = data.into_iter().map(Bytes::from).collect();

    // Hostile frames must decode to a value or a schema error, never
    // panic; accepted values must round-trip.
    if let Ok(msg) = SlaveRequest::from_frames(&frames) {
        let reencoded = msg.to_frames();
        assert_eq!(SlaveRequest::from_frames(&reencoded).expect("re-decode"), msg);
    }
    if let Ok(msg) = FileRequest::from_frames(&frames) {
        let reencoded = msg.to_frames();
        assert_eq!(FileRequest::from_frames(&reencoded).expect("re-decode"), msg);
    }
});
