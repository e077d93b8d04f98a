//! Fuzz target for frame and request decoding
//!
//! # Invariants
//!
//! - NEVER panic on untrusted bytes
//! - A decoded frame re-encodes to exactly the bytes it was read from
//! - A decoded request survives a second encode/decode unchanged

#![no_main]

use libfuzzer_sys::fuzz_target;
use parlor_proto::{ClientRequest, Frame, FrameHeader};

fuzz_target!(|data: &[u8]| {
    let Ok(frame) = Frame::decode(data) else {
        return;
    };

    let consumed = FrameHeader::SIZE + frame.payload.len();
    let reencoded = frame.to_vec().expect("decoded frame must re-encode");
    assert_eq!(&reencoded[..], &data[..consumed]);

    if let Ok(request) = ClientRequest::from_frame(&frame) {
        let again = request.to_frame().expect("decoded request must re-encode");
        let decoded = ClientRequest::from_frame(&again).expect("re-encoded request must decode");
        assert_eq!(decoded, request);
    }
});
