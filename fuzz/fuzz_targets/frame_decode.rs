//! Feed arbitrary bytes through the full frame read path.
//!
//! Every input must produce either a decoded frame or an error.

#![no_main]

use std::sync::Arc;

use cqlwire_proto::{read_header, DeflateCompressor, Framer, ProtocolVersion};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let framer = Framer::new(ProtocolVersion::V4)
        .with_compressor(Arc::new(DeflateCompressor::new()))
        .with_max_frame_size(1 << 20);

    let mut reader = data;
    let Ok(header) = read_header(&mut reader) else {
        return;
    };
    let Ok(frame) = framer.read_frame(&mut reader, &header) else {
        return;
    };
    if header.response {
        let _ = frame.response();
    } else if let Ok(request) = frame.request() {
        // anything that decodes must re-encode
        let _ = Framer::new(header.version).build(&request, header.stream);
    }
});
