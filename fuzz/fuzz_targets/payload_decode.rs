//! Long-poll payload splitting.

#![no_main]

use libfuzzer_sys::fuzz_target;
use zcret_proto::engine::{decode_payload, encode_payload};

fuzz_target!(|body: &str| {
    if let Ok(packets) = decode_payload(body) {
        let again = decode_payload(&encode_payload(&packets));
        assert_eq!(again.ok(), Some(packets));
    }
});
