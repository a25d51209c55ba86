//! Engine.IO packet decoding must never panic, and anything it accepts must
//! survive a re-encode.

#![no_main]

use libfuzzer_sys::fuzz_target;
use zcret_proto::EnginePacket;

fuzz_target!(|text: &str| {
    if let Ok(packet) = EnginePacket::decode(text) {
        let again = EnginePacket::decode(&packet.encode());
        assert_eq!(again.ok(), Some(packet));
    }
});
