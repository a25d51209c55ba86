//! Socket.IO packet decoding and event parsing must never panic on
//! arbitrary text.

#![no_main]

use libfuzzer_sys::fuzz_target;
use zcret_proto::{Ack, Packet, PacketKind, ServerEvent};

fuzz_target!(|text: &str| {
    let Ok(packet) = Packet::decode(text) else { return };

    match packet.kind {
        PacketKind::Event => {
            let _ = ServerEvent::from_packet(&packet);
        },
        PacketKind::Ack => {
            let _ = Ack::from_packet(&packet);
        },
        _ => {},
    }

    // Encoding is not a strict inverse (`2 5` and `25` differ), but the
    // output must decode again.
    assert!(Packet::decode(&packet.encode()).is_ok());
});
