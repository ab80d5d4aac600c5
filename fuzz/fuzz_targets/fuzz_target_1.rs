#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use overlay_protocol::core::{parse_from_stream, PacketPool, StreamRead};

fuzz_target!(|data: &[u8]| {
    // Stream decode of hostile input: no panics, no overreads, no leaked slots
    let mut pool = PacketPool::new();
    let mut buffer = BytesMut::from(data);
    while let Ok(read) = parse_from_stream(&mut pool, &mut buffer) {
        let id = match read {
            StreamRead::NeedMore => break,
            StreamRead::Terminator => continue,
            StreamRead::Packet(id) => id,
        };
        if let Ok(packet) = pool.packet_mut(id) {
            let _ = packet.destination();
            while let Ok(Some(child)) = packet.next_child() {
                if packet.read(child.length).is_err() {
                    break;
                }
            }
        }
        let _ = pool.release(id);
    }
    assert_eq!(pool.live(), 0);
});
