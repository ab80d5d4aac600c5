mod common;

use bytes::BytesMut;
use common::{network, quiet_config};
use overlay_protocol::config::NodeMode;
use overlay_protocol::core::{parse_from_stream, Packet, PacketCodec, PacketPool, StreamRead};
use overlay_protocol::network::ConnectionState;
use tokio_util::codec::Encoder;

#[test]
fn stress_stream_decode_large_series() {
    // Heavy burst of packets through one buffer; the pool must end empty
    let mut codec = PacketCodec;
    let mut pool = PacketPool::new();
    let mut buf = BytesMut::new();

    for size in [1usize, 64, 512, 4096, 65536] {
        for _ in 0..2_000 {
            let mut p = Packet::new("PUSH", false).unwrap();
            p.write(&vec![0u8; size]);
            codec.encode(p, &mut buf).unwrap();
            buf.extend_from_slice(&[0]);
        }
        let mut decoded = 0;
        loop {
            match parse_from_stream(&mut pool, &mut buf).unwrap() {
                StreamRead::NeedMore => break,
                StreamRead::Terminator => {}
                StreamRead::Packet(id) => {
                    assert_eq!(pool.packet(id).unwrap().len(), size);
                    pool.release(id).unwrap();
                    decoded += 1;
                }
            }
        }
        assert_eq!(decoded, 2_000);
        assert_eq!(pool.live(), 0);
        assert_eq!(pool.slab_count(), 1);
    }
}

#[test]
fn stress_topology_churn() {
    // Hubs keep dropping; every tick must refill without leaking packets
    let mut config = quiet_config(NodeMode::Leaf);
    config.topology.khl_interval_ticks = 3;
    let (mut net, harness) = network(&config, None);

    for tick in 0..500u64 {
        net.on_timer(1_000 + tick).unwrap();
        for (i, peer) in harness.created().iter().enumerate() {
            if (i as u64 + tick) % 7 == 0 {
                peer.lock().unwrap().state = ConnectionState::Closed;
            }
        }
        assert!(net.hubs_connected() <= config.topology.leaf_to_hub);
    }

    assert!(net.metrics().snapshot().khl_broadcasts > 50);
    net.disconnect_all();
    assert_eq!(net.node_count(), 0);
    assert_eq!(net.pool().live(), 0);
}
