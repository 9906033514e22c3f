use std::sync::Arc;

use crate::clock::ManualClock;
use crate::proto::{HEADER_LEN, MAGIC, MIN_FRAME_LEN, Packet, PacketCodec, StreamReassembler, encode};

fn frames(n: usize) -> (Vec<Packet>, Vec<Vec<u8>>) {
    let mut codec = PacketCodec::new(Arc::new(ManualClock::new(1_000_000.0)));
    let pkts: Vec<Packet> = (0..n).map(|i| codec.data_packet(vec![i as u8; 5 + i])).collect();
    let encoded = pkts.iter().map(encode).collect();
    (pkts, encoded)
}

#[test]
fn garbage_then_two_frames_yields_both_in_order() {
    let (pkts, enc) = frames(2);
    let mut stream = vec![0x00, 0x13, 0x37, 0xFF, 0x42];
    stream.extend_from_slice(&enc[0]);
    stream.extend_from_slice(&enc[1]);

    let mut r = StreamReassembler::new();
    assert_eq!(r.feed(&stream), pkts);
    assert_eq!(r.buffered(), 0);
    assert_eq!(r.stats().frames, 2);
    assert_eq!(r.stats().discarded_bytes, 5);
}

#[test]
fn byte_at_a_time_delivery_yields_the_same_frames() {
    let (pkts, enc) = frames(3);
    let stream: Vec<u8> = enc.concat();

    let mut r = StreamReassembler::new();
    let mut out = Vec::new();
    for b in &stream {
        out.extend(r.feed(std::slice::from_ref(b)));
    }
    assert_eq!(out, pkts);
}

#[test]
fn truncated_frame_waits_for_remaining_bytes() {
    let (pkts, enc) = frames(1);
    let frame = &enc[0];
    let split = HEADER_LEN + 2;

    let mut r = StreamReassembler::new();
    assert!(r.feed(&frame[..split]).is_empty());
    assert_eq!(r.buffered(), split, "partial frame must not be consumed");
    assert_eq!(r.feed(&frame[split..]), pkts);
}

#[test]
fn buffer_without_magic_is_discarded() {
    let mut r = StreamReassembler::new();
    assert!(r.feed(&[0x11; MIN_FRAME_LEN + 3]).is_empty());
    assert_eq!(r.buffered(), 0);
    assert_eq!(r.stats().discarded_bytes, (MIN_FRAME_LEN + 3) as u64);
}

#[test]
fn short_noise_is_kept_until_enough_bytes_arrive() {
    let mut r = StreamReassembler::new();
    assert!(r.feed(&[0x11, 0x22]).is_empty());
    assert_eq!(r.buffered(), 2);
}

#[test]
fn false_magic_inside_noise_is_skipped() {
    let (pkts, enc) = frames(1);
    // 伪造的魔数后跟一个看似合法的小长度字段，但校验和不对
    let mut stream = vec![MAGIC, 0x01, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xDE, 0xAD, 0xBE, 0xEF];
    stream.extend_from_slice(&enc[0]);

    let mut r = StreamReassembler::new();
    assert_eq!(r.feed(&stream), pkts);
    assert!(r.stats().false_starts >= 1);
}

#[test]
fn oversized_declared_length_does_not_stall_the_stream() {
    let (pkts, enc) = frames(1);
    let mut stream = vec![MAGIC, 0x01, 0, 0, 0, 0, 0, 0, 0xFF, 0xFF, 0xFF, 0xFF];
    stream.extend_from_slice(&enc[0]);

    let mut r = StreamReassembler::new();
    assert_eq!(r.feed(&stream), pkts);
}

#[test]
fn corrupted_frame_is_dropped_and_next_frame_survives() {
    let (pkts, enc) = frames(2);
    let mut bad = enc[0].clone();
    let last = bad.len() - 1;
    bad[last] ^= 0xFF;

    let mut stream = bad;
    stream.extend_from_slice(&enc[1]);

    let mut r = StreamReassembler::new();
    assert_eq!(r.feed(&stream), vec![pkts[1].clone()]);
}

#[test]
fn packets_iterator_is_lazy_and_resumable() {
    let (pkts, enc) = frames(2);
    let mut r = StreamReassembler::new();
    r.push(&enc[0]);
    r.push(&enc[1][..4]);

    let first: Vec<Packet> = r.packets().collect();
    assert_eq!(first, vec![pkts[0].clone()]);
    assert!(r.next_packet().is_none());

    r.push(&enc[1][4..]);
    assert_eq!(r.next_packet(), Some(pkts[1].clone()));
    assert!(r.next_packet().is_none());
}

#[test]
fn clear_drops_partial_frame() {
    let (pkts, enc) = frames(2);
    let mut r = StreamReassembler::new();
    assert!(r.feed(&enc[0][..HEADER_LEN + 2]).is_empty());
    r.clear();
    assert_eq!(r.buffered(), 0);
    assert_eq!(r.feed(&enc[1]), vec![pkts[1].clone()]);
}
