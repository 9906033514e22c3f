use std::sync::Arc;

use crate::clock::ManualClock;
use crate::error::FrameError;
use crate::proto::{
    HEADER_LEN, MAGIC, MIN_FRAME_LEN, Packet, PacketCodec, PacketType, TRAILER_LEN, decode, encode,
    extract_acked_sequence, try_decode, wire_millis,
};

fn codec_at(secs: f64) -> PacketCodec {
    PacketCodec::new(Arc::new(ManualClock::new(secs)))
}

#[test]
fn encode_matches_documented_layout() {
    let pkt = Packet::new(PacketType::Data, 0x0102, 0x0A0B_0C0D, b"hi".to_vec());
    let frame = encode(&pkt);

    assert_eq!(frame.len(), HEADER_LEN + 2 + TRAILER_LEN);
    assert_eq!(frame.len(), 18);
    assert_eq!(
        &frame[..14],
        &[0xAA, 0x01, 0x01, 0x02, 0x0A, 0x0B, 0x0C, 0x0D, 0, 0, 0, 2, b'h', b'i']
    );
    let crc = crc32fast::hash(&frame[..14]);
    assert_eq!(&frame[14..], &crc.to_be_bytes());
}

#[test]
fn create_assigns_increasing_sequence_ids() {
    let mut codec = codec_at(100.0);
    let a = codec.data_packet(vec![1, 2, 3]);
    let b = codec.heartbeat_packet();
    let c = codec.ack_packet(7);
    assert_eq!(a.sequence_id(), 0);
    assert_eq!(b.sequence_id(), 1);
    assert_eq!(c.sequence_id(), 2);
    assert_eq!(codec.sequence_counter(), 3);
    assert_eq!(a.timestamp_ms(), wire_millis(100.0));
    assert!(b.payload().is_empty());
}

#[test]
fn wire_sequence_wraps_modulo_16_bits() {
    let mut codec = codec_at(1.0);
    for _ in 0..65_536 {
        codec.heartbeat_packet();
    }
    let pkt = codec.data_packet(Vec::new());
    assert_eq!(codec.sequence_counter(), 65_537);
    assert_eq!(pkt.sequence_id(), 0);
}

#[test]
fn decode_recovers_every_field() {
    let mut codec = codec_at(1_700_000_000.123_4);
    let pkt = codec.data_packet(b"payload".to_vec());
    let back = decode(&encode(&pkt)).expect("decode");
    assert_eq!(back, pkt);
    assert_eq!(back.payload_size(), 7);
    // 毫秒精度
    let expected = wire_millis(1_700_000_000.123_4) as f64 / 1000.0;
    assert_eq!(back.timestamp_secs(), expected);
}

#[test]
fn decode_rejects_short_buffer() {
    let frame = encode(&codec_at(1.0).heartbeat_packet());
    assert_eq!(frame.len(), MIN_FRAME_LEN);
    assert_eq!(
        try_decode(&frame[..MIN_FRAME_LEN - 1]),
        Err(FrameError::TooShort {
            len: MIN_FRAME_LEN - 1
        })
    );
}

#[test]
fn decode_rejects_bad_magic() {
    let mut frame = encode(&codec_at(1.0).heartbeat_packet());
    frame[0] = 0x55;
    assert_eq!(try_decode(&frame), Err(FrameError::BadMagic(0x55)));
    assert!(decode(&frame).is_none());
}

#[test]
fn decode_rejects_payload_len_beyond_buffer() {
    let mut frame = encode(&codec_at(1.0).data_packet(vec![0; 4]));
    frame[11] = 40;
    assert!(matches!(
        try_decode(&frame),
        Err(FrameError::Truncated { need: 56, .. })
    ));
}

#[test]
fn decode_rejects_checksum_mismatch() {
    let mut frame = encode(&codec_at(1.0).data_packet(vec![9; 8]));
    frame[HEADER_LEN + 3] ^= 0x01;
    assert!(matches!(try_decode(&frame), Err(FrameError::Checksum { .. })));
}

#[test]
fn decode_rejects_unknown_type_with_valid_checksum() {
    let mut frame = encode(&codec_at(1.0).heartbeat_packet());
    frame[1] = 0x7F;
    let end = frame.len() - TRAILER_LEN;
    let crc = crc32fast::hash(&frame[..end]);
    frame[end..].copy_from_slice(&crc.to_be_bytes());
    assert_eq!(try_decode(&frame), Err(FrameError::UnknownType(0x7F)));
}

#[test]
fn decode_ignores_bytes_after_the_frame() {
    let pkt = codec_at(2.0).data_packet(vec![1; 3]);
    let mut frame = encode(&pkt);
    frame.extend_from_slice(&[MAGIC, 0, 0]);
    assert_eq!(decode(&frame), Some(pkt));
}

#[test]
fn ack_payload_carries_acked_sequence_big_endian() {
    let mut codec = codec_at(1.0);
    let ack = codec.ack_packet(0x0001_0203);
    assert_eq!(ack.kind(), PacketType::Ack);
    assert_eq!(ack.payload(), &[0x00, 0x01, 0x02, 0x03]);
    assert_eq!(extract_acked_sequence(&ack), Some(0x0001_0203));
}

#[test]
fn extract_acked_sequence_requires_ack_with_four_bytes() {
    let data = Packet::new(PacketType::Data, 1, 0, vec![0, 0, 0, 5]);
    assert_eq!(extract_acked_sequence(&data), None);

    let short = Packet::new(PacketType::Ack, 1, 0, vec![0, 5]);
    assert_eq!(extract_acked_sequence(&short), None);

    let long = Packet::new(PacketType::Ack, 1, 0, vec![0, 0, 0, 5, 0xFF]);
    assert_eq!(extract_acked_sequence(&long), Some(5));
}

#[test]
fn age_is_measured_from_the_wire_stamp() {
    let pkt = Packet::new(PacketType::Data, 0, wire_millis(1000.250), Vec::new());
    let age = pkt.age_secs(1000.400_5);
    assert!((age - 0.150_5).abs() < 1e-6, "age={age}");

    // 时钟偏差导致时间戳在未来时得到负值
    let ahead = Packet::new(PacketType::Data, 0, wire_millis(1000.500), Vec::new());
    assert!(ahead.age_secs(1000.400) < 0.0);
}

#[test]
fn age_survives_timestamp_wraparound() {
    // 2^32 ms 之后时间戳回绕
    let wrap = (u32::MAX as f64 + 1.0) / 1000.0;
    let sent = wrap - 0.010;
    let pkt = Packet::new(PacketType::Data, 0, wire_millis(sent), Vec::new());
    let age = pkt.age_secs(wrap + 0.020);
    assert!((age - 0.030).abs() < 2e-3, "age={age}");
}
