//! 帧协议模块
//!
//! 此模块包含报文模型、帧编解码器与字节流重组器。

mod codec;
mod packet;
mod reassembler;

pub use codec::{
    HEADER_LEN, MAGIC, MAX_PAYLOAD_LEN, MIN_FRAME_LEN, PacketCodec, TRAILER_LEN, decode, encode,
    extract_acked_sequence, try_decode,
};
pub use packet::{Packet, PacketType, SequenceId, wire_millis};
pub use reassembler::{ReassemblerStats, StreamReassembler};
