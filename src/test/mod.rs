mod codec;
mod metrics;
mod reassembler;
