//! Benchmark fixtures for the Stepwise simulation middleware.
//!
//! - [`filled_buffer`]: a sample buffer whose backlog holds samples at
//!   every cycle boundary
//! - [`payload`]: a deterministic sample payload

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use stepwise_core::{DataSample, SignalHandle, Timestamp};
use stepwise_data::SampleBuffer;

/// Signal handle used by every fixture.
pub const BENCH_HANDLE: SignalHandle = SignalHandle(1);

/// A deterministic payload of `size` bytes derived from `time`.
pub fn payload(time: Timestamp, size: usize) -> Vec<u8> {
    let seed = time.to_le_bytes();
    (0..size).map(|i| seed[i % seed.len()] ^ i as u8).collect()
}

/// A buffer of `backlog` slots holding samples at `cycle`, `2 * cycle`,
/// up to `backlog * cycle`.
pub fn filled_buffer(backlog: usize, sample_size: usize, cycle: Timestamp) -> SampleBuffer {
    let buffer = SampleBuffer::preallocated(BENCH_HANDLE, backlog, sample_size);
    for i in 1..=backlog as Timestamp {
        let time = i * cycle;
        buffer
            .update(&DataSample::new(BENCH_HANDLE, time, payload(time, sample_size)))
            .expect("fresh buffer has no locked slots");
    }
    buffer
}
