//! Time-indexed sample buffers and data access for Stepwise.
//!
//! [`SampleBuffer`] keeps a bounded, timestamp-ordered backlog per signal
//! with reader reference counting. [`DataAccess`] maps signal handles to
//! buffers and forwards samples to data listeners. [`StepDataAccess`] is
//! the per-step-listener view used by the timing subsystem to validate
//! inputs and publish outputs once per cycle.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod access;
pub mod buffer;
pub mod step_access;

pub use access::DataAccess;
pub use buffer::{SampleBuffer, SampleRef, Selection};
pub use step_access::{InputConfig, InputViolationStrategy, StepDataAccess};
