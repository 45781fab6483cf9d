//! Locked-step timing for the Stepwise simulation middleware.
//!
//! A [`TimingClient`] receives `_Trigger` ticks from the timing master
//! and releases each registered step listener when its cycle falls due.
//! Every [`Task`] runs its listener on a dedicated worker, enforces the
//! runtime budget and answers with an `_Ack` sample.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod client;
pub mod config;
pub mod task;
pub mod wire;

pub use client::{TimingClient, TimingContext};
pub use config::{
    OutputConfig, ParticipantTiming, StepConfig, TimeViolationStrategy, TimingClientConfig,
    TimingConfigError, TimingConfiguration,
};
pub use task::{StepListener, Task, TaskState};
pub use wire::{TriggerAck, TriggerTick};

// Compile-time assertion: the client and its tasks must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<TimingClient>();
    assert::<Task>();
};
