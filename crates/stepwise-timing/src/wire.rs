//! Payloads of the `_Trigger` and `_Ack` signals.
//!
//! Both are packed structs with big-endian integers.

use stepwise_core::{CoreError, Timestamp};

/// Name of the acknowledgement output signal.
pub const ACK_SIGNAL_NAME: &str = "_Ack";
/// Type name of the acknowledgement signal.
pub const ACK_SIGNAL_TYPE: &str = "tAck";
/// Name of the trigger input signal.
pub const TRIGGER_SIGNAL_NAME: &str = "_Trigger";
/// Type name of the trigger signal.
pub const TRIGGER_SIGNAL_TYPE: &str = "tTrigger";

/// Length of a textual UUID.
pub const UUID_LEN: usize = 36;

/// One simulation-time tick from the timing master.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TriggerTick {
    /// Simulation time after this tick, in microseconds.
    pub current_time: Timestamp,
    /// Advance since the previous tick, in microseconds.
    pub sim_time_step: Timestamp,
}

impl TriggerTick {
    /// Encoded size in bytes.
    pub const SIZE: usize = 16;

    /// Encode as two big-endian `i64`.
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[..8].copy_from_slice(&self.current_time.to_be_bytes());
        out[8..].copy_from_slice(&self.sim_time_step.to_be_bytes());
        out
    }

    /// Decode a payload. `InvalidArgument` unless exactly [`Self::SIZE`]
    /// bytes long.
    pub fn decode(bytes: &[u8]) -> Result<Self, CoreError> {
        if bytes.len() != Self::SIZE {
            return Err(CoreError::InvalidArgument);
        }
        Ok(Self {
            current_time: read_i64(&bytes[..8]),
            sim_time_step: read_i64(&bytes[8..]),
        })
    }
}

/// Acknowledgement of one finished step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TriggerAck {
    /// UUID of the acknowledging task.
    pub uuid: [u8; UUID_LEN],
    /// Wall-clock time the step took, in microseconds.
    pub operational_time: Timestamp,
    /// Simulation time of the acknowledged step.
    pub current_sim_time: Timestamp,
}

impl TriggerAck {
    /// Encoded size in bytes.
    pub const SIZE: usize = UUID_LEN + 16;

    /// Build an acknowledgement. `InvalidArgument` unless `uuid` is
    /// exactly [`UUID_LEN`] bytes.
    pub fn new(
        uuid: &str,
        operational_time: Timestamp,
        current_sim_time: Timestamp,
    ) -> Result<Self, CoreError> {
        let uuid: [u8; UUID_LEN] = uuid
            .as_bytes()
            .try_into()
            .map_err(|_| CoreError::InvalidArgument)?;
        Ok(Self {
            uuid,
            operational_time,
            current_sim_time,
        })
    }

    /// The UUID as text, if it is valid UTF-8.
    pub fn uuid_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.uuid).ok()
    }

    /// Encode as the raw UUID followed by two big-endian `i64`.
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[..UUID_LEN].copy_from_slice(&self.uuid);
        out[UUID_LEN..UUID_LEN + 8].copy_from_slice(&self.operational_time.to_be_bytes());
        out[UUID_LEN + 8..].copy_from_slice(&self.current_sim_time.to_be_bytes());
        out
    }

    /// Decode a payload. `InvalidArgument` unless exactly [`Self::SIZE`]
    /// bytes long.
    pub fn decode(bytes: &[u8]) -> Result<Self, CoreError> {
        if bytes.len() != Self::SIZE {
            return Err(CoreError::InvalidArgument);
        }
        let mut uuid = [0u8; UUID_LEN];
        uuid.copy_from_slice(&bytes[..UUID_LEN]);
        Ok(Self {
            uuid,
            operational_time: read_i64(&bytes[UUID_LEN..UUID_LEN + 8]),
            current_sim_time: read_i64(&bytes[UUID_LEN + 8..]),
        })
    }
}

fn read_i64(bytes: &[u8]) -> i64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    i64::from_be_bytes(buf)
}
