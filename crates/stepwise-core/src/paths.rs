//! Well-known property paths shared by the subsystems.

/// This participant's element name.
pub const ELEMENT_NAME: &str = "Header.ElementName";

/// Name of the state the participant is in.
pub const CURRENT_STATE: &str = "Header.CurrentState";

/// Whether remote control commands are ignored.
pub const STANDALONE_MODE: &str = "StateMachine.StandAloneModeEnabled";

/// Seconds without a trigger before the timing client reports a timeout.
pub const SYSTEM_TIMEOUT: &str = "Timing.TimingClient.SystemTimeout_s";

/// Element name of the timing master.
pub const MASTER_ELEMENT: &str = "Timing.TimingMaster.MasterElement";

/// Whether acknowledgements are sent by multicast.
pub const USE_MULTICAST: &str = "Timing.TimingClient.UseMulticast";
