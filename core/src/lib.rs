//! `ball_core` coordinates ball movement between the physical devices of a
//! pinball machine: troughs, plungers, subway locks, VUKs and the playfield
//! itself. Each device runs its own async driver loop; devices only ever
//! talk to each other through the [`bus::EventBus`] and by name through the
//! [`registry::Registry`] — never by holding direct references to one
//! another.
//!
//! Module map:
//!
//! * [`config`] — static, validated per-device configuration.
//! * [`error`] — `ConfigError` (construction-time) and `DeviceError`
//!   (runtime) enums.
//! * [`bus`] — the event bus: broadcast notifications plus the relay and
//!   queue primitives the coordination protocol depends on.
//! * [`delay`] — named, cancellable one-shot delays backed by `tokio::time`.
//! * [`hw`] — the switch/coil/delay traits the rest of the crate programs
//!   against, plus an in-memory simulated implementation for tests and the
//!   `sim` binary.
//! * [`counter`] — ball-presence counters (`SwitchCounter`,
//!   `EntranceSwitchCounter`).
//! * [`ejector`] — ball-ejection mechanisms (`PulseCoilEjector`,
//!   `HoldCoilEjector`, `MechanicalEjector`).
//! * [`incoming`] / [`outgoing`] — per-device handlers for balls arriving
//!   and balls being sent out.
//! * [`graph`] — path search over the static eject-target graph.
//! * [`supervisor`] — machine-wide ball count reconciliation.
//! * [`registry`] — the flat device-name lookup table.
//! * [`device`] — the per-device state machine and its driver loop.
//! * [`machine`] — builds devices from configuration, validates the graph,
//!   and owns the running machine.

pub mod bus;
pub mod config;
pub mod counter;
pub mod delay;
pub mod device;
pub mod ejector;
pub mod error;
pub mod graph;
pub mod hw;
pub mod incoming;
pub mod machine;
pub mod outgoing;
pub mod registry;
pub mod supervisor;

/// Devices refer to each other by name, never by holding a reference to
/// one another: a flat registry, no `Rc<RefCell<_>>` graph.
pub type DeviceName = String;

pub use config::{ConfirmEjectType, DeviceConfig};
pub use error::{ConfigError, DeviceError};
pub use machine::Machine;
