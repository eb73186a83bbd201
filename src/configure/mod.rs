//! Writing network configuration to a device over a CIP session.

mod sequencer;
mod session;

pub use sequencer::{ConfigurationSequencer, InterfaceConfiguration, SequencerSettings};
pub use session::CipSession;
