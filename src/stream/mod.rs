//! Incremental output: the event vocabulary and the synthesizer that turns
//! a handoff chain into one ordered event stream.

pub mod events;
pub mod synthesizer;

pub use events::{synthesize_response, EventSequencer, StreamEvent, StreamEventKind};
pub use synthesizer::{EventStream, HopSource, StepTap, StreamRequest, StreamSynthesizer};
