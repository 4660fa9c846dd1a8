pub mod engine;

pub use engine::{LivenessProbe, ProbeOutcome, PROBE_COMPONENT};
