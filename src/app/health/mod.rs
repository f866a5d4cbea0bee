pub mod check;
pub mod eval;
pub mod guard;
pub mod sampler;
pub mod types;

pub use check::{HealthCheck, HealthCheckHandle};
pub use eval::*;
pub use guard::SnapshotHandle;
pub use sampler::{DelayMode, MemoryProbe, ProcMemoryProbe};
pub use types::*;
