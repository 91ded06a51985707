//! rffmpeg-autoscale: transcode-driven worker scaling.
//!
//! Every cycle reads a fresh [`LoadSnapshot`] from the inventory, asks the
//! [`ScalingPolicy`] for a [`ScaleDecision`], and carries it out through a
//! [`WorkerLifecycle`](rffmpeg_cloud::WorkerLifecycle). The
//! [`ControlLoop`] runs cycles on a fixed interval, one at a time, and
//! drains on shutdown by letting the in-flight cycle finish.

pub mod control;
pub mod policy;
pub mod scaler;

pub use control::{ControlHandle, ControlLoop, LoopState};
pub use policy::{LoadSnapshot, ScaleDecision, ScalingPolicy, WorkerLoad};
pub use scaler::{Autoscaler, CycleOutcome};
