//! Dynamic Field Theory behavior control.
//!
//! Continuous-state fields integrated under a nonlinear ODE, wired into a
//! typed graph, and a behavior-sequencing layer built from that graph.

#[path = "core/prng.rs"]
pub mod prng;

#[path = "core/math.rs"]
pub mod math;

#[path = "core/error.rs"]
pub mod error;

#[path = "core/kernel.rs"]
pub mod kernel;

#[path = "core/connectable.rs"]
pub mod connectable;

#[path = "core/steps.rs"]
pub mod steps;

#[path = "core/field.rs"]
pub mod field;

#[path = "core/graph.rs"]
pub mod graph;

#[path = "core/io.rs"]
pub mod io;

pub mod behavior;
pub mod observer;

pub use behavior::sequencing::{
    competition, connect_to_task, precondition, Sequenceable, SequencingWeights,
};
pub use behavior::{BehaviorConfig, ElementaryBehavior};
pub use connectable::Connectable;
pub use error::ConnectError;
pub use field::{Boost, DynamicField, FieldParams};
pub use graph::{Connection, Graph, NodeId};
pub use kernel::{Boundary, BoxKernel, GaussKernel, Kernel, KernelMode};
pub use steps::{ProcessingStep, Projection, Scaler, Weight, WeightPattern};
