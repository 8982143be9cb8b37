#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod dispatcher;
pub mod pipeline;
pub mod retention;
pub mod stager;
pub mod toolchain;

pub use dispatcher::{BuildDispatcher, DispatchReservation};
pub use pipeline::{BuildConfig, BuildPipeline, BuildRequest};
pub use toolchain::{CommandStep, ProcessRunner, StepOutcome, StepRunner};
