//! strata-sched: decide which file to encrypt next
//!
//! A [`CostModel`] learns bytes/second per file extension from finished
//! jobs. The [`Scheduler`] turns a file listing into a plan ordered by
//! predicted duration, shortest first, unless the batch is too small for
//! ordering to matter.

pub mod calibrate;
pub mod cost;
pub mod scheduler;

pub use calibrate::{tune, Calibration, TuneReport};
pub use cost::CostModel;
pub use scheduler::{extension_class, Bypass, Job, Scheduler};
