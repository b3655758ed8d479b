//! Build planning and execution for extensions.
//!
//! [`BuildPlan`] turns a recipe and extracted sources into commands;
//! a [`StepRunner`] executes them.

pub mod plan;
pub mod runner;

pub use plan::{flag_key, merge_flags, BuildPlan, BuildStep, Stage};
pub use runner::{StepRunner, SystemRunner};
