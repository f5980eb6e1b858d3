//! Process and task layer of the TempOS kernel.
//!
//! Holds the task control blocks, builds the resume frame a new task is
//! first entered through, switches between tasks and drives round-robin
//! preemption from a one-shot timer.
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod arch;
pub mod config;
pub mod console;
pub mod intr;
pub mod logger;
pub mod mem;
pub mod proc;

pub use config::SchedConfig;
pub use proc::{Platform, Scheduler, State, Task, TaskError, TaskId};
