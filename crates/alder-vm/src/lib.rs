//! The abstract engine boundary of the Alder VM host.
//!
//! The host never talks to a concrete WebAssembly engine. It consumes the
//! [`Executor`]/[`Instance`] traits, and the engine reaches back into the
//! host through [`VmHooks`], the imported-function surface. Terminal
//! conditions raised by host imports travel as breakpoint values, which the
//! dispatcher inspects when an instance call returns with an error.
//!
//! The [`mock`] module provides a scriptable engine used by the host test
//! suites.

pub mod breakpoint;
pub mod executor;
pub mod hooks;
pub mod mock;

pub use breakpoint::BreakpointValue;
pub use executor::{Executor, Instance, InstanceError};
pub use hooks::VmHooks;
