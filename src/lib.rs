//! Nucleus_R - the preemptive-multitasking core of a micro-kernel
//!
//! This crate provides the concurrency core shared by every other kernel
//! subsystem: the per-core task scheduler, the spinlock that guards
//! kernel-internal state across cores, the wait coordinator that parks a
//! task until an external condition holds, and the two-level page-table
//! translator used to resolve addresses in a foreign address space.
//!
//! Everything else in the kernel (bootstrapping, device drivers, the
//! filesystem, user space) is an external collaborator and only touches
//! this core through the interfaces in [`kern`] and [`vm`].

#![no_std]
// Kernel-appropriate clippy configuration
// Many kernel types have specialized initialization that doesn't fit Default
#![allow(clippy::new_without_default)]

// Standard library replacement for no_std
extern crate alloc;

// Hosted test builds link std for the harness and for std::thread
#[cfg(test)]
extern crate std;

// Core types
pub mod types;

// Kernel concurrency core
pub mod kern;

// Virtual memory translation
pub mod vm;

/// Kernel core version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Kernel core name
pub const NAME: &str = "Nucleus_R";
