//! `ship_core`: kernel and simulation engines for the bridge simulation.
//!
//! No IO. All randomness comes from the kernel's seeded RNG.

pub mod events;
pub mod kernel;
pub mod life_support;
pub mod modules;
pub mod power;
mod types;

pub use events::Event;
pub use kernel::{
    HookResult, Kernel, KernelConfig, KernelError, KernelOptions, Module, ModuleContext,
    SubscriptionId,
};
pub use types::*;

#[cfg(any(test, feature = "test-support"))]
pub mod test_fixtures;

#[cfg(test)]
mod tests;
