//! Session tracking: one live engine adapter per normalized target path.

mod registry;
mod target;

pub use registry::SessionRegistry;
pub use target::TargetId;
