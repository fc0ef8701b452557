//! Input/output helpers.
//!
//! - CSV event tables (`events`)
//! - snapshot naming, listing and checks (`snapshot`)
//! - JSON artifacts passed between stages (`artifacts`)
//! - batch job templates (`condor`)

pub mod artifacts;
pub mod condor;
pub mod events;
pub mod snapshot;

pub use artifacts::*;
pub use events::*;
pub use snapshot::*;
