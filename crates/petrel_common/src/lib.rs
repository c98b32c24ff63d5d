//! Shared foundation for the PetrelDB control plane: identifier newtypes,
//! the error taxonomy, coordinator configuration, and the small sync
//! primitives (shutdown signal, one-shot future cell) used by the
//! streaming coordinator.

pub mod config;
pub mod error;
pub mod shutdown;
pub mod sync;
pub mod types;

pub use config::{CoordConfig, WalTopicsConfig};
pub use error::{CatalogError, ErrorKind, PetrelError, PetrelResult};
pub use shutdown::ShutdownSignal;
pub use sync::FutureCell;
