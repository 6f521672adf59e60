//! Message bus between pipeline stages
//!
//! Two backends share one trait: [`SqliteBus`] for stages running as separate
//! processes against one database file, and [`MemoryBus`] for running the
//! whole pipeline inside a single process.

mod memory;
mod sqlite;
mod traits;

pub use memory::MemoryBus;
pub use sqlite::SqliteBus;
pub use traits::{
    AckMode, Acknowledger, BusError, BusResult, ConsumeOptions, Delivery, MessageBus,
    Subscription,
};

use crate::config::{Backend, BusConfig};
use std::path::Path;
use std::sync::Arc;

/// Opens the configured bus
pub fn open_bus(config: &BusConfig) -> BusResult<Arc<dyn MessageBus>> {
    match config.backend {
        Backend::Sqlite => {
            let bus = SqliteBus::open(
                Path::new(&config.path),
                config.poll_interval(),
                config.lease(),
            )?;
            Ok(Arc::new(bus))
        }
        Backend::Memory => Ok(MemoryBus::new()),
    }
}
