//! Domain engines: trading, resolution, and agent registration.

pub mod registry;
pub mod resolution;
pub mod trading;

pub use registry::RegistryEngine;
pub use resolution::ResolutionEngine;
pub use trading::TradeEngine;
