//! Device discovery and identity resolution

pub mod neighbor;
pub mod probe;
pub mod resolver;

pub use neighbor::{parse_neighbor_table, Neighbor};
pub use probe::{NetworkProbe, SystemProbe};
pub use resolver::DeviceResolver;
