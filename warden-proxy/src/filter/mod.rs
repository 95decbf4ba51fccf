//! Access-control decisions

pub mod cidr;
pub mod parental;
pub mod policy;
pub mod rules;

pub use cidr::Cidr;
pub use parental::{ParentalControlEngine, ParentalRules};
pub use policy::PolicyEngine;
pub use rules::{is_time_in_window, BlockReason};
