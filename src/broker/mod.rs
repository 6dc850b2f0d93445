pub mod fill_engine;
pub mod latency;
pub mod rules;
pub mod sim_broker;

pub use latency::{LatencyConfig, ZERO_LATENCY};
pub use rules::{FillRecord, FillStatus, Order, OrderStatus};
pub use sim_broker::{OrderEvent, SimBroker};
