pub mod base;
pub mod runner;

pub use base::{EventContext, NullStrategy, OpenOrders, Opportunity, OrderIntent, Strategy};
pub use runner::{DecisionRow, RunConfig, RunManifest, RunMeta, StrategyRunner};
