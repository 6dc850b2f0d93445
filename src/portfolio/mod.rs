pub mod ledger;
pub mod mark;

pub use ledger::{EquityPoint, LedgerEvent, PortfolioLedger, PortfolioSummary};
pub use mark::MarkMethod;
