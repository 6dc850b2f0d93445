pub mod session;

pub use session::{Bbo, Depth, OnDemandSession, OnDemandSessionManager, SessionManifest, SessionState, UserAction};
