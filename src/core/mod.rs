pub mod config_store;
pub mod error;
pub mod filter;
pub mod filters;
pub mod forwarder;
pub mod gateway;
pub mod path_pattern;
pub mod request;
pub mod router;
pub mod snapshot;

pub use config_store::ConfigStore;
pub use error::{DenyReason, GatewayError};
pub use filter::{Endpoint, FilterChain, FilterContext, GatewayFilter, Next};
pub use gateway::GatewayService;
pub use request::{GatewayRequest, GatewayResponse};
pub use router::Router;
pub use snapshot::ConfigSnapshot;
