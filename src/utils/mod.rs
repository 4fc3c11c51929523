pub mod ip;
pub mod trace_id;

pub use ip::real_client_ip;
pub use trace_id::{generate_trace_id, resolve_trace_id};
