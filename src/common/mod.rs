pub mod cache;
pub mod connect_client;
pub mod http_session;
pub mod metrics;
pub mod types;
