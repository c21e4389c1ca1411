// JSON-RPC envelope and status-service payload types
pub mod types;
