pub mod peer_connection;
pub mod session;
