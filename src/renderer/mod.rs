pub mod marker_server;
pub use marker_server::MarkerServer;
