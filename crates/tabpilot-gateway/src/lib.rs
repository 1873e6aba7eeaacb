pub mod bootstrap;
pub mod router;
pub mod server;
pub mod state;
pub mod transport;
pub mod ws;

pub use server::GatewayServer;
pub use transport::Transport;
