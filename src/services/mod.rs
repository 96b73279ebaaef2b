pub mod exporter;
pub mod gateway;
pub mod poller;
pub mod sensors;
pub mod spotify;

pub use gateway::StreamingGateway;
pub use poller::AccountRegistry;
pub use spotify::{ClientCredentials, SpotifyClient};
