pub mod api;
pub mod catalog;
pub mod config;
pub mod device;
pub mod gateway;
pub mod hub;
pub mod queue;
pub mod translate;

pub use catalog::CategoryCatalog;
pub use config::Config;
pub use config::EndpointStore;
pub use device::Device;
pub use device::DeviceRegistry;
pub use gateway::GatewaySession;
pub use hub::HubSession;
pub use queue::GatewayJob;
