mod model;
mod registry;

pub use model::resolve_model;
pub use model::AttributeKey;
pub use model::Category;
pub use model::Device;
pub use model::DevicePatch;
pub use model::GatewayModel;
pub use registry::DeviceRegistry;
pub use registry::StoreError;
