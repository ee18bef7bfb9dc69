//! Bidirectional translation between the canonical device model and the two
//! transport protocols.

pub mod announce;
pub mod command;
pub mod inbound;
pub mod status;
pub mod value;

pub use announce::config_payload;
pub use announce::ConfigPayload;
pub use command::apply_command;
pub use command::service_call;
pub use command::CommandPayload;
pub use command::ServiceCall;
pub use command::ServiceTarget;
pub use inbound::apply_state_change;
pub use inbound::HubEvent;
pub use status::device_states;
pub use status::status_payload;
pub use status::StatusPayload;
pub use value::DecodedValue;
pub use value::StateValue;
pub use value::TypedValue;
