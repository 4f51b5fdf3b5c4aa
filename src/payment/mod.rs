pub mod gateway;
pub mod store;

pub use gateway::{GatewayError, PaymentGateway};
pub use store::{
    capture, create_intent, fee, mark_authorization_failed, on_authorization_success, release,
};
