pub mod signature;
pub mod store;

pub use signature::{SignatureError, sign_payload, verify_signature};
pub use store::process_event;
