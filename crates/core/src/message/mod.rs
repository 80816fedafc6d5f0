//! The messaging substrate: wire envelopes, the pending-request ledger and
//! the per-message protocol handlers.

pub mod framework;
pub mod handlers;
pub mod payload;
pub mod types;

pub use framework::MessagingFramework;
pub use framework::ResponseEvent;
pub use framework::ResponseWaiter;
pub use handlers::HandleMsg;
pub use handlers::MessageHandler;
pub use payload::AckMessage;
pub use payload::Envelope;
pub use payload::ReplyMessage;
pub use payload::RequestMessage;
pub use payload::ResponseType;
pub use payload::RetransMode;
pub use payload::TransOptions;
pub use types::Message;
