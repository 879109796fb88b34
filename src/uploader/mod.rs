// Delivery pipeline - batching, transport, dispatch and cleanup
//
// A session flows classify -> make_batches -> Transport::send (in order) -> cleanup

pub mod batcher;
pub mod cleanup;
pub mod dispatcher;
pub mod session_table;
pub mod telegram_client;
pub mod transport;

pub use batcher::{make_batches, DeliveryLimits, Sendable};
pub use cleanup::CleanupManager;
pub use dispatcher::{DeliveryReport, DeliveryRequest, Dispatcher};
pub use telegram_client::TelegramClient;
pub use transport::{DeliveryResult, MediaTransport};
