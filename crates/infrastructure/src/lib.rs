pub mod database;
pub mod notifier;
pub mod observability;

pub use database::*;
pub use notifier::{local_hostname, CompositeNotifier, LogNotifier, WebhookNotifier};
pub use observability::*;
