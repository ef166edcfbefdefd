pub mod fetcher;
pub mod notifier;

pub use fetcher::{FetcherConfig, ReqwestFetcher};
pub use notifier::{MessengerConfig, MessengerNotifier};
