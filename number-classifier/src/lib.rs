pub mod activity_log;
pub mod api;
pub mod bus;
pub mod classification;
pub mod config;
pub mod database;
pub mod log_reader;
pub mod lookup;
pub mod metrics_utils;
pub mod redis;
pub mod request;
pub mod router;
pub mod server;
pub mod time;

// Also used by the integration tests, so it is compiled into the library.
pub mod test_utils;
