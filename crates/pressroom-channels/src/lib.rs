pub mod error;
pub mod http;
pub mod log;
pub mod transport;

pub use error::DeliveryError;
pub use http::HttpTransport;
pub use log::LogTransport;
pub use transport::{build_transport, Transport};
