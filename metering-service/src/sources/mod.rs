pub mod http;
pub mod mqtt;

pub use http::HttpSource;
pub use mqtt::MqttSource;
