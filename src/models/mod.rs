pub mod message;
pub mod provider;
pub mod request;
