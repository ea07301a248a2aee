pub mod dispatch;
pub mod expiry;
pub mod matcher;
