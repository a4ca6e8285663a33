//! Infrastructure layer: shared store, notification jobs, OTP storage, config.

pub mod config;
pub mod jobs;
pub mod otp;
pub mod service;
pub mod store;


pub use config::{ConfigError, NotifierConfig};
pub use otp::{OtpError, OtpManager};
pub use service::{NotificationService, ServiceError};
pub use store::{InMemoryStore, SharedStore, StoreError};
#[cfg(feature = "redis")]
pub use store::RedisStore;
