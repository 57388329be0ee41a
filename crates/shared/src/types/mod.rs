//! Common types used across the application.

pub mod platform;
pub mod secret;

pub use platform::Platform;
pub use secret::SecretString;
