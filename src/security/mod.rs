//! Constant-time comparison and random token generation.

pub mod secure_utils;

pub use secure_utils::{SecureComparison, SecureRandomGen};
