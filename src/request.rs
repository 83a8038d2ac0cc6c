//! The notification content and its request options

pub mod notification;
pub mod payload;
