pub mod common;
pub mod payment;
pub mod subscription;
pub mod user;
