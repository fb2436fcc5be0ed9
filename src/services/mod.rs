pub mod account;
pub mod database;
pub mod gateway;
pub mod locks;
pub mod manual;
pub mod payment;
pub mod store;
pub mod subscription;
