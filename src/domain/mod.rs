pub mod gateway;
pub mod notification;
pub mod registration;
