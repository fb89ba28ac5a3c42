pub mod credentials;
pub mod push;
