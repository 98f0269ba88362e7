pub mod bitfield;
pub mod client;
pub mod message;
