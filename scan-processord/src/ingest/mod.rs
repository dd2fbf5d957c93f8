pub mod decode;
pub mod message;
pub mod processor;
