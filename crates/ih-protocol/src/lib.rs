pub mod addresses;
pub mod message;
pub mod token;

pub use message::*;
pub use token::*;
