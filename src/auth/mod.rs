pub mod cookie;
pub mod gate;
pub mod token;
