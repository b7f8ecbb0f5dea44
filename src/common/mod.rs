pub mod constants;
pub mod debug;
