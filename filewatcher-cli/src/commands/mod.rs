pub mod configure;
pub mod daemon;
