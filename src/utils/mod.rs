pub mod csrf;
pub mod ip;
