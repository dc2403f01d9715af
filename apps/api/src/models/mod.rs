pub mod reading;
pub mod user;
