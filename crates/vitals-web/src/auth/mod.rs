pub mod middleware;
pub mod otp;
pub mod password;
pub mod users;
