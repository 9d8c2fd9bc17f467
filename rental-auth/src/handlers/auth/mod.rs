pub mod password;
pub mod registration;
pub mod session;
pub mod two_factor;

pub use password::{change_password, forgot_password, reset_password};
pub use registration::{register, verify_email};
pub use session::{login, logout, refresh_token};
pub use two_factor::{disable_two_factor, setup_two_factor, verify_two_factor};
