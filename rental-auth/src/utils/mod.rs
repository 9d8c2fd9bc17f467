pub mod password;
pub mod token;
pub mod validation;

pub use password::{
    check_password_strength, hash_password, verify_password, Password, PasswordHashString,
};
pub use token::{generate_random_token, hash_token};
pub use validation::ValidatedJson;
