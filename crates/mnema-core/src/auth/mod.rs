pub mod tokens;

pub use tokens::{IssuedToken, Principal, TokenStore};
