//! Token management and the scraped identity-provider login flow.

mod flow;
mod jwt;
pub mod persistence;
mod token;

pub use flow::{Captcha, Credentials, OAuth2Client};
pub use persistence::{FileTokenPersistence, TokenPersistence};
pub use token::{OAuth2Token, TokenSnapshot, TokenUpdate};
