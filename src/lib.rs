pub mod aws;
pub mod error;
pub mod html;
pub mod http_client;
pub mod identity_provider;
pub mod interrupt;
pub mod okta;
pub mod saml;
pub mod secrets;
pub mod settings;
pub mod ui;

#[cfg(test)]
mod testing;

pub use error::{AuthError, Result};
pub use identity_provider::IdentityProvider;
