use crate::error::Result;
use crate::saml::SamlResponse;

pub trait IdentityProvider {
    fn get_saml_assertion(&self) -> Result<SamlResponse>;
}
