use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::aws::{AwsRole, Partition};
use crate::error::{AuthError, Result};
use crate::html::SamlForm;

pub const SAML_ASSERTION_NS: &str = "urn:oasis:names:tc:SAML:2.0:assertion";
pub const AWS_ROLE_ATTRIBUTE: &str = "https://aws.amazon.com/SAML/Attributes/Role";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamlAssertion {
    encoded: String,
    xml: String,
}

impl SamlAssertion {
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let compact: String = encoded.split_whitespace().collect();
        let bytes = STANDARD
            .decode(&compact)
            .map_err(|e| AuthError::parse(format!("assertion is not base64: {}", e)))?;
        let xml = String::from_utf8(bytes)
            .map_err(|e| AuthError::parse(format!("assertion is not UTF-8: {}", e)))?;
        Ok(Self {
            encoded: compact,
            xml,
        })
    }

    pub fn encoded_as_base64(&self) -> &str {
        &self.encoded
    }

    pub fn extract_roles(&self) -> Result<Vec<AwsRole>> {
        let doc = roxmltree::Document::parse(&self.xml)
            .map_err(|e| AuthError::parse(format!("assertion is not XML: {}", e)))?;

        let attributes = doc
            .descendants()
            .filter(|n| n.has_tag_name((SAML_ASSERTION_NS, "Attribute")))
            .filter(|n| n.attribute("Name") == Some(AWS_ROLE_ATTRIBUTE))
            .collect::<Vec<_>>();
        if attributes.is_empty() {
            return Err(AuthError::parse(format!(
                "no {} attribute in assertion",
                AWS_ROLE_ATTRIBUTE
            )));
        }

        attributes
            .iter()
            .flat_map(|attribute| attribute.children())
            .filter(|n| n.has_tag_name((SAML_ASSERTION_NS, "AttributeValue")))
            .map(|value| {
                let text = value
                    .descendants()
                    .filter(|n| n.is_text())
                    .filter_map(|n| n.text())
                    .collect::<String>();
                parse_role_value(&text)
            })
            .collect()
    }
}

/// Split `principal,role` (either order) into a role pair.
fn parse_role_value(value: &str) -> Result<AwsRole> {
    let mut principal_arn = None;
    let mut role_arn = None;
    for field in value.split(',').map(str::trim) {
        if field.contains("saml-provider") {
            principal_arn = Some(field);
        } else if field.contains("role") {
            role_arn = Some(field);
        }
    }
    match (principal_arn, role_arn) {
        (Some(principal), Some(role)) => Ok(AwsRole::new(principal.to_string(), role.to_string())),
        _ => Err(AuthError::parse(format!(
            "role attribute value {:?} needs a saml-provider and a role",
            value.trim()
        ))),
    }
}

/// Role pairs carried by a base64 assertion.
pub fn parse_roles(encoded: &str) -> Result<Vec<AwsRole>> {
    SamlAssertion::from_base64(encoded)?.extract_roles()
}

pub fn partition_for(consumer_url: &str) -> Result<Partition> {
    Partition::for_consumer_url(consumer_url)
}

#[derive(Debug, Clone)]
pub struct SamlResponse {
    pub assertion: SamlAssertion,
    pub relay_state: Option<String>,
    pub consumer_url: String,
}

impl SamlResponse {
    pub fn from_form(form: SamlForm) -> Result<Self> {
        Ok(Self {
            assertion: SamlAssertion::from_base64(&form.saml_response)?,
            relay_state: form.relay_state,
            consumer_url: form.action,
        })
    }

    pub fn roles(&self) -> Result<Vec<AwsRole>> {
        self.assertion.extract_roles()
    }

    pub fn partition(&self) -> Result<Partition> {
        partition_for(&self.consumer_url)
    }
}

#[cfg(test)]
pub(crate) fn assertion_xml(values: &[&str]) -> String {
    let values = values
        .iter()
        .map(|v| {
            format!(
                "<saml2:AttributeValue xmlns:xs=\"http://www.w3.org/2001/XMLSchema\" xsi:type=\"xs:string\">{}</saml2:AttributeValue>",
                v
            )
        })
        .collect::<String>();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<saml2p:Response xmlns:saml2p="urn:oasis:names:tc:SAML:2.0:protocol" Destination="https://signin.aws.amazon.com/saml" ID="id1" Version="2.0">
  <saml2:Assertion xmlns:saml2="urn:oasis:names:tc:SAML:2.0:assertion" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" ID="id2" Version="2.0">
    <saml2:Subject><saml2:NameID>alice@example.com</saml2:NameID></saml2:Subject>
    <saml2:AttributeStatement>
      <saml2:Attribute Name="https://aws.amazon.com/SAML/Attributes/RoleSessionName">
        <saml2:AttributeValue>alice@example.com</saml2:AttributeValue>
      </saml2:Attribute>
      <saml2:Attribute Name="https://aws.amazon.com/SAML/Attributes/Role" NameFormat="urn:oasis:names:tc:SAML:2.0:attrname-format:uri">{}</saml2:Attribute>
    </saml2:AttributeStatement>
  </saml2:Assertion>
</saml2p:Response>"#,
        values
    )
}

#[cfg(test)]
pub(crate) fn encoded_assertion(values: &[&str]) -> String {
    STANDARD.encode(assertion_xml(values))
}
