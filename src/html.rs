//! Every assumption about third-party HTML lives here.
//!
//! Selectors and form ids follow what Okta, AWS and Duo serve today; they are
//! not protocol guarantees, so they are kept as constants in one place.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::error::{AuthError, Result};

pub const SAML_RESPONSE_INPUT: &str = r#"input[name="SAMLResponse"]"#;
pub const RELAY_STATE_INPUT: &str = r#"input[name="RelayState"]"#;

pub const ROLE_ACCOUNT_BLOCK: &str = "fieldset > div.saml-account";
pub const ROLE_ACCOUNT_NAME: &str = "div.saml-account-name";
pub const ROLE_BLOCK: &str = "div.saml-role";
pub const ROLE_INPUT: &str = "input.saml-radio";
pub const ROLE_LABEL: &str = "label.saml-role-description";

pub const DUO_PLUGIN_FORM_ID: &str = "plugin_form";
pub const DUO_LOGIN_FORM_ID: &str = "login-form";

const STATE_TOKEN_PATTERN: &str = r#"var stateToken = ['"]([^'"]+)['"]"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamlForm {
    pub saml_response: String,
    pub relay_state: Option<String>,
    pub action: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HtmlForm {
    pub action: Option<String>,
    pub fields: Vec<(String, String)>,
}

impl HtmlForm {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleOption {
    pub role_arn: String,
    pub account_name: String,
    pub role_name: String,
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| AuthError::protocol(format!("bad selector {}: {}", css, e)))
}

fn text_of(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// The auto-submitting form that carries the assertion, if the page has one.
pub fn saml_form(html: &str) -> Result<Option<SamlForm>> {
    let document = Html::parse_document(html);
    let forms = selector("form")?;
    let response_input = selector(SAML_RESPONSE_INPUT)?;
    let relay_input = selector(RELAY_STATE_INPUT)?;

    for form in document.select(&forms) {
        let Some(input) = form.select(&response_input).next() else {
            continue;
        };
        let Some(saml_response) = input.value().attr("value") else {
            continue;
        };
        let relay_state = form
            .select(&relay_input)
            .next()
            .and_then(|e| e.value().attr("value"))
            .map(str::to_string);
        let action = form.value().attr("action").unwrap_or_default().to_string();

        return Ok(Some(SamlForm {
            saml_response: saml_response.to_string(),
            relay_state,
            action,
        }));
    }
    Ok(None)
}

/// State token embedded in an Okta sign-in page (step-up authentication).
pub fn state_token(html: &str) -> Option<String> {
    let pattern = Regex::new(STATE_TOKEN_PATTERN).ok()?;
    pattern
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().replace("\\x2D", "-"))
}

pub fn form_fields(html: &str, form_id: &str) -> Result<Option<HtmlForm>> {
    let document = Html::parse_document(html);
    let form_selector = selector(&format!(r#"form[id="{}"]"#, form_id))?;
    let inputs = selector("input[name]")?;

    let Some(form) = document.select(&form_selector).next() else {
        return Ok(None);
    };
    let fields = form
        .select(&inputs)
        .filter_map(|input| {
            let name = input.value().attr("name")?;
            let value = input.value().attr("value").unwrap_or_default();
            Some((name.to_string(), value.to_string()))
        })
        .collect();

    Ok(Some(HtmlForm {
        action: form.value().attr("action").map(str::to_string),
        fields,
    }))
}

pub fn input_value(html: &str, name: &str) -> Result<Option<String>> {
    let document = Html::parse_document(html);
    let input = selector(&format!(r#"input[name="{}"]"#, name))?;
    Ok(document
        .select(&input)
        .next()
        .and_then(|e| e.value().attr("value"))
        .map(str::to_string))
}

/// Roles listed on the AWS sign-in role chooser, in page order. Empty when
/// the page carries no role-selection markup.
pub fn role_options(html: &str) -> Result<Vec<RoleOption>> {
    let document = Html::parse_document(html);
    let accounts = selector(ROLE_ACCOUNT_BLOCK)?;
    let account_name = selector(ROLE_ACCOUNT_NAME)?;
    let roles = selector(ROLE_BLOCK)?;
    let role_input = selector(ROLE_INPUT)?;
    let role_label = selector(ROLE_LABEL)?;

    let mut options = Vec::new();
    for account in document.select(&accounts) {
        let name = account
            .select(&account_name)
            .next()
            .map(text_of)
            .unwrap_or_default();

        for role in account.select(&roles) {
            let Some(role_arn) = role
                .select(&role_input)
                .next()
                .and_then(|input| input.value().attr("id"))
            else {
                continue;
            };
            let role_name = role
                .select(&role_label)
                .next()
                .map(text_of)
                .unwrap_or_default();

            options.push(RoleOption {
                role_arn: role_arn.to_string(),
                account_name: name.clone(),
                role_name,
            });
        }
    }
    Ok(options)
}

#[cfg(test)]
pub(crate) const ROLE_PAGE: &str = r#"
<html><body>
<form id="saml_form" name="saml_form" action="/saml" method="post">
<fieldset>
  <div class="saml-account">
    <div onClick="expandCollapse(0);">
      <div class="saml-account-name">Account: production (111111111111)</div>
    </div>
    <hr style="border: 1px solid #ddd;">
    <div class="saml-account" id="0">
      <div class="saml-role" onClick="checkRadio(this);">
        <input type="radio" name="roleIndex" value="arn:aws:iam::111111111111:role/Admin" class="saml-radio" id="arn:aws:iam::111111111111:role/Admin" />
        <label for="arn:aws:iam::111111111111:role/Admin" class="saml-role-description">Admin</label>
      </div>
      <div class="saml-role" onClick="checkRadio(this);">
        <input type="radio" name="roleIndex" value="arn:aws:iam::111111111111:role/ReadOnly" class="saml-radio" id="arn:aws:iam::111111111111:role/ReadOnly" />
        <label for="arn:aws:iam::111111111111:role/ReadOnly" class="saml-role-description">ReadOnly</label>
      </div>
    </div>
  </div>
  <div class="saml-account">
    <div onClick="expandCollapse(1);">
      <div class="saml-account-name">Account: staging (222222222222)</div>
    </div>
    <div class="saml-account" id="1">
      <div class="saml-role" onClick="checkRadio(this);">
        <input type="radio" name="roleIndex" value="arn:aws:iam::222222222222:role/Developer" class="saml-radio" id="arn:aws:iam::222222222222:role/Developer" />
        <label for="arn:aws:iam::222222222222:role/Developer" class="saml-role-description">Developer</label>
      </div>
    </div>
  </div>
</fieldset>
</form>
</body></html>
"#;
