use crate::aws::{AwsRole, RoleSet};
use crate::error::{AuthError, Result};
use crate::html;
use crate::http_client::{HttpRequest, Transport};
use crate::saml::SamlResponse;
use crate::ui::UI;

pub const SINGLE_ACCOUNT_NAME: &str = "SingleAccountName";
pub const SINGLE_ROLE_NAME: &str = "SingleRole";

/// Post the assertion to the AWS consumer endpoint and return the role
/// chooser it renders.
pub fn fetch_role_page(transport: &dyn Transport, saml: &SamlResponse) -> Result<String> {
    let mut fields = vec![(
        "SAMLResponse".to_string(),
        saml.assertion.encoded_as_base64().to_string(),
    )];
    if let Some(relay_state) = &saml.relay_state {
        fields.push(("RelayState".to_string(), relay_state.clone()));
    }
    let response = transport
        .request(HttpRequest::post_form(&saml.consumer_url, fields))?
        .error_for_status()?;
    Ok(response.body)
}

pub fn enrich(roles: &[AwsRole], page: Option<&str>) -> Result<Vec<RoleSet>> {
    let options = match page {
        Some(page) => html::role_options(page)?,
        None => Vec::new(),
    };

    if options.is_empty() {
        if let [role] = roles {
            return Ok(vec![RoleSet {
                role: role.clone(),
                friendly_account_name: SINGLE_ACCOUNT_NAME.to_string(),
                friendly_role_name: SINGLE_ROLE_NAME.to_string(),
            }]);
        }
        return Ok(roles.iter().cloned().map(RoleSet::unnamed).collect());
    }

    Ok(roles
        .iter()
        .map(|role| match options.iter().find(|o| o.role_arn == role.role_arn) {
            Some(option) => RoleSet {
                role: role.clone(),
                friendly_account_name: option.account_name.clone(),
                friendly_role_name: option.role_name.clone(),
            },
            None => RoleSet::unnamed(role.clone()),
        })
        .collect())
}

#[derive(Debug, PartialEq, Eq)]
pub struct AccountGroup<'a> {
    pub account_name: &'a str,
    pub roles: Vec<&'a RoleSet>,
}

pub fn group_by_account(role_sets: &[RoleSet]) -> Vec<AccountGroup<'_>> {
    let mut groups: Vec<AccountGroup<'_>> = Vec::new();
    for role_set in role_sets {
        match groups
            .iter_mut()
            .find(|g| g.account_name == role_set.friendly_account_name)
        {
            Some(group) => group.roles.push(role_set),
            None => groups.push(AccountGroup {
                account_name: &role_set.friendly_account_name,
                roles: vec![role_set],
            }),
        }
    }
    groups
}

/// Roles matching the configured `aws_rolename`: `all`, a full role ARN, or
/// a role name.
pub fn filter_roles<'a>(role_sets: &'a [RoleSet], wanted: &str) -> Vec<&'a RoleSet> {
    if wanted.eq_ignore_ascii_case("all") {
        return role_sets.iter().collect();
    }
    role_sets
        .iter()
        .filter(|r| {
            r.role.role_arn == wanted || r.role.role_name() == wanted || r.friendly_role_name == wanted
        })
        .collect()
}

pub fn choose_roles<'a>(
    ui: &dyn UI,
    role_sets: &'a [RoleSet],
    wanted: Option<&str>,
) -> Result<Vec<&'a RoleSet>> {
    if role_sets.is_empty() {
        return Err(AuthError::parse("assertion grants no AWS roles"));
    }
    if let Some(wanted) = wanted {
        let matched = filter_roles(role_sets, wanted);
        if !matched.is_empty() {
            return Ok(matched);
        }
        ui.notify(&format!("Role {} is not available, choose another.", wanted));
    }
    if let [only] = role_sets {
        return Ok(vec![only]);
    }

    let groups = group_by_account(role_sets);
    let mut ordered = Vec::new();
    let mut labels = Vec::new();
    for group in &groups {
        for role_set in &group.roles {
            labels.push(role_label(group.account_name, role_set));
            ordered.push(*role_set);
        }
    }
    let index = ui.select("Pick a role", &labels)?;
    ordered
        .get(index)
        .map(|r| vec![*r])
        .ok_or_else(|| AuthError::Prompt(format!("no role at index {}", index)))
}

fn role_label(account_name: &str, role_set: &RoleSet) -> String {
    let role_name = if role_set.friendly_role_name.is_empty() {
        role_set.role.role_name()
    } else {
        role_set.friendly_role_name.as_str()
    };
    if account_name.is_empty() {
        format!("{} ({})", role_name, role_set.role.role_arn)
    } else {
        format!("{} / {} ({})", account_name, role_name, role_set.role.role_arn)
    }
}
