use serde::Deserialize;
use url::Url;

use crate::error::{AuthError, Result};
use crate::html::{self, HtmlForm, DUO_LOGIN_FORM_ID, DUO_PLUGIN_FORM_ID};
use crate::http_client::{HttpRequest, HttpResponse};
use crate::okta::Okta;
use crate::settings::DuoMethod;

pub const MAX_STATUS_POLLS: u32 = 16;

#[derive(Deserialize, Debug)]
struct Envelope<T> {
    stat: String,
    response: Option<T>,
    message: Option<String>,
}

#[derive(Deserialize, Debug)]
struct PromptResponse {
    txid: String,
}

#[derive(Deserialize, Debug, Default)]
struct StatusResponse {
    #[serde(default)]
    status_code: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

fn unwrap_envelope<T>(envelope: Envelope<T>, what: &str) -> Result<T> {
    if envelope.stat != "OK" {
        return Err(AuthError::LoginError {
            code: format!("DUO_{}", envelope.stat),
            summary: envelope.message.unwrap_or_else(|| format!("{} failed", what)),
        });
    }
    envelope
        .response
        .ok_or_else(|| AuthError::protocol(format!("Duo {} returned no response", what)))
}

/// Follow `entry_url` to the Duo prompt, approve, and hand control back to
/// Okta through the OIDC exit.
pub fn verify(okta: &Okta<'_>, entry_url: &str) -> Result<()> {
    let landing = get(okta, entry_url)?;
    let plugin = required_form(&landing, DUO_PLUGIN_FORM_ID)?;
    let plugin_url = resolve(&landing.url, plugin.action.as_deref())?;

    okta.interrupt.check()?;
    let prompt_page = okta
        .transport
        .request(HttpRequest::post_form(plugin_url, plugin.fields.clone()))?
        .error_for_status()?;
    let login = required_form(&prompt_page, DUO_LOGIN_FORM_ID)?;
    let base = origin(&prompt_page.url)?;

    let sid = login
        .get("sid")
        .map(str::to_string)
        .or_else(|| query_value(&prompt_page.url, "sid"))
        .ok_or_else(|| AuthError::protocol("Duo prompt page carries no sid"))?;

    let method = okta.settings.duo_method;
    let passcode = match method {
        DuoMethod::Passcode => Some(okta.ui.prompt("Enter Duo passcode")?),
        _ => None,
    };

    let mut fields = login.fields.clone();
    set_field(&mut fields, "sid", &sid);
    set_field(&mut fields, "device", "phone1");
    set_field(&mut fields, "factor", method.factor_name());
    if let Some(passcode) = &passcode {
        set_field(&mut fields, "passcode", passcode);
    }

    okta.interrupt.check()?;
    let prompt = okta
        .transport
        .request(HttpRequest::post_form(format!("{}/frame/v4/prompt", base), fields))?
        .error_for_status()?;
    let txid = unwrap_envelope(prompt.json::<Envelope<PromptResponse>>()?, "prompt")?.txid;
    okta.ui.notify(&format!("Duo: {} sent, waiting for approval...", method.factor_name()));

    wait_for_approval(okta, &base, &sid, &txid)?;

    okta.interrupt.check()?;
    okta.transport
        .request(HttpRequest::post_form(
            format!("{}/frame/v4/oidc/exit", base),
            [
                ("sid", sid.as_str()),
                ("txid", txid.as_str()),
                ("factor", method.factor_name()),
                ("device_key", login.get("device_key").unwrap_or_default()),
                ("_xsrf", login.get("_xsrf").unwrap_or_default()),
                ("dampen_choice", "true"),
            ],
        ))?
        .error_for_status()?;
    log::debug!("Duo universal prompt completed");
    Ok(())
}

fn wait_for_approval(okta: &Okta<'_>, base: &str, sid: &str, txid: &str) -> Result<()> {
    for poll in 0..MAX_STATUS_POLLS {
        if poll > 0 {
            okta.interrupt.sleep(okta.timings.duo_universal_poll)?;
        }
        let response = okta
            .transport
            .request(HttpRequest::post_form(
                format!("{}/frame/v4/status", base),
                [("txid", txid), ("sid", sid)],
            ))?
            .error_for_status()?;
        let status = unwrap_envelope(response.json::<Envelope<StatusResponse>>()?, "status")?;
        log::debug!("Duo status: {:?}", status.status_code);

        match status.status_code.as_deref() {
            Some("allow") => return Ok(()),
            Some("deny") => {
                if let Some(reason) = &status.reason {
                    log::info!("Duo denied: {}", reason);
                }
                return Err(AuthError::MfaDenied);
            }
            _ => {}
        }
    }
    Err(AuthError::MfaTimeout)
}

fn get(okta: &Okta<'_>, url: &str) -> Result<HttpResponse> {
    okta.interrupt.check()?;
    okta.transport.request(HttpRequest::get(url))?.error_for_status()
}

fn required_form(page: &HttpResponse, form_id: &str) -> Result<HtmlForm> {
    html::form_fields(&page.body, form_id)?.ok_or_else(|| {
        AuthError::protocol(format!("no form #{} on {}", form_id, page.url))
    })
}

fn resolve(page_url: &str, action: Option<&str>) -> Result<String> {
    let base = Url::parse(page_url)
        .map_err(|e| AuthError::protocol(format!("bad Duo page URL {}: {}", page_url, e)))?;
    match action {
        Some(action) if !action.is_empty() => base
            .join(action)
            .map(String::from)
            .map_err(|e| AuthError::protocol(format!("bad form action {}: {}", action, e))),
        _ => Ok(base.into()),
    }
}

fn origin(page_url: &str) -> Result<String> {
    let url = Url::parse(page_url)
        .map_err(|e| AuthError::protocol(format!("bad Duo page URL {}: {}", page_url, e)))?;
    Ok(url.origin().ascii_serialization())
}

fn query_value(url: &str, name: &str) -> Option<String> {
    Url::parse(url)
        .ok()?
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

fn set_field(fields: &mut Vec<(String, String)>, name: &str, value: &str) {
    match fields.iter_mut().find(|(k, _)| k == name) {
        Some((_, existing)) => *existing = value.to_string(),
        None => fields.push((name.to_string(), value.to_string())),
    }
}
