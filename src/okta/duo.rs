//! Duo classic: either the Web widget in a browser, or the Duo frame API
//! driven directly (push, phone call or passcode).

use serde::Deserialize;
use url::Url;

use crate::error::{AuthError, Result};
use crate::html;
use crate::http_client::HttpRequest;
use crate::okta::models::{AuthnResponse, DuoVerification};
use crate::okta::widget::{escape, WidgetServer};
use crate::okta::{duo_universal, state_token, Okta};
use crate::settings::DuoMethod;

pub const MAX_STATUS_POLLS: u32 = 30;

/// Run the Duo part of a Duo challenge. Okta learns the outcome from Duo
/// (or from our callback); the caller then polls Okta as usual.
pub fn verify(okta: &Okta<'_>, response: &AuthnResponse) -> Result<()> {
    let factor = response
        .challenged_factor()
        .ok_or_else(|| AuthError::protocol("Duo challenge without the challenged factor"))?;
    let verification = factor
        .embedded
        .verification
        .as_ref()
        .ok_or_else(|| AuthError::protocol("Duo challenge without verification data"))?;

    if let Some(authorize) = verification.authorize_url() {
        log::debug!("Duo universal prompt");
        return duo_universal::verify(okta, authorize);
    }

    let token = state_token(response)?;
    match okta.settings.duo_method {
        DuoMethod::Web => browser_widget(okta, verification, token),
        method => DuoFrame::new(okta, verification)?.authenticate(method, &factor.id, token),
    }
}

fn browser_widget(okta: &Okta<'_>, verification: &DuoVerification, state_token: &str) -> Result<()> {
    let page = widget_page(verification, state_token)?;
    let server = WidgetServer::start(okta.settings.widget_port, page)?;
    let url = server.url();

    okta.ui
        .notify(&format!("Complete Duo authentication in your browser: {}", url));
    okta.ui.open_url(&url);
    okta.interrupt.sleep(okta.timings.widget_wait)
}

pub fn widget_page(verification: &DuoVerification, state_token: &str) -> Result<String> {
    let missing = |what: &str| AuthError::protocol(format!("Duo verification lacks {}", what));
    let host = verification.host.as_deref().ok_or_else(|| missing("a host"))?;
    let signature = verification
        .signature
        .as_deref()
        .ok_or_else(|| missing("a signature"))?;
    let script = verification.script_url().ok_or_else(|| missing("a script link"))?;
    let complete = verification
        .complete_url()
        .ok_or_else(|| missing("a complete link"))?;

    Ok(format!(
        r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>Duo authentication</title></head>
<body>
<p>Complete the Duo prompt below, then return to the terminal.</p>
<iframe id="duo_iframe" width="620" height="330" frameborder="0"
  data-host="{host}" data-sig-request="{signature}" data-post-action="{complete}"></iframe>
<form method="POST" id="duo_form">
  <input type="hidden" name="stateToken" value="{token}">
</form>
<script src="{script}"></script>
</body>
</html>
"#,
        host = escape(host),
        signature = escape(signature),
        complete = escape(complete),
        token = escape(state_token),
        script = escape(script),
    ))
}

#[derive(Deserialize, Debug)]
struct Envelope<T> {
    stat: String,
    response: Option<T>,
    message: Option<String>,
}

impl<T> Envelope<T> {
    fn into_response(self, what: &str) -> Result<T> {
        if self.stat != "OK" {
            return Err(AuthError::LoginError {
                code: format!("DUO_{}", self.stat),
                summary: self.message.unwrap_or_else(|| format!("{} failed", what)),
            });
        }
        self.response
            .ok_or_else(|| AuthError::protocol(format!("Duo {} returned no response", what)))
    }
}

#[derive(Deserialize, Debug)]
struct PromptResponse {
    txid: String,
}

#[derive(Deserialize, Debug, Default)]
struct StatusResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    status_code: Option<String>,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    result_url: Option<String>,
    #[serde(default)]
    cookie: Option<String>,
}

struct DuoFrame<'o, 'a> {
    okta: &'o Okta<'a>,
    base: String,
    tx: String,
    app: String,
    complete_url: String,
}

impl<'o, 'a> DuoFrame<'o, 'a> {
    fn new(okta: &'o Okta<'a>, verification: &DuoVerification) -> Result<Self> {
        let host = verification
            .host
            .as_deref()
            .ok_or_else(|| AuthError::protocol("Duo verification lacks a host"))?;
        let signature = verification
            .signature
            .as_deref()
            .ok_or_else(|| AuthError::protocol("Duo verification lacks a signature"))?;
        let (tx, app) = split_signature(signature)?;
        let complete_url = verification
            .complete_url()
            .ok_or_else(|| AuthError::protocol("Duo verification lacks a complete link"))?;

        let base = if host.starts_with("http://") || host.starts_with("https://") {
            host.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", host)
        };

        Ok(Self {
            okta,
            base,
            tx: tx.to_string(),
            app: app.to_string(),
            complete_url: complete_url.to_string(),
        })
    }

    fn authenticate(&self, method: DuoMethod, factor_id: &str, state_token: &str) -> Result<()> {
        let sid = self.open_session()?;
        let passcode = match method {
            DuoMethod::Passcode => Some(self.okta.ui.prompt("Enter Duo passcode")?),
            _ => None,
        };
        let txid = self.start_transaction(&sid, method, passcode.as_deref())?;
        let cookie = self.wait_for_result(&sid, &txid)?;
        self.callback(factor_id, state_token, &cookie)
    }

    fn open_session(&self) -> Result<String> {
        let parent = format!("{}/signin/verify/duo/web", self.okta.base_uri());
        let mut url = Url::parse(&format!("{}/frame/web/v1/auth", self.base))
            .map_err(|e| AuthError::protocol(format!("bad Duo host {}: {}", self.base, e)))?;
        url.query_pairs_mut()
            .append_pair("tx", &self.tx)
            .append_pair("parent", &parent)
            .append_pair("v", "2.6");

        let response = self
            .okta
            .transport
            .request(HttpRequest::post_form(
                url.as_str(),
                [
                    ("parent", parent.as_str()),
                    ("java_version", ""),
                    ("flash_version", ""),
                    ("screen_resolution_width", "3840"),
                    ("screen_resolution_height", "2160"),
                    ("color_depth", "24"),
                ],
            ))?
            .error_for_status()?;

        let from_url = Url::parse(&response.url).ok().and_then(|u| {
            u.query_pairs()
                .find(|(k, _)| k == "sid")
                .map(|(_, v)| v.into_owned())
        });
        let sid = match from_url {
            Some(sid) => sid,
            None => html::input_value(&response.body, "sid")?
                .ok_or_else(|| AuthError::protocol("Duo did not open a session"))?,
        };
        log::debug!("Duo session opened");
        Ok(sid)
    }

    fn start_transaction(&self, sid: &str, method: DuoMethod, passcode: Option<&str>) -> Result<String> {
        let mut fields = vec![
            ("sid", sid),
            ("device", "phone1"),
            ("factor", method.factor_name()),
            ("out_of_date", "False"),
        ];
        if let Some(passcode) = passcode {
            fields.push(("passcode", passcode));
        }

        let response = self
            .okta
            .transport
            .request(HttpRequest::post_form(format!("{}/frame/prompt", self.base), fields))?
            .error_for_status()?;
        let prompt = response.json::<Envelope<PromptResponse>>()?.into_response("prompt")?;
        Ok(prompt.txid)
    }

    fn wait_for_result(&self, sid: &str, txid: &str) -> Result<String> {
        let mut last_status = None;
        for poll in 0..MAX_STATUS_POLLS {
            if poll > 0 {
                self.okta.interrupt.sleep(self.okta.timings.duo_status_poll)?;
            }
            let status = self.status(sid, txid)?;

            if status.status != last_status {
                if let Some(message) = &status.status {
                    self.okta.ui.notify(message);
                }
                last_status = status.status.clone();
            }

            let result = status.result.clone();
            match result.as_deref() {
                Some("SUCCESS") => return self.result_cookie(sid, status),
                Some("FAILURE") => return Err(AuthError::MfaDenied),
                Some("TIMEOUT") => return Err(AuthError::MfaTimeout),
                _ if status.status_code.as_deref() == Some("timeout") => {
                    return Err(AuthError::MfaTimeout)
                }
                _ => {}
            }
        }
        Err(AuthError::MfaTimeout)
    }

    fn status(&self, sid: &str, txid: &str) -> Result<StatusResponse> {
        self.okta.interrupt.check()?;
        let response = self
            .okta
            .transport
            .request(HttpRequest::post_form(
                format!("{}/frame/status", self.base),
                [("sid", sid), ("txid", txid)],
            ))?
            .error_for_status()?;
        response.json::<Envelope<StatusResponse>>()?.into_response("status")
    }

    fn result_cookie(&self, sid: &str, status: StatusResponse) -> Result<String> {
        if let Some(cookie) = status.cookie {
            return Ok(cookie);
        }
        let result_url = status
            .result_url
            .ok_or_else(|| AuthError::protocol("Duo approved without a result link"))?;
        let response = self
            .okta
            .transport
            .request(HttpRequest::post_form(
                format!("{}{}", self.base, result_url),
                [("sid", sid)],
            ))?
            .error_for_status()?;
        response
            .json::<Envelope<StatusResponse>>()?
            .into_response("result")?
            .cookie
            .ok_or_else(|| AuthError::protocol("Duo result carries no cookie"))
    }

    fn callback(&self, factor_id: &str, state_token: &str, cookie: &str) -> Result<()> {
        let sig_response = format!("{}:{}", cookie, self.app);
        self.okta
            .transport
            .request(HttpRequest::post_form(
                self.complete_url.as_str(),
                [
                    ("id", factor_id),
                    ("stateToken", state_token),
                    ("sig_response", sig_response.as_str()),
                ],
            ))?
            .error_for_status()?;
        log::debug!("Duo callback delivered to Okta");
        Ok(())
    }
}

/// Split Okta's `TX|...:APP|...` signature request.
fn split_signature(signature: &str) -> Result<(&str, &str)> {
    signature
        .split_once(':')
        .filter(|(tx, app)| tx.starts_with("TX|") && app.starts_with("APP|"))
        .ok_or_else(|| AuthError::protocol("unexpected Duo signature format"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::okta::fido::NoAuthenticators;
    use crate::okta::Timings;
    use crate::interrupt::Interrupt;
    use crate::settings::Settings;
    use crate::testing::{MemorySecrets, ScriptedTransport, ScriptedUI};
    use reqwest::Method;
    use serde_json::json;

    const APP_URL: &str = "https://example.okta.com/home/amazon_aws/0oa1/272";

    fn verification() -> DuoVerification {
        serde_json::from_value(json!({
            "host": "api-1234.duosecurity.com",
            "signature": "TX|dHg=|abc:APP|YXBw|def",
            "_links": {
                "script": {"href": "https://example.okta.com/js/duo.js"},
                "complete": {"href": "https://example.okta.com/api/v1/authn/factors/dsf1/lifecycle/duoCallback"}
            }
        }))
        .unwrap()
    }

    fn run_frame(transport: &ScriptedTransport, ui: &ScriptedUI, method: DuoMethod) -> Result<()> {
        let settings = Settings::for_app(APP_URL);
        let secrets = MemorySecrets::default();
        let okta = Okta::new(&settings, ui, transport, &secrets, &NoAuthenticators, Interrupt::new())
            .unwrap()
            .with_timings(Timings::immediate());
        DuoFrame::new(&okta, &verification())?.authenticate(method, "dsf1", "st-1")
    }

    fn session(transport: ScriptedTransport) -> ScriptedTransport {
        transport.reply_from(
            Method::POST,
            "/frame/web/v1/auth",
            "https://api-1234.duosecurity.com/frame/prompt?sid=sid-1",
            200,
            "<html></html>",
        )
    }

    #[test]
    fn push_then_callback() {
        let transport = session(ScriptedTransport::new())
            .json(Method::POST, "/frame/prompt", json!({"stat": "OK", "response": {"txid": "tx-1"}}))
            .json(
                Method::POST,
                "/frame/status",
                json!({"stat": "OK", "response": {"status_code": "pushed", "status": "Pushed a login request"}}),
            )
            .json(
                Method::POST,
                "/frame/status",
                json!({"stat": "OK", "response": {"status_code": "allow", "result": "SUCCESS", "result_url": "/frame/status/tx-1"}}),
            )
            .json(
                Method::POST,
                "/frame/status/tx-1",
                json!({"stat": "OK", "response": {"cookie": "AUTH|cookie"}}),
            )
            .reply(Method::POST, "/duoCallback", 200, "");
        let ui = ScriptedUI::new();

        run_frame(&transport, &ui, DuoMethod::Push).unwrap();

        let requests = transport.requests();
        assert_eq!(requests[1].form_value("factor"), Some("Duo Push"));
        assert_eq!(requests[1].form_value("sid"), Some("sid-1"));
        let callback = requests.last().unwrap();
        assert_eq!(callback.form_value("sig_response"), Some("AUTH|cookie:APP|YXBw|def"));
        assert_eq!(callback.form_value("stateToken"), Some("st-1"));
        assert_eq!(ui.notices(), vec!["Pushed a login request".to_string()]);
    }

    #[test]
    fn passcode_is_sent_with_the_prompt() {
        let transport = session(ScriptedTransport::new())
            .json(Method::POST, "/frame/prompt", json!({"stat": "OK", "response": {"txid": "tx-1"}}))
            .json(
                Method::POST,
                "/frame/status",
                json!({"stat": "OK", "response": {"result": "SUCCESS", "cookie": "AUTH|c"}}),
            )
            .reply(Method::POST, "/duoCallback", 200, "");
        let ui = ScriptedUI::new().with_answer("123456");

        run_frame(&transport, &ui, DuoMethod::Passcode).unwrap();

        let prompt = &transport.requests()[1];
        assert_eq!(prompt.form_value("factor"), Some("Passcode"));
        assert_eq!(prompt.form_value("passcode"), Some("123456"));
    }

    #[test]
    fn failure_is_denied() {
        let transport = session(ScriptedTransport::new())
            .json(Method::POST, "/frame/prompt", json!({"stat": "OK", "response": {"txid": "tx-1"}}))
            .json(
                Method::POST,
                "/frame/status",
                json!({"stat": "OK", "response": {"result": "FAILURE", "status": "Login request denied"}}),
            );

        let err = run_frame(&transport, &ScriptedUI::new(), DuoMethod::Push).unwrap_err();

        assert!(matches!(err, AuthError::MfaDenied));
        assert_eq!(transport.remaining(), 0);
    }

    #[test]
    fn status_polling_is_bounded() {
        let mut transport = session(ScriptedTransport::new()).json(
            Method::POST,
            "/frame/prompt",
            json!({"stat": "OK", "response": {"txid": "tx-1"}}),
        );
        for _ in 0..MAX_STATUS_POLLS {
            transport = transport.json(
                Method::POST,
                "/frame/status",
                json!({"stat": "OK", "response": {"status_code": "pushed"}}),
            );
        }

        let err = run_frame(&transport, &ScriptedUI::new(), DuoMethod::Push).unwrap_err();

        assert!(matches!(err, AuthError::MfaTimeout));
        assert_eq!(transport.requests().len(), 2 + MAX_STATUS_POLLS as usize);
    }

    #[test]
    fn widget_page_embeds_escaped_values() {
        let page = widget_page(&verification(), "st-\"1").unwrap();
        assert!(page.contains(r#"data-host="api-1234.duosecurity.com""#));
        assert!(page.contains(r#"data-sig-request="TX|dHg=|abc:APP|YXBw|def""#));
        assert!(page.contains(r#"value="st-&quot;1""#));
        assert!(page.contains(r#"<script src="https://example.okta.com/js/duo.js">"#));
    }

    #[test]
    fn signature_format() {
        assert_eq!(split_signature("TX|a:APP|b").unwrap(), ("TX|a", "APP|b"));
        assert!(split_signature("garbage").is_err());
    }
}
