use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::error::{AuthError, Result};
use crate::html;
use crate::http_client::{HttpRequest, HttpResponse};
use crate::identity_provider::IdentityProvider;
use crate::okta::{LoginRequest, Okta, SessionGrant};
use crate::saml::SamlResponse;

#[derive(Deserialize, Debug)]
struct CreateSessionResponse {
    id: String,
}

impl Okta<'_> {
    pub fn get_session_id(&self, session_token: &str) -> Result<String> {
        let uri = format!("{}/api/v1/sessions", self.base_uri());
        self.interrupt.check()?;
        let response = self
            .transport
            .request(HttpRequest::post_json(uri, json!({ "sessionToken": session_token })))?
            .error_for_status()?;
        let session: CreateSessionResponse = response.json()?;
        Ok(session.id)
    }

    fn fetch(&self, url: &str, session_id: Option<&str>) -> Result<HttpResponse> {
        self.interrupt.check()?;
        log::debug!("GET {}", url);
        let mut request = HttpRequest::get(url);
        if let Some(sid) = session_id {
            request = request.header("Cookie", format!("sid={}", sid));
        }
        self.transport.request(request)?.error_for_status()
    }

    fn page_for(&self, grant: SessionGrant) -> Result<HttpResponse> {
        match grant {
            SessionGrant::SessionToken(token) => {
                let session_id = self.get_session_id(&token)?;
                self.fetch(&self.settings.app_url, Some(&session_id))
            }
            SessionGrant::Redirect(url) => self.fetch(&url, None),
        }
    }

    /// Pull the SAML form out of an app page. A sign-in page carrying a
    /// state token means Okta wants step-up authentication first; that is
    /// honoured once.
    fn saml_from_page(&self, page: HttpResponse, step_up_allowed: bool) -> Result<SamlResponse> {
        if let Some(mut form) = html::saml_form(&page.body)? {
            form.action = absolute(&page.url, &form.action);
            return SamlResponse::from_form(form);
        }

        match html::state_token(&page.body) {
            Some(state_token) if step_up_allowed => {
                log::info!("app requires additional verification");
                self.ui.notify("Additional verification required.");
                let grant = self.run(LoginRequest::StepUp { state_token })?;
                let page = self.page_for(grant)?;
                self.saml_from_page(page, false)
            }
            _ => Err(AuthError::protocol(format!(
                "no SAML response on {}",
                page.url
            ))),
        }
    }

    pub fn saml_for(&self, grant: SessionGrant) -> Result<SamlResponse> {
        let page = self.page_for(grant)?;
        self.saml_from_page(page, true)
    }
}

impl IdentityProvider for Okta<'_> {
    fn get_saml_assertion(&self) -> Result<SamlResponse> {
        let grant = self.run(LoginRequest::Password)?;
        self.saml_for(grant)
    }
}

fn absolute(page_url: &str, action: &str) -> String {
    match Url::parse(page_url).and_then(|base| base.join(action)) {
        Ok(url) => url.into(),
        Err(_) => action.to_string(),
    }
}
