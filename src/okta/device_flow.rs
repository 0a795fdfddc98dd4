//! OAuth 2.0 device authorization flow against the Okta org, ending in a
//! web SSO token that opens the AWS app without the authn API.

use std::time::{Duration, Instant};

use serde::Deserialize;
use url::Url;

use crate::error::{AuthError, Result};
use crate::html;
use crate::http_client::{HttpRequest, Transport};
use crate::identity_provider::IdentityProvider;
use crate::interrupt::Interrupt;
use crate::saml::SamlResponse;
use crate::settings::Settings;
use crate::ui::UI;

const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";
const TOKEN_EXCHANGE_GRANT: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
const SCOPES: &str = "openid okta.apps.sso okta.apps.read";
const DEFAULT_INTERVAL_SECONDS: u64 = 5;
const SLOW_DOWN_STEP_SECONDS: u64 = 5;

#[derive(Deserialize, Debug, Clone)]
pub struct DeviceAuthorization {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    #[serde(default)]
    pub verification_uri_complete: Option<String>,
    pub expires_in: u64,
    #[serde(default)]
    pub interval: Option<u64>,
}

#[derive(Deserialize, Debug, Default)]
pub struct TokenResponse {
    pub access_token: Option<String>,
    pub id_token: Option<String>,
    pub device_secret: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

pub struct OktaDeviceFlow<'a> {
    settings: &'a Settings,
    ui: &'a dyn UI,
    transport: &'a dyn Transport,
    interrupt: Interrupt,
    base_uri: String,
    client_id: String,
}

impl<'a> OktaDeviceFlow<'a> {
    pub fn new(
        settings: &'a Settings,
        ui: &'a dyn UI,
        transport: &'a dyn Transport,
        interrupt: Interrupt,
    ) -> Result<Self> {
        let client_id = settings
            .client_id
            .clone()
            .ok_or_else(|| AuthError::Config("client_id is required for the device flow".to_string()))?;
        Ok(Self {
            settings,
            ui,
            transport,
            interrupt,
            base_uri: settings.org_url()?,
            client_id,
        })
    }

    fn token_url(&self) -> String {
        format!("{}/oauth2/v1/token", self.base_uri)
    }

    pub fn authorize(&self) -> Result<DeviceAuthorization> {
        self.interrupt.check()?;
        let response = self
            .transport
            .request(HttpRequest::post_form(
                format!("{}/oauth2/v1/device/authorize", self.base_uri),
                [("client_id", self.client_id.as_str()), ("scope", SCOPES)],
            ))?
            .error_for_status()?;
        response.json()
    }

    /// Poll the token endpoint until the user approves, declines, or the
    /// device code expires.
    pub fn poll_token(&self, authorization: &DeviceAuthorization) -> Result<TokenResponse> {
        let deadline = Instant::now() + Duration::from_secs(authorization.expires_in);
        let mut interval = authorization.interval.unwrap_or(DEFAULT_INTERVAL_SECONDS);

        loop {
            if Instant::now() >= deadline {
                return Err(AuthError::MfaTimeout);
            }
            self.interrupt.check()?;
            let response = self.transport.request(HttpRequest::post_form(
                self.token_url(),
                [
                    ("client_id", self.client_id.as_str()),
                    ("device_code", authorization.device_code.as_str()),
                    ("grant_type", DEVICE_CODE_GRANT),
                ],
            ))?;
            let token: TokenResponse = response.json()?;

            let error = token.error.clone();
            match error.as_deref() {
                None => return Ok(token),
                Some("authorization_pending") => {}
                Some("slow_down") => interval += SLOW_DOWN_STEP_SECONDS,
                Some("access_denied") => return Err(AuthError::MfaDenied),
                Some("expired_token") => return Err(AuthError::MfaTimeout),
                Some(code) => {
                    return Err(AuthError::LoginError {
                        code: code.to_string(),
                        summary: token.error_description.clone().unwrap_or_default(),
                    })
                }
            }
            self.interrupt.sleep(Duration::from_secs(interval))?;
        }
    }

    fn sso_url(&self, sso_token: &str) -> Result<String> {
        let mut url = Url::parse(&format!("{}/login/token/sso", self.base_uri))
            .map_err(|e| AuthError::protocol(format!("bad Okta URL {}: {}", self.base_uri, e)))?;
        url.query_pairs_mut().append_pair("token", sso_token);
        Ok(url.into())
    }

    pub fn web_sso_token(&self, tokens: &TokenResponse) -> Result<String> {
        let id_token = tokens
            .id_token
            .as_deref()
            .ok_or_else(|| AuthError::protocol("token response carries no id_token"))?;
        let device_secret = tokens
            .device_secret
            .as_deref()
            .ok_or_else(|| AuthError::protocol("token response carries no device_secret"))?;
        let audience = format!("urn:okta:apps:{}", self.settings.app_id()?);

        self.interrupt.check()?;
        let response = self
            .transport
            .request(HttpRequest::post_form(
                self.token_url(),
                [
                    ("client_id", self.client_id.as_str()),
                    ("actor_token", device_secret),
                    ("actor_token_type", "urn:x-oath:params:oauth:token-type:device-secret"),
                    ("subject_token", id_token),
                    ("subject_token_type", "urn:ietf:params:oauth:token-type:id_token"),
                    ("grant_type", TOKEN_EXCHANGE_GRANT),
                    ("requested_token_type", "urn:okta:oauth:token-type:web_sso_token"),
                    ("audience", audience.as_str()),
                ],
            ))?;
        let exchanged: TokenResponse = response.json()?;
        if let Some(code) = exchanged.error {
            return Err(AuthError::LoginError {
                code,
                summary: exchanged.error_description.unwrap_or_default(),
            });
        }
        exchanged
            .access_token
            .ok_or_else(|| AuthError::protocol("token exchange returned no access_token"))
    }
}

impl IdentityProvider for OktaDeviceFlow<'_> {
    fn get_saml_assertion(&self) -> Result<SamlResponse> {
        let authorization = self.authorize()?;
        let link = authorization
            .verification_uri_complete
            .clone()
            .unwrap_or_else(|| authorization.verification_uri.clone());
        self.ui.notify(&format!(
            "To sign in, open {} and confirm the code {}",
            link, authorization.user_code
        ));
        self.ui.open_url(&link);

        let tokens = self.poll_token(&authorization)?;
        let sso_token = self.web_sso_token(&tokens)?;

        self.interrupt.check()?;
        let url = self.sso_url(&sso_token)?;
        let page = self.transport.request(HttpRequest::get(url))?.error_for_status()?;
        let form = html::saml_form(&page.body)?
            .ok_or_else(|| AuthError::protocol(format!("no SAML response on {}", page.url)))?;
        SamlResponse::from_form(form)
    }
}
