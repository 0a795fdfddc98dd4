pub mod device_flow;
pub mod duo;
pub mod duo_universal;
pub mod factors;
pub mod fido;
pub mod models;
pub mod session;
pub mod widget;


use std::time::Duration;

use serde_json::json;

use crate::error::{AuthError, Result};
use crate::http_client::{HttpRequest, Transport};
use crate::interrupt::Interrupt;
use crate::secrets::SecretStore;
use crate::settings::Settings;
use crate::ui::UI;

use factors::StepResult;
use fido::AuthenticatorLocator;
use models::{AuthnResponse, ChallengeState, Factor, FactorKind, LoginStatus};

/// Polls of a WAITING push before we give up on our side.
pub const MAX_PUSH_POLLS: u32 = 300;
/// Rejected passcodes tolerated before the login is abandoned.
pub const MAX_PASSCODE_ATTEMPTS: u32 = 3;

const INVALID_CREDENTIALS_CODE: &str = "E0000004";

#[derive(Debug, Clone)]
pub struct Timings {
    pub push_poll: Duration,
    pub step_delay: Duration,
    pub duo_status_poll: Duration,
    pub duo_universal_poll: Duration,
    pub fido_retry: Duration,
    pub widget_wait: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            push_poll: Duration::from_secs(1),
            step_delay: Duration::from_millis(500),
            duo_status_poll: Duration::from_secs(1),
            duo_universal_poll: Duration::from_millis(500),
            fido_retry: Duration::from_millis(500),
            widget_wait: Duration::from_secs(10),
        }
    }
}

impl Timings {
    pub fn immediate() -> Self {
        Self {
            push_poll: Duration::ZERO,
            step_delay: Duration::ZERO,
            duo_status_poll: Duration::ZERO,
            duo_universal_poll: Duration::ZERO,
            fido_retry: Duration::ZERO,
            widget_wait: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginRequest {
    Password,
    /// Continue a transaction Okta started on its own, e.g. step-up
    /// authentication demanded by the app link.
    StepUp { state_token: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionGrant {
    SessionToken(String),
    /// Link to follow with the session cookie Okta already set.
    Redirect(String),
}

#[derive(Debug, Default)]
struct Flow {
    username: Option<String>,
    typed_password: Option<String>,
    duo_started: bool,
    push_polls: u32,
    answer_shown: bool,
    passcode_failures: u32,
}

pub struct Okta<'a> {
    pub settings: &'a Settings,
    pub ui: &'a dyn UI,
    pub transport: &'a dyn Transport,
    pub secrets: &'a dyn SecretStore,
    pub authenticators: &'a dyn AuthenticatorLocator,
    pub interrupt: Interrupt,
    pub timings: Timings,
    base_uri: String,
}

impl<'a> Okta<'a> {
    pub fn new(
        settings: &'a Settings,
        ui: &'a dyn UI,
        transport: &'a dyn Transport,
        secrets: &'a dyn SecretStore,
        authenticators: &'a dyn AuthenticatorLocator,
        interrupt: Interrupt,
    ) -> Result<Self> {
        let base_uri = settings.org_url()?;
        log::debug!("okta_uri: {}", base_uri);
        Ok(Self {
            settings,
            ui,
            transport,
            secrets,
            authenticators,
            interrupt,
            timings: Timings::default(),
            base_uri,
        })
    }

    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    pub fn base_uri(&self) -> &str {
        &self.base_uri
    }

    /// POST a JSON body to an authn endpoint and decode the reply. Okta
    /// answers errors with a JSON body too, so the status code is not
    /// checked here; `login_status` turns `errorCode` into an error.
    pub(crate) fn post_authn(&self, url: &str, body: serde_json::Value) -> Result<AuthnResponse> {
        self.interrupt.check()?;
        log::debug!("POST {}", url);
        let response = self.transport.request(HttpRequest::post_json(url, body))?;
        if response.body.trim().is_empty() {
            return Err(AuthError::protocol(format!(
                "{} returned HTTP {} with an empty body",
                response.url, response.status
            )));
        }
        response.json()
    }

    pub fn run(&self, request: LoginRequest) -> Result<SessionGrant> {
        let mut flow = Flow::default();
        let mut response = match request {
            LoginRequest::Password => {
                let url = format!("{}/api/v1/authn", self.base_uri);
                self.primary_auth(&url, None, &mut flow)?
            }
            LoginRequest::StepUp { state_token } => self.introspect(&state_token)?,
        };

        loop {
            self.interrupt.check()?;
            let status = response.login_status();
            log::debug!("authn status: {:?}", status);
            if status.issues_step() {
                self.interrupt.sleep(self.timings.step_delay)?;
            }

            response = match status {
                LoginStatus::Error { code, summary } => {
                    return Err(self.login_error(code, summary, &flow));
                }
                LoginStatus::Unauthenticated => {
                    let fallback = format!("{}/api/v1/authn", self.base_uri);
                    let url = response.link("next").unwrap_or(fallback.as_str()).to_string();
                    self.primary_auth(&url, response.state_token.as_deref(), &mut flow)?
                }
                LoginStatus::PasswordWarn => self.skip_password_warning(&response)?,
                LoginStatus::LockedOut => return Err(AuthError::AccountLocked),
                LoginStatus::MfaEnrollRequired => return Err(AuthError::MfaEnrollmentRequired),
                LoginStatus::MfaRequired => self.multi_factor(&response, &mut flow)?,
                LoginStatus::MfaChallenge(state) => {
                    self.answer_challenge(&response, state, &mut flow)?
                }
                LoginStatus::Success => return self.finish(&response, &flow),
                LoginStatus::Unrecognized(status) => {
                    return Err(AuthError::UnknownLoginStatus(status));
                }
            };
        }
    }

    fn introspect(&self, state_token: &str) -> Result<AuthnResponse> {
        let url = format!("{}/api/v1/authn/introspect", self.base_uri);
        self.post_authn(&url, json!({ "stateToken": state_token }))
    }

    fn primary_auth(
        &self,
        url: &str,
        state_token: Option<&str>,
        flow: &mut Flow,
    ) -> Result<AuthnResponse> {
        let username = self.username(flow)?;
        let password = self.password(&username, flow)?;

        let mut body = json!({
            "username": username,
            "password": password,
            "options": {
                "warnBeforePasswordExpired": true,
                "multiOptionalFactorEnroll": false,
            },
        });
        if let Some(token) = state_token {
            body["stateToken"] = json!(token);
        }
        self.post_authn(url, body)
    }

    fn username(&self, flow: &mut Flow) -> Result<String> {
        if let Some(username) = &flow.username {
            return Ok(username.clone());
        }
        let username = match &self.settings.username {
            Some(username) => username.clone(),
            None => self.ui.prompt("Okta username")?,
        };
        flow.username = Some(username.clone());
        Ok(username)
    }

    fn password(&self, username: &str, flow: &mut Flow) -> Result<String> {
        if self.settings.remember_password && flow.typed_password.is_none() {
            if let Some(password) = self.secrets.get_secret(username) {
                log::debug!("using cached password for {}", username);
                return Ok(password);
            }
        }
        let password = self.ui.prompt_hidden(&format!("Okta password for {}", username))?;
        flow.typed_password = Some(password.clone());
        Ok(password)
    }

    fn login_error(&self, code: String, summary: String, flow: &Flow) -> AuthError {
        if code == INVALID_CREDENTIALS_CODE {
            if let (true, Some(username)) = (self.settings.remember_password, &flow.username) {
                log::info!("removing cached password for {}", username);
                self.secrets.delete_secret(username);
            }
            return AuthError::InvalidCredentials;
        }
        AuthError::LoginError { code, summary }
    }

    fn skip_password_warning(&self, response: &AuthnResponse) -> Result<AuthnResponse> {
        self.ui.notify("Your Okta password is about to expire.");
        let skip = response
            .link("skip")
            .ok_or_else(|| AuthError::protocol("PASSWORD_WARN without a skip link"))?;
        self.post_authn(skip, json!({ "stateToken": state_token(response)? }))
    }

    fn multi_factor(&self, response: &AuthnResponse, flow: &mut Flow) -> Result<AuthnResponse> {
        let token = state_token(response)?;
        let offered = response
            .embedded
            .factors
            .iter()
            .filter_map(Factor::from_dto)
            .collect::<Vec<_>>();
        if offered.is_empty() {
            return Err(AuthError::protocol(
                "none of the offered MFA factors is supported",
            ));
        }

        let factor = self.select_factor(&offered)?;
        log::info!("verifying with {}", factor.label());

        match factors::strategy_for(factor.kind).challenge(self, token, factor)? {
            StepResult::Continue(next) => Ok(next),
            StepResult::Retry { reason } => {
                flow.passcode_failures += 1;
                if flow.passcode_failures >= MAX_PASSCODE_ATTEMPTS {
                    return Err(AuthError::MfaDenied);
                }
                self.ui.notify(&reason);
                Ok(response.clone())
            }
        }
    }

    fn select_factor<'f>(&self, offered: &'f [Factor]) -> Result<&'f Factor> {
        if let [only] = offered {
            return Ok(only);
        }
        if let Some(preferred) = &self.settings.preferred_mfa_type {
            let matching = offered
                .iter()
                .filter(|f| f.matches_preference(preferred))
                .collect::<Vec<_>>();
            if let [only] = matching.as_slice() {
                return Ok(*only);
            }
        }

        let labels = offered.iter().map(Factor::label).collect::<Vec<_>>();
        let index = self.ui.select("Select an MFA factor", &labels)?;
        offered
            .get(index)
            .ok_or_else(|| AuthError::Prompt(format!("no factor at index {}", index)))
    }

    fn answer_challenge(
        &self,
        response: &AuthnResponse,
        state: ChallengeState,
        flow: &mut Flow,
    ) -> Result<AuthnResponse> {
        match response.factor_result.as_deref() {
            Some("REJECTED") => return Err(AuthError::MfaDenied),
            Some("TIMEOUT") => return Err(AuthError::MfaTimeout),
            _ => {}
        }

        let kind = response
            .challenged_factor()
            .and_then(|f| FactorKind::from_okta(&f.factor_type, &f.provider));

        match (kind, state) {
            (Some(FactorKind::U2f), _) => fido::verify_u2f(self, response),
            (Some(FactorKind::WebAuthn), _) => fido::verify_webauthn(self, response),
            (Some(FactorKind::Duo), ChallengeState::Waiting) if !flow.duo_started => {
                flow.duo_started = true;
                duo::verify(self, response)?;
                self.interrupt.sleep(self.timings.step_delay)?;
                self.poll(response)
            }
            (_, ChallengeState::Waiting) => self.wait_for_push(response, flow),
            _ => self.answer_passcode(response),
        }
    }

    fn wait_for_push(&self, response: &AuthnResponse, flow: &mut Flow) -> Result<AuthnResponse> {
        flow.push_polls += 1;
        if flow.push_polls > MAX_PUSH_POLLS {
            log::warn!("push still pending after {} polls", MAX_PUSH_POLLS);
            return Err(AuthError::MfaTimeout);
        }

        if flow.push_polls == 1 {
            self.ui.notify("Waiting for push approval...");
        }
        if !flow.answer_shown {
            if let Some(answer) = correct_answer(response) {
                self.ui
                    .notify(&format!("Select {} in Okta Verify to approve.", answer));
                flow.answer_shown = true;
            }
        }

        self.interrupt.sleep(self.timings.push_poll)?;
        self.poll(response)
    }

    fn poll(&self, response: &AuthnResponse) -> Result<AuthnResponse> {
        let next = response
            .link("next")
            .ok_or_else(|| AuthError::protocol("MFA_CHALLENGE without a next link"))?;
        self.post_authn(next, json!({ "stateToken": state_token(response)? }))
    }

    fn answer_passcode(&self, response: &AuthnResponse) -> Result<AuthnResponse> {
        let label = response
            .challenged_factor()
            .and_then(Factor::from_dto)
            .map(|f| f.label())
            .unwrap_or_else(|| "MFA".to_string());
        let passcode = self.ui.prompt(&format!("Enter {} code", label))?;

        let next = response
            .link("next")
            .ok_or_else(|| AuthError::protocol("MFA_CHALLENGE without a next link"))?;
        self.post_authn(
            next,
            json!({ "stateToken": state_token(response)?, "passCode": passcode }),
        )
    }

    fn finish(&self, response: &AuthnResponse, flow: &Flow) -> Result<SessionGrant> {
        if self.settings.remember_password {
            if let (Some(username), Some(password)) = (&flow.username, &flow.typed_password) {
                self.secrets.set_secret(username, password);
            }
        }

        if let Some(token) = &response.session_token {
            log::info!("Okta authentication succeeded");
            return Ok(SessionGrant::SessionToken(token.clone()));
        }
        response
            .link("next")
            .map(|next| SessionGrant::Redirect(next.to_string()))
            .ok_or_else(|| AuthError::protocol("SUCCESS without a session token or next link"))
    }
}

pub(crate) fn state_token(response: &AuthnResponse) -> Result<&str> {
    response
        .state_token
        .as_deref()
        .ok_or_else(|| AuthError::protocol("response carries no stateToken"))
}

/// Number the user has to pick in Okta Verify, when the push asks for one.
fn correct_answer(response: &AuthnResponse) -> Option<String> {
    let challenge = response
        .challenged_factor()
        .and_then(|f| f.embedded.challenge.as_ref())
        .or(response.embedded.challenge.as_ref())?;
    match challenge.correct_answer.as_ref()? {
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
