//! One strategy per second-factor kind. Each takes the live state token and
//! the chosen factor and hands Okta's answer back to the state machine.

use serde_json::json;

use crate::error::{AuthError, Result};
use crate::okta::models::{AuthnResponse, Factor, FactorKind, LoginStatus};
use crate::okta::Okta;

/// Okta's "Invalid Passcode/Answer"; the only error worth another try.
const INVALID_PASSCODE_CODE: &str = "E0000068";

#[derive(Debug, Clone)]
pub enum StepResult {
    Continue(AuthnResponse),
    /// Soft failure: the state token is still good, ask again.
    Retry { reason: String },
}

pub trait FactorStrategy: Sync {
    fn challenge(&self, okta: &Okta<'_>, state_token: &str, factor: &Factor) -> Result<StepResult>;
}

pub struct SmsFactor;
pub struct CallFactor;
pub struct TotpFactor;
pub struct PushFactor;
pub struct U2fFactor;
pub struct WebAuthnFactor;
pub struct DuoFactor;

pub fn strategy_for(kind: FactorKind) -> &'static dyn FactorStrategy {
    match kind {
        FactorKind::Sms => &SmsFactor,
        FactorKind::Call => &CallFactor,
        FactorKind::Totp | FactorKind::HardwareTotp => &TotpFactor,
        FactorKind::Push => &PushFactor,
        FactorKind::U2f => &U2fFactor,
        FactorKind::WebAuthn => &WebAuthnFactor,
        FactorKind::Duo => &DuoFactor,
    }
}

fn start(okta: &Okta<'_>, state_token: &str, factor: &Factor) -> Result<AuthnResponse> {
    okta.post_authn(&factor.verify_url, json!({ "stateToken": state_token }))
}

fn phone_of(factor: &Factor) -> &str {
    factor.profile.phone_number.as_deref().unwrap_or("your phone")
}

impl FactorStrategy for SmsFactor {
    fn challenge(&self, okta: &Okta<'_>, state_token: &str, factor: &Factor) -> Result<StepResult> {
        let response = start(okta, state_token, factor)?;
        if response.error_code.is_none() {
            okta.ui
                .notify(&format!("A verification code was sent to {}", phone_of(factor)));
        }
        Ok(StepResult::Continue(response))
    }
}

impl FactorStrategy for CallFactor {
    fn challenge(&self, okta: &Okta<'_>, state_token: &str, factor: &Factor) -> Result<StepResult> {
        let response = start(okta, state_token, factor)?;
        if response.error_code.is_none() {
            okta.ui.notify(&format!("Calling {}", phone_of(factor)));
        }
        Ok(StepResult::Continue(response))
    }
}

impl FactorStrategy for TotpFactor {
    fn challenge(&self, okta: &Okta<'_>, state_token: &str, factor: &Factor) -> Result<StepResult> {
        // Okta may refuse a verify without passCode; the verify link then
        // takes the code directly.
        let challenge = start(okta, state_token, factor)?;
        let (next, token) = match challenge.error_code {
            None => (
                challenge.link("next").unwrap_or(&factor.verify_url),
                challenge.state_token.as_deref().unwrap_or(state_token),
            ),
            Some(_) => (factor.verify_url.as_str(), state_token),
        };

        let passcode = okta.ui.prompt(&format!("Enter {} code", factor.label()))?;
        let verified = okta.post_authn(next, json!({ "stateToken": token, "passCode": passcode }))?;

        match verified.login_status() {
            LoginStatus::Success => Ok(StepResult::Continue(verified)),
            LoginStatus::Error { code, summary } if code == INVALID_PASSCODE_CODE => {
                Ok(StepResult::Retry {
                    reason: format!("Passcode was not accepted: {}", summary),
                })
            }
            LoginStatus::Error { code, summary } => Err(AuthError::LoginError { code, summary }),
            status => Ok(StepResult::Retry {
                reason: format!("Passcode was not accepted ({:?})", status),
            }),
        }
    }
}

impl FactorStrategy for PushFactor {
    fn challenge(&self, okta: &Okta<'_>, state_token: &str, factor: &Factor) -> Result<StepResult> {
        okta.ui.notify("Sending push notification...");
        start(okta, state_token, factor).map(StepResult::Continue)
    }
}

// The signature itself is produced when the MFA_CHALLENGE comes back.
impl FactorStrategy for U2fFactor {
    fn challenge(&self, okta: &Okta<'_>, state_token: &str, factor: &Factor) -> Result<StepResult> {
        start(okta, state_token, factor).map(StepResult::Continue)
    }
}

impl FactorStrategy for WebAuthnFactor {
    fn challenge(&self, okta: &Okta<'_>, state_token: &str, factor: &Factor) -> Result<StepResult> {
        start(okta, state_token, factor).map(StepResult::Continue)
    }
}

impl FactorStrategy for DuoFactor {
    fn challenge(&self, okta: &Okta<'_>, state_token: &str, factor: &Factor) -> Result<StepResult> {
        start(okta, state_token, factor).map(StepResult::Continue)
    }
}
