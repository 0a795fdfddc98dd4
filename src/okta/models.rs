use std::collections::HashMap;

use serde::Deserialize;

pub type Links = HashMap<String, serde_json::Value>;

/// `href` of a HAL link, which Okta sends either as an object or as a list
/// of objects.
pub fn href<'a>(links: &'a Links, name: &str) -> Option<&'a str> {
    match links.get(name)? {
        serde_json::Value::Array(items) => items.first()?.get("href")?.as_str(),
        value => value.get("href")?.as_str(),
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct AuthnResponse {
    pub status: Option<String>,
    pub state_token: Option<String>,
    pub session_token: Option<String>,
    pub factor_result: Option<String>,
    pub error_code: Option<String>,
    pub error_summary: Option<String>,
    #[serde(rename = "_embedded", default)]
    pub embedded: AuthnEmbedded,
    #[serde(rename = "_links", default)]
    pub links: Links,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct AuthnEmbedded {
    #[serde(default)]
    pub factors: Vec<FactorDto>,
    pub factor: Option<FactorDto>,
    pub challenge: Option<ChallengeDto>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FactorDto {
    #[serde(default)]
    pub id: String,
    pub factor_type: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub profile: FactorProfile,
    #[serde(rename = "_links", default)]
    pub links: Links,
    #[serde(rename = "_embedded", default)]
    pub embedded: FactorEmbedded,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FactorProfile {
    pub phone_number: Option<String>,
    pub credential_id: Option<String>,
    pub app_id: Option<String>,
    pub authenticator_name: Option<String>,
    pub name: Option<String>,
    pub version: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct FactorEmbedded {
    pub challenge: Option<ChallengeDto>,
    pub verification: Option<DuoVerification>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeDto {
    pub nonce: Option<String>,
    pub challenge: Option<String>,
    pub correct_answer: Option<serde_json::Value>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct DuoVerification {
    pub host: Option<String>,
    pub signature: Option<String>,
    #[serde(rename = "_links", default)]
    pub links: Links,
}

impl DuoVerification {
    pub fn script_url(&self) -> Option<&str> {
        href(&self.links, "script")
    }

    pub fn complete_url(&self) -> Option<&str> {
        href(&self.links, "complete")
    }

    pub fn authorize_url(&self) -> Option<&str> {
        href(&self.links, "authorize")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeState {
    Waiting,
    Answerable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginStatus {
    Unauthenticated,
    PasswordWarn,
    LockedOut,
    MfaEnrollRequired,
    MfaRequired,
    MfaChallenge(ChallengeState),
    Success,
    Error { code: String, summary: String },
    Unrecognized(String),
}

impl LoginStatus {
    /// Statuses answered with a fresh request of our own. Pending pushes
    /// poll on their own schedule.
    pub fn issues_step(&self) -> bool {
        matches!(
            self,
            LoginStatus::Unauthenticated
                | LoginStatus::PasswordWarn
                | LoginStatus::MfaRequired
                | LoginStatus::MfaChallenge(ChallengeState::Answerable)
        )
    }
}

impl AuthnResponse {
    pub fn login_status(&self) -> LoginStatus {
        if let Some(code) = &self.error_code {
            return LoginStatus::Error {
                code: code.clone(),
                summary: self.error_summary.clone().unwrap_or_default(),
            };
        }
        match self.status.as_deref().unwrap_or_default() {
            "UNAUTHENTICATED" => LoginStatus::Unauthenticated,
            "PASSWORD_WARN" => LoginStatus::PasswordWarn,
            "LOCKED_OUT" => LoginStatus::LockedOut,
            "MFA_ENROLL" | "MFA_ENROLL_ACTIVATE" => LoginStatus::MfaEnrollRequired,
            "MFA_REQUIRED" => LoginStatus::MfaRequired,
            "MFA_CHALLENGE" if self.factor_result.as_deref() == Some("WAITING") => {
                LoginStatus::MfaChallenge(ChallengeState::Waiting)
            }
            "MFA_CHALLENGE" => LoginStatus::MfaChallenge(ChallengeState::Answerable),
            "SUCCESS" => LoginStatus::Success,
            other => LoginStatus::Unrecognized(other.to_string()),
        }
    }

    pub fn link(&self, name: &str) -> Option<&str> {
        href(&self.links, name)
    }

    pub fn challenged_factor(&self) -> Option<&FactorDto> {
        self.embedded.factor.as_ref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactorKind {
    Sms,
    Call,
    Totp,
    HardwareTotp,
    Push,
    U2f,
    WebAuthn,
    Duo,
}

impl FactorKind {
    pub fn from_okta(factor_type: &str, provider: &str) -> Option<Self> {
        match factor_type {
            "sms" => Some(FactorKind::Sms),
            "call" => Some(FactorKind::Call),
            "token:software:totp" => Some(FactorKind::Totp),
            "token:hardware" | "token" => Some(FactorKind::HardwareTotp),
            "push" => Some(FactorKind::Push),
            "u2f" => Some(FactorKind::U2f),
            "webauthn" => Some(FactorKind::WebAuthn),
            "web" if provider.eq_ignore_ascii_case("DUO") => Some(FactorKind::Duo),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FactorKind::Sms => "sms",
            FactorKind::Call => "call",
            FactorKind::Totp => "totp",
            FactorKind::HardwareTotp => "hardware-totp",
            FactorKind::Push => "push",
            FactorKind::U2f => "u2f",
            FactorKind::WebAuthn => "webauthn",
            FactorKind::Duo => "duo",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Factor {
    pub id: String,
    pub kind: FactorKind,
    pub factor_type: String,
    pub provider: String,
    pub verify_url: String,
    pub profile: FactorProfile,
}

impl Factor {
    pub fn from_dto(dto: &FactorDto) -> Option<Self> {
        let kind = FactorKind::from_okta(&dto.factor_type, &dto.provider)?;
        let verify_url = href(&dto.links, "verify")?;
        Some(Self {
            id: dto.id.clone(),
            kind,
            factor_type: dto.factor_type.clone(),
            provider: dto.provider.clone(),
            verify_url: verify_url.to_string(),
            profile: dto.profile.clone(),
        })
    }

    /// True for the configured `preferred_mfa_type`, given either as the
    /// Okta factor type (`token:software:totp`) or our short name (`totp`).
    pub fn matches_preference(&self, preferred: &str) -> bool {
        self.factor_type.eq_ignore_ascii_case(preferred)
            || self.kind.name().eq_ignore_ascii_case(preferred)
    }

    pub fn label(&self) -> String {
        let detail = match self.kind {
            FactorKind::Sms | FactorKind::Call => self.profile.phone_number.clone(),
            FactorKind::WebAuthn => self.profile.authenticator_name.clone(),
            FactorKind::Push => self.profile.name.clone(),
            _ => None,
        };
        match detail {
            Some(detail) => format!("{} ({}): {}", self.kind.name(), self.provider, detail),
            None => format!("{} ({})", self.kind.name(), self.provider),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_mapping() {
        let status = |body: serde_json::Value| {
            serde_json::from_value::<AuthnResponse>(body)
                .unwrap()
                .login_status()
        };

        assert_eq!(status(json!({"status": "LOCKED_OUT"})), LoginStatus::LockedOut);
        assert_eq!(
            status(json!({"status": "MFA_ENROLL"})),
            LoginStatus::MfaEnrollRequired
        );
        assert_eq!(
            status(json!({"status": "MFA_CHALLENGE", "factorResult": "WAITING"})),
            LoginStatus::MfaChallenge(ChallengeState::Waiting)
        );
        assert_eq!(
            status(json!({"status": "MFA_CHALLENGE", "factorResult": "CHALLENGE"})),
            LoginStatus::MfaChallenge(ChallengeState::Answerable)
        );
        assert_eq!(
            status(json!({"status": "RECOVERY"})),
            LoginStatus::Unrecognized("RECOVERY".to_string())
        );
        assert_eq!(
            status(json!({"errorCode": "E0000004", "errorSummary": "Authentication failed"})),
            LoginStatus::Error {
                code: "E0000004".to_string(),
                summary: "Authentication failed".to_string()
            }
        );
    }

    #[test]
    fn links_as_object_or_list() {
        let response: AuthnResponse = serde_json::from_value(json!({
            "_links": {
                "next": {"href": "https://example.okta.com/next"},
                "resend": [{"name": "sms", "href": "https://example.okta.com/resend"}]
            }
        }))
        .unwrap();

        assert_eq!(response.link("next"), Some("https://example.okta.com/next"));
        assert_eq!(response.link("resend"), Some("https://example.okta.com/resend"));
        assert_eq!(response.link("cancel"), None);
    }

    #[test]
    fn factor_descriptors() {
        let dto: FactorDto = serde_json::from_value(json!({
            "id": "sms193zUBEROPBNZKPPE",
            "factorType": "sms",
            "provider": "OKTA",
            "profile": {"phoneNumber": "+1 XXX-XXX-1337"},
            "_links": {"verify": {"href": "https://example.okta.com/api/v1/authn/factors/sms193zUBEROPBNZKPPE/verify"}}
        }))
        .unwrap();

        let factor = Factor::from_dto(&dto).unwrap();
        assert_eq!(factor.kind, FactorKind::Sms);
        assert_eq!(factor.label(), "sms (OKTA): +1 XXX-XXX-1337");
        assert!(factor.matches_preference("sms"));
        assert!(!factor.matches_preference("push"));
    }

    #[test]
    fn duo_needs_duo_provider() {
        assert_eq!(FactorKind::from_okta("web", "DUO"), Some(FactorKind::Duo));
        assert_eq!(FactorKind::from_okta("web", "OKTA"), None);
        assert_eq!(FactorKind::from_okta("question", "OKTA"), None);
    }
}
