//! U2F and WebAuthn verification against local security keys.
//!
//! Every discovered device gets its own worker; the first signature wins and
//! raises a shared flag that makes the others stop at their next attempt.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use serde_json::json;
use url::Url;

use crate::error::{AuthError, Result};
use crate::interrupt::Interrupt;
use crate::okta::models::{AuthnResponse, FactorDto};
use crate::okta::{state_token, Okta};

pub const MAX_DEVICE_ATTEMPTS: u32 = 30;

/// Submitted when no device could sign and the placeholder fallback is on.
/// It cannot verify; Okta's leniency towards it is what the fallback relies on.
pub const PLACEHOLDER_SIGNATURE: &[u8] = &[0u8; 64];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertionRequest {
    pub rp_id: String,
    pub client_data: Vec<u8>,
    pub credential_ids: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAssertion {
    pub credential_id: Vec<u8>,
    pub authenticator_data: Vec<u8>,
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The device is waiting for a touch; worth another attempt.
    TouchRequired,
    Failed(String),
}

pub trait Authenticator: Send + Sync {
    fn name(&self) -> String;

    /// Blocks until the device answers. The interrupt flag is only seen
    /// between attempts; a second Ctrl-C ends the process instead.
    fn get_assertion(&self, request: &AssertionRequest) -> std::result::Result<RawAssertion, DeviceError>;
}

pub trait AuthenticatorLocator: Send + Sync {
    fn locate(&self) -> Result<Vec<Box<dyn Authenticator>>>;
}

pub struct NoAuthenticators;

impl AuthenticatorLocator for NoAuthenticators {
    fn locate(&self) -> Result<Vec<Box<dyn Authenticator>>> {
        log::debug!("hardware key support not compiled in (feature `hardware-keys`)");
        Err(AuthError::NoFidoDeviceFound)
    }
}

pub fn default_locator() -> Box<dyn AuthenticatorLocator> {
    #[cfg(feature = "hardware-keys")]
    {
        Box::new(hid::HidAuthenticators)
    }

    #[cfg(not(feature = "hardware-keys"))]
    {
        Box::new(NoAuthenticators)
    }
}

enum Attempt {
    Signed(RawAssertion),
    Exhausted,
    Failed(String),
    Stopped,
}

fn attempt(
    device: &dyn Authenticator,
    request: &AssertionRequest,
    retry_delay: Duration,
    done: &AtomicBool,
    interrupt: &Interrupt,
) -> Attempt {
    for n in 1..=MAX_DEVICE_ATTEMPTS {
        if done.load(Ordering::SeqCst) || interrupt.is_triggered() {
            return Attempt::Stopped;
        }
        match device.get_assertion(request) {
            Ok(assertion) => {
                if done.swap(true, Ordering::SeqCst) {
                    return Attempt::Stopped;
                }
                return Attempt::Signed(assertion);
            }
            Err(DeviceError::TouchRequired) => {
                log::debug!("{}: touch required ({}/{})", device.name(), n, MAX_DEVICE_ATTEMPTS);
                if n < MAX_DEVICE_ATTEMPTS && interrupt.sleep(retry_delay).is_err() {
                    return Attempt::Stopped;
                }
            }
            Err(DeviceError::Failed(message)) => return Attempt::Failed(message),
        }
    }
    Attempt::Exhausted
}

/// Ask every device for a signature at once and return the first one.
/// All workers are joined before this returns.
pub fn race(
    devices: &[Box<dyn Authenticator>],
    request: &AssertionRequest,
    retry_delay: Duration,
    interrupt: &Interrupt,
) -> Result<RawAssertion> {
    if devices.is_empty() {
        return Err(AuthError::NoFidoDeviceFound);
    }

    let done = AtomicBool::new(false);
    let (tx, rx) = mpsc::channel();

    thread::scope(|scope| {
        for device in devices {
            let tx = tx.clone();
            let done = &done;
            scope.spawn(move || {
                let outcome = attempt(device.as_ref(), request, retry_delay, done, interrupt);
                let _ = tx.send((device.name(), outcome));
            });
        }
    });
    drop(tx);

    let mut winner = None;
    let mut failures = Vec::new();
    let mut exhausted = 0;
    for (name, outcome) in rx {
        match outcome {
            Attempt::Signed(assertion) => {
                log::info!("{} signed the challenge", name);
                winner = Some(assertion);
            }
            Attempt::Exhausted => exhausted += 1,
            Attempt::Failed(message) => failures.push(format!("{}: {}", name, message)),
            Attempt::Stopped => {}
        }
    }

    if let Some(assertion) = winner {
        return Ok(assertion);
    }
    interrupt.check()?;
    if exhausted == 0 && !failures.is_empty() {
        return Err(AuthError::FidoDeviceError(failures.join("; ")));
    }
    Err(AuthError::FidoDeviceTimeout)
}

enum Signature {
    Device(RawAssertion),
    Placeholder,
}

fn sign(okta: &Okta<'_>, request: &AssertionRequest) -> Result<Signature> {
    okta.ui.notify("Touch your security key...");
    let outcome = okta
        .authenticators
        .locate()
        .and_then(|devices| race(&devices, request, okta.timings.fido_retry, &okta.interrupt));

    match outcome {
        Ok(assertion) => Ok(Signature::Device(assertion)),
        Err(e @ (AuthError::NoFidoDeviceFound | AuthError::FidoDeviceError(_)))
            if okta.settings.fido_placeholder_fallback =>
        {
            log::warn!(
                "COMPATIBILITY SHIM: {}; submitting a placeholder signature that cannot verify",
                e
            );
            okta.ui
                .notify("No usable security key; continuing with a placeholder signature.");
            Ok(Signature::Placeholder)
        }
        Err(e) => Err(e),
    }
}

fn challenged(response: &AuthnResponse) -> Result<&FactorDto> {
    response
        .challenged_factor()
        .ok_or_else(|| AuthError::protocol("MFA_CHALLENGE without the challenged factor"))
}

fn challenge_value<F>(response: &AuthnResponse, factor: &FactorDto, pick: F) -> Result<String>
where
    F: Fn(&crate::okta::models::ChallengeDto) -> Option<&String>,
{
    factor
        .embedded
        .challenge
        .as_ref()
        .and_then(&pick)
        .or_else(|| response.embedded.challenge.as_ref().and_then(&pick))
        .cloned()
        .ok_or_else(|| AuthError::protocol("security key challenge carries no nonce"))
}

fn credential_ids(factor: &FactorDto) -> Vec<Vec<u8>> {
    factor
        .profile
        .credential_id
        .as_deref()
        .and_then(|id| URL_SAFE_NO_PAD.decode(id.trim_end_matches('=')).ok())
        .into_iter()
        .collect()
}

fn verify_link<'r>(response: &'r AuthnResponse, factor: &'r FactorDto) -> Result<&'r str> {
    response
        .link("next")
        .or_else(|| crate::okta::models::href(&factor.links, "verify"))
        .ok_or_else(|| AuthError::protocol("security key challenge without a verify link"))
}

/// U2F signature data: user presence flag and counter (authenticator data
/// bytes 32..37) followed by the signature.
pub fn u2f_signature_data(assertion: &RawAssertion) -> Result<Vec<u8>> {
    let presence_and_counter = assertion.authenticator_data.get(32..37).ok_or_else(|| {
        AuthError::FidoDeviceError(format!(
            "authenticator data too short ({} bytes)",
            assertion.authenticator_data.len()
        ))
    })?;
    let mut data = presence_and_counter.to_vec();
    data.extend_from_slice(&assertion.signature);
    Ok(data)
}

pub fn verify_u2f(okta: &Okta<'_>, response: &AuthnResponse) -> Result<AuthnResponse> {
    let factor = challenged(response)?;
    let nonce = challenge_value(response, factor, |c| c.nonce.as_ref())?;
    let app_id = factor
        .profile
        .app_id
        .clone()
        .unwrap_or_else(|| okta.base_uri().to_string());

    let client_data = json!({
        "typ": "navigator.id.getAssertion",
        "challenge": nonce,
        "origin": okta.base_uri(),
    })
    .to_string();
    let request = AssertionRequest {
        rp_id: app_id,
        client_data: client_data.clone().into_bytes(),
        credential_ids: credential_ids(factor),
    };

    let signature_data = match sign(okta, &request)? {
        Signature::Device(assertion) => u2f_signature_data(&assertion)?,
        Signature::Placeholder => PLACEHOLDER_SIGNATURE.to_vec(),
    };

    okta.post_authn(
        verify_link(response, factor)?,
        json!({
            "stateToken": state_token(response)?,
            "clientData": URL_SAFE_NO_PAD.encode(client_data),
            "signatureData": URL_SAFE_NO_PAD.encode(signature_data),
        }),
    )
}

pub fn verify_webauthn(okta: &Okta<'_>, response: &AuthnResponse) -> Result<AuthnResponse> {
    let factor = challenged(response)?;
    let challenge = challenge_value(response, factor, |c| c.challenge.as_ref())?;
    let rp_id = Url::parse(okta.base_uri())
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .ok_or_else(|| AuthError::Config(format!("no host in {}", okta.base_uri())))?;

    let client_data = json!({
        "type": "webauthn.get",
        "challenge": challenge,
        "origin": okta.base_uri(),
        "crossOrigin": false,
    })
    .to_string();
    let request = AssertionRequest {
        rp_id,
        client_data: client_data.clone().into_bytes(),
        credential_ids: credential_ids(factor),
    };

    let (authenticator_data, signature) = match sign(okta, &request)? {
        Signature::Device(assertion) => (
            STANDARD.encode(&assertion.authenticator_data),
            STANDARD.encode(&assertion.signature),
        ),
        Signature::Placeholder => (String::new(), STANDARD.encode(PLACEHOLDER_SIGNATURE)),
    };

    okta.post_authn(
        verify_link(response, factor)?,
        json!({
            "stateToken": state_token(response)?,
            "clientData": STANDARD.encode(client_data),
            "authenticatorData": authenticator_data,
            "signatureData": signature,
        }),
    )
}

#[cfg(feature = "hardware-keys")]
mod hid {
    use ctap_hid_fido2::fidokey::GetAssertionArgsBuilder;
    use ctap_hid_fido2::{FidoKeyHid, HidParam, LibCfg};

    use super::{AssertionRequest, Authenticator, AuthenticatorLocator, DeviceError, RawAssertion};
    use crate::error::{AuthError, Result};

    pub struct HidAuthenticators;

    struct HidAuthenticator {
        name: String,
        param: HidParam,
    }

    impl AuthenticatorLocator for HidAuthenticators {
        fn locate(&self) -> Result<Vec<Box<dyn Authenticator>>> {
            let devices = ctap_hid_fido2::get_fidokey_devices();
            if devices.is_empty() {
                return Err(AuthError::NoFidoDeviceFound);
            }
            Ok(devices
                .into_iter()
                .map(|info| {
                    Box::new(HidAuthenticator {
                        name: info.product_string,
                        param: info.param,
                    }) as Box<dyn Authenticator>
                })
                .collect())
        }
    }

    impl Authenticator for HidAuthenticator {
        fn name(&self) -> String {
            self.name.clone()
        }

        fn get_assertion(
            &self,
            request: &AssertionRequest,
        ) -> std::result::Result<RawAssertion, DeviceError> {
            let cfg = LibCfg::init();
            let device = FidoKeyHid::new(&[self.param.clone()], &cfg)
                .map_err(|e| DeviceError::Failed(e.to_string()))?;

            let mut builder = GetAssertionArgsBuilder::new(&request.rp_id, &request.client_data);
            for id in &request.credential_ids {
                builder = builder.credential_id(id);
            }

            let assertion = device
                .get_assertion_with_args(&builder.build())
                .map_err(classify)?
                .into_iter()
                .next()
                .ok_or_else(|| DeviceError::Failed("no assertion returned".to_string()))?;

            Ok(RawAssertion {
                credential_id: assertion.credential_id,
                authenticator_data: assertion.auth_data,
                signature: assertion.signature,
            })
        }
    }

    fn classify(e: impl std::fmt::Display) -> DeviceError {
        let message = e.to_string();
        let lower = message.to_lowercase();
        if lower.contains("timeout") || lower.contains("timed out") || lower.contains("not satisfied") {
            DeviceError::TouchRequired
        } else {
            DeviceError::Failed(message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    struct FakeDevice {
        name: &'static str,
        touches_needed: u32,
        fail: Option<&'static str>,
        calls: Arc<AtomicU32>,
    }

    impl FakeDevice {
        fn boxed(name: &'static str, touches_needed: u32) -> (Box<dyn Authenticator>, Arc<AtomicU32>) {
            let calls = Arc::new(AtomicU32::new(0));
            let device = FakeDevice {
                name,
                touches_needed,
                fail: None,
                calls: calls.clone(),
            };
            (Box::new(device), calls)
        }
    }

    impl Authenticator for FakeDevice {
        fn name(&self) -> String {
            self.name.to_string()
        }

        fn get_assertion(
            &self,
            _request: &AssertionRequest,
        ) -> std::result::Result<RawAssertion, DeviceError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(message) = self.fail {
                return Err(DeviceError::Failed(message.to_string()));
            }
            if call <= self.touches_needed {
                return Err(DeviceError::TouchRequired);
            }
            Ok(RawAssertion {
                credential_id: self.name.as_bytes().to_vec(),
                authenticator_data: vec![7u8; 37],
                signature: vec![1, 2, 3],
            })
        }
    }

    fn request() -> AssertionRequest {
        AssertionRequest {
            rp_id: "example.okta.com".to_string(),
            client_data: b"{}".to_vec(),
            credential_ids: Vec::new(),
        }
    }

    #[test]
    fn first_signature_wins() {
        let (fast, _) = FakeDevice::boxed("fast", 0);
        let (never, never_calls) = FakeDevice::boxed("never", u32::MAX);

        let assertion = race(
            &[never, fast],
            &request(),
            Duration::from_millis(5),
            &Interrupt::new(),
        )
        .unwrap();

        assert_eq!(assertion.credential_id, b"fast".to_vec());
        assert!(never_calls.load(Ordering::SeqCst) < MAX_DEVICE_ATTEMPTS);
    }

    #[test]
    fn touch_required_is_retried() {
        let (slow, calls) = FakeDevice::boxed("slow", 3);

        let assertion = race(&[slow], &request(), Duration::ZERO, &Interrupt::new()).unwrap();

        assert_eq!(assertion.signature, vec![1, 2, 3]);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn exhausted_devices_time_out() {
        let (a, a_calls) = FakeDevice::boxed("a", u32::MAX);
        let (b, _) = FakeDevice::boxed("b", u32::MAX);

        let err = race(&[a, b], &request(), Duration::ZERO, &Interrupt::new()).unwrap_err();

        assert!(matches!(err, AuthError::FidoDeviceTimeout));
        assert_eq!(a_calls.load(Ordering::SeqCst), MAX_DEVICE_ATTEMPTS);
    }

    #[test]
    fn failing_devices_report_their_errors() {
        let broken: Box<dyn Authenticator> = Box::new(FakeDevice {
            name: "broken",
            touches_needed: 0,
            fail: Some("device unplugged"),
            calls: Arc::new(AtomicU32::new(0)),
        });

        let err = race(&[broken], &request(), Duration::ZERO, &Interrupt::new()).unwrap_err();

        assert!(matches!(err, AuthError::FidoDeviceError(ref m) if m.contains("device unplugged")));
    }

    #[test]
    fn no_devices() {
        let err = race(&[], &request(), Duration::ZERO, &Interrupt::new()).unwrap_err();
        assert!(matches!(err, AuthError::NoFidoDeviceFound));
    }

    #[test]
    fn interrupt_stops_the_race() {
        let (a, _) = FakeDevice::boxed("a", u32::MAX);
        let interrupt = Interrupt::new();
        interrupt.trigger();

        let err = race(&[a], &request(), Duration::ZERO, &interrupt).unwrap_err();

        assert!(matches!(err, AuthError::UserCancelled));
    }

    #[test]
    fn u2f_signature_data_layout() {
        let mut authenticator_data = vec![0u8; 32];
        authenticator_data.extend_from_slice(&[1, 0, 0, 0, 9]);
        let assertion = RawAssertion {
            credential_id: Vec::new(),
            authenticator_data,
            signature: vec![0xAA, 0xBB],
        };

        assert_eq!(
            u2f_signature_data(&assertion).unwrap(),
            vec![1, 0, 0, 0, 9, 0xAA, 0xBB]
        );
    }

    #[test]
    fn short_authenticator_data_is_a_device_error() {
        let assertion = RawAssertion {
            credential_id: Vec::new(),
            authenticator_data: vec![0u8; 10],
            signature: Vec::new(),
        };
        assert!(matches!(
            u2f_signature_data(&assertion),
            Err(AuthError::FidoDeviceError(_))
        ));
    }
}
