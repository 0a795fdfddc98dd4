use aws_config::{BehaviorVersion, Region};
use aws_sdk_sts::error::{DisplayErrorContext, ProvideErrorMetadata};
use chrono::{DateTime, Utc};

use crate::aws::{AwsRole, Credentials};
use crate::error::{AuthError, Result};
use crate::saml::SamlResponse;

/// Duration retried with when a role's MaxSessionDuration is lower than the
/// one requested.
pub const FALLBACK_DURATION_SECONDS: i32 = 3600;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssumeRoleRequest {
    pub region: String,
    pub role_arn: String,
    pub principal_arn: String,
    pub saml_assertion: String,
    pub duration_seconds: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StsError {
    pub code: String,
    pub message: String,
}

impl StsError {
    pub fn is_duration_too_long(&self) -> bool {
        self.code == "ValidationError" && self.message.contains("MaxSessionDuration")
    }
}

impl From<StsError> for AuthError {
    fn from(e: StsError) -> Self {
        AuthError::ExchangeError {
            code: e.code,
            message: e.message,
        }
    }
}

pub trait StsApi {
    fn assume_role_with_saml(
        &self,
        request: &AssumeRoleRequest,
    ) -> std::result::Result<Credentials, StsError>;
}

/// STS through the AWS SDK, driven on a private current-thread runtime so
/// callers stay synchronous.
pub struct AwsSts {
    runtime: tokio::runtime::Runtime,
}

impl AwsSts {
    pub fn new() -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| AuthError::Config(format!("unable to start STS runtime: {}", e)))?;
        Ok(Self { runtime })
    }
}

impl StsApi for AwsSts {
    fn assume_role_with_saml(
        &self,
        request: &AssumeRoleRequest,
    ) -> std::result::Result<Credentials, StsError> {
        self.runtime.block_on(async {
            let config = aws_config::defaults(BehaviorVersion::latest())
                .no_credentials()
                .region(Region::new(request.region.clone()))
                .load()
                .await;
            let client = aws_sdk_sts::Client::new(&config);

            let output = client
                .assume_role_with_saml()
                .role_arn(&request.role_arn)
                .principal_arn(&request.principal_arn)
                .saml_assertion(&request.saml_assertion)
                .duration_seconds(request.duration_seconds)
                .send()
                .await
                .map_err(|e| StsError {
                    code: e.code().unwrap_or("Unknown").to_string(),
                    message: e
                        .message()
                        .map(str::to_string)
                        .unwrap_or_else(|| DisplayErrorContext(&e).to_string()),
                })?;

            let creds = output.credentials().ok_or_else(|| StsError {
                code: "MissingCredentials".to_string(),
                message: "STS returned no credentials".to_string(),
            })?;
            let expiration = creds.expiration();
            let expiration = DateTime::<Utc>::from_timestamp(expiration.secs(), expiration.subsec_nanos())
                .unwrap_or_else(Utc::now);

            Ok::<_, StsError>(Credentials {
                access_key_id: creds.access_key_id().to_string(),
                secret_access_key: creds.secret_access_key().to_string(),
                session_token: creds.session_token().to_string(),
                expiration,
            })
        })
    }
}

pub struct CredentialExchange<S> {
    sts: S,
    default_region: String,
}

impl<S: StsApi> CredentialExchange<S> {
    pub fn new(sts: S, default_region: &str) -> Self {
        Self {
            sts,
            default_region: default_region.to_string(),
        }
    }

    pub fn exchange(
        &self,
        saml: &SamlResponse,
        role: &AwsRole,
        duration_seconds: i32,
    ) -> Result<Credentials> {
        let partition = saml.partition()?;
        let mut request = AssumeRoleRequest {
            region: partition.sts_region(&self.default_region).to_string(),
            role_arn: role.role_arn.clone(),
            principal_arn: role.principal_arn.clone(),
            saml_assertion: saml.assertion.encoded_as_base64().to_string(),
            duration_seconds,
        };
        log::debug!(
            "AssumeRoleWithSAML {} in {} ({}s)",
            request.role_arn,
            request.region,
            request.duration_seconds
        );

        match self.sts.assume_role_with_saml(&request) {
            Ok(credentials) => Ok(credentials),
            Err(e) if e.is_duration_too_long() && duration_seconds != FALLBACK_DURATION_SECONDS => {
                log::warn!(
                    "{}s exceeds the maximum session duration of {}, retrying with {}s",
                    duration_seconds,
                    role.role_arn,
                    FALLBACK_DURATION_SECONDS
                );
                request.duration_seconds = FALLBACK_DURATION_SECONDS;
                self.sts.assume_role_with_saml(&request).map_err(Into::into)
            }
            Err(e) => Err(e.into()),
        }
    }
}
