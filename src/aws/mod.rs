pub mod roles;
pub mod sts;

use std::fmt::{self, Display};

use chrono::{DateTime, Utc};

use crate::error::{AuthError, Result};

pub const PUBLIC_CONSUMER_URL: &str = "https://signin.aws.amazon.com/saml";
pub const CHINA_CONSUMER_URL: &str = "https://signin.amazonaws.cn/saml";
pub const GOVCLOUD_CONSUMER_URL: &str = "https://signin.amazonaws-us-gov.com/saml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwsRole {
    pub principal_arn: String,
    pub role_arn: String,
}

impl AwsRole {
    pub fn new(principal_arn: String, role_arn: String) -> Self {
        Self {
            principal_arn,
            role_arn,
        }
    }

    /// Last path component of the role ARN: `Admin` for `...:role/team/Admin`.
    pub fn role_name(&self) -> &str {
        self.role_arn
            .rsplit('/')
            .next()
            .unwrap_or(&self.role_arn)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleSet {
    pub role: AwsRole,
    pub friendly_account_name: String,
    pub friendly_role_name: String,
}

impl RoleSet {
    pub fn unnamed(role: AwsRole) -> Self {
        Self {
            role,
            friendly_account_name: String::new(),
            friendly_role_name: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    Public,
    China,
    GovCloud,
}

impl Partition {
    pub fn for_consumer_url(url: &str) -> Result<Self> {
        match url {
            PUBLIC_CONSUMER_URL => Ok(Partition::Public),
            CHINA_CONSUMER_URL => Ok(Partition::China),
            GOVCLOUD_CONSUMER_URL => Ok(Partition::GovCloud),
            other => Err(AuthError::UnknownPartition(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Partition::Public => "aws",
            Partition::China => "aws-cn",
            Partition::GovCloud => "aws-us-gov",
        }
    }

    /// STS region to call. The public partition uses the configured region;
    /// the others use their first region.
    pub fn sts_region<'a>(&self, default_region: &'a str) -> &'a str {
        match self {
            Partition::Public => default_region,
            Partition::China => "cn-north-1",
            Partition::GovCloud => "us-gov-west-1",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expiration: DateTime<Utc>,
}

impl Credentials {
    pub fn profile_entries(&self) -> [(&'static str, String); 4] {
        [
            ("aws_access_key_id", self.access_key_id.clone()),
            ("aws_secret_access_key", self.secret_access_key.clone()),
            ("aws_session_token", self.session_token.clone()),
            ("expiration", self.expiration.to_rfc3339()),
        ]
    }
}

impl Display for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "export AWS_ACCESS_KEY_ID={0}\nexport AWS_SECRET_ACCESS_KEY={1}\nexport AWS_SESSION_TOKEN={2}\nexport AWS_SECURITY_TOKEN={2}",
            self.access_key_id, self.secret_access_key, self.session_token
        )
    }
}
