use std::path::{Path, PathBuf};

use serde::Deserialize;
use url::Url;

use crate::error::{AuthError, Result};

pub const CONFIG_FILE_NAME: &str = ".aws-okta-auth.toml";
pub const ENV_PREFIX: &str = "AWS_OKTA_AUTH";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuoMethod {
    #[default]
    Push,
    Call,
    Passcode,
    /// Duo Web widget served from a local page and opened in the browser.
    Web,
}

impl DuoMethod {
    /// Value of the `factor` field the Duo prompt endpoints expect.
    pub fn factor_name(&self) -> &'static str {
        match self {
            DuoMethod::Push | DuoMethod::Web => "Duo Push",
            DuoMethod::Call => "Phone Call",
            DuoMethod::Passcode => "Passcode",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoginFlow {
    #[default]
    Classic,
    Device,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub app_url: String,
    #[serde(default)]
    pub okta_org_url: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub remember_password: bool,
    #[serde(default)]
    pub preferred_mfa_type: Option<String>,
    #[serde(default)]
    pub duo_method: DuoMethod,
    #[serde(default = "default_widget_port")]
    pub widget_port: u16,
    #[serde(default = "default_true")]
    pub fido_placeholder_fallback: bool,
    #[serde(default)]
    pub aws_rolename: Option<String>,
    #[serde(default = "default_duration")]
    pub aws_default_duration: i32,
    #[serde(default)]
    pub resolve_aws_alias: bool,
    #[serde(default = "default_region")]
    pub aws_region: String,
    #[serde(default)]
    pub flow: LoginFlow,
    #[serde(default)]
    pub client_id: Option<String>,
}

fn default_widget_port() -> u16 {
    65432
}

fn default_true() -> bool {
    true
}

fn default_duration() -> i32 {
    3600
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl Settings {
    pub fn for_app(app_url: &str) -> Self {
        Self {
            app_url: app_url.to_string(),
            okta_org_url: None,
            username: None,
            remember_password: false,
            preferred_mfa_type: None,
            duo_method: DuoMethod::default(),
            widget_port: default_widget_port(),
            fido_placeholder_fallback: true,
            aws_rolename: None,
            aws_default_duration: default_duration(),
            resolve_aws_alias: false,
            aws_region: default_region(),
            flow: LoginFlow::default(),
            client_id: None,
        }
    }

    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => find_config_file()
                .ok_or_else(|| AuthError::Config("Config file is not found.".to_string()))?,
        };
        log::debug!("loading settings from {}", path.display());

        config::Config::builder()
            .add_source(config::File::from(path.as_path()))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .and_then(|c| c.try_deserialize::<Settings>())
            .map_err(|e| AuthError::Config(e.to_string()))
    }

    /// Okta org base URL, derived from the app link when not configured.
    pub fn org_url(&self) -> Result<String> {
        if let Some(org) = &self.okta_org_url {
            return Ok(org.trim_end_matches('/').to_string());
        }
        let parsed = Url::parse(&self.app_url)
            .map_err(|e| AuthError::Config(format!("invalid app_url {}: {}", self.app_url, e)))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| AuthError::Config(format!("app_url {} has no host", self.app_url)))?;
        match parsed.port() {
            Some(port) => Ok(format!("{}://{}:{}", parsed.scheme(), host, port)),
            None => Ok(format!("{}://{}", parsed.scheme(), host)),
        }
    }

    /// Okta app instance id, the third path segment of
    /// `/home/<app-name>/<app-id>/<n>`.
    pub fn app_id(&self) -> Result<String> {
        let parsed = Url::parse(&self.app_url)
            .map_err(|e| AuthError::Config(format!("invalid app_url {}: {}", self.app_url, e)))?;
        parsed
            .path_segments()
            .and_then(|mut segments| segments.nth(2))
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                AuthError::Config(format!("cannot find an app id in {}", self.app_url))
            })
    }
}

fn find_config_file() -> Option<PathBuf> {
    let local = Path::new(CONFIG_FILE_NAME).to_path_buf();
    if local.is_file() {
        return Some(local);
    }
    let home = std::env::var("HOME").ok()?;
    let global = Path::new(&home).join(CONFIG_FILE_NAME);
    global.is_file().then_some(global)
}
