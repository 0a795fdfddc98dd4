use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, Context};
use clap::Parser;
use configparser::ini::Ini;

use aws_okta_auth::aws::roles;
use aws_okta_auth::aws::sts::{AwsSts, CredentialExchange};
use aws_okta_auth::aws::Credentials;
use aws_okta_auth::http_client::HttpTransport;
use aws_okta_auth::interrupt::Interrupt;
use aws_okta_auth::okta::device_flow::OktaDeviceFlow;
use aws_okta_auth::okta::fido;
use aws_okta_auth::okta::Okta;
use aws_okta_auth::secrets::{KeyringStore, NoSecretStore, SecretStore};
use aws_okta_auth::settings::{LoginFlow, Settings};
use aws_okta_auth::ui::StdUI;
use aws_okta_auth::{AuthError, IdentityProvider};

/// Sign in to Okta and get temporary AWS credentials from the SAML assertion.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Config file (default: ./.aws-okta-auth.toml, then ~/.aws-okta-auth.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Role ARN or name to assume, or "all"
    #[arg(short, long)]
    role: Option<String>,

    /// Session duration in seconds
    #[arg(short, long)]
    duration: Option<i32>,

    /// Write to this profile in ~/.aws/credentials instead of printing exports
    #[arg(short, long)]
    profile: Option<String>,

    /// Use the OAuth device authorization flow
    #[arg(long)]
    device: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            match e.downcast_ref::<AuthError>() {
                Some(AuthError::UserCancelled) => ExitCode::from(130),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut settings = Settings::load(cli.config.as_deref())?;
    if cli.device {
        settings.flow = LoginFlow::Device;
    }
    log::debug!("app_link: {}", settings.app_url);

    let interrupt = Interrupt::install();
    let transport = HttpTransport::new()?;
    let stdui = StdUI::new(interrupt.clone());
    let secrets: Box<dyn SecretStore> = if settings.remember_password {
        Box::new(KeyringStore::new())
    } else {
        Box::new(NoSecretStore)
    };
    let locator = fido::default_locator();

    let provider: Box<dyn IdentityProvider + '_> = match settings.flow {
        LoginFlow::Classic => Box::new(Okta::new(
            &settings,
            &stdui,
            &transport,
            secrets.as_ref(),
            locator.as_ref(),
            interrupt.clone(),
        )?),
        LoginFlow::Device => Box::new(OktaDeviceFlow::new(
            &settings,
            &stdui,
            &transport,
            interrupt.clone(),
        )?),
    };
    let saml = provider.get_saml_assertion()?;

    let role_pairs = saml.roles()?;
    let page = if settings.resolve_aws_alias {
        Some(roles::fetch_role_page(&transport, &saml).context("fetching AWS role names")?)
    } else {
        None
    };
    let role_sets = roles::enrich(&role_pairs, page.as_deref())?;
    let wanted = cli.role.as_deref().or(settings.aws_rolename.as_deref());
    let chosen = roles::choose_roles(&stdui, &role_sets, wanted)?;

    let exchange = CredentialExchange::new(AwsSts::new()?, &settings.aws_region);
    let duration = cli.duration.unwrap_or(settings.aws_default_duration);
    let several = chosen.len() > 1;

    for role_set in chosen {
        interrupt.check()?;
        let credentials = exchange
            .exchange(&saml, &role_set.role, duration)
            .with_context(|| format!("assuming {}", role_set.role.role_arn))?;

        match &cli.profile {
            Some(profile) => {
                let profile = if several {
                    format!("{}-{}", profile, role_set.role.role_name())
                } else {
                    profile.clone()
                };
                write_credentials(&profile, &credentials)?;
                eprintln!("Wrote profile {} (expires {})", profile, credentials.expiration);
            }
            None => println!("{}", credentials),
        }
    }

    Ok(())
}

fn credentials_path() -> anyhow::Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME is not set")?;
    Ok(Path::new(&home).join(".aws").join("credentials"))
}

fn write_credentials(profile: &str, credentials: &Credentials) -> anyhow::Result<()> {
    let path = credentials_path()?;
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    store_profile(&path, profile, credentials)
}

// Keys above the first header land here; `[default]` stays an ordinary profile.
const UNSECTIONED: &str = "aws-okta-auth:unsectioned";

fn credentials_ini() -> Ini {
    let mut defaults = Ini::new_cs().defaults();
    defaults.default_section = UNSECTIONED.to_string();
    Ini::new_from_defaults(defaults)
}

/// Set the keys of `profile` in the ini file at `path`, keeping other profiles.
fn store_profile(path: &Path, profile: &str, credentials: &Credentials) -> anyhow::Result<()> {
    let mut ini = credentials_ini();
    if path.exists() {
        ini.load(path)
            .map_err(|e| anyhow!("Failed to load credentials: {e}"))?;
    }
    for (key, value) in credentials.profile_entries() {
        ini.set(profile, key, Some(value));
    }
    ini.write(path)
        .with_context(|| format!("writing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn credentials(key: &str) -> Credentials {
        Credentials {
            access_key_id: key.to_string(),
            secret_access_key: "secret".to_string(),
            session_token: "token".to_string(),
            expiration: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        }
    }

    fn reload(path: &Path) -> Ini {
        let mut ini = credentials_ini();
        ini.load(path).unwrap();
        ini
    }

    fn profiles(ini: &Ini) -> Vec<String> {
        let mut names: Vec<String> = ini
            .sections()
            .into_iter()
            .filter(|s| s != UNSECTIONED)
            .collect();
        names.sort();
        names
    }

    #[test]
    fn appends_missing_profile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials");
        std::fs::write(&path, "[default]\naws_access_key_id = A\n").unwrap();

        store_profile(&path, "work", &credentials("NEW")).unwrap();

        let ini = reload(&path);
        assert_eq!(ini.get("default", "aws_access_key_id").as_deref(), Some("A"));
        assert_eq!(ini.get("work", "aws_access_key_id").as_deref(), Some("NEW"));
        assert_eq!(
            ini.get("work", "expiration").as_deref(),
            Some("2023-11-14T22:13:20+00:00")
        );
        assert!(std::fs::read_to_string(&path).unwrap().contains("[default]"));
    }

    #[test]
    fn replaces_existing_profile_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials");
        std::fs::write(
            &path,
            "[work]\naws_access_key_id = OLD\nregion = eu-west-1\n\n[default]\naws_access_key_id = A\n",
        )
        .unwrap();

        store_profile(&path, "work", &credentials("NEW")).unwrap();

        let ini = reload(&path);
        assert_eq!(ini.get("work", "aws_access_key_id").as_deref(), Some("NEW"));
        assert_eq!(ini.get("work", "region").as_deref(), Some("eu-west-1"));
        assert_eq!(ini.get("default", "aws_access_key_id").as_deref(), Some("A"));
    }

    #[test]
    fn writes_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials");

        store_profile(&path, "Work", &credentials("NEW")).unwrap();

        let ini = reload(&path);
        assert_eq!(profiles(&ini), vec!["Work".to_string()]);
        assert_eq!(ini.get("Work", "aws_session_token").as_deref(), Some("token"));
    }

    #[test]
    fn replaces_profile_with_commented_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials");
        std::fs::write(
            &path,
            "# managed by aws-okta-auth\n[work] ; refreshed hourly\naws_access_key_id = OLD\n\n[default]\naws_access_key_id = A\n",
        )
        .unwrap();

        store_profile(&path, "work", &credentials("NEW")).unwrap();

        let ini = reload(&path);
        assert_eq!(profiles(&ini), vec!["default".to_string(), "work".to_string()]);
        assert_eq!(ini.get("work", "aws_access_key_id").as_deref(), Some("NEW"));
        assert_eq!(ini.get("default", "aws_access_key_id").as_deref(), Some("A"));
    }
}
