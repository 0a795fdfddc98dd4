use std::io::{self, IsTerminal, Write};

use dialoguer::theme::ColorfulTheme;
use dialoguer::{Input, Select};

use crate::error::{AuthError, Result};
use crate::interrupt::Interrupt;

/// Interactive surface the login flow talks to.
///
/// Everything is written to stderr so stdout stays free for credentials.
pub trait UI: Send + Sync {
    fn prompt(&self, message: &str) -> Result<String>;

    fn prompt_hidden(&self, message: &str) -> Result<String>;

    fn notify(&self, message: &str);

    fn select(&self, message: &str, items: &[String]) -> Result<usize>;

    /// Show `url` in the user's browser. Failing to do so is not fatal; the
    /// link has been printed by then.
    fn open_url(&self, url: &str);
}

/// Terminal UI. A read cannot be abandoned midway, so a Ctrl-C typed
/// during a prompt is honoured once the read returns.
pub struct StdUI {
    interrupt: Interrupt,
}

impl StdUI {
    pub fn new(interrupt: Interrupt) -> Self {
        Self { interrupt }
    }

    fn finish<T>(&self, read: Result<T>) -> Result<T> {
        self.interrupt.check()?;
        read
    }
}

impl UI for StdUI {
    fn prompt(&self, message: &str) -> Result<String> {
        if !io::stdin().is_terminal() {
            return self.finish(read_from_stdin(message));
        }
        let text = Input::<String>::with_theme(&ColorfulTheme::default())
            .with_prompt(message)
            .interact_text()
            .map_err(AuthError::from);
        self.finish(text).map(|t| t.trim().to_string())
    }

    fn prompt_hidden(&self, message: &str) -> Result<String> {
        self.finish(read_password_from_stdin(message))
    }

    fn notify(&self, message: &str) {
        eprintln!("{}", message);
    }

    fn select(&self, message: &str, items: &[String]) -> Result<usize> {
        if items.is_empty() {
            return Err(AuthError::Prompt(format!("nothing to choose for: {}", message)));
        }
        let choice = Select::with_theme(&ColorfulTheme::default())
            .with_prompt(message)
            .items(items)
            .default(0)
            .interact()
            .map_err(AuthError::from);
        self.finish(choice)
    }

    fn open_url(&self, url: &str) {
        if let Err(e) = open::that(url) {
            log::warn!("unable to open a browser for {}: {}", url, e);
        }
    }
}

pub fn read_from_stdin(prompt: &str) -> Result<String> {
    let stdin = io::stdin();
    let mut text = String::new();
    while text.trim().is_empty() {
        eprint!("{}: ", prompt);
        io::stderr().flush()?;
        text.clear();
        if stdin.read_line(&mut text)? == 0 {
            return Err(AuthError::UserCancelled);
        }
    }
    Ok(text.trim().to_string())
}

pub fn read_password_from_stdin(prompt: &str) -> Result<String> {
    loop {
        let pass = rpassword::prompt_password(format!("{}: ", prompt))?;
        if pass.trim().is_empty() {
            continue;
        }
        return Ok(pass.trim().to_string());
    }
}
