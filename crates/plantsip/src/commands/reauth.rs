//! `reauth`: give a configured appliance a new API key.
//!
//! The device keeps its id, so a running `watch` picks the key up on its
//! next config check.

use std::time::Duration;

use dialoguer::{Input as Prompt, Password, Select};
use indicatif::ProgressBar;
use owo_colors::OwoColorize;
use secrecy::SecretString;

use plantsip_config::ConfigRegistry;
use plantsip_core::{CredentialExchanger, Credentials, Device};

use crate::cli::{GlobalOpts, ReauthArgs};
use crate::error::{CliError, prompt_err};
use crate::output;

use super::util;

#[derive(Debug)]
enum KeySource {
    ApiKey(SecretString),
    Credentials { username: String, password: SecretString },
}

pub async fn handle(args: ReauthArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let loaded = util::load(global)?;
    let device = loaded.device(&args.device)?;
    let exchanger = CredentialExchanger::new(&loaded.core);

    let api_key = match key_source(args)? {
        KeySource::ApiKey(key) => key,
        KeySource::Credentials { username, password } => {
            let exchange = exchanger.exchange(device.host(), Credentials::new(username, password));
            with_spinner("Requesting API key", global.quiet, exchange).await?
        }
    };

    let check = exchanger.confirm_access(&device, &api_key);
    with_spinner("Checking API key", global.quiet, check).await?;

    let registry = ConfigRegistry::new(loaded.path.clone(), loaded.config.defaults.use_keyring);
    registry.update_api_key(&device.id(), &api_key)?;
    tracing::info!(device = %device.id(), "API key replaced");

    let line = summary(&device);
    if output::should_color(global.color) {
        output::print_output(&line.green().to_string(), global.quiet);
    } else {
        output::print_output(&line, global.quiet);
    }
    Ok(())
}

fn summary(device: &Device) -> String {
    format!("Updated API key for {} ({})", device.name(), device.id())
}

async fn with_spinner<T>(message: &'static str, quiet: bool, work: impl Future<Output = T>) -> T {
    let spinner = (!quiet).then(|| {
        let bar = ProgressBar::new_spinner();
        bar.set_message(message);
        bar.enable_steady_tick(Duration::from_millis(100));
        bar
    });
    let out = work.await;
    if let Some(bar) = spinner {
        bar.finish_and_clear();
    }
    out
}

/// Flags first; prompt for whatever they leave open.
fn key_source(args: ReauthArgs) -> Result<KeySource, CliError> {
    if let Some(key) = args.api_key {
        return Ok(KeySource::ApiKey(SecretString::from(key)));
    }

    let username = match args.username {
        Some(username) => username,
        None => {
            let choices = ["Username and password", "Existing API key"];
            let selection = Select::new()
                .with_prompt("Authentication method")
                .items(&choices)
                .default(0)
                .interact()
                .map_err(prompt_err)?;
            if selection == 1 {
                let key = Password::new()
                    .with_prompt("API key")
                    .interact()
                    .map_err(prompt_err)?;
                return Ok(KeySource::ApiKey(SecretString::from(key)));
            }
            Prompt::new()
                .with_prompt("Username")
                .interact_text()
                .map_err(prompt_err)?
        }
    };
    let password = match args.password {
        Some(password) => password,
        None => Password::new()
            .with_prompt("Password")
            .interact()
            .map_err(prompt_err)?,
    };

    Ok(KeySource::Credentials {
        username,
        password: SecretString::from(password),
    })
}
