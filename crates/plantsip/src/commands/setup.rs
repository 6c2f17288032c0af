//! Interactive onboarding.
//!
//! Drives `OnboardingFlow` one step at a time. Flag values answer their
//! step once; if that step comes back with an error the user is prompted.

use std::time::Duration;

use dialoguer::{Input as Prompt, Password, Select};
use indicatif::ProgressBar;
use owo_colors::OwoColorize;
use secrecy::SecretString;

use plantsip_config::ConfigRegistry;
use plantsip_core::{
    AbortReason, AuthMethod, FlowError, HostForm, Input, OnboardingFlow, OnboardingState,
    RemoteDevice,
};

use crate::cli::{GlobalOpts, SetupArgs};
use crate::error::{CliError, prompt_err};
use crate::output;

use super::util;

pub async fn handle(mut args: SetupArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let loaded = util::load(global)?;
    let registry = ConfigRegistry::new(loaded.path.clone(), loaded.config.defaults.use_keyring);
    let mut flow = OnboardingFlow::new(&loaded.core, registry);
    let color = output::should_color(global.color);

    loop {
        if let Some(error) = flow.state().error() {
            report(error, color);
        }

        let next = match flow.state() {
            OnboardingState::SelectHost { form, .. } => {
                host_input(&mut args, form, flow.default_host().as_str())
            }
            OnboardingState::SelectAuthMethod { .. } => auth_method_input(&mut args),
            OnboardingState::EnterCredentials { .. } => credentials_input(&mut args),
            OnboardingState::EnterApiKey { .. } => api_key_input(&mut args),
            OnboardingState::SelectDevice { devices, .. } => device_input(&mut args, devices),
            OnboardingState::Validating { .. }
            | OnboardingState::Complete { .. }
            | OnboardingState::Aborted { .. } => break,
        };
        let input = match next {
            Ok(input) => input,
            Err(e) => {
                flow.cancel();
                return Err(e);
            }
        };

        let message = progress_message(&input);
        let spinner = (!global.quiet && !message.is_empty()).then(|| {
            let bar = ProgressBar::new_spinner();
            bar.set_message(message);
            bar.enable_steady_tick(Duration::from_millis(100));
            bar
        });
        flow.submit(input).await;
        if let Some(bar) = spinner {
            bar.finish_and_clear();
        }
    }

    match flow.state() {
        OnboardingState::Aborted {
            reason: AbortReason::Cancelled,
        } => return Err(CliError::Cancelled),
        OnboardingState::Aborted {
            reason: AbortReason::AlreadyConfigured,
        } => {
            return Err(CliError::AlreadyConfigured {
                device: "This appliance".into(),
            });
        }
        _ => {}
    }

    let device = flow.into_device().ok_or_else(|| CliError::ApiError {
        message: "onboarding stopped before completing".into(),
    })?;
    let line = format!(
        "Added {} as device {} ({})",
        device.name(),
        device.id(),
        device.host()
    );
    if color {
        output::print_output(&line.green().to_string(), global.quiet);
    } else {
        output::print_output(&line, global.quiet);
    }
    Ok(())
}

fn report(error: FlowError, color: bool) {
    if color {
        eprintln!("{} {error}", "✗".red());
    } else {
        eprintln!("error: {error}");
    }
}

fn progress_message(input: &Input) -> &'static str {
    match input {
        Input::Host { .. } => "Checking host",
        Input::AuthMethod(_) => "",
        Input::Credentials { .. } => "Requesting API key",
        Input::ApiKey(_) => "Checking API key",
        Input::Device(_) => "Checking configured devices",
    }
}

// ── Steps ───────────────────────────────────────────────────────────

fn host_input(args: &mut SetupArgs, form: &HostForm, default_host: &str) -> Result<Input, CliError> {
    if std::mem::take(&mut args.default_server) {
        return Ok(Input::Host {
            use_default_server: true,
            host: None,
        });
    }
    if let Some(host) = args.host.take() {
        return Ok(Input::Host {
            use_default_server: false,
            host: Some(host),
        });
    }

    let choices = [format!("Default server ({default_host})"), "Custom host".into()];
    let selection = Select::new()
        .with_prompt("PlantSip server")
        .items(&choices)
        .default(usize::from(!form.use_default_server))
        .interact()
        .map_err(prompt_err)?;

    if selection == 0 {
        return Ok(Input::Host {
            use_default_server: true,
            host: None,
        });
    }

    let host: String = Prompt::new()
        .with_prompt("Host URL")
        .with_initial_text(form.host.clone())
        .allow_empty(true)
        .interact_text()
        .map_err(prompt_err)?;
    Ok(Input::Host {
        use_default_server: false,
        host: Some(host),
    })
}

fn auth_method_input(args: &mut SetupArgs) -> Result<Input, CliError> {
    if args.api_key.is_some() {
        return Ok(Input::AuthMethod(AuthMethod::ApiKey));
    }
    if args.username.is_some() {
        return Ok(Input::AuthMethod(AuthMethod::Credentials));
    }

    let choices = ["Username and password", "Existing API key"];
    let selection = Select::new()
        .with_prompt("Authentication method")
        .items(&choices)
        .default(0)
        .interact()
        .map_err(prompt_err)?;

    Ok(Input::AuthMethod(if selection == 0 {
        AuthMethod::Credentials
    } else {
        AuthMethod::ApiKey
    }))
}

fn credentials_input(args: &mut SetupArgs) -> Result<Input, CliError> {
    let username = match args.username.take() {
        Some(username) => username,
        None => Prompt::new()
            .with_prompt("Username")
            .allow_empty(true)
            .interact_text()
            .map_err(prompt_err)?,
    };
    let password = match args.password.take() {
        Some(password) => password,
        None => Password::new()
            .with_prompt("Password")
            .allow_empty_password(true)
            .interact()
            .map_err(prompt_err)?,
    };

    Ok(Input::Credentials {
        username,
        password: SecretString::from(password),
    })
}

fn api_key_input(args: &mut SetupArgs) -> Result<Input, CliError> {
    let key = match args.api_key.take() {
        Some(key) => key,
        None => Password::new()
            .with_prompt("API key")
            .allow_empty_password(true)
            .interact()
            .map_err(prompt_err)?,
    };
    Ok(Input::ApiKey(SecretString::from(key)))
}

/// `--device` answers once; otherwise pick from the listed appliances.
fn device_input(args: &mut SetupArgs, devices: &[RemoteDevice]) -> Result<Input, CliError> {
    if let Some(device) = args.device.take() {
        return Ok(Input::Device(device));
    }

    let choices: Vec<String> = devices
        .iter()
        .map(|d| {
            if d.name.is_empty() {
                d.device_id.clone()
            } else {
                format!("{} ({})", d.name, d.device_id)
            }
        })
        .collect();
    let selection = Select::new()
        .with_prompt("Appliance")
        .items(&choices)
        .default(0)
        .interact()
        .map_err(prompt_err)?;

    let device = devices.get(selection).ok_or_else(|| CliError::Validation {
        field: "device".into(),
        reason: "selection out of range".into(),
    })?;
    Ok(Input::Device(device.device_id.clone()))
}
