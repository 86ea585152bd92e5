use std::env;

use quill_core::util::{is_http_url, normalize_text_option};

use crate::cli::ConfigCommands;
use crate::config_profiles::{default_config_path, CliProfilesConfig};
use crate::error::CliError;

/// Values given to `config init`; unset fields fall back to env, then to the stored profile
#[derive(Debug, Default)]
pub struct ProfileInit {
    pub api_url: Option<String>,
    pub owner: Option<String>,
    pub token: Option<String>,
}

pub fn run_config(command: ConfigCommands, global_profile: Option<&str>) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init {
            profile,
            api_url,
            owner,
            token,
            no_activate,
        } => run_config_init(
            profile.as_deref().or(global_profile),
            ProfileInit {
                api_url,
                owner,
                token,
            },
            no_activate,
        ),
        ConfigCommands::Show => run_config_show(global_profile),
    }
}

fn run_config_init(
    profile_name: Option<&str>,
    init: ProfileInit,
    no_activate: bool,
) -> Result<(), CliError> {
    let mut config = CliProfilesConfig::load().map_err(CliError::Config)?;
    let profile_name = config.resolve_profile_name(profile_name);
    apply_profile_init(
        &mut config,
        &profile_name,
        init,
        |name| env::var(name).ok(),
        !no_activate,
    )?;

    let path = config.save().map_err(CliError::Config)?;
    println!(
        "Profile '{}' initialized at {}",
        profile_name,
        path.display()
    );

    let profile = config
        .profiles
        .get(&profile_name)
        .ok_or_else(|| CliError::Config("Failed to persist profile".to_string()))?;
    let mut missing_fields = Vec::new();
    if profile.api_base_url.is_none() {
        missing_fields.push("api_url");
    }
    if profile.owner_id.is_none() {
        missing_fields.push("owner");
    }
    if profile.access_token.is_none() {
        missing_fields.push("token");
    }
    if missing_fields.is_empty() {
        println!("Profile '{profile_name}' is ready. Run `quill sync` to sync.");
    } else {
        println!(
            "Profile '{}' is missing: {}; notes stay on this device until it is complete",
            profile_name,
            missing_fields.join(", ")
        );
    }
    Ok(())
}

/// Merge explicit values, `QUILL_API_URL` / `QUILL_OWNER_ID` / `QUILL_TOKEN`, and the stored profile
pub fn apply_profile_init(
    config: &mut CliProfilesConfig,
    profile_name: &str,
    init: ProfileInit,
    lookup: impl Fn(&str) -> Option<String>,
    activate: bool,
) -> Result<(), CliError> {
    let existing = config.profile(profile_name).cloned().unwrap_or_default();

    let api_url = normalize_text_option(init.api_url)
        .or_else(|| normalize_text_option(lookup("QUILL_API_URL")))
        .or(existing.api_base_url)
        .map(|url| url.trim_end_matches('/').to_string());
    if let Some(url) = &api_url {
        if !is_http_url(url) {
            return Err(CliError::Config(
                "api_url must include http:// or https://".to_string(),
            ));
        }
    }
    let owner = normalize_text_option(init.owner)
        .or_else(|| normalize_text_option(lookup("QUILL_OWNER_ID")))
        .or(existing.owner_id);
    let token = normalize_text_option(init.token)
        .or_else(|| normalize_text_option(lookup("QUILL_TOKEN")))
        .or(existing.access_token);

    let profile = config.profile_mut_or_default(profile_name);
    profile.api_base_url = api_url;
    profile.owner_id = owner;
    profile.access_token = token;

    if activate {
        config.active_profile = Some(profile_name.to_string());
    }
    Ok(())
}

fn run_config_show(global_profile: Option<&str>) -> Result<(), CliError> {
    let path = default_config_path().map_err(CliError::Config)?;
    let config = CliProfilesConfig::load_from_path(&path).map_err(CliError::Config)?;
    let profile_name = config.resolve_profile_name(global_profile);

    println!("config:  {}", path.display());
    println!("profile: {profile_name}");
    match config.profile(&profile_name) {
        Some(profile) => println!("{profile:#?}"),
        None => println!("(not configured; notes stay on this device)"),
    }
    Ok(())
}
