//! Entry point for the racktop TUI. Parses args, resolves settings and runs the App.

use anyhow::Context;
use racktop::api::ApiClient;
use racktop::app::App;
use racktop::bus::EventBus;
use racktop::config::Settings;
use racktop::logging;
use racktop::profiles::{load_profiles, save_profiles, ProfileEntry, ProfileRequest, ResolveProfile};
use racktop::session::Session;
use racktop::ws::MetricsClient;
use std::env;
use std::io::{self, Write};
use tracing::{info, warn};

#[derive(Debug, Default)]
struct ParsedArgs {
    url: Option<String>,
    ws_url: Option<String>,
    profile: Option<String>,
    save: bool,
    no_live: bool,
    dry_run: bool,
}

fn usage(prog: &str) -> String {
    format!(
        "Usage: {prog} [--profile NAME|-P NAME] [--save] [--ws URL|-w URL] [--no-live] [--dry-run] [http://HOST:PORT]\n\
         \n  API base defaults to ${} or http://localhost:8000",
        racktop::config::API_BASE_ENV
    )
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<ParsedArgs, String> {
    let mut it = args.into_iter();
    let prog = it.next().unwrap_or_else(|| "racktop".into());
    let mut parsed = ParsedArgs::default();

    while let Some(arg) = it.next() {
        match arg.as_str() {
            "-h" | "--help" => return Err(usage(&prog)),
            "--profile" | "-P" => parsed.profile = it.next(),
            "--ws" | "-w" => parsed.ws_url = it.next(),
            "--save" => parsed.save = true,
            "--no-live" => parsed.no_live = true,
            "--dry-run" => parsed.dry_run = true,
            _ if arg.starts_with("--profile=") || arg.starts_with("--ws=") => {
                if let Some((k, v)) = arg.split_once('=') {
                    if !v.is_empty() {
                        let slot = if k == "--ws" { &mut parsed.ws_url } else { &mut parsed.profile };
                        *slot = Some(v.to_string());
                    }
                }
            }
            _ if arg.starts_with('-') => {
                return Err(format!("Unknown option `{arg}`. {}", usage(&prog)));
            }
            _ => {
                if parsed.url.is_none() {
                    parsed.url = Some(arg);
                } else {
                    return Err(format!("Unexpected argument. {}", usage(&prog)));
                }
            }
        }
    }
    Ok(parsed)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let parsed = match parse_args(env::args()) {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("{msg}");
            return Ok(());
        }
    };

    if let Err(e) = logging::init() {
        eprintln!("logging disabled: {e}");
    }

    let Some(target) = resolve_target(&parsed)? else {
        return Ok(());
    };

    let mut settings = Settings::resolve(target.url.as_deref(), target.ws_url.as_deref())
        .context("invalid connection settings")?;
    settings.live = !parsed.no_live;

    if parsed.dry_run {
        println!("api: {}", settings.api_base);
        println!("live: {}", if settings.live { settings.ws_url.as_str() } else { "off" });
        return Ok(());
    }

    info!(api = %settings.api_base, ws = %settings.ws_url, live = settings.live, "starting");
    let client = MetricsClient::new(settings.client_options(), EventBus::new());
    let api = ApiClient::new(settings.api_base.clone()).context("building HTTP client")?;
    let session = Session::new(client, api);

    let mut app = App::new(session, settings);
    tokio::select! {
        res = app.run() => res,
        _ = tokio::signal::ctrl_c() => Ok(()),
    }
}

/// Endpoints picked from the command line or a profile. A missing `url`
/// falls through to the environment and then the local default.
#[derive(Debug, Default)]
struct Target {
    url: Option<String>,
    ws_url: Option<String>,
}

impl From<ProfileEntry> for Target {
    fn from(e: ProfileEntry) -> Self {
        Self {
            url: Some(e.url),
            ws_url: e.ws_url,
        }
    }
}

/// Work out which URL to use, creating or updating profiles on the way.
/// `Ok(None)` means the user aborted.
fn resolve_target(parsed: &ParsedArgs) -> anyhow::Result<Option<Target>> {
    let defaults = || Target {
        url: None,
        ws_url: parsed.ws_url.clone(),
    };
    let profiles_file = load_profiles();
    let req = ProfileRequest {
        profile_name: parsed.profile.clone(),
        url: parsed.url.clone(),
        ws_url: parsed.ws_url.clone(),
    };
    let mut profiles_mut = profiles_file.clone();

    let entry = match req.resolve(&profiles_file) {
        ResolveProfile::Direct(entry) => {
            if let Some(name) = parsed.profile.as_ref() {
                let write = match profiles_mut.profiles.get(name) {
                    // New profile: save immediately
                    None => true,
                    Some(existing) if *existing != entry => {
                        parsed.save || prompt_yes_no(&format!("Overwrite existing profile '{name}'? [y/N]: "))
                    }
                    Some(_) => false,
                };
                if write {
                    profiles_mut.profiles.insert(name.clone(), entry.clone());
                    persist(&profiles_mut);
                }
            }
            entry
        }
        ResolveProfile::Loaded(entry) => entry,
        ResolveProfile::PromptSelect(names) => {
            eprintln!("Select profile:");
            for (i, n) in names.iter().enumerate() {
                eprintln!("  {}. {}", i + 1, n);
            }
            let line = prompt_string("Enter number (or blank for defaults): ")?;
            let line = line.trim();
            if line.is_empty() {
                return Ok(Some(defaults()));
            }
            let picked = line
                .parse::<usize>()
                .ok()
                .and_then(|idx| idx.checked_sub(1))
                .and_then(|idx| names.get(idx))
                .and_then(|name| profiles_mut.profiles.get(name));
            match picked {
                Some(entry) => {
                    let mut entry = entry.clone();
                    if parsed.ws_url.is_some() {
                        entry.ws_url = parsed.ws_url.clone();
                    }
                    entry
                }
                None => return Ok(None),
            }
        }
        ResolveProfile::PromptCreate(name) => {
            eprintln!("Profile '{name}' does not exist yet.");
            let url = prompt_string("Enter API URL (http://HOST:PORT): ")?;
            if url.trim().is_empty() {
                return Ok(None);
            }
            let entry = ProfileEntry {
                url: url.trim().to_string(),
                ws_url: parsed.ws_url.clone(),
            };
            profiles_mut.profiles.insert(name, entry.clone());
            persist(&profiles_mut);
            entry
        }
        ResolveProfile::None => return Ok(Some(defaults())),
    };
    Ok(Some(entry.into()))
}

fn persist(profiles: &racktop::profiles::ProfilesFile) {
    if let Err(e) = save_profiles(profiles) {
        warn!(error = %e, "could not save profiles");
        eprintln!("warning: could not save profiles: {e}");
    }
}

fn prompt_yes_no(prompt: &str) -> bool {
    eprint!("{prompt}");
    let _ = io::stderr().flush();
    let mut line = String::new();
    if io::stdin().read_line(&mut line).is_ok() {
        matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    } else {
        false
    }
}

fn prompt_string(prompt: &str) -> io::Result<String> {
    eprint!("{prompt}");
    let _ = io::stderr().flush();
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line)
}
