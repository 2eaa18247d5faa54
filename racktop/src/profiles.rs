//! Named connection profiles: a JSON map of name -> { url, ws_url }.
//! Stored under $XDG_CONFIG_HOME/racktop/profiles.json (fallback ~/.config/racktop/profiles.json)

use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, io, path::PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ProfileEntry {
    /// REST API base, e.g. `http://10.0.0.5:8000`.
    pub url: String,
    /// Live endpoint override; derived from `url` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ws_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProfilesFile {
    #[serde(default)]
    pub profiles: BTreeMap<String, ProfileEntry>,
    #[serde(default)]
    pub version: u32,
}

pub fn config_dir() -> PathBuf {
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(xdg).join("racktop")
    } else {
        dirs_next::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("racktop")
    }
}

pub fn profiles_path() -> PathBuf {
    config_dir().join("profiles.json")
}

/// Missing or unreadable files yield an empty set.
pub fn load_profiles() -> ProfilesFile {
    let path = profiles_path();
    match fs::read_to_string(&path) {
        Ok(s) => serde_json::from_str(&s).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "ignoring malformed profiles file");
            ProfilesFile::default()
        }),
        Err(_) => ProfilesFile::default(),
    }
}

pub fn save_profiles(p: &ProfilesFile) -> io::Result<()> {
    let path = profiles_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let data = serde_json::to_vec_pretty(p).map_err(io::Error::other)?;
    fs::write(path, data)
}

#[derive(Debug, PartialEq, Eq)]
pub enum ResolveProfile {
    /// Use the runtime inputs; the caller may persist them.
    Direct(ProfileEntry),
    /// Taken from an existing profile.
    Loaded(ProfileEntry),
    /// Ask the user to pick one of these names.
    PromptSelect(Vec<String>),
    /// Named profile does not exist yet; ask for its URL.
    PromptCreate(String),
    /// Nothing given and nothing saved: use environment or defaults.
    None,
}

pub struct ProfileRequest {
    pub profile_name: Option<String>,
    pub url: Option<String>,
    pub ws_url: Option<String>,
}

impl ProfileRequest {
    pub fn resolve(self, pf: &ProfilesFile) -> ResolveProfile {
        match (self.profile_name, self.url) {
            (_, Some(url)) => ResolveProfile::Direct(ProfileEntry {
                url,
                ws_url: self.ws_url,
            }),
            (Some(name), None) => match pf.profiles.get(&name) {
                Some(entry) => {
                    let mut entry = entry.clone();
                    // --ws on the command line still wins over the stored one
                    if self.ws_url.is_some() {
                        entry.ws_url = self.ws_url;
                    }
                    ResolveProfile::Loaded(entry)
                }
                None => ResolveProfile::PromptCreate(name),
            },
            (None, None) if pf.profiles.is_empty() => ResolveProfile::None,
            (None, None) => ResolveProfile::PromptSelect(pf.profiles.keys().cloned().collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file() -> ProfilesFile {
        let mut pf = ProfilesFile::default();
        pf.profiles.insert(
            "lab".into(),
            ProfileEntry {
                url: "http://lab:8000".into(),
                ws_url: Some("ws://lab:8001/ws/metrics".into()),
            },
        );
        pf
    }

    fn request(name: Option<&str>, url: Option<&str>, ws: Option<&str>) -> ProfileRequest {
        ProfileRequest {
            profile_name: name.map(Into::into),
            url: url.map(Into::into),
            ws_url: ws.map(Into::into),
        }
    }

    #[test]
    fn url_on_command_line_is_direct() {
        let r = request(Some("lab"), Some("http://other:8000"), None).resolve(&file());
        assert_eq!(
            r,
            ResolveProfile::Direct(ProfileEntry {
                url: "http://other:8000".into(),
                ws_url: None,
            })
        );
    }

    #[test]
    fn known_profile_is_loaded_and_ws_override_applies() {
        match request(Some("lab"), None, None).resolve(&file()) {
            ResolveProfile::Loaded(e) => assert_eq!(e.ws_url.as_deref(), Some("ws://lab:8001/ws/metrics")),
            other => panic!("unexpected {other:?}"),
        }
        match request(Some("lab"), None, Some("wss://x/ws/metrics")).resolve(&file()) {
            ResolveProfile::Loaded(e) => assert_eq!(e.ws_url.as_deref(), Some("wss://x/ws/metrics")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_profile_prompts_create() {
        assert_eq!(
            request(Some("new"), None, None).resolve(&file()),
            ResolveProfile::PromptCreate("new".into())
        );
    }

    #[test]
    fn nothing_given() {
        assert_eq!(
            request(None, None, None).resolve(&file()),
            ResolveProfile::PromptSelect(vec!["lab".into()])
        );
        assert_eq!(
            request(None, None, None).resolve(&ProfilesFile::default()),
            ResolveProfile::None
        );
    }
}
