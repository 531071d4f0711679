#![forbid(unsafe_code)]

use anyhow::{Context, Result, anyhow, bail};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand_core::{OsRng, RngCore};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_VIDTUBE_PORT: u16 = 8000;
pub const DEFAULT_VIDTUBE_HOST: &str = "127.0.0.1";
pub const DEFAULT_DATABASE_FILE: &str = "vidtube.db";
pub const DEFAULT_CORS_ORIGIN: &str = "*";
pub const DEFAULT_MAX_UPLOAD_MB: usize = 512;
pub const DEFAULT_ACCESS_TOKEN_EXPIRY: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_REFRESH_TOKEN_EXPIRY: Duration = Duration::from_secs(10 * 24 * 60 * 60);

pub const ACCESS_TOKEN_SECRET_KEY: &str = "ACCESS_TOKEN_SECRET";
pub const REFRESH_TOKEN_SECRET_KEY: &str = "REFRESH_TOKEN_SECRET";

/// Fully resolved runtime settings for the API server.
///
/// Secrets live in here too, which is why the struct deliberately does not
/// derive `Debug`.
#[derive(Clone)]
pub struct Settings {
    pub media_root: PathBuf,
    pub database_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub access_token_secret: String,
    pub access_token_expiry: Duration,
    pub refresh_token_secret: String,
    pub refresh_token_expiry: Duration,
    pub cors_origin: String,
    pub cookie_secure: bool,
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub media_root: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub env_path: Option<PathBuf>,
}

/// Reads the `.env` file, fills in missing token secrets and merges the
/// process environment plus CLI overrides on top.
pub fn resolve_settings(overrides: SettingsOverrides) -> Result<Settings> {
    let env_path = overrides
        .env_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ENV_PATH));
    let mut file_vars = read_env_file(&env_path)?;
    ensure_secrets(&env_path, &mut file_vars, env_var_string)?;
    build_settings_with_overrides(&file_vars, env_var_string, overrides)
}

/// Generates any token secret that is neither exported nor present in the
/// env file and persists it, so sessions survive restarts.
fn ensure_secrets(
    env_path: &Path,
    file_vars: &mut HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    for key in [ACCESS_TOKEN_SECRET_KEY, REFRESH_TOKEN_SECRET_KEY] {
        if lookup_value(key, file_vars, &env_lookup).is_some() {
            continue;
        }
        let secret = generate_secret();
        upsert_env_value(env_path, key, &secret)
            .with_context(|| format!("persisting generated {key}"))?;
        tracing::warn!("{key} was not set; generated one and stored it in {}", env_path.display());
        file_vars.insert(key.to_string(), secret);
    }
    Ok(())
}

fn generate_secret() -> String {
    let mut bytes = [0u8; 48];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
fn build_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<Settings> {
    build_settings_with_overrides(file_vars, env_lookup, SettingsOverrides::default())
}

fn build_settings_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: SettingsOverrides,
) -> Result<Settings> {
    let media_root = overrides
        .media_root
        .or_else(|| lookup_value("MEDIA_ROOT", file_vars, &env_lookup).map(PathBuf::from))
        .ok_or_else(|| anyhow!("MEDIA_ROOT not set"))?;
    let database_path = lookup_value("DATABASE_PATH", file_vars, &env_lookup)
        .map(PathBuf::from)
        .unwrap_or_else(|| media_root.join(DEFAULT_DATABASE_FILE));
    let port = overrides
        .port
        .or_else(|| {
            lookup_value("VIDTUBE_PORT", file_vars, &env_lookup)
                .and_then(|value| value.parse::<u16>().ok())
        })
        .unwrap_or(DEFAULT_VIDTUBE_PORT);
    let host = overrides
        .host
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| lookup_value("VIDTUBE_HOST", file_vars, &env_lookup))
        .unwrap_or_else(|| DEFAULT_VIDTUBE_HOST.to_string());

    let access_token_secret = lookup_value(ACCESS_TOKEN_SECRET_KEY, file_vars, &env_lookup)
        .ok_or_else(|| anyhow!("{ACCESS_TOKEN_SECRET_KEY} not set"))?;
    let refresh_token_secret = lookup_value(REFRESH_TOKEN_SECRET_KEY, file_vars, &env_lookup)
        .ok_or_else(|| anyhow!("{REFRESH_TOKEN_SECRET_KEY} not set"))?;
    if access_token_secret == refresh_token_secret {
        bail!("{ACCESS_TOKEN_SECRET_KEY} and {REFRESH_TOKEN_SECRET_KEY} must differ");
    }

    let access_token_expiry = lookup_value("ACCESS_TOKEN_EXPIRY", file_vars, &env_lookup)
        .and_then(|value| parse_duration(&value))
        .unwrap_or(DEFAULT_ACCESS_TOKEN_EXPIRY);
    let refresh_token_expiry = lookup_value("REFRESH_TOKEN_EXPIRY", file_vars, &env_lookup)
        .and_then(|value| parse_duration(&value))
        .unwrap_or(DEFAULT_REFRESH_TOKEN_EXPIRY);
    let cors_origin = lookup_value("CORS_ORIGIN", file_vars, &env_lookup)
        .unwrap_or_else(|| DEFAULT_CORS_ORIGIN.to_string());
    let cookie_secure = lookup_value("COOKIE_SECURE", file_vars, &env_lookup)
        .and_then(|value| parse_bool(&value))
        .unwrap_or(true);
    let max_upload_mb = lookup_value("MAX_UPLOAD_MB", file_vars, &env_lookup)
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_MAX_UPLOAD_MB);

    Ok(Settings {
        media_root,
        database_path,
        host,
        port,
        access_token_secret,
        access_token_expiry,
        refresh_token_secret,
        refresh_token_expiry,
        cors_origin,
        cookie_secure,
        max_upload_bytes: max_upload_mb * 1024 * 1024,
    })
}

/// Parses lifetimes such as `15m`, `12h`, `10d` or a bare number of seconds.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    let (digits, multiplier) = match value.chars().last()? {
        's' => (&value[..value.len() - 1], 1),
        'm' => (&value[..value.len() - 1], 60),
        'h' => (&value[..value.len() - 1], 60 * 60),
        'd' => (&value[..value.len() - 1], 24 * 60 * 60),
        _ => (value, 1),
    };
    let amount = digits.trim().parse::<u64>().ok().filter(|amount| *amount > 0)?;
    amount.checked_mul(multiplier).map(Duration::from_secs)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| {
        file_vars
            .get(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

/// Updates or appends a single env var inside the target file while preserving
/// unrelated lines and comments.
pub fn upsert_env_value(path: &Path, key: &str, value: &str) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).with_context(|| format!("Creating {}", parent.display()))?;
    }

    let raw = fs::read_to_string(path).unwrap_or_default();
    let mut lines = Vec::new();
    let mut updated = false;
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");

    for line in raw.lines() {
        let trimmed = line.trim_start();
        let indent = &line[..line.len() - trimmed.len()];
        let (prefix, rest) = match trimmed.strip_prefix("export ") {
            Some(stripped) => ("export ", stripped),
            None => ("", trimmed),
        };
        let Some((candidate, _)) = rest.split_once('=') else {
            lines.push(line.to_string());
            continue;
        };
        if candidate.trim() == key {
            lines.push(format!("{indent}{prefix}{key}=\"{escaped}\""));
            updated = true;
        } else {
            lines.push(line.to_string());
        }
    }

    if !updated {
        lines.push(format!("{key}=\"{escaped}\""));
    }

    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, lines.join("\n") + "\n")?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}
