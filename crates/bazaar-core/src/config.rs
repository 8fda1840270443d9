use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

/// Typed configuration for the marketplace bot.
#[derive(Clone, Debug)]
pub struct Config {
    // Core
    pub telegram_bot_token: String,

    // Catalog storage
    pub catalog_file: PathBuf,
    pub image_dir: PathBuf,

    // Purchase sessions
    pub negotiation_chat_id: Option<i64>,
    pub log_chat_id: Option<i64>,
    pub staff_roles: Vec<String>,
    pub staff_users: Vec<i64>,
    pub cooldown_sweep_interval: Duration,

    // Audit
    pub audit_log_path: PathBuf,
    pub audit_log_json: bool,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        // Required env vars
        let telegram_bot_token = env_str("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN not found in environment variables".to_string(),
            ));
        }

        let catalog_file = PathBuf::from(env_str("CATALOG_FILE").unwrap_or("items.json".to_string()));
        let image_dir = PathBuf::from(env_str("IMAGE_DIR").unwrap_or("item_images".to_string()));

        // Downloaded listing images are stored here.
        fs::create_dir_all(&image_dir)?;

        let negotiation_chat_id = env_i64("NEGOTIATION_CHAT_ID");
        let log_chat_id = env_i64("MARKET_LOG_CHAT_ID");
        let staff_roles = parse_csv_lower(
            env_str("MARKET_STAFF_ROLES").or_else(|| Some("staff".to_string())),
        );
        let staff_users = parse_csv_i64(env_str("MARKET_STAFF_USERS"));
        let cooldown_sweep_interval =
            Duration::from_secs(env_u64("COOLDOWN_SWEEP_SECS").unwrap_or(600).max(1));

        let audit_log_path = PathBuf::from(
            env_str("AUDIT_LOG_PATH").unwrap_or("/tmp/bazaar-audit.log".to_string()),
        );
        let audit_log_json = env_bool("AUDIT_LOG_JSON").unwrap_or(false);

        Ok(Self {
            telegram_bot_token,
            catalog_file,
            image_dir,
            negotiation_chat_id,
            log_chat_id,
            staff_roles,
            staff_users,
            cooldown_sweep_interval,
            audit_log_path,
            audit_log_json,
        })
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        env::set_var(key, strip_quotes(v.trim()));
    }
}

fn strip_quotes(val: &str) -> &str {
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        return &val[1..val.len() - 1];
    }
    val
}

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).map(|s| {
        matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_i64(key: &str) -> Option<i64> {
    env_str(key).and_then(|s| s.trim().parse::<i64>().ok())
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn parse_csv_lower(v: Option<String>) -> Vec<String> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_parsers_skip_garbage() {
        assert_eq!(
            parse_csv_i64(Some("1, 2,,x,-3".to_string())),
            vec![1, 2, -3]
        );
        assert_eq!(
            parse_csv_lower(Some(" Staff ,MODS,".to_string())),
            vec!["staff".to_string(), "mods".to_string()]
        );
        assert!(parse_csv_i64(None).is_empty());
    }

    #[test]
    fn dotenv_values_lose_surrounding_quotes() {
        assert_eq!(strip_quotes("\"abc\""), "abc");
        assert_eq!(strip_quotes("'abc'"), "abc");
        assert_eq!(strip_quotes("abc"), "abc");
        assert_eq!(strip_quotes("\""), "\"");
    }
}
