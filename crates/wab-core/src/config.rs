use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

/// Typed configuration for the bot.
///
/// Every field has a default (see `Default`); `load()` overrides them from the
/// environment and an optional `.env` file.
#[derive(Clone, Debug)]
pub struct Config {
    // HTTP
    pub http_host: String,
    pub http_port: u16,

    // Session
    pub session_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub print_qr_in_terminal: bool,

    // Bridge (protocol client)
    pub bridge_path: PathBuf,
    pub bridge_args: Vec<String>,
    pub bridge_request_timeout: Duration,

    // Reconnection
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
    /// 0 = unbounded.
    pub reconnect_max_attempts: u32,

    // Media lookup / download
    pub ytdlp_path: PathBuf,
    pub search_limit: usize,
    pub search_timeout: Duration,
    pub download_timeout: Duration,
    pub download_buffer_bytes: usize,
    pub download_max_bytes: u64,
    pub audio_mime_type: String,

    // Stickers
    pub image_fetch_timeout: Duration,
    pub image_max_bytes: usize,
    pub sticker_size: u32,

    // Free-text triggers (lower-case)
    pub greeting_words: Vec<String>,
    pub thanks_words: Vec<String>,
    pub how_are_you_phrases: Vec<String>,
    pub link_words: Vec<String>,

    // Outbound pacing
    pub send_global_interval: Duration,
    pub send_chat_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_host: "0.0.0.0".to_string(),
            http_port: 3000,
            session_dir: PathBuf::from("session"),
            temp_dir: env::temp_dir().join("wabot"),
            print_qr_in_terminal: true,
            bridge_path: PathBuf::from("wa-bridge"),
            bridge_args: Vec::new(),
            bridge_request_timeout: Duration::from_secs(60),
            reconnect_base_delay: Duration::from_millis(500),
            reconnect_max_delay: Duration::from_secs(30),
            reconnect_max_attempts: 0,
            ytdlp_path: PathBuf::from("yt-dlp"),
            search_limit: 5,
            search_timeout: Duration::from_secs(20),
            download_timeout: Duration::from_secs(60),
            download_buffer_bytes: 64 * 1024,
            download_max_bytes: 64 * 1024 * 1024,
            audio_mime_type: "audio/mpeg".to_string(),
            image_fetch_timeout: Duration::from_secs(15),
            image_max_bytes: 10 * 1024 * 1024,
            sticker_size: 512,
            greeting_words: csv_lower("hola,hello,buenas"),
            thanks_words: csv_lower("gracias,thanks,thank you"),
            how_are_you_phrases: csv_lower("como estas,cómo estás,que tal,qué tal,how are you"),
            link_words: csv_lower("link"),
            send_global_interval: Duration::from_millis(40),
            send_chat_interval: Duration::from_millis(250),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        let d = Self::default();

        let http_port = match env_str("PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| Error::Config(format!("PORT must be a port number, got {raw:?}")))?,
            None => d.http_port,
        };

        let bridge_path = env_path("WA_BRIDGE_PATH").unwrap_or(d.bridge_path);
        let bridge_args = env_str("WA_BRIDGE_ARGS")
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or(d.bridge_args);

        let download_buffer_bytes = env_usize("DOWNLOAD_BUFFER_BYTES").unwrap_or(d.download_buffer_bytes);
        if download_buffer_bytes == 0 {
            return Err(Error::Config(
                "DOWNLOAD_BUFFER_BYTES must be greater than zero".to_string(),
            ));
        }

        let sticker_size = env_u32("STICKER_SIZE").unwrap_or(d.sticker_size);
        if !(64..=1024).contains(&sticker_size) {
            return Err(Error::Config(format!(
                "STICKER_SIZE must be between 64 and 1024, got {sticker_size}"
            )));
        }

        let temp_dir = env_path("TEMP_DIR").unwrap_or(d.temp_dir);
        fs::create_dir_all(&temp_dir)?;

        Ok(Self {
            http_host: env_str("HTTP_HOST").and_then(non_empty).unwrap_or(d.http_host),
            http_port,
            session_dir: env_path("SESSION_DIR").unwrap_or(d.session_dir),
            temp_dir,
            print_qr_in_terminal: env_bool("PRINT_QR_IN_TERMINAL").unwrap_or(d.print_qr_in_terminal),
            bridge_path,
            bridge_args,
            bridge_request_timeout: env_millis("BRIDGE_REQUEST_TIMEOUT_MS")
                .unwrap_or(d.bridge_request_timeout),
            reconnect_base_delay: env_millis("RECONNECT_BASE_DELAY_MS")
                .unwrap_or(d.reconnect_base_delay),
            reconnect_max_delay: env_millis("RECONNECT_MAX_DELAY_MS")
                .unwrap_or(d.reconnect_max_delay),
            reconnect_max_attempts: env_u32("RECONNECT_MAX_ATTEMPTS")
                .unwrap_or(d.reconnect_max_attempts),
            ytdlp_path: env_path("YTDLP_PATH").unwrap_or(d.ytdlp_path),
            search_limit: env_usize("SEARCH_LIMIT").unwrap_or(d.search_limit).max(1),
            search_timeout: env_millis("SEARCH_TIMEOUT_MS").unwrap_or(d.search_timeout),
            download_timeout: env_millis("DOWNLOAD_TIMEOUT_MS").unwrap_or(d.download_timeout),
            download_buffer_bytes,
            download_max_bytes: env_u64("DOWNLOAD_MAX_BYTES").unwrap_or(d.download_max_bytes),
            audio_mime_type: env_str("AUDIO_MIME_TYPE")
                .and_then(non_empty)
                .unwrap_or(d.audio_mime_type),
            image_fetch_timeout: env_millis("IMAGE_FETCH_TIMEOUT_MS")
                .unwrap_or(d.image_fetch_timeout),
            image_max_bytes: env_usize("IMAGE_MAX_BYTES").unwrap_or(d.image_max_bytes),
            sticker_size,
            greeting_words: env_csv_lower("GREETING_WORDS").unwrap_or(d.greeting_words),
            thanks_words: env_csv_lower("THANKS_WORDS").unwrap_or(d.thanks_words),
            how_are_you_phrases: env_csv_lower("HOW_ARE_YOU_PHRASES")
                .unwrap_or(d.how_are_you_phrases),
            link_words: env_csv_lower("LINK_WORDS").unwrap_or(d.link_words),
            send_global_interval: env_millis("SEND_GLOBAL_INTERVAL_MS")
                .unwrap_or(d.send_global_interval),
            send_chat_interval: env_millis("SEND_CHAT_INTERVAL_MS").unwrap_or(d.send_chat_interval),
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

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
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

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        out.push((key.to_string(), val));
    }
    out
}

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).map(|s| parse_bool(&s))
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key).and_then(|s| s.trim().parse::<usize>().ok())
}

fn env_millis(key: &str) -> Option<Duration> {
    env_u64(key).map(Duration::from_millis)
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn env_csv_lower(key: &str) -> Option<Vec<String>> {
    let list = csv_lower(&env_str(key)?);
    if list.is_empty() {
        None
    } else {
        Some(list)
    }
}

fn csv_lower(v: &str) -> Vec<String> {
    v.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
