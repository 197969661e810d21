use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Which generation service backs the story pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Provider {
    OpenAI,
    Gemini,
    SiliconFlow,
    /// Offline generator; needs no API key.
    Mock,
}

impl Provider {
    /// Base URL of the provider's OpenAI-compatible endpoint.
    pub fn api_base(&self) -> Option<&'static str> {
        match self {
            Provider::OpenAI => Some("https://api.openai.com/v1"),
            Provider::Gemini => Some("https://generativelanguage.googleapis.com/v1beta/openai"),
            Provider::SiliconFlow => Some("https://api.siliconflow.cn/v1"),
            Provider::Mock => None,
        }
    }
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub provider: Provider,
    pub openai_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub siliconflow_api_key: Option<String>,
    pub chat_model: String,
    pub log_level: Level,
    pub prompts_path: PathBuf,
    /// Custom word lists; the built-in lists are used when unset.
    pub vocabulary_path: Option<PathBuf>,
    pub recording_url: Option<String>,
    pub buffer_capacity: usize,
    pub session_ceiling: u32,
    pub breaker_threshold: u32,
    pub refill_delay: Duration,
    pub words_per_story: usize,
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let provider_str = std::env::var("PROVIDER").unwrap_or_else(|_| "openai".to_string());
        let provider = match provider_str.to_lowercase().as_str() {
            "openai" => Provider::OpenAI,
            "gemini" => Provider::Gemini,
            "siliconflow" => Provider::SiliconFlow,
            "mock" => Provider::Mock,
            other => {
                return Err(ConfigError::InvalidValue(
                    "PROVIDER".to_string(),
                    format!("'{}' is not a known provider", other),
                ));
            }
        };

        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();
        let gemini_api_key = std::env::var("GEMINI_API_KEY").ok();
        let siliconflow_api_key = std::env::var("SILICONFLOW_API_KEY").ok();

        let chat_model = std::env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let prompts_path = std::env::var("PROMPTS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./prompts"));

        let vocabulary_path = std::env::var("VOCABULARY_PATH")
            .ok()
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);

        let recording_url = std::env::var("RECORDING_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());

        let buffer_capacity = parse_var("BUFFER_CAPACITY", 3usize)?;
        if !(1..=3).contains(&buffer_capacity) {
            return Err(ConfigError::InvalidValue(
                "BUFFER_CAPACITY".to_string(),
                format!("{} is outside 1..=3", buffer_capacity),
            ));
        }
        let session_ceiling = parse_var("SESSION_CEILING", 5u32)?;
        let breaker_threshold = parse_var("BREAKER_THRESHOLD", 5u32)?;
        let refill_delay = Duration::from_millis(parse_var("REFILL_DELAY_MS", 5000u64)?);
        let words_per_story = parse_var("WORDS_PER_STORY", 5usize)?;

        let required_key = match provider {
            Provider::OpenAI => Some(("OPENAI_API_KEY", &openai_api_key, "openai")),
            Provider::Gemini => Some(("GEMINI_API_KEY", &gemini_api_key, "gemini")),
            Provider::SiliconFlow => {
                Some(("SILICONFLOW_API_KEY", &siliconflow_api_key, "siliconflow"))
            }
            Provider::Mock => None,
        };
        if let Some((var, None, name)) = required_key {
            return Err(ConfigError::MissingVar(format!(
                "{} must be set for '{}' provider",
                var, name
            )));
        }

        Ok(Self {
            bind_address,
            provider,
            openai_api_key,
            gemini_api_key,
            siliconflow_api_key,
            chat_model,
            log_level,
            prompts_path,
            vocabulary_path,
            recording_url,
            buffer_capacity,
            session_ceiling,
            breaker_threshold,
            refill_delay,
            words_per_story,
        })
    }

    /// The API key for the configured provider, if it needs one.
    pub fn api_key(&self) -> Option<&str> {
        match self.provider {
            Provider::OpenAI => self.openai_api_key.as_deref(),
            Provider::Gemini => self.gemini_api_key.as_deref(),
            Provider::SiliconFlow => self.siliconflow_api_key.as_deref(),
            Provider::Mock => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use tracing::Level;

    const VARS: [&str; 15] = [
        "BIND_ADDRESS",
        "PROVIDER",
        "OPENAI_API_KEY",
        "GEMINI_API_KEY",
        "SILICONFLOW_API_KEY",
        "CHAT_MODEL",
        "RUST_LOG",
        "PROMPTS_PATH",
        "VOCABULARY_PATH",
        "RECORDING_URL",
        "BUFFER_CAPACITY",
        "SESSION_CEILING",
        "BREAKER_THRESHOLD",
        "REFILL_DELAY_MS",
        "WORDS_PER_STORY",
    ];

    fn clear_env_vars() {
        unsafe {
            for var in VARS {
                env::remove_var(var);
            }
        }
    }

    fn set_minimal_env_openai() {
        unsafe {
            env::set_var("PROVIDER", "openai");
            env::set_var("OPENAI_API_KEY", "test-openai-key");
        }
    }

    #[test]
    fn test_config_error_display() {
        let missing_var = ConfigError::MissingVar("TEST_VAR".to_string());
        assert_eq!(
            format!("{}", missing_var),
            "Missing environment variable: TEST_VAR"
        );

        let invalid_value =
            ConfigError::InvalidValue("TEST_VAR".to_string(), "bad_value".to_string());
        assert_eq!(
            format!("{}", invalid_value),
            "Invalid value for environment variable TEST_VAR: bad_value"
        );
    }

    #[test]
    fn test_provider_api_base() {
        assert!(Provider::Gemini.api_base().unwrap().contains("googleapis"));
        assert!(Provider::SiliconFlow.api_base().unwrap().contains("siliconflow"));
        assert_eq!(Provider::Mock.api_base(), None);
    }

    #[test]
    #[serial]
    fn test_config_from_env_minimal_openai() {
        clear_env_vars();
        set_minimal_env_openai();

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.bind_address.to_string(), "0.0.0.0:3000");
        assert_eq!(config.provider, Provider::OpenAI);
        assert_eq!(config.api_key(), Some("test-openai-key"));
        assert_eq!(config.gemini_api_key, None);
        assert_eq!(config.chat_model, "gpt-4o");
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.prompts_path, PathBuf::from("./prompts"));
        assert_eq!(config.vocabulary_path, None);
        assert_eq!(config.recording_url, None);
        assert_eq!(config.buffer_capacity, 3);
        assert_eq!(config.session_ceiling, 5);
        assert_eq!(config.breaker_threshold, 5);
        assert_eq!(config.refill_delay, Duration::from_secs(5));
        assert_eq!(config.words_per_story, 5);
    }

    #[test]
    #[serial]
    fn test_config_mock_provider_needs_no_key() {
        clear_env_vars();
        unsafe {
            env::set_var("PROVIDER", "mock");
        }

        let config = Config::from_env().expect("Config should load successfully");
        assert_eq!(config.provider, Provider::Mock);
        assert_eq!(config.api_key(), None);
    }

    #[test]
    #[serial]
    fn test_config_from_env_custom_values() {
        clear_env_vars();
        unsafe {
            env::set_var("BIND_ADDRESS", "127.0.0.1:8080");
            env::set_var("PROVIDER", "SiliconFlow");
            env::set_var("SILICONFLOW_API_KEY", "custom-key");
            env::set_var("CHAT_MODEL", "deepseek-ai/DeepSeek-V3");
            env::set_var("RUST_LOG", "debug");
            env::set_var("PROMPTS_PATH", "/custom/prompts");
            env::set_var("VOCABULARY_PATH", "/custom/words.json");
            env::set_var("RECORDING_URL", "http://localhost:9000/wordweaver");
            env::set_var("BUFFER_CAPACITY", "1");
            env::set_var("SESSION_CEILING", "2");
            env::set_var("BREAKER_THRESHOLD", "3");
            env::set_var("REFILL_DELAY_MS", "250");
            env::set_var("WORDS_PER_STORY", "4");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.bind_address.to_string(), "127.0.0.1:8080");
        assert_eq!(config.provider, Provider::SiliconFlow);
        assert_eq!(config.api_key(), Some("custom-key"));
        assert_eq!(config.chat_model, "deepseek-ai/DeepSeek-V3");
        assert_eq!(config.log_level, Level::DEBUG);
        assert_eq!(config.prompts_path, PathBuf::from("/custom/prompts"));
        assert_eq!(
            config.vocabulary_path,
            Some(PathBuf::from("/custom/words.json"))
        );
        assert_eq!(
            config.recording_url.as_deref(),
            Some("http://localhost:9000/wordweaver")
        );
        assert_eq!(config.buffer_capacity, 1);
        assert_eq!(config.session_ceiling, 2);
        assert_eq!(config.breaker_threshold, 3);
        assert_eq!(config.refill_delay, Duration::from_millis(250));
        assert_eq!(config.words_per_story, 4);
    }

    #[test]
    #[serial]
    fn test_config_invalid_bind_address() {
        clear_env_vars();
        set_minimal_env_openai();
        unsafe {
            env::set_var("BIND_ADDRESS", "not-a-valid-address");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "BIND_ADDRESS"),
            _ => panic!("Expected InvalidValue for BIND_ADDRESS"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_log_level() {
        clear_env_vars();
        set_minimal_env_openai();
        unsafe {
            env::set_var("RUST_LOG", "not-a-level");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "RUST_LOG"),
            _ => panic!("Expected InvalidValue for RUST_LOG"),
        }
    }

    #[test]
    #[serial]
    fn test_config_unknown_provider() {
        clear_env_vars();
        unsafe {
            env::set_var("PROVIDER", "carrier-pigeon");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "PROVIDER"),
            _ => panic!("Expected InvalidValue for PROVIDER"),
        }
    }

    #[test]
    #[serial]
    fn test_config_buffer_capacity_out_of_range() {
        clear_env_vars();
        set_minimal_env_openai();
        unsafe {
            env::set_var("BUFFER_CAPACITY", "4");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "BUFFER_CAPACITY"),
            _ => panic!("Expected InvalidValue for BUFFER_CAPACITY"),
        }
    }

    #[test]
    #[serial]
    fn test_config_non_numeric_ceiling() {
        clear_env_vars();
        set_minimal_env_openai();
        unsafe {
            env::set_var("SESSION_CEILING", "many");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "SESSION_CEILING"),
            _ => panic!("Expected InvalidValue for SESSION_CEILING"),
        }
    }

    #[test]
    #[serial]
    fn test_config_missing_gemini_key() {
        clear_env_vars();
        unsafe {
            env::set_var("PROVIDER", "gemini");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::MissingVar(msg) => {
                assert!(msg.contains("GEMINI_API_KEY"));
            }
            _ => panic!("Expected MissingVar for GEMINI_API_KEY"),
        }
    }
}
