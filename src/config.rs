use crate::chat::ProviderKind;

pub const DEFAULT_DATA_PATH: &str = "data/merged_data_with_coordinates.csv";
pub const DEFAULT_BOUNDARY_URL: &str =
    "https://eric.clst.org/assets/wiki/uploads/Stuff/gz_2010_us_040_00_500k.json";
pub const DEFAULT_MAP_STYLE: &str = "https://basemaps.cartocdn.com/gl/positron-gl-style/style.json";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant for international students.";

#[derive(Debug, Clone)]
pub struct Config {
    pub data_path: String,
    pub bind_addr: String,
    pub boundary_url: String,
    pub map_style: String,
    pub chat_provider: ProviderKind,
    /// Absent key does not block startup; every completion call fails instead.
    pub chat_api_key: Option<String>,
    pub chat_model: String,
    pub chat_base_url: String,
    pub chat_max_tokens: u32,
    pub chat_temperature: f32,
    pub system_prompt: String,
    /// Idle time after which a browser session and its transcript are dropped.
    pub session_ttl_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        let chat_provider = ProviderKind::from_env();
        Self {
            data_path: std::env::var("DATA_PATH").unwrap_or_else(|_| DEFAULT_DATA_PATH.to_string()),
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8501".to_string()),
            boundary_url: std::env::var("BOUNDARY_URL").unwrap_or_else(|_| DEFAULT_BOUNDARY_URL.to_string()),
            map_style: std::env::var("MAP_STYLE").unwrap_or_else(|_| DEFAULT_MAP_STYLE.to_string()),
            chat_api_key: std::env::var("CHAT_API_KEY")
                .ok()
                .or_else(|| chat_provider.api_key_from_env())
                .filter(|k| !k.trim().is_empty()),
            chat_model: std::env::var("CHAT_MODEL").unwrap_or_else(|_| chat_provider.default_model().to_string()),
            chat_base_url: std::env::var("CHAT_BASE_URL").unwrap_or_else(|_| chat_provider.default_base_url().to_string()),
            chat_max_tokens: std::env::var("CHAT_MAX_TOKENS").ok().and_then(|v| v.parse().ok()).unwrap_or(2048),
            chat_temperature: std::env::var("CHAT_TEMPERATURE").ok().and_then(|v| v.parse().ok()).unwrap_or(0.7),
            system_prompt: std::env::var("CHAT_SYSTEM_PROMPT").unwrap_or_else(|_| DEFAULT_SYSTEM_PROMPT.to_string()),
            session_ttl_secs: std::env::var("SESSION_TTL_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(3_600),
            chat_provider,
        }
    }
}
