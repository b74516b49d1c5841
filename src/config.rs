use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub crm: CrmConfig,
    pub vapi: VapiConfig,
    pub twilio: TwilioConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default)]
    pub lead_source: LeadSourceConfig,
    #[serde(default)]
    pub phone: PhoneConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

#[derive(Debug, Deserialize, Clone)]
pub struct CrmConfig {
    pub api_key: String,
    pub location_id: String,
    #[serde(default = "default_crm_base_url")]
    pub base_url: String,
    #[serde(default = "default_crm_api_version")]
    pub api_version: String,
}

fn default_crm_base_url() -> String {
    "https://services.leadconnectorhq.com".to_string()
}

fn default_crm_api_version() -> String {
    "2021-07-28".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct VapiConfig {
    pub api_key: String,
    /// Assistant that runs outbound lead calls.
    pub assistant_id: String,
    /// Vapi phone number the call is placed from.
    pub phone_number_id: String,
    #[serde(default = "default_vapi_base_url")]
    pub base_url: String,
    /// Expected X-Vapi-Secret on call event webhooks. Empty disables the check.
    #[serde(default)]
    pub server_secret: String,
}

fn default_vapi_base_url() -> String {
    "https://api.vapi.ai".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub phone_number: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct WebhookConfig {
    /// Shared secret for X-GHL-Signature. Empty disables verification.
    #[serde(default)]
    pub secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FallbackConfig {
    /// Seconds to wait after dispatch before checking the call outcome.
    #[serde(default = "default_delay_secs")]
    pub delay_secs: u64,
    /// A fallback SMS sent within this window is not repeated.
    #[serde(default = "default_resend_window_secs")]
    pub resend_window_secs: u64,
    /// Treat a contact with no sms_consent field as consenting.
    #[serde(default)]
    pub assume_consent_when_unset: bool,
    #[serde(default = "default_business_name")]
    pub business_name: String,
    #[serde(default)]
    pub callback_number: String,
    #[serde(default = "default_message_template")]
    pub message_template: String,
}

fn default_delay_secs() -> u64 {
    45
}

fn default_resend_window_secs() -> u64 {
    600
}

fn default_business_name() -> String {
    "Valley View HVAC".to_string()
}

fn default_message_template() -> String {
    "{greeting} This is {business}. We tried to reach you but couldn't connect. \
     Would you like to schedule a heating or cooling service appointment? \
     Reply YES or call us at {callback}. We're here to help! - {business}"
        .to_string()
}

impl FallbackConfig {
    /// The resend window as a duration. Values too large to represent fall
    /// back to the default window.
    pub fn resend_window(&self) -> chrono::Duration {
        i64::try_from(self.resend_window_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or_else(|| chrono::Duration::seconds(default_resend_window_secs() as i64))
    }
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            delay_secs: default_delay_secs(),
            resend_window_secs: default_resend_window_secs(),
            assume_consent_when_unset: false,
            business_name: default_business_name(),
            callback_number: String::new(),
            message_template: default_message_template(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LeadSourceConfig {
    /// Extra raw-value patterns mapped onto canonical lead sources,
    /// e.g. `"valleyviewhvac.com" = "website"`.
    #[serde(default)]
    pub aliases: HashMap<String, String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PhoneConfig {
    /// Country code applied to bare 10-digit numbers.
    #[serde(default = "default_country_code")]
    pub default_country_code: String,
}

fn default_country_code() -> String {
    "1".to_string()
}

impl Default for PhoneConfig {
    fn default() -> Self {
        Self {
            default_country_code: default_country_code(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        // Load .env file from same directory as config.toml
        let env_path = config_dir().join(".env");
        match dotenvy::from_path(&env_path) {
            Ok(()) => tracing::info!("Loaded .env from {}", env_path.display()),
            Err(dotenvy::Error::Io(_)) => {
                tracing::debug!(
                    "No .env file at {}, using environment only",
                    env_path.display()
                );
            }
            Err(e) => tracing::warn!("Failed to parse .env: {e}"),
        }

        let path = config_path();
        tracing::info!("Loading config from {}", path.display());

        let contents = std::fs::read_to_string(&path).map_err(|e| {
            format!(
                "Failed to read config at {}: {}. Copy config.example.toml to {}",
                path.display(),
                e,
                path.display()
            )
        })?;

        let mut config = Self::from_toml_str(&contents)?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Secrets may come from the environment instead of the file. Both the
    /// long and short variable names used by existing deployments are honored.
    fn apply_env_overrides(&mut self) {
        if let Some(v) = first_env(&["GHL_API", "GHL_API_KEY"]) {
            self.crm.api_key = v;
        }
        if let Some(v) = first_env(&["GHL_LOCATION_ID"]) {
            self.crm.location_id = v;
        }
        if let Some(v) = first_env(&["VAPI_API_KEY"]) {
            self.vapi.api_key = v;
        }
        if let Some(v) = first_env(&["VAPI_OUTBOUND_ASSISTANT_ID"]) {
            self.vapi.assistant_id = v;
        }
        if let Some(v) = first_env(&["VAPI_PHONE_NUMBER_ID"]) {
            self.vapi.phone_number_id = v;
        }
        if let Some(v) = first_env(&["VAPI_SERVER_SECRET"]) {
            self.vapi.server_secret = v;
        }
        if let Some(v) = first_env(&["TWILIO_ACCOUNT_SID", "TWILIO_SID"]) {
            self.twilio.account_sid = v;
        }
        if let Some(v) = first_env(&["TWILIO_AUTH_TOKEN"]) {
            self.twilio.auth_token = v;
        }
        if let Some(v) = first_env(&["TWILIO_PHONE_NUMBER"]) {
            self.twilio.phone_number = v;
        }
        if let Some(v) = first_env(&["WEBHOOK_SECRET"]) {
            self.webhook.secret = v;
        }
        if let Some(port) = first_env(&["PORT"]).and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
    }
}

fn first_env(names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|v| !v.is_empty())
}

fn config_dir() -> PathBuf {
    if let Ok(p) = std::env::var("LEAD_LINE_CONFIG") {
        // If pointing to a file, use its parent directory
        let path = PathBuf::from(p);
        return path.parent().map(|p| p.to_path_buf()).unwrap_or(path);
    }

    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".lead-line")
}

fn config_path() -> PathBuf {
    if let Ok(p) = std::env::var("LEAD_LINE_CONFIG") {
        return PathBuf::from(p);
    }

    config_dir().join("config.toml")
}
