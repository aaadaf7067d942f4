//! Strongly-typed configuration for the onboarding harness.
//!
//! Configuration is resolved exactly once at the entry point, either from
//! defaults, from environment variables (with optional `.env` support), or by
//! merging explicit overrides. Flows and actions receive plain values from the
//! resolved [`HarnessConfig`] and never read the environment themselves.

use std::env;
use std::fmt;
use std::num::ParseIntError;
use std::path::PathBuf;
use std::sync::Arc;

use dotenvy::dotenv;
use serde::de::{Deserialize, Deserializer, Error as DeError};
use serde::ser::{Serialize, Serializer};
use serde::{Deserialize as DeriveDeserialize, Serialize as DeriveSerialize};
use thiserror::Error;

pub const DEFAULT_APP_URL: &str = "https://app.st4ge.com";
pub const DEFAULT_CDM_URL: &str = "https://cdm.st4ge.com/";
pub const DEFAULT_VERIFY_ID: &str = "8207106197083";
pub const DEFAULT_SIGNUP_DONE_PATTERN: &str = r"(?i)verification submitted|pending review";
pub const DEFAULT_HOME_SCREEN_PATTERN: &str = r"(?i)personalise my products|start earning";

/// Shared logger callback signature used by the configuration.
pub type LoggerCallback = Arc<dyn Fn(&str) + Send + Sync + 'static>;

/// Verbosity level for harness logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Minimal,
    Medium,
    Detailed,
}

impl Verbosity {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            Verbosity::Minimal => 0,
            Verbosity::Medium => 1,
            Verbosity::Detailed => 2,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Verbosity::Minimal),
            1 => Some(Verbosity::Medium),
            2 => Some(Verbosity::Detailed),
            _ => None,
        }
    }
}

impl Default for Verbosity {
    fn default() -> Self {
        Verbosity::Medium
    }
}

impl Serialize for Verbosity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for Verbosity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = u8::deserialize(deserializer)?;
        Verbosity::from_u8(value).ok_or_else(|| {
            DeError::custom(format!(
                "invalid verbosity value {value}; expected 0, 1, or 2"
            ))
        })
    }
}

/// Identity document offered on the KYC document-type screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, DeriveSerialize, DeriveDeserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdDocumentType {
    IdCard,
    GreenBook,
}

impl Default for IdDocumentType {
    fn default() -> Self {
        IdDocumentType::IdCard
    }
}

impl IdDocumentType {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "id_card" | "idcard" | "card" => Some(IdDocumentType::IdCard),
            "green_book" | "greenbook" | "book" => Some(IdDocumentType::GreenBook),
            _ => None,
        }
    }

    /// Button captions that select this document type.
    pub fn captions(self) -> &'static [&'static str] {
        match self {
            IdDocumentType::IdCard => &["ID Card", "Smart ID Card", "ID card"],
            IdDocumentType::GreenBook => &["Green ID Book", "ID Book", "Green Book"],
        }
    }
}

/// Monthly income bracket answered during personalisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, DeriveSerialize, DeriveDeserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncomeBand {
    Lowest,
    Mid,
    Highest,
}

impl Default for IncomeBand {
    fn default() -> Self {
        IncomeBand::Highest
    }
}

impl IncomeBand {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "lowest" | "low" => Some(IncomeBand::Lowest),
            "mid" | "middle" => Some(IncomeBand::Mid),
            "highest" | "high" => Some(IncomeBand::Highest),
            _ => None,
        }
    }

    pub fn caption(self) -> &'static str {
        match self {
            IncomeBand::Lowest => "R 0 - R 10000",
            IncomeBand::Mid => "R 15000 - R 25000",
            IncomeBand::Highest => "R 25000+",
        }
    }
}

/// Tax residency answered during personalisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, DeriveSerialize, DeriveDeserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxRegion {
    SaOnly,
    SaAndOther,
}

impl Default for TaxRegion {
    fn default() -> Self {
        TaxRegion::SaOnly
    }
}

impl TaxRegion {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sa_only" | "sa" | "south_africa" => Some(TaxRegion::SaOnly),
            "sa_and_other" | "other" | "both" => Some(TaxRegion::SaAndOther),
            _ => None,
        }
    }

    pub fn caption(self) -> &'static str {
        match self {
            TaxRegion::SaOnly => "South Africa Only",
            TaxRegion::SaAndOther => "South Africa and Other",
        }
    }
}

/// Resolved harness configuration.
#[derive(DeriveSerialize, DeriveDeserialize, Clone)]
#[serde(default)]
pub struct HarnessConfig {
    #[serde(alias = "appUrl")]
    pub app_url: String,
    #[serde(alias = "cdmUrl")]
    pub cdm_url: String,
    #[serde(alias = "adminUsersUrl")]
    pub admin_users_url: Option<String>,
    #[serde(alias = "otpListUrl")]
    pub otp_list_url: Option<String>,
    pub headless: bool,
    #[serde(alias = "chromeExecutable")]
    pub chrome_executable: Option<PathBuf>,
    #[serde(alias = "defaultPhone")]
    pub default_phone: Option<String>,
    #[serde(alias = "defaultPin")]
    pub default_pin: String,
    #[serde(alias = "idType")]
    pub id_type: IdDocumentType,
    pub employed: bool,
    #[serde(alias = "incomeBand")]
    pub income_band: IncomeBand,
    #[serde(alias = "taxRegion")]
    pub tax_region: TaxRegion,
    #[serde(alias = "debtReview")]
    pub debt_review: bool,
    #[serde(alias = "raceOption")]
    pub race_option: String,
    #[serde(alias = "clickTimeoutMs")]
    pub click_timeout_ms: u64,
    #[serde(alias = "waitTimeoutMs")]
    pub wait_timeout_ms: u64,
    #[serde(alias = "otpAdminTimeoutMs")]
    pub otp_admin_timeout_ms: u64,
    #[serde(alias = "cdmAfterSubmitMs")]
    pub cdm_after_submit_ms: u64,
    #[serde(alias = "inspectDelayMs")]
    pub inspect_delay_ms: u64,
    #[serde(alias = "appStatePath")]
    pub app_state_path: PathBuf,
    #[serde(alias = "cdmStatePath")]
    pub cdm_state_path: PathBuf,
    #[serde(alias = "phoneSelector")]
    pub phone_selector: Option<String>,
    #[serde(alias = "otpCheckSelector")]
    pub otp_check_selector: Option<String>,
    #[serde(alias = "cameraY4m")]
    pub camera_y4m: Option<PathBuf>,
    #[serde(alias = "numUsers")]
    pub num_users: u32,
    #[serde(alias = "verifyUserIds")]
    pub verify_user_ids: Vec<String>,
    #[serde(alias = "mediaDir")]
    pub media_dir: PathBuf,
    #[serde(alias = "signupDonePattern")]
    pub signup_done_pattern: String,
    #[serde(alias = "homeScreenPattern")]
    pub home_screen_pattern: String,
    #[serde(skip_serializing, skip_deserializing)]
    pub logger: Option<LoggerCallback>,
    pub verbose: Verbosity,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        HarnessConfig {
            app_url: DEFAULT_APP_URL.to_string(),
            cdm_url: DEFAULT_CDM_URL.to_string(),
            admin_users_url: None,
            otp_list_url: None,
            headless: false,
            chrome_executable: None,
            default_phone: None,
            default_pin: "0000".to_string(),
            id_type: IdDocumentType::default(),
            employed: true,
            income_band: IncomeBand::default(),
            tax_region: TaxRegion::default(),
            debt_review: false,
            race_option: "coloured".to_string(),
            click_timeout_ms: 3_000,
            wait_timeout_ms: 3_000,
            otp_admin_timeout_ms: 15_000,
            cdm_after_submit_ms: 100,
            inspect_delay_ms: 0,
            app_state_path: PathBuf::from("auth/.app_state.json"),
            cdm_state_path: PathBuf::from("auth/.cdm_state.json"),
            phone_selector: None,
            otp_check_selector: None,
            camera_y4m: None,
            num_users: 1,
            verify_user_ids: vec![DEFAULT_VERIFY_ID.to_string()],
            media_dir: PathBuf::from("e2e/.run_media"),
            signup_done_pattern: DEFAULT_SIGNUP_DONE_PATTERN.to_string(),
            home_screen_pattern: DEFAULT_HOME_SCREEN_PATTERN.to_string(),
            logger: None,
            verbose: Verbosity::default(),
        }
    }
}

impl HarnessConfig {
    /// Construct a configuration by reading environment variables, after
    /// loading a `.env` file if present.
    pub fn from_env() -> Result<Self, HarnessConfigError> {
        let _ = dotenv();
        let mut config = HarnessConfig::default();

        if let Some(value) = env_var("APP_WEB_URL") {
            config.app_url = value;
        }
        if let Some(value) = env_var("CDM_UI_URL") {
            config.cdm_url = value;
        }
        if let Some(value) = env_var("DJANGO_ADMIN_USERS_URL") {
            config.admin_users_url = Some(value);
        }
        if let Some(value) = env_var("CDM_OTP_URL") {
            config.otp_list_url = Some(value);
        }
        if let Some(value) = env_var("HEADLESS") {
            config.headless = parse_bool("HEADLESS", &value)?;
        }
        if let Some(value) = env_var("HARNESS_CHROME_BIN") {
            config.chrome_executable = Some(PathBuf::from(value));
        }
        if let Some(value) = env_var("DEFAULT_PHONE") {
            config.default_phone = Some(value);
        }
        if let Some(value) = env_var("DEFAULT_PIN") {
            config.default_pin = parse_digits("DEFAULT_PIN", &value)?;
        }
        if let Some(value) = env_var("ID_TYPE") {
            config.id_type = IdDocumentType::parse(&value)
                .ok_or_else(|| HarnessConfigError::invalid_enum("ID_TYPE", value.clone()))?;
        }
        if let Some(value) = env_var("EMPLOYED") {
            config.employed = parse_bool("EMPLOYED", &value)?;
        }
        if let Some(value) = env_var("INCOME_BAND") {
            config.income_band = IncomeBand::parse(&value)
                .ok_or_else(|| HarnessConfigError::invalid_enum("INCOME_BAND", value.clone()))?;
        }
        if let Some(value) = env_var("TAX_REGION") {
            config.tax_region = TaxRegion::parse(&value)
                .ok_or_else(|| HarnessConfigError::invalid_enum("TAX_REGION", value.clone()))?;
        }
        if let Some(value) = env_var("DEBT_REVIEW") {
            config.debt_review = parse_bool("DEBT_REVIEW", &value)?;
        }
        if let Some(value) = env_var("RACE_OPTION") {
            config.race_option = value.to_ascii_lowercase();
        }
        if let Some(value) = env_var("UNIVERSAL_CLICK_TIMEOUT") {
            config.click_timeout_ms = parse_u64("UNIVERSAL_CLICK_TIMEOUT", &value)?;
        }
        if let Some(value) = env_var("UNIVERSAL_WAIT_TIMEOUT") {
            config.wait_timeout_ms = parse_u64("UNIVERSAL_WAIT_TIMEOUT", &value)?;
        }
        if let Some(value) = env_var("OTP_ADMIN_TIMEOUT") {
            config.otp_admin_timeout_ms = parse_u64("OTP_ADMIN_TIMEOUT", &value)?;
        }
        if let Some(value) = env_var("INSPECT_CDM_AFTER_SUBMIT_MS") {
            config.cdm_after_submit_ms = parse_u64("INSPECT_CDM_AFTER_SUBMIT_MS", &value)?;
        }
        if let Some(value) = env_var("INSPECT_DELAY_MS") {
            config.inspect_delay_ms = parse_u64("INSPECT_DELAY_MS", &value)?;
        }
        if let Some(value) = env_var("PLAYWRIGHT_STORAGE_STATE") {
            config.app_state_path = PathBuf::from(value);
        }
        if let Some(value) = env_var("PLAYWRIGHT_CDM_STATE") {
            config.cdm_state_path = PathBuf::from(value);
        }
        if let Some(value) = env_var("PHONE_SELECTOR") {
            config.phone_selector = Some(value);
        }
        if let Some(value) = env_var("OTP_CHECK_SELECTOR") {
            config.otp_check_selector = Some(value);
        }
        if let Some(value) = env_var("CAMERA_Y4M") {
            config.camera_y4m = Some(PathBuf::from(value));
        }
        if let Some(value) = env_var("NUM_USERS") {
            config.num_users = parse_u64("NUM_USERS", &value)?.clamp(1, u32::MAX as u64) as u32;
        }
        if let Some(value) = env_var("VERIFY_USER_IDS") {
            config.verify_user_ids = parse_list(&value);
        }
        if let Some(value) = env_var("HARNESS_VERBOSE") {
            let parsed = parse_u8("HARNESS_VERBOSE", &value)?;
            config.verbose = Verbosity::from_u8(parsed).ok_or_else(|| {
                HarnessConfigError::invalid_enum("HARNESS_VERBOSE", parsed.to_string())
            })?;
        }
        if let Some(value) = env_var("MEDIA_DIR") {
            config.media_dir = PathBuf::from(value);
        }
        if let Some(value) = env_var("SIGNUP_DONE_PATTERN") {
            config.signup_done_pattern = parse_pattern("SIGNUP_DONE_PATTERN", value)?;
        }
        if let Some(value) = env_var("HOME_SCREEN_PATTERN") {
            config.home_screen_pattern = parse_pattern("HOME_SCREEN_PATTERN", value)?;
        }

        Ok(config)
    }

    /// Django admin users list, defaulting to `<cdm>/users/user/`.
    pub fn admin_users_url(&self) -> String {
        match &self.admin_users_url {
            Some(url) => url.clone(),
            None => format!("{}/users/user/", self.cdm_url.trim_end_matches('/')),
        }
    }

    /// Admin OTP list, newest first.
    ///
    /// Derived from the users list by swapping `/users/user/` for
    /// `/users/otp/` and appending `?o=-5` when no query is present.
    pub fn otp_list_url(&self) -> String {
        if let Some(url) = &self.otp_list_url {
            return url.clone();
        }
        let users = self.admin_users_url();
        let base = if users.contains("/users/user/") {
            users.replacen("/users/user/", "/users/otp/", 1)
        } else {
            format!("{}/users/otp/", users.trim_end_matches('/'))
        };
        if base.contains('?') {
            base
        } else {
            format!("{base}?o=-5")
        }
    }

    /// Create a new configuration with explicit field overrides applied.
    pub fn with_overrides(&self, overrides: HarnessConfigOverrides) -> HarnessConfig {
        let mut next = self.clone();

        if let Some(value) = overrides.app_url {
            next.app_url = value;
        }
        if let Some(value) = overrides.cdm_url {
            next.cdm_url = value;
        }
        if let Some(value) = overrides.headless {
            next.headless = value;
        }
        if let Some(value) = overrides.chrome_executable {
            next.chrome_executable = value;
        }
        if let Some(value) = overrides.default_phone {
            next.default_phone = value;
        }
        if let Some(value) = overrides.default_pin {
            next.default_pin = value;
        }
        if let Some(value) = overrides.num_users {
            next.num_users = value.max(1);
        }
        if let Some(value) = overrides.verify_user_ids {
            next.verify_user_ids = value;
        }
        if let Some(value) = overrides.media_dir {
            next.media_dir = value;
        }
        if let Some(value) = overrides.logger {
            next.logger = value;
        }
        if let Some(value) = overrides.verbose {
            next.verbose = value;
        }

        next
    }
}

/// Field-level overrides for [`HarnessConfig::with_overrides`].
#[derive(Default, Clone)]
pub struct HarnessConfigOverrides {
    pub app_url: Option<String>,
    pub cdm_url: Option<String>,
    pub headless: Option<bool>,
    pub chrome_executable: Option<Option<PathBuf>>,
    pub default_phone: Option<Option<String>>,
    pub default_pin: Option<String>,
    pub num_users: Option<u32>,
    pub verify_user_ids: Option<Vec<String>>,
    pub media_dir: Option<PathBuf>,
    pub logger: Option<Option<LoggerCallback>>,
    pub verbose: Option<Verbosity>,
}

impl HarnessConfigOverrides {
    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = Some(headless);
        self
    }

    pub fn verbose(mut self, verbose: Verbosity) -> Self {
        self.verbose = Some(verbose);
        self
    }
}

impl fmt::Debug for HarnessConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HarnessConfig")
            .field("app_url", &self.app_url)
            .field("cdm_url", &self.cdm_url)
            .field("admin_users_url", &self.admin_users_url)
            .field("otp_list_url", &self.otp_list_url)
            .field("headless", &self.headless)
            .field("chrome_executable", &self.chrome_executable)
            .field("default_phone", &self.default_phone)
            .field("id_type", &self.id_type)
            .field("employed", &self.employed)
            .field("income_band", &self.income_band)
            .field("tax_region", &self.tax_region)
            .field("debt_review", &self.debt_review)
            .field("race_option", &self.race_option)
            .field("click_timeout_ms", &self.click_timeout_ms)
            .field("wait_timeout_ms", &self.wait_timeout_ms)
            .field("otp_admin_timeout_ms", &self.otp_admin_timeout_ms)
            .field("app_state_path", &self.app_state_path)
            .field("cdm_state_path", &self.cdm_state_path)
            .field("phone_selector", &self.phone_selector)
            .field("camera_y4m", &self.camera_y4m)
            .field("num_users", &self.num_users)
            .field("verify_user_ids", &self.verify_user_ids)
            .field("media_dir", &self.media_dir)
            .field("verbose", &self.verbose)
            .field("logger_present", &self.logger.is_some())
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for HarnessConfigOverrides {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HarnessConfigOverrides")
            .field("app_url", &self.app_url)
            .field("cdm_url", &self.cdm_url)
            .field("headless", &self.headless)
            .field("default_phone", &self.default_phone)
            .field("num_users", &self.num_users)
            .field("logger", &self.logger.as_ref().map(|inner| inner.is_some()))
            .field("verbose", &self.verbose)
            .finish_non_exhaustive()
    }
}

/// Errors that can arise while constructing a [`HarnessConfig`].
#[derive(Debug, Error)]
pub enum HarnessConfigError {
    #[error("invalid value '{value}' for {field}")]
    InvalidEnumVariant { field: &'static str, value: String },
    #[error("invalid boolean '{value}' for {field}")]
    InvalidBool { field: &'static str, value: String },
    #[error("invalid number '{value}' for {field}: {source}")]
    InvalidNumber {
        field: &'static str,
        value: String,
        #[source]
        source: ParseIntError,
    },
    #[error("{field} must contain digits only, got '{value}'")]
    InvalidDigits { field: &'static str, value: String },
    #[error("invalid pattern for {field}: {source}")]
    InvalidPattern {
        field: &'static str,
        #[source]
        source: regex::Error,
    },
}

impl HarnessConfigError {
    fn invalid_enum(field: &'static str, value: String) -> Self {
        HarnessConfigError::InvalidEnumVariant { field, value }
    }
}

fn env_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_bool(field: &'static str, value: &str) -> Result<bool, HarnessConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(HarnessConfigError::InvalidBool {
            field,
            value: value.to_string(),
        }),
    }
}

fn parse_u8(field: &'static str, value: &str) -> Result<u8, HarnessConfigError> {
    value
        .trim()
        .parse::<u8>()
        .map_err(|source| HarnessConfigError::InvalidNumber {
            field,
            value: value.to_string(),
            source,
        })
}

fn parse_u64(field: &'static str, value: &str) -> Result<u64, HarnessConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|source| HarnessConfigError::InvalidNumber {
            field,
            value: value.to_string(),
            source,
        })
}

fn parse_digits(field: &'static str, value: &str) -> Result<String, HarnessConfigError> {
    let trimmed = value.trim();
    if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit()) {
        Ok(trimmed.to_string())
    } else {
        Err(HarnessConfigError::InvalidDigits {
            field,
            value: value.to_string(),
        })
    }
}

fn parse_pattern(field: &'static str, value: String) -> Result<String, HarnessConfigError> {
    regex::Regex::new(&value).map_err(|source| HarnessConfigError::InvalidPattern { field, source })?;
    Ok(value)
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
