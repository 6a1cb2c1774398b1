//! Configuration for feedcheck
//!
//! Reads configuration from:
//! - an explicit `--config` path
//! - `.feedcheckrc.yaml` / `.feedcheckrc.yml` / `.feedcheckrc.json` (project-level)
//! - the same names in the home directory (user-level)

use crate::analysis::AnalyzeOptions;
use crate::detector::ScoreWeights;
use crate::emit::{Channel, Target, DEFAULT_CHANNEL_LINK};
use crate::fixer::{CanonicalField, DuplicatePolicy, FixOptions};
use crate::registry::SpecRegistry;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Check files in parallel
    pub parallel: bool,

    /// Number of parallel jobs (0 = auto-detect)
    pub jobs: usize,

    /// Analyze only the first N items of each feed
    pub max_items: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            jobs: 0,
            max_items: None,
        }
    }
}

/// Price grammar overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceConfig {
    /// Replaces every spec's `max_decimals`
    pub max_decimals: Option<u8>,
}

/// Extra spec definition files
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpecsConfig {
    pub files: Vec<PathBuf>,
}

/// Fixer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FixerConfig {
    pub default_currency: String,
    pub shop_title: String,
    pub channel_link: String,
    pub target: Target,
    pub duplicates: DuplicatePolicy,
    pub synthesize_ids: bool,

    /// Source tag -> canonical field
    pub tag_map: BTreeMap<String, CanonicalField>,
}

impl Default for FixerConfig {
    fn default() -> Self {
        Self {
            default_currency: "EUR".to_string(),
            shop_title: "My Shop".to_string(),
            channel_link: DEFAULT_CHANNEL_LINK.to_string(),
            target: Target::Google,
            duplicates: DuplicatePolicy::KeepFirst,
            synthesize_ids: true,
            tag_map: BTreeMap::new(),
        }
    }
}

/// Output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Output format
    pub format: OutputFormat,

    /// Color mode
    pub color: ColorMode,

    /// Verbose output
    pub verbose: bool,

    /// Rows shown per issue table
    pub show_limit: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Text,
            color: ColorMode::Auto,
            verbose: false,
            show_limit: 20,
        }
    }
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

/// Color mode options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    #[default]
    Auto,
    Always,
    Never,
}

impl std::str::FromStr for ColorMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(ColorMode::Auto),
            "always" => Ok(ColorMode::Always),
            "never" => Ok(ColorMode::Never),
            _ => Err(format!("Unknown color mode: {}", s)),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Engine settings
    pub engine: EngineConfig,

    /// Closest-match scoring constants
    pub detection: ScoreWeights,

    pub price: PriceConfig,

    pub specs: SpecsConfig,

    pub fixer: FixerConfig,

    /// Output settings
    pub output: OutputConfig,
}

impl Config {
    /// Create default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let mut config: Self = match ext {
            "yaml" | "yml" => serde_yaml::from_str(&content)?,
            "json" => serde_json::from_str(&content)?,
            _ => {
                return Err(ConfigError::Invalid(format!(
                    "Unknown config file format: {}",
                    ext
                )))
            }
        };

        // Spec files are relative to the config file
        let base_dir = path.parent().unwrap_or(Path::new("."));
        for file in &mut config.specs.files {
            if file.is_relative() {
                *file = base_dir.join(&*file);
            }
        }

        config.validate()?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load configuration from default locations
    pub fn load_default() -> Result<Self, ConfigError> {
        let config_names = [".feedcheckrc.yaml", ".feedcheckrc.yml", ".feedcheckrc.json"];

        // Check current directory
        for name in &config_names {
            let path = PathBuf::from(name);
            if path.exists() {
                return Self::load(&path);
            }
        }

        // Check home directory
        if let Some(home) = dirs::home_dir() {
            for name in &config_names {
                let path = home.join(name);
                if path.exists() {
                    return Self::load(&path);
                }
            }
        }

        // Return default config
        Ok(Self::default())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let weights = &self.detection;
        let all = [
            weights.tag_similarity,
            weights.required_coverage,
            weights.field_rate,
            weights.availability_rate,
            weights.root_bonus,
            weights.namespace_bonus,
            weights.damping,
        ];
        if all.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(ConfigError::Invalid(
                "detection weights must be finite and non-negative".to_string(),
            ));
        }
        if self.fixer.default_currency.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "fixer.default_currency must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Merge CLI arguments into configuration
    pub fn merge_cli(
        &mut self,
        format: Option<OutputFormat>,
        verbose: Option<bool>,
        jobs: Option<usize>,
        max_items: Option<usize>,
        color: Option<ColorMode>,
    ) {
        if let Some(f) = format {
            self.output.format = f;
        }
        if let Some(v) = verbose {
            self.output.verbose = v;
        }
        if let Some(j) = jobs {
            self.engine.jobs = j;
        }
        if max_items.is_some() {
            self.engine.max_items = max_items;
        }
        if let Some(c) = color {
            self.output.color = c;
        }
    }

    /// Built-in specs plus the configured extension files
    pub fn registry(&self) -> Result<SpecRegistry, ConfigError> {
        let mut registry = SpecRegistry::builtin();
        for file in &self.specs.files {
            registry.load_file(file)?;
        }
        Ok(registry)
    }

    pub fn analyze_options(&self) -> AnalyzeOptions {
        AnalyzeOptions {
            max_items: self.engine.max_items,
            spec: None,
            weights: self.detection.clone(),
            max_decimals: self.price.max_decimals,
        }
    }

    pub fn fix_options(&self) -> FixOptions {
        FixOptions {
            default_currency: self.fixer.default_currency.clone(),
            tag_map: self
                .fixer
                .tag_map
                .iter()
                .map(|(tag, field)| (tag.trim().to_lowercase(), *field))
                .collect(),
            duplicates: self.fixer.duplicates,
            synthesize_ids: self.fixer.synthesize_ids,
            weights: self.detection.clone(),
        }
    }

    pub fn channel(&self) -> Channel {
        Channel::new(&self.fixer.shop_title).with_link(&self.fixer.channel_link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    #[test]
    fn test_default_config() {
        let config = Config::new();
        assert!(config.engine.parallel);
        assert_eq!(config.engine.jobs, 0);
        assert_eq!(config.engine.max_items, None);
        assert_eq!(config.output.format, OutputFormat::Text);
        assert_eq!(config.fixer.default_currency, "EUR");
        assert_eq!(config.detection, ScoreWeights::default());
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("text".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert!("sarif".parse::<OutputFormat>().is_err());
        assert_eq!("never".parse::<ColorMode>().unwrap(), ColorMode::Never);
    }

    #[test]
    fn test_config_merge_cli() {
        let mut config = Config::new();
        config.merge_cli(Some(OutputFormat::Json), Some(true), Some(4), Some(10), None);

        assert_eq!(config.output.format, OutputFormat::Json);
        assert!(config.output.verbose);
        assert_eq!(config.engine.jobs, 4);
        assert_eq!(config.engine.max_items, Some(10));
        assert_eq!(config.output.color, ColorMode::Auto);
    }

    #[test]
    fn test_yaml_deserialize() {
        let yaml = r#"
engine:
  parallel: false
  max_items: 100
detection:
  damping: 0.25
  hints: 3
price:
  max_decimals: 3
fixer:
  default_currency: CZK
  target: heureka
  duplicates: keep-all
  tag_map:
    Pic: image_link
output:
  format: json
  show_limit: 5
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(!config.engine.parallel);
        assert_eq!(config.engine.max_items, Some(100));
        assert_eq!(config.detection.damping, 0.25);
        assert_eq!(config.detection.hints, 3);
        assert_eq!(config.detection.tag_similarity, 0.35);
        assert_eq!(config.fixer.target, Target::Heureka);
        assert_eq!(config.fixer.duplicates, DuplicatePolicy::KeepAll);
        assert_eq!(config.output.show_limit, 5);

        let options = config.fix_options();
        assert_eq!(options.default_currency, "CZK");
        assert_eq!(options.tag_map.get("pic"), Some(&CanonicalField::ImageLink));
        assert_eq!(config.analyze_options().max_decimals, Some(3));
    }

    #[test]
    fn test_load_resolves_spec_files() {
        let dir = tempfile::tempdir().unwrap();
        let spec_path = dir.path().join("extra.yaml");
        std::fs::write(
            &spec_path,
            r#"
specs:
  - name: Shop Export
    priority: 90
    item_paths: [".//offer"]
    id_paths: ["./sku"]
    detection:
      item_tag: offer
"#,
        )
        .unwrap();
        let config_path = dir.path().join(".feedcheckrc.yaml");
        std::fs::write(&config_path, "specs:\n  files: [extra.yaml]\n").unwrap();

        let config = Config::load(&config_path).unwrap();
        assert_eq!(config.specs.files, vec![spec_path]);
        let registry = config.registry().unwrap();
        assert!(registry.get("Shop Export").is_some());
    }

    #[test]
    fn test_invalid_config() {
        let mut file = Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "detection:\n  damping: -1.0").unwrap();
        assert!(matches!(
            Config::load(file.path()),
            Err(ConfigError::Invalid(_))
        ));

        let mut file = Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[engine]").unwrap();
        assert!(matches!(
            Config::load(file.path()),
            Err(ConfigError::Invalid(_))
        ));
    }
}
