use chrono::Datelike;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const IRS_SCHEMA_BASE_URL: &str = "https://www.irs.gov/pub/irs-schema";
pub const CONFIG_PATH_ENV: &str = "MEF_CONFIG";

/// MeF schema packages are published under the year after the tax year.
pub fn zip_name_for_year(tax_year: i32) -> String {
    format!("py{}r1.zip", tax_year + 1)
}

pub fn default_tax_year() -> i32 {
    chrono::Utc::now().year() - 1
}

fn default_schema_base_url() -> String {
    IRS_SCHEMA_BASE_URL.to_string()
}

fn default_file_prefix() -> String {
    "IRS".to_string()
}

fn default_file_extension() -> String {
    ".xsl".to_string()
}

fn default_excluded_suffix() -> String {
    "Style.xsl".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractConfig {
    #[serde(default = "default_tax_year")]
    pub tax_year: i32,
    #[serde(default)]
    pub fallback_year: Option<i32>,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default = "default_schema_base_url")]
    pub schema_base_url: String,
    #[serde(default)]
    pub zip_name: Option<String>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
    #[serde(default = "default_file_extension")]
    pub file_extension: String,
    #[serde(default = "default_excluded_suffix")]
    pub excluded_suffix: String,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            tax_year: default_tax_year(),
            fallback_year: None,
            output_dir: None,
            schema_base_url: default_schema_base_url(),
            zip_name: None,
            workers: None,
            file_prefix: default_file_prefix(),
            file_extension: default_file_extension(),
            excluded_suffix: default_excluded_suffix(),
        }
    }
}

impl ExtractConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config {}: {e}", path.display()))?;
        serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse config {}: {e}", path.display()))
    }

    /// Reads the file named by `MEF_CONFIG` when set, otherwise the built-in defaults.
    pub fn load_default() -> Result<Self, String> {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::load_from_file(path),
            _ => Ok(Self::default()),
        }
    }

    pub fn resolved_zip_name(&self) -> String {
        self.zip_name
            .clone()
            .unwrap_or_else(|| zip_name_for_year(self.tax_year))
    }

    pub fn download_url(&self) -> String {
        format!(
            "{}/{}",
            self.schema_base_url.trim_end_matches('/'),
            self.resolved_zip_name()
        )
    }

    pub fn resolved_output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("data").join(self.tax_year.to_string()))
    }

    pub fn pipeline_config(&self, root_dir: &Path) -> PipelineConfig {
        PipelineConfig {
            root_dir: root_dir.to_path_buf(),
            target_year: self.tax_year,
            fallback_year: self.fallback_year.unwrap_or(self.tax_year),
            output_dir: self.resolved_output_dir(),
            workers: self.workers.unwrap_or_else(default_workers).max(1),
            file_prefix: self.file_prefix.clone(),
            file_extension: self.file_extension.clone(),
            excluded_suffix: self.excluded_suffix.clone(),
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Everything one pipeline run needs; nothing is read from process-wide state.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub root_dir: PathBuf,
    pub target_year: i32,
    pub fallback_year: i32,
    pub output_dir: PathBuf,
    pub workers: usize,
    pub file_prefix: String,
    pub file_extension: String,
    pub excluded_suffix: String,
}

impl PipelineConfig {
    pub fn new(
        root_dir: impl Into<PathBuf>,
        target_year: i32,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            root_dir: root_dir.into(),
            target_year,
            fallback_year: target_year,
            output_dir: output_dir.into(),
            workers: default_workers(),
            file_prefix: default_file_prefix(),
            file_extension: default_file_extension(),
            excluded_suffix: default_excluded_suffix(),
        }
    }

    pub fn is_form_file_name(&self, file_name: &str) -> bool {
        file_name.starts_with(&self.file_prefix)
            && file_name.ends_with(&self.file_extension)
            && !file_name.ends_with(&self.excluded_suffix)
    }
}
