use super::params::{self, Field};
use crate::backup::{BackupError, ExtensionFilter};
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Validated backup settings. Built once from the raw parameter bag and not
/// changed afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct BackupConfig {
    /// Directory tree to archive
    pub target_dir: PathBuf,

    /// Where the zip lands (None = current directory)
    pub destination_dir: Option<PathBuf>,

    /// Optional custom archive name
    pub custom_name: Option<String>,

    /// Overwrite an archive of the same name instead of timestamping
    pub replace: bool,

    /// Deflate entries instead of storing them
    pub use_compression: bool,

    /// Keep files whose name starts with a dot
    pub include_dotfiles: bool,

    /// Substrings that exclude any path containing them (case sensitive)
    pub exclude_dirs: Vec<String>,

    /// Lowercase extensions to drop; "" means "no extension"
    pub exclude_extensions: BTreeSet<String>,

    /// Lowercase extensions to keep; "" means "no extension"
    pub include_extensions: BTreeSet<String>,

    /// Raw upper date bound
    pub before_date: String,

    /// Raw lower date bound
    pub after_date: String,

    /// Shorthand memory cap for the archive stage ("256M")
    pub memory_cap: Option<String>,

    /// Start the run as soon as the front end has a config
    pub auto_start: bool,

    /// Directory for the run log
    pub log_dir: Option<PathBuf>,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            target_dir: PathBuf::new(),
            destination_dir: None,
            custom_name: None,
            replace: false,
            use_compression: true,
            include_dotfiles: false,
            exclude_dirs: Vec::new(),
            exclude_extensions: BTreeSet::new(),
            include_extensions: BTreeSet::new(),
            before_date: String::new(),
            after_date: String::new(),
            memory_cap: None,
            auto_start: true,
            log_dir: None,
        }
    }
}

/// Result of validating a parameter bag: the config plus one warning per
/// rejected key.
#[derive(Debug, Clone)]
pub struct Validated {
    pub config: BackupConfig,
    pub warnings: Vec<String>,
}

impl BackupConfig {
    /// Reduced front end: just a target, a destination and a name, everything
    /// else at its default.
    pub fn simple(
        target: impl Into<PathBuf>,
        destination: Option<PathBuf>,
        custom_name: Option<String>,
    ) -> Self {
        Self {
            target_dir: target.into(),
            destination_dir: destination,
            custom_name: custom_name.filter(|n| !n.is_empty()),
            ..Self::default()
        }
    }

    /// Type-check every recognized key against the schema. Unknown keys are
    /// ignored; mistyped keys keep their default and produce a warning.
    pub fn from_params(raw: &Map<String, Value>) -> Validated {
        let mut config = Self::default();
        let mut warnings = Vec::new();

        for (key, value) in raw {
            let Some(spec) = params::lookup(key) else {
                debug!("Ignoring unrecognized parameter {}", key);
                continue;
            };

            let applied = spec.descriptor.accepts(value) && config.apply(spec.field, value);
            if !applied {
                let message = format!(
                    "Param {} = {} is not supported (expected {}).",
                    spec.key,
                    params::describe(value),
                    spec.expected
                );
                warn!("{}", message);
                warnings.push(message);
            }
        }

        Validated { config, warnings }
    }

    /// Store an already type-checked value. Returns false when the value's
    /// contents are unusable (e.g. a non-string inside a list).
    fn apply(&mut self, field: Field, value: &Value) -> bool {
        match field {
            Field::TargetDirectory => match value.as_str() {
                Some(s) => self.target_dir = PathBuf::from(s),
                None => return false,
            },
            Field::SaveLocation => match value.as_str() {
                Some(s) => self.destination_dir = non_empty(s).map(PathBuf::from),
                None => return false,
            },
            Field::CustomName => self.custom_name = value.as_str().and_then(non_empty),
            Field::Replace => match value.as_bool() {
                Some(b) => self.replace = b,
                None => return false,
            },
            Field::UseCompression => match value.as_bool() {
                Some(b) => self.use_compression = b,
                None => return false,
            },
            Field::IncludeDotFile => match value.as_bool() {
                Some(b) => self.include_dotfiles = b,
                None => return false,
            },
            Field::AutoStart => match value.as_bool() {
                Some(b) => self.auto_start = b,
                None => return false,
            },
            Field::ExcludeDir => match string_list(value) {
                Some(list) => self.exclude_dirs = list.into_iter().filter(|d| !d.is_empty()).collect(),
                None => return false,
            },
            Field::ExcludeExtensions => match string_list(value) {
                Some(list) => self.exclude_extensions = normalize_extensions(list),
                None => return false,
            },
            Field::IncludeExtensions => match string_list(value) {
                Some(list) => self.include_extensions = normalize_extensions(list),
                None => return false,
            },
            Field::BeforeDate => match value.as_str() {
                Some(s) => self.before_date = s.trim().to_string(),
                None => return false,
            },
            Field::AfterDate => match value.as_str() {
                Some(s) => self.after_date = s.trim().to_string(),
                None => return false,
            },
            Field::MemoryCap => {
                self.memory_cap = match value {
                    Value::String(s) => non_empty(s),
                    Value::Number(n) => n.as_u64().map(|b| b.to_string()),
                    _ => None,
                };
                if self.memory_cap.is_none() && !matches!(value, Value::String(_)) {
                    return false;
                }
            }
            Field::LogDirectory => {
                self.log_dir = value.as_str().and_then(non_empty).map(PathBuf::from)
            }
        }
        true
    }

    /// Whether a front end should start the run now. `start_override` is the
    /// raw value of a manual start request (`BACKUP_START`), which wins over
    /// a disabled `autoStart`.
    pub fn should_start(&self, start_override: Option<&str>) -> bool {
        let forced = start_override
            .map(str::trim)
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes"))
            .unwrap_or(false);
        self.auto_start || forced
    }

    /// Collapse the two extension sets into one filter. Both being set is a
    /// configuration error.
    pub fn extension_filter(&self) -> Result<ExtensionFilter, BackupError> {
        match (
            self.exclude_extensions.is_empty(),
            self.include_extensions.is_empty(),
        ) {
            (true, true) => Ok(ExtensionFilter::Any),
            (false, true) => Ok(ExtensionFilter::Exclude(self.exclude_extensions.clone())),
            (true, false) => Ok(ExtensionFilter::Include(self.include_extensions.clone())),
            (false, false) => Err(BackupError::ConflictingExtensionFilters {
                excluded: self.exclude_extensions.len(),
                included: self.include_extensions.len(),
            }),
        }
    }
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn string_list(value: &Value) -> Option<Vec<String>> {
    value
        .as_array()?
        .iter()
        .map(|item| item.as_str().map(str::to_string))
        .collect()
}

fn normalize_extensions(list: Vec<String>) -> BTreeSet<String> {
    list.into_iter()
        .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
        .collect()
}

/// Load the raw parameter bag: an optional config file overlaid with
/// `BACKUP_*` environment variables.
pub fn load_params(path: Option<&Path>) -> Result<Map<String, Value>> {
    let mut builder = config::Config::builder();

    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path.to_path_buf()).required(true));
    }

    builder = builder.add_source(config::Environment::with_prefix("BACKUP").try_parsing(true));

    let settings = builder
        .build()
        .with_context(|| "Failed to assemble backup configuration")?;

    let raw: HashMap<String, Value> = settings
        .try_deserialize()
        .with_context(|| "Backup configuration is not a key/value mapping")?;

    Ok(raw.into_iter().collect())
}
