//! Schema-driven type checking for the raw configuration bag.
//!
//! Each recognized field carries a small type descriptor in the same notation the
//! configuration documentation uses: a base type (`string`, `int`, `bool`,
//! `float`, `array`, `object`, `mixed`), an optional trailing `?` for nullable,
//! and `|` between union branches (`string|int`, `string?`).

use once_cell::sync::Lazy;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    String,
    Int,
    Bool,
    Float,
    Array,
    Object,
    Mixed,
}

impl ValueKind {
    fn parse(name: &str) -> Option<Self> {
        match name.trim() {
            "string" => Some(Self::String),
            "int" => Some(Self::Int),
            "bool" => Some(Self::Bool),
            "float" => Some(Self::Float),
            "array" => Some(Self::Array),
            "object" => Some(Self::Object),
            "mixed" => Some(Self::Mixed),
            _ => None,
        }
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Int => value.is_i64() || value.is_u64(),
            Self::Bool => value.is_boolean(),
            Self::Float => value.is_f64(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::Mixed => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeBranch {
    pub kind: Option<ValueKind>,
    pub nullable: bool,
}

/// A parsed descriptor such as `string?` or `string|int`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    branches: Vec<TypeBranch>,
}

impl TypeDescriptor {
    /// Unknown base type names produce a branch that never matches a value, but
    /// still honours its `?` marker.
    pub fn parse(descriptor: &str) -> Self {
        let branches = descriptor
            .split('|')
            .map(|raw| {
                let raw = raw.trim();
                let (name, nullable) = match raw.strip_suffix('?') {
                    Some(name) => (name, true),
                    None => (raw, false),
                };
                TypeBranch {
                    kind: ValueKind::parse(name),
                    nullable,
                }
            })
            .collect();

        Self { branches }
    }

    pub fn accepts(&self, value: &Value) -> bool {
        self.branches.iter().any(|branch| {
            if branch.nullable && value.is_null() {
                return true;
            }
            branch.kind.map(|kind| kind.matches(value)).unwrap_or(false)
        })
    }
}

/// Every configuration key the backup understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    TargetDirectory,
    SaveLocation,
    CustomName,
    Replace,
    UseCompression,
    IncludeDotFile,
    ExcludeDir,
    ExcludeExtensions,
    IncludeExtensions,
    BeforeDate,
    AfterDate,
    MemoryCap,
    AutoStart,
    LogDirectory,
}

pub struct FieldSpec {
    pub field: Field,
    pub key: &'static str,
    pub expected: &'static str,
    pub descriptor: TypeDescriptor,
}

const RAW_SCHEMA: &[(Field, &str, &str)] = &[
    (Field::TargetDirectory, "backupTargetdirectory", "string"),
    (Field::SaveLocation, "zipSaveLocation", "string"),
    (Field::CustomName, "customZipName", "string?"),
    (Field::Replace, "replace", "bool"),
    (Field::UseCompression, "useCompression", "bool"),
    (Field::IncludeDotFile, "includeDotFile", "bool"),
    (Field::ExcludeDir, "excludeDir", "array"),
    (Field::ExcludeExtensions, "excludeExtensions", "array"),
    (Field::IncludeExtensions, "includeExtensions", "array"),
    (Field::BeforeDate, "beforeDate", "string"),
    (Field::AfterDate, "afterDate", "string"),
    (Field::MemoryCap, "memoryCap", "string|int"),
    (Field::AutoStart, "autoStart", "bool"),
    (Field::LogDirectory, "logDirectory", "string?"),
];

static SCHEMA: Lazy<Vec<FieldSpec>> = Lazy::new(|| {
    RAW_SCHEMA
        .iter()
        .map(|&(field, key, descriptor)| FieldSpec {
            field,
            key,
            expected: descriptor,
            descriptor: TypeDescriptor::parse(descriptor),
        })
        .collect()
});

pub fn schema() -> &'static [FieldSpec] {
    &SCHEMA
}

/// Look up a key. Matching ignores ASCII case because file and environment
/// loaders may fold keys to lowercase.
pub fn lookup(key: &str) -> Option<&'static FieldSpec> {
    schema().iter().find(|spec| spec.key.eq_ignore_ascii_case(key))
}

/// Render a rejected value for a warning line without dumping huge payloads.
pub fn describe(value: &Value) -> String {
    let rendered = value.to_string();
    if rendered.chars().count() > 64 {
        let head: String = rendered.chars().take(61).collect();
        format!("{}...", head)
    } else {
        rendered
    }
}
