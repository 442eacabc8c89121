use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_TREE_PRELOAD_DEPTH: u32 = 1;
const DEFAULT_SUGGESTION_DEBOUNCE_MS: u64 = 200;
const DEFAULT_MIN_TOKEN_CHARS: usize = 2;

/// Which selection is dropped when a capped dimension is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Drop the first (oldest) selection.
    #[default]
    Oldest,
    /// Drop the last appended selection.
    #[value(alias = "most_recent")]
    #[serde(alias = "most-recent")]
    MostRecent,
}

impl std::fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvictionPolicy::Oldest => write!(f, "oldest"),
            EvictionPolicy::MostRecent => write!(f, "most_recent"),
        }
    }
}

/// Options recognized by a tagging session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggerConfig {
    pub leaf_only: bool,
    /// 0 means unbounded.
    pub maximum_selection_size: usize,
    pub eviction: EvictionPolicy,
    pub auto_completion: bool,
    pub annotation: bool,
    pub tree_preload_depth: u32,
    /// Dimensions shared with content categorization; realigned with the host
    /// on every write.
    pub extra_dimensions: Vec<String>,
    /// Dimension names eligible for lookup candidates.
    pub lookup_fields: Vec<String>,
    /// Dimension ids disallowing free-text entry.
    pub exclude: Vec<String>,
    pub editable: bool,
    /// Taxonomies to load; falls back to the host document's list.
    pub taxonomy_ids: Option<Vec<String>>,
    /// Host text sources joined for annotation, in order.
    pub texts_to_annotate: Vec<String>,
    /// When set, only these dimension ids are required.
    pub dimensions: Option<Vec<String>>,
    pub suggestion_debounce: Duration,
    pub min_token_chars: usize,
    /// Identifier stamped on host change notifications. Generated when unset.
    pub modifier_id: Option<String>,
}

impl Default for TaggerConfig {
    fn default() -> Self {
        Self {
            leaf_only: false,
            maximum_selection_size: 0,
            eviction: EvictionPolicy::default(),
            auto_completion: true,
            annotation: false,
            tree_preload_depth: DEFAULT_TREE_PRELOAD_DEPTH,
            extra_dimensions: Vec::new(),
            lookup_fields: Vec::new(),
            exclude: Vec::new(),
            editable: true,
            taxonomy_ids: None,
            texts_to_annotate: Vec::new(),
            dimensions: None,
            suggestion_debounce: Duration::from_millis(DEFAULT_SUGGESTION_DEBOUNCE_MS),
            min_token_chars: DEFAULT_MIN_TOKEN_CHARS,
            modifier_id: None,
        }
    }
}

impl TaggerConfig {
    pub fn from_args(args: &CliArgs) -> Result<Self> {
        let file_config = match args.config.as_ref() {
            Some(path) => load_config_file(path)?,
            None => PartialConfig::default(),
        };
        let config = Self::from_partial(file_config).merge_cli(args);
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let config = Self::from_partial(load_config_file(path)?);
        config.validate()?;
        Ok(config)
    }

    fn from_partial(partial: PartialConfig) -> Self {
        let PartialConfig {
            leaf_only,
            maximum_selection_size,
            eviction,
            auto_completion,
            annotation,
            tree_preload_depth,
            extra_dimensions,
            lookup_fields,
            exclude,
            editable,
            taxonomy_ids,
            texts_to_annotate,
            dimensions,
            suggestion_debounce_ms,
            modifier_id,
        } = partial;

        let defaults = Self::default();

        Self {
            leaf_only: leaf_only.unwrap_or(defaults.leaf_only),
            maximum_selection_size: maximum_selection_size
                .unwrap_or(defaults.maximum_selection_size),
            eviction: eviction.unwrap_or(defaults.eviction),
            auto_completion: auto_completion.unwrap_or(defaults.auto_completion),
            annotation: annotation.unwrap_or(defaults.annotation),
            tree_preload_depth: tree_preload_depth.unwrap_or(defaults.tree_preload_depth),
            extra_dimensions: normalize_ids(extra_dimensions.unwrap_or_default()),
            lookup_fields: normalize_ids(lookup_fields.unwrap_or_default()),
            exclude: normalize_ids(exclude.unwrap_or_default()),
            editable: editable.unwrap_or(defaults.editable),
            taxonomy_ids: taxonomy_ids.map(normalize_ids).filter(|ids| !ids.is_empty()),
            texts_to_annotate: texts_to_annotate.unwrap_or_default(),
            dimensions: dimensions.map(normalize_ids),
            suggestion_debounce: suggestion_debounce_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.suggestion_debounce),
            min_token_chars: defaults.min_token_chars,
            modifier_id: modifier_id.filter(|id| !id.trim().is_empty()),
        }
    }

    fn merge_cli(mut self, args: &CliArgs) -> Self {
        if args.leaf_only {
            self.leaf_only = true;
        }
        if let Some(size) = args.maximum_selection_size {
            self.maximum_selection_size = size;
        }
        if let Some(eviction) = args.eviction {
            self.eviction = eviction;
        }
        if args.annotate {
            self.annotation = true;
        }
        if let Some(depth) = args.tree_preload_depth {
            self.tree_preload_depth = depth;
        }
        if let Some(ids) = args.taxonomy_ids.as_ref() {
            let ids = normalize_ids(ids.clone());
            if !ids.is_empty() {
                self.taxonomy_ids = Some(ids);
            }
        }
        if let Some(id) = args.modifier_id.as_ref() {
            self.modifier_id = Some(id.clone());
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.min_token_chars > 0,
            "minimum search token length must be positive"
        );
        if let Some(ids) = self.taxonomy_ids.as_ref() {
            anyhow::ensure!(
                ids.iter().all(|id| !id.is_empty()),
                "taxonomy ids must not be empty"
            );
        }
        Ok(())
    }

    pub fn is_lookup_field(&self, dimension_name: &str) -> bool {
        self.lookup_fields.iter().any(|field| field == dimension_name)
    }

    pub fn is_excluded(&self, dimension_id: &str) -> bool {
        self.exclude.iter().any(|id| id == dimension_id)
    }

    pub fn is_extra_dimension(&self, dimension_id: &str) -> bool {
        self.extra_dimensions.iter().any(|id| id == dimension_id)
    }
}

fn normalize_ids(ids: Vec<String>) -> Vec<String> {
    let mut seen = indexmap::IndexSet::new();
    for id in ids {
        let id = id.trim().to_string();
        if !id.is_empty() {
            seen.insert(id);
        }
    }
    seen.into_iter().collect()
}

#[derive(Parser, Debug, Default, Clone)]
#[command(
    name = "taxonomy-tagger",
    about = "Synchronize taxonomy tags against a host document",
    version
)]
pub struct CliArgs {
    #[arg(
        long,
        value_name = "FILE",
        help = "Path to a tagger configuration file (YAML or JSON)"
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        env = "TAGGER_CATALOG",
        value_name = "FILE",
        help = "Taxonomy catalog backing the providers (YAML or JSON)"
    )]
    pub catalog: PathBuf,

    #[arg(
        long,
        env = "TAGGER_DOCUMENT",
        value_name = "FILE",
        help = "Host document metadata (JSON)"
    )]
    pub document: PathBuf,

    #[arg(long, help = "Write the synchronized metadata back to the document file")]
    pub write: bool,

    #[arg(long, env = "TAGGER_LEAF_ONLY", help = "Only allow selecting leaf entities")]
    pub leaf_only: bool,

    #[arg(
        long,
        env = "TAGGER_MAXIMUM_SELECTION_SIZE",
        value_name = "N",
        help = "Maximum selections per tree dimension (0 = unbounded)"
    )]
    pub maximum_selection_size: Option<usize>,

    #[arg(long, value_enum, value_name = "POLICY", help = "Selection eviction policy")]
    pub eviction: Option<EvictionPolicy>,

    #[arg(long, env = "TAGGER_ANNOTATE", help = "Run annotation after initialization")]
    pub annotate: bool,

    #[arg(
        long,
        env = "TAGGER_TREE_PRELOAD_DEPTH",
        value_name = "DEPTH",
        help = "Depth preloaded for each dimension tree"
    )]
    pub tree_preload_depth: Option<u32>,

    #[arg(
        long,
        env = "TAGGER_TAXONOMY_IDS",
        value_name = "ID",
        value_delimiter = ',',
        help = "Comma-separated taxonomy ids overriding the document's list"
    )]
    pub taxonomy_ids: Option<Vec<String>>,

    #[arg(
        long,
        env = "TAGGER_MODIFIER_ID",
        value_name = "ID",
        help = "Modifier id used for change notifications"
    )]
    pub modifier_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartialConfig {
    leaf_only: Option<bool>,
    maximum_selection_size: Option<usize>,
    eviction: Option<EvictionPolicy>,
    auto_completion: Option<bool>,
    annotation: Option<bool>,
    tree_preload_depth: Option<u32>,
    extra_dimensions: Option<Vec<String>>,
    lookup_fields: Option<Vec<String>>,
    exclude: Option<Vec<String>>,
    editable: Option<bool>,
    taxonomy_ids: Option<Vec<String>>,
    texts_to_annotate: Option<Vec<String>>,
    dimensions: Option<Vec<String>>,
    suggestion_debounce_ms: Option<u64>,
    modifier_id: Option<String>,
}

fn load_config_file(path: &Path) -> Result<PartialConfig> {
    if !path.exists() {
        anyhow::bail!("config file {:?} does not exist", path);
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {:?}", path))?;
    parse_by_extension(path, &contents)
}

/// Parse YAML or JSON content according to the file extension.
pub(crate) fn parse_by_extension<T: serde::de::DeserializeOwned>(
    path: &Path,
    contents: &str,
) -> Result<T> {
    let ext = path
        .extension()
        .and_then(|os| os.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let parsed = match ext.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(contents)
            .with_context(|| format!("failed to parse YAML {:?}", path))?,
        "json" => serde_json::from_str(contents)
            .with_context(|| format!("failed to parse JSON {:?}", path))?,
        other => anyhow::bail!("unsupported file extension: {other}"),
    };
    Ok(parsed)
}
