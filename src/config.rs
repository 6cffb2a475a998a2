use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Deserialize;

use crate::error::ConfigError;

// ── Search parameter defaults ────────────────────────────────────────

fn default_prefetch_limit() -> usize {
    20
}

fn default_rerank_top_k() -> usize {
    10
}

fn default_default_limit() -> usize {
    5
}

fn default_dense_score_threshold() -> f32 {
    0.3
}

fn default_doc_subdirs() -> Vec<String> {
    vec!["apis".to_string(), "docs".to_string(), "demos".to_string()]
}

fn default_mime_type() -> String {
    "text/markdown".to_string()
}

/// Retrieval tuning, merged from the product descriptor over fixed defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchParams {
    #[serde(default = "default_prefetch_limit")]
    pub prefetch_limit: usize,
    #[serde(default = "default_rerank_top_k")]
    pub rerank_top_k: usize,
    #[serde(default = "default_default_limit")]
    pub default_limit: usize,
    #[serde(default = "default_dense_score_threshold")]
    pub dense_score_threshold: f32,
    /// Carried through configuration for forward compatibility; the vector
    /// store's hybrid query does not expose a per-prefetch threshold.
    #[serde(default)]
    pub sparse_score_threshold: Option<f32>,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            prefetch_limit: default_prefetch_limit(),
            rerank_top_k: default_rerank_top_k(),
            default_limit: default_default_limit(),
            dense_score_threshold: default_dense_score_threshold(),
            sparse_score_threshold: None,
        }
    }
}

/// Chunking strategy selector, one of three concrete implementations
/// sharing the splitting primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkerKind {
    #[default]
    Markdown,
    Typedoc,
    Javadoc,
}

/// A named resource returned verbatim by the `get_code_guidelines` tool and
/// exposed under a `guidelines://{key}` URI.
#[derive(Debug, Clone, Deserialize)]
pub struct Resource {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
    pub content: String,
}

// ── Descriptor files ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ProductFile {
    id: String,
    name: String,
    company: String,
    #[serde(default)]
    chunker: ChunkerKind,
    #[serde(default = "default_doc_subdirs")]
    doc_subdirs: Vec<String>,
    #[serde(default)]
    search: SearchParams,
    #[serde(default)]
    instructions: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VariantFile {
    lang: String,
    doc_language: String,
    #[serde(default)]
    collection: Option<String>,
    raw_data: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    resources: BTreeMap<String, Resource>,
}

/// Fully resolved configuration for one (product, language) pair.
#[derive(Debug, Clone)]
pub struct ProductConfig {
    pub id: String,
    pub name: String,
    pub company: String,
    /// First two letters of the company name, uppercased.
    pub company_short: String,
    pub chunker: ChunkerKind,
    pub doc_subdirs: Vec<String>,
    pub search: SearchParams,
    pub instructions: Option<String>,
    pub lang: String,
    pub doc_language: String,
    pub collection: String,
    pub raw_data: String,
    pub description: String,
    pub resources: BTreeMap<String, Resource>,
}

// ── Environment settings ─────────────────────────────────────────────

/// Process-wide settings read from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub products: Vec<String>,
    pub doc_lang: String,
    pub voyage_api_key: String,
    pub host: String,
    pub port: u16,
    pub qdrant_url: String,
    pub qdrant_api_key: Option<String>,
    pub voyage_embed_model: String,
    pub voyage_rerank_model: Option<String>,
    pub voyage_rpm_limit: u32,
    pub voyage_tpm_limit: u64,
    pub chunk_size: usize,
    pub min_chunk_size: usize,
    pub batch_size: usize,
    pub log_level: String,
    pub min_detect_len: usize,
    pub rrf_k: u32,
    pub products_dir: PathBuf,
    pub raw_data_dir: PathBuf,
    pub checkpoint_dir: PathBuf,
}

fn env_var(name: &'static str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::MissingEnv(name)),
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => v.trim().parse().map_err(|e| ConfigError::InvalidEnv {
            name,
            reason: format!("{e}"),
        }),
        _ => Ok(default),
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let products: Vec<String> = env_var("PRODUCT")?
            .split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        if products.is_empty() {
            return Err(ConfigError::InvalidEnv {
                name: "PRODUCT",
                reason: "expected a comma-separated list of product ids".to_string(),
            });
        }
        for p in &products {
            if !is_identifier(p) {
                return Err(ConfigError::InvalidEnv {
                    name: "PRODUCT",
                    reason: format!("product id `{p}` must match [a-z0-9_]+"),
                });
            }
        }

        let doc_lang = env_var("DOC_LANG")?;
        if !is_identifier(&doc_lang) {
            return Err(ConfigError::InvalidEnv {
                name: "DOC_LANG",
                reason: format!("language code `{doc_lang}` must match [a-z0-9_]+"),
            });
        }

        let rerank_model = env_or("VOYAGE_RERANK_MODEL", "rerank-2.5");

        Ok(Self {
            products,
            doc_lang,
            voyage_api_key: env_var("VOYAGE_API_KEY")?,
            host: env_or("HOST", "0.0.0.0"),
            port: env_parse("PORT", 8900)?,
            qdrant_url: env_or("QDRANT_URL", "http://localhost:6333"),
            qdrant_api_key: std::env::var("QDRANT_API_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            voyage_embed_model: env_or("VOYAGE_EMBED_MODEL", "voyage-code-3"),
            voyage_rerank_model: if rerank_model.eq_ignore_ascii_case("none") {
                None
            } else {
                Some(rerank_model)
            },
            voyage_rpm_limit: env_parse("VOYAGE_RPM_LIMIT", 2000)?,
            voyage_tpm_limit: env_parse("VOYAGE_TPM_LIMIT", 3_000_000)?,
            chunk_size: env_parse("CHUNK_SIZE", 3000)?,
            min_chunk_size: env_parse("MIN_CHUNK_SIZE", 100)?,
            batch_size: env_parse("BATCH_SIZE", 128)?,
            log_level: env_or("LOG_LEVEL", "info"),
            min_detect_len: env_parse("MIN_DETECT_LEN", 10)?,
            rrf_k: env_parse("RRF_K", 60)?,
            products_dir: PathBuf::from(env_or("PRODUCTS_DIR", "products")),
            raw_data_dir: PathBuf::from(env_or("RAW_DATA_DIR", "raw_data")),
            checkpoint_dir: PathBuf::from(env_or("CHECKPOINT_DIR", "checkpoints")),
        })
    }

    pub fn checkpoint_path(&self, product: &str) -> PathBuf {
        self.checkpoint_dir.join(format!("checkpoint-{product}.json"))
    }
}

/// Lowercase identifier alphabet shared by product ids, language codes,
/// and collection names.
pub fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

// ── Resolver ─────────────────────────────────────────────────────────

/// Loads and validates product descriptors, caching the result per
/// `(product, lang)`. The cache is a read-side optimization only: entries
/// are written once and never invalidated.
pub struct ConfigResolver {
    products_dir: PathBuf,
    cache: Mutex<HashMap<(String, String), Arc<ProductConfig>>>,
}

impl ConfigResolver {
    pub fn new(products_dir: impl Into<PathBuf>) -> Self {
        Self {
            products_dir: products_dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn resolve(&self, product: &str, lang: &str) -> Result<Arc<ProductConfig>, ConfigError> {
        let key = (product.to_string(), lang.to_string());
        if let Some(hit) = self.cache.lock().unwrap().get(&key) {
            return Ok(hit.clone());
        }

        let resolved = Arc::new(self.load(product, lang)?);
        self.cache
            .lock()
            .unwrap()
            .entry(key)
            .or_insert_with(|| resolved.clone());
        Ok(resolved)
    }

    fn load(&self, product: &str, lang: &str) -> Result<ProductConfig, ConfigError> {
        let product_path = self.products_dir.join(product).join("product.yaml");
        let variant_path = self.products_dir.join(product).join(format!("{lang}.yaml"));

        let product_file: ProductFile = read_yaml(&product_path)?;
        let variant_file: VariantFile = read_yaml(&variant_path)?;

        validate_product(&product_path, product, &product_file)?;
        validate_variant(&variant_path, lang, &variant_file)?;

        let collection = variant_file
            .collection
            .unwrap_or_else(|| format!("{}_{}", product_file.id, variant_file.lang));
        if !is_identifier(&collection) {
            return Err(ConfigError::InvalidField {
                path: variant_path,
                field: "collection".to_string(),
                reason: format!("`{collection}` must match [a-z0-9_]+"),
            });
        }

        let company_short: String = product_file
            .company
            .chars()
            .take(2)
            .collect::<String>()
            .to_uppercase();

        Ok(ProductConfig {
            id: product_file.id,
            name: product_file.name,
            company: product_file.company,
            company_short,
            chunker: product_file.chunker,
            doc_subdirs: product_file.doc_subdirs,
            search: product_file.search,
            instructions: product_file.instructions,
            lang: variant_file.lang,
            doc_language: variant_file.doc_language,
            collection,
            raw_data: variant_file.raw_data,
            description: variant_file.description,
            resources: variant_file.resources,
        })
    }
}

fn read_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::MissingFile(path.to_path_buf()));
    }
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn invalid(path: &Path, field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidField {
        path: path.to_path_buf(),
        field: field.to_string(),
        reason: reason.into(),
    }
}

fn validate_product(path: &Path, expected_id: &str, file: &ProductFile) -> Result<(), ConfigError> {
    if !is_identifier(&file.id) {
        return Err(invalid(path, "id", "must match [a-z0-9_]+"));
    }
    if file.id != expected_id {
        return Err(invalid(
            path,
            "id",
            format!("`{}` does not match directory `{expected_id}`", file.id),
        ));
    }
    if file.name.trim().is_empty() {
        return Err(invalid(path, "name", "must not be empty"));
    }
    if file.company.trim().is_empty() {
        return Err(invalid(path, "company", "must not be empty"));
    }
    if file.doc_subdirs.is_empty() {
        return Err(invalid(
            path,
            "doc_subdirs",
            "must list at least one subdirectory",
        ));
    }
    let s = &file.search;
    if s.prefetch_limit == 0 {
        return Err(invalid(path, "search.prefetch_limit", "must be >= 1"));
    }
    if s.rerank_top_k == 0 {
        return Err(invalid(path, "search.rerank_top_k", "must be >= 1"));
    }
    if s.default_limit == 0 {
        return Err(invalid(path, "search.default_limit", "must be >= 1"));
    }
    if !(0.0..=1.0).contains(&s.dense_score_threshold) {
        return Err(invalid(
            path,
            "search.dense_score_threshold",
            "must be within [0.0, 1.0]",
        ));
    }
    Ok(())
}

fn validate_variant(
    path: &Path,
    expected_lang: &str,
    file: &VariantFile,
) -> Result<(), ConfigError> {
    if !is_identifier(&file.lang) {
        return Err(invalid(path, "lang", "must match [a-z0-9_]+"));
    }
    if file.lang != expected_lang {
        return Err(invalid(
            path,
            "lang",
            format!(
                "`{}` does not match file name `{expected_lang}.yaml`",
                file.lang
            ),
        ));
    }
    if !is_identifier(&file.doc_language) {
        return Err(invalid(path, "doc_language", "must match [a-z0-9_]+"));
    }
    if file.raw_data.trim().is_empty() {
        return Err(invalid(path, "raw_data", "must not be empty"));
    }
    for (key, res) in &file.resources {
        if res.name.trim().is_empty() {
            return Err(invalid(
                path,
                &format!("resources.{key}.name"),
                "must not be empty",
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_product(dir: &Path, id: &str, body: &str) {
        let product_dir = dir.join(id);
        std::fs::create_dir_all(&product_dir).unwrap();
        std::fs::write(product_dir.join("product.yaml"), body).unwrap();
    }

    fn write_variant(dir: &Path, id: &str, lang: &str, body: &str) {
        std::fs::write(dir.join(id).join(format!("{lang}.yaml")), body).unwrap();
    }

    const PRODUCT_YAML: &str = r#"
id: spreadjs
name: SpreadJS
company: Mescius
chunker: typedoc
search:
  prefetch_limit: 30
"#;

    const VARIANT_YAML: &str = r#"
lang: en
doc_language: en
raw_data: spreadjs-en
description: JavaScript spreadsheet component
resources:
  cdn_scripts:
    name: CDN scripts
    content: "<script src=...>"
"#;

    #[test]
    fn resolves_and_merges_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        write_product(tmp.path(), "spreadjs", PRODUCT_YAML);
        write_variant(tmp.path(), "spreadjs", "en", VARIANT_YAML);

        let resolver = ConfigResolver::new(tmp.path());
        let config = resolver.resolve("spreadjs", "en").unwrap();

        // Overridden field wins, the rest come from defaults.
        assert_eq!(config.search.prefetch_limit, 30);
        assert_eq!(config.search.rerank_top_k, 10);
        assert_eq!(config.search.default_limit, 5);
        assert!((config.search.dense_score_threshold - 0.3).abs() < f32::EPSILON);
        assert_eq!(config.search.sparse_score_threshold, None);

        // Derived fields.
        assert_eq!(config.collection, "spreadjs_en");
        assert_eq!(config.company_short, "ME");
        assert_eq!(config.chunker, ChunkerKind::Typedoc);
        assert_eq!(config.doc_subdirs, vec!["apis", "docs", "demos"]);
        assert_eq!(config.resources.len(), 1);
    }

    #[test]
    fn cache_returns_same_instance() {
        let tmp = tempfile::tempdir().unwrap();
        write_product(tmp.path(), "spreadjs", PRODUCT_YAML);
        write_variant(tmp.path(), "spreadjs", "en", VARIANT_YAML);

        let resolver = ConfigResolver::new(tmp.path());
        let a = resolver.resolve("spreadjs", "en").unwrap();
        let b = resolver.resolve("spreadjs", "en").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn missing_file_is_diagnosed() {
        let tmp = tempfile::tempdir().unwrap();
        let resolver = ConfigResolver::new(tmp.path());
        let err = resolver.resolve("nope", "en").unwrap_err();
        assert!(matches!(err, ConfigError::MissingFile(_)));
    }

    #[test]
    fn id_mismatch_names_the_field() {
        let tmp = tempfile::tempdir().unwrap();
        write_product(tmp.path(), "wrongdir", PRODUCT_YAML);
        write_variant(tmp.path(), "wrongdir", "en", VARIANT_YAML);

        let resolver = ConfigResolver::new(tmp.path());
        let err = resolver.resolve("wrongdir", "en").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("`id`"), "unexpected message: {msg}");
    }

    #[test]
    fn uppercase_collection_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        write_product(tmp.path(), "spreadjs", PRODUCT_YAML);
        write_variant(
            tmp.path(),
            "spreadjs",
            "en",
            "lang: en\ndoc_language: en\ncollection: SpreadJS_EN\nraw_data: x\n",
        );

        let resolver = ConfigResolver::new(tmp.path());
        let err = resolver.resolve("spreadjs", "en").unwrap_err();
        assert!(err.to_string().contains("collection"));
    }

    #[test]
    fn identifier_alphabet() {
        assert!(is_identifier("spreadjs_en"));
        assert!(is_identifier("gc_excel2"));
        assert!(!is_identifier("SpreadJS"));
        assert!(!is_identifier("docs-mcp"));
        assert!(!is_identifier(""));
    }
}
