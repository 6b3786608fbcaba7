// Configuration module for traceai
// Reads from environment variables with sensible defaults

use std::env;
use std::sync::OnceLock;

/// Global configuration instance
static CONFIG: OnceLock<Config> = OnceLock::new();

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Parser worker pool size (TRACEAI_MAX_PARSERS)
    pub max_concurrent_parsers: usize,

    /// Traversal node-visit cap before LimitExceeded (TRACEAI_NODE_CAP)
    pub traversal_node_cap: usize,

    /// Result cap for paths_between (TRACEAI_MAX_PATHS)
    pub max_paths: usize,

    /// Embedding dimensions for the hash embedder (TRACEAI_EMBED_DIM)
    pub embed_dimensions: usize,

    /// Vector store read pool size (TRACEAI_POOL_SIZE)
    pub pool_size: u32,

    /// Accept free-form COBOL source (TRACEAI_COBOL_FREE_FORM)
    pub cobol_free_form: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_parsers: 10,
            traversal_node_cap: 100_000,
            max_paths: 64,
            embed_dimensions: 128,
            pool_size: 10,
            cobol_free_form: false,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Self {
        let mut config = Config::default();

        if let Ok(val) = env::var("TRACEAI_MAX_PARSERS") {
            if let Ok(parsed) = val.parse() {
                config.max_concurrent_parsers = parsed;
            } else {
                eprintln!(
                    "traceai: Warning: Invalid TRACEAI_MAX_PARSERS value: {}, using default: {}",
                    val, config.max_concurrent_parsers
                );
            }
        }

        if let Ok(val) = env::var("TRACEAI_NODE_CAP") {
            if let Ok(parsed) = val.parse() {
                config.traversal_node_cap = parsed;
            } else {
                eprintln!(
                    "traceai: Warning: Invalid TRACEAI_NODE_CAP value: {}, using default: {}",
                    val, config.traversal_node_cap
                );
            }
        }

        if let Ok(val) = env::var("TRACEAI_MAX_PATHS") {
            if let Ok(parsed) = val.parse() {
                config.max_paths = parsed;
            } else {
                eprintln!(
                    "traceai: Warning: Invalid TRACEAI_MAX_PATHS value: {}, using default: {}",
                    val, config.max_paths
                );
            }
        }

        if let Ok(val) = env::var("TRACEAI_EMBED_DIM") {
            if let Ok(parsed) = val.parse() {
                config.embed_dimensions = parsed;
            } else {
                eprintln!(
                    "traceai: Warning: Invalid TRACEAI_EMBED_DIM value: {}, using default: {}",
                    val, config.embed_dimensions
                );
            }
        }

        if let Ok(val) = env::var("TRACEAI_POOL_SIZE") {
            if let Ok(parsed) = val.parse() {
                config.pool_size = parsed;
            } else {
                eprintln!(
                    "traceai: Warning: Invalid TRACEAI_POOL_SIZE value: {}, using default: {}",
                    val, config.pool_size
                );
            }
        }

        if let Ok(val) = env::var("TRACEAI_COBOL_FREE_FORM") {
            config.cobol_free_form = matches!(val.as_str(), "1" | "true" | "yes");
        }

        config
    }

    /// Get the global configuration instance
    pub fn get() -> &'static Config {
        CONFIG.get_or_init(Config::from_env)
    }
}
