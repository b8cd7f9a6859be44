//! Process-wide LLM client instance cache
//!
//! Entries are shared and outlive individual invocations. A cached entry is
//! returned for the same key regardless of later config changes; callers
//! without a key always get a fresh instance. Tests reset the cache with
//! [`clear`].

use crate::core::Result;
use crate::llm::{LlmConfig, OllamaLlm};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

static CLIENT_CACHE: OnceLock<Mutex<HashMap<String, Arc<OllamaLlm>>>> = OnceLock::new();

fn cache() -> &'static Mutex<HashMap<String, Arc<OllamaLlm>>> {
    CLIENT_CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Get or create a client.
///
/// With a key, the first caller's config wins for the lifetime of the entry.
/// Without a key, a fresh instance is built from `config` every time.
pub fn shared(key: Option<&str>, config: &LlmConfig) -> Result<Arc<OllamaLlm>> {
    match key {
        None => Ok(Arc::new(OllamaLlm::new(config.clone())?)),
        Some(key) => {
            let mut entries = cache().lock().unwrap_or_else(|e| e.into_inner());
            if let Some(existing) = entries.get(key) {
                return Ok(Arc::clone(existing));
            }
            let client = Arc::new(OllamaLlm::new(config.clone())?);
            entries.insert(key.to_string(), Arc::clone(&client));
            Ok(client)
        },
    }
}

/// Number of cached entries
pub fn len() -> usize {
    cache().lock().unwrap_or_else(|e| e.into_inner()).len()
}

/// Release all cached entries
pub fn clear() {
    cache().lock().unwrap_or_else(|e| e.into_inner()).clear();
}
