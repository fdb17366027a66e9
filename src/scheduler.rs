//! Key selection and failure memory.
//!
//! The scheduler owns the process-wide failed-key set and is the only code
//! that reorders a channel's `api_keys`. Selection is sequential: the first
//! key that is neither excluded by the current request nor in the failed set
//! wins. Reordering happens once per request, after a success that followed a
//! quota-related failure, by moving the exhausted key to the back.

use std::collections::HashSet;
use std::sync::{Mutex, RwLock};

use crate::config::{RelayConfig, UpstreamChannel};
use crate::error::{RelayError, Result};

#[derive(Default)]
pub struct KeyScheduler {
    /// Keys that failed at least once, across all channels, for the process
    /// lifetime. Cleared only by a config reload.
    failed: Mutex<HashSet<String>>,
}

impl KeyScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next candidate key of `channel`: first in list order that is not
    /// excluded by this request and not in the failed set.
    pub fn next_key(&self, channel: &UpstreamChannel, excluded: &HashSet<String>) -> Result<String> {
        if channel.api_keys.is_empty() {
            return Err(RelayError::NoKeys {
                channel: channel.name.clone(),
            });
        }

        let failed = self
            .failed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        channel
            .api_keys
            .iter()
            .find(|k| !excluded.contains(*k) && !failed.contains(*k))
            .cloned()
            .ok_or_else(|| RelayError::KeysExhausted {
                channel: channel.name.clone(),
            })
    }

    /// Remember that `key` produced a failover outcome.
    pub fn mark_key_failed(&self, key: &str) {
        self.failed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(key.to_string());
    }

    pub fn is_failed(&self, key: &str) -> bool {
        self.failed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .contains(key)
    }

    /// Forget all failure memory. Invoked on config reload.
    pub fn clear_failed(&self) {
        self.failed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clear();
    }

    /// Move `key` to the end of the channel's key order. The only mutation of
    /// persisted ordering; relative order of the other keys is untouched.
    pub fn deprioritize_key(&self, config: &RwLock<RelayConfig>, channel_name: &str, key: &str) {
        let mut config = config
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let Some(channel) = config.upstreams.iter_mut().find(|c| c.name == channel_name) else {
            return;
        };

        if let Some(pos) = channel.api_keys.iter().position(|k| k == key) {
            let key = channel.api_keys.remove(pos);
            tracing::info!(channel = %channel_name, "deprioritizing exhausted key");
            channel.api_keys.push(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceType;
    use std::collections::HashMap;

    fn channel(keys: &[&str]) -> UpstreamChannel {
        UpstreamChannel {
            name: "main".to_string(),
            service_type: ServiceType::Openai,
            base_url: "https://example.com".to_string(),
            api_keys: keys.iter().map(|k| (*k).to_string()).collect(),
            insecure_skip_verify: false,
            models: HashMap::new(),
        }
    }

    fn config_with(channel: UpstreamChannel) -> RwLock<RelayConfig> {
        RwLock::new(RelayConfig {
            port: 0,
            proxy_access_key: "secret".to_string(),
            health_check_path: "/health".to_string(),
            enable_web_ui: false,
            current_upstream: Some("main".to_string()),
            load_balance: "sequential".to_string(),
            upstreams: vec![channel],
        })
    }

    #[test]
    fn selects_in_list_order() {
        let scheduler = KeyScheduler::new();
        let ch = channel(&["k1", "k2", "k3"]);
        assert_eq!(scheduler.next_key(&ch, &HashSet::new()).unwrap(), "k1");
    }

    #[test]
    fn never_returns_excluded_or_failed_keys() {
        let scheduler = KeyScheduler::new();
        let ch = channel(&["k1", "k2", "k3"]);

        let mut excluded = HashSet::new();
        excluded.insert("k1".to_string());
        assert_eq!(scheduler.next_key(&ch, &excluded).unwrap(), "k2");

        scheduler.mark_key_failed("k2");
        assert_eq!(scheduler.next_key(&ch, &excluded).unwrap(), "k3");
    }

    #[test]
    fn exhausted_when_all_excluded() {
        let scheduler = KeyScheduler::new();
        let ch = channel(&["k1", "k2"]);

        let excluded: HashSet<String> = ["k1", "k2"].iter().map(|s| s.to_string()).collect();
        assert!(matches!(
            scheduler.next_key(&ch, &excluded),
            Err(RelayError::KeysExhausted { .. })
        ));
    }

    #[test]
    fn fully_failed_channel_is_exhausted_until_reset() {
        let scheduler = KeyScheduler::new();
        let ch = channel(&["k1", "k2"]);
        scheduler.mark_key_failed("k1");
        scheduler.mark_key_failed("k2");

        assert!(matches!(
            scheduler.next_key(&ch, &HashSet::new()),
            Err(RelayError::KeysExhausted { .. })
        ));

        scheduler.clear_failed();
        assert_eq!(scheduler.next_key(&ch, &HashSet::new()).unwrap(), "k1");
    }

    #[test]
    fn empty_key_list_is_its_own_error() {
        let scheduler = KeyScheduler::new();
        let ch = channel(&[]);
        assert!(matches!(
            scheduler.next_key(&ch, &HashSet::new()),
            Err(RelayError::NoKeys { .. })
        ));
    }

    #[test]
    fn deprioritize_moves_key_to_end_and_preserves_others() {
        let scheduler = KeyScheduler::new();
        let config = config_with(channel(&["k1", "k2", "k3"]));

        scheduler.deprioritize_key(&config, "main", "k1");

        let keys = config.read().unwrap().upstreams[0].api_keys.clone();
        assert_eq!(keys, vec!["k2", "k3", "k1"]);

        // Unknown key: order untouched, multiset preserved.
        scheduler.deprioritize_key(&config, "main", "nope");
        let keys = config.read().unwrap().upstreams[0].api_keys.clone();
        assert_eq!(keys, vec!["k2", "k3", "k1"]);
    }

    #[test]
    fn clear_failed_resets_memory() {
        let scheduler = KeyScheduler::new();
        scheduler.mark_key_failed("k1");
        assert!(scheduler.is_failed("k1"));
        scheduler.clear_failed();
        assert!(!scheduler.is_failed("k1"));
    }
}
