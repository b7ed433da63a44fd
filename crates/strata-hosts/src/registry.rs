use std::sync::Arc;

use chrono::Utc;
use strata_domain::{Fact, Host, HostId};
use strata_store::StateStore;
use tracing::debug;

use crate::error::HostsError;
use crate::selector::Selector;

const METADATA_NAMESPACE: &str = "host.metadata";
const LABELS_NAMESPACE: &str = "host.labels";
const METADATA_KEY: &str = "host";
const LABELS_KEY: &str = "labels";

/// Hosts persist through the same fact subsystem as everything else: the
/// full `Host` document lives under `host.metadata`, and its labels are
/// duplicated under `host.labels` so selector queries don't need to
/// deserialize every host just to filter on labels.
pub struct HostRegistry {
    store: Arc<dyn StateStore>,
}

impl HostRegistry {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        HostRegistry { store }
    }

    pub async fn register(&self, host: &Host) -> Result<(), HostsError> {
        let target = host.id.as_str();
        let metadata_fact = Fact::new(
            target,
            METADATA_NAMESPACE,
            METADATA_KEY,
            serde_json::to_value(host).map_err(|e| HostsError::Selector {
                selector: target.to_string(),
                message: e.to_string(),
            })?,
            0,
        );
        self.store.upsert_fact(&metadata_fact).await?;

        let labels_fact = Fact::new(
            target,
            LABELS_NAMESPACE,
            LABELS_KEY,
            serde_json::to_value(&host.labels).unwrap_or(serde_json::Value::Null),
            0,
        );
        self.store.upsert_fact(&labels_fact).await?;

        debug!(host_id = target, "host registered");
        Ok(())
    }

    pub async fn get(&self, id: &HostId) -> Result<Option<Host>, HostsError> {
        let fact = self
            .store
            .get_fact(id.as_str(), METADATA_NAMESPACE, METADATA_KEY)
            .await?;
        match fact {
            Some(fact) => {
                let host: Host = serde_json::from_value(fact.value).map_err(|e| HostsError::Selector {
                    selector: id.as_str().to_string(),
                    message: e.to_string(),
                })?;
                Ok(Some(host))
            }
            None => Ok(None),
        }
    }

    pub async fn list(&self, selector: &Selector) -> Result<Vec<Host>, HostsError> {
        let facts = self
            .store
            .list_facts(None, Some(METADATA_NAMESPACE))
            .await?;

        let mut hosts = Vec::new();
        for fact in facts {
            if fact.key != METADATA_KEY {
                continue;
            }
            let host: Host = serde_json::from_value(fact.value).map_err(|e| HostsError::Selector {
                selector: fact.target_id.clone(),
                message: e.to_string(),
            })?;
            if selector.matches(&host) {
                hosts.push(host);
            }
        }
        Ok(hosts)
    }

    pub async fn update_labels(
        &self,
        id: &HostId,
        labels: std::collections::HashMap<String, String>,
    ) -> Result<(), HostsError> {
        let mut host = self.get(id).await?.ok_or_else(|| HostsError::NotFound(id.as_str().to_string()))?;
        host.labels = labels;
        host.updated_at = Utc::now();
        self.register(&host).await
    }

    pub async fn remove(&self, id: &HostId) -> Result<(), HostsError> {
        if let Some(fact) = self
            .store
            .get_fact(id.as_str(), METADATA_NAMESPACE, METADATA_KEY)
            .await?
        {
            if let Some(fact_id) = fact.id {
                self.store.delete_fact(&fact_id).await?;
            }
        }
        if let Some(fact) = self.store.get_fact(id.as_str(), LABELS_NAMESPACE, LABELS_KEY).await? {
            if let Some(fact_id) = fact.id {
                self.store.delete_fact(&fact_id).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use strata_store::InMemoryStore;

    fn sample_host(name: &str, labels: &[(&str, &str)]) -> Host {
        Host {
            id: HostId::new(name),
            address: format!("{name}.internal"),
            port: 22,
            user: "deploy".to_string(),
            key_path: None,
            labels: labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            onboarded_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn register_and_get_round_trips() {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStore::new());
        let registry = HostRegistry::new(store);
        let host = sample_host("web-1", &[("env", "prod")]);
        registry.register(&host).await.unwrap();

        let fetched = registry.get(&host.id).await.unwrap().unwrap();
        assert_eq!(fetched.address, "web-1.internal");
    }

    #[tokio::test]
    async fn list_filters_by_selector() {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStore::new());
        let registry = HostRegistry::new(store);
        registry.register(&sample_host("web-1", &[("env", "prod")])).await.unwrap();
        registry.register(&sample_host("web-2", &[("env", "staging")])).await.unwrap();

        let selector = crate::selector::parse_selector("env=prod").unwrap();
        let matched = registry.list(&selector).await.unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].id.as_str(), "web-1");
    }

    #[tokio::test]
    async fn remove_deletes_both_facts() {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStore::new());
        let registry = HostRegistry::new(store);
        let host = sample_host("web-1", &[]);
        registry.register(&host).await.unwrap();
        registry.remove(&host.id).await.unwrap();
        assert!(registry.get(&host.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_labels_is_reflected_in_subsequent_selection() {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStore::new());
        let registry = HostRegistry::new(store);
        let host = sample_host("web-1", &[("env", "staging")]);
        registry.register(&host).await.unwrap();

        let mut new_labels = HashMap::new();
        new_labels.insert("env".to_string(), "prod".to_string());
        registry.update_labels(&host.id, new_labels).await.unwrap();

        let selector = crate::selector::parse_selector("env=prod").unwrap();
        let matched = registry.list(&selector).await.unwrap();
        assert_eq!(matched.len(), 1);
    }
}
