//! JSON-backed rule repository.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;

use tokio::sync::Mutex;

use nido_core::ports::rules::RuleRepository;
use nido_domain::error::NidoError;
use nido_domain::id::RuleId;
use nido_domain::rule::Rule;
use nido_domain::time::Timestamp;

use crate::{read_json_or_default, write_json_atomic};

/// Rule definitions persisted as one JSON file.
pub struct JsonRuleRepository {
    path: PathBuf,
    cache: Mutex<HashMap<RuleId, Rule>>,
}

impl JsonRuleRepository {
    /// Load the repository, reading existing definitions if present.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the file exists but cannot be read or
    /// parsed.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, NidoError> {
        let path = path.into();
        let rules: Vec<Rule> = read_json_or_default(&path).await?;
        tracing::info!(path = %path.display(), count = rules.len(), "loaded rules");
        let cache = rules.into_iter().map(|rule| (rule.id, rule)).collect();
        Ok(Self {
            path,
            cache: Mutex::new(cache),
        })
    }

    async fn persist(&self, cache: &HashMap<RuleId, Rule>) -> Result<(), NidoError> {
        let mut rules: Vec<&Rule> = cache.values().collect();
        rules.sort_by_key(|rule| rule.id);
        write_json_atomic(&self.path, &rules).await
    }
}

impl RuleRepository for JsonRuleRepository {
    fn create(&self, rule: Rule) -> impl Future<Output = Result<Rule, NidoError>> + Send {
        async move {
            rule.validate()?;
            let mut cache = self.cache.lock().await;
            cache.insert(rule.id, rule.clone());
            self.persist(&cache).await?;
            Ok(rule)
        }
    }

    fn get_by_id(
        &self,
        id: RuleId,
    ) -> impl Future<Output = Result<Option<Rule>, NidoError>> + Send {
        async move { Ok(self.cache.lock().await.get(&id).cloned()) }
    }

    fn get_all(&self) -> impl Future<Output = Result<Vec<Rule>, NidoError>> + Send {
        async move {
            let cache = self.cache.lock().await;
            let mut rules: Vec<Rule> = cache.values().cloned().collect();
            rules.sort_by_key(|rule| rule.id);
            Ok(rules)
        }
    }

    fn list_enabled(&self) -> impl Future<Output = Result<Vec<Rule>, NidoError>> + Send {
        async move {
            let cache = self.cache.lock().await;
            let mut rules: Vec<Rule> = cache.values().filter(|r| r.enabled).cloned().collect();
            rules.sort_by_key(|rule| rule.id);
            Ok(rules)
        }
    }

    fn update(&self, rule: Rule) -> impl Future<Output = Result<Rule, NidoError>> + Send {
        async move {
            rule.validate()?;
            let mut cache = self.cache.lock().await;
            if !cache.contains_key(&rule.id) {
                return Err(NidoError::RuleNotFound { rule: rule.id });
            }
            cache.insert(rule.id, rule.clone());
            self.persist(&cache).await?;
            Ok(rule)
        }
    }

    fn delete(&self, id: RuleId) -> impl Future<Output = Result<(), NidoError>> + Send {
        async move {
            let mut cache = self.cache.lock().await;
            cache.remove(&id);
            self.persist(&cache).await
        }
    }

    fn record_fired(
        &self,
        id: RuleId,
        at: Timestamp,
    ) -> impl Future<Output = Result<(), NidoError>> + Send {
        async move {
            let mut cache = self.cache.lock().await;
            let Some(rule) = cache.get_mut(&id) else {
                return Err(NidoError::RuleNotFound { rule: id });
            };
            rule.last_fired = Some(at);
            self.persist(&cache).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::temp_file;
    use nido_domain::error::ValidationError;
    use nido_domain::event::EventType;
    use nido_domain::rule::TriggerSpec;
    use nido_domain::time::now;

    fn rule(name: &str) -> Rule {
        Rule::builder()
            .name(name)
            .trigger(TriggerSpec::on(vec![EventType::TelemetryChanged]))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn should_start_empty_when_file_missing() {
        let repo = JsonRuleRepository::load(temp_file("rules.json"))
            .await
            .unwrap();
        assert!(repo.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn should_persist_rules_across_reload() {
        let path = temp_file("rules.json");
        let created = {
            let repo = JsonRuleRepository::load(&path).await.unwrap();
            repo.create(rule("Night light")).await.unwrap()
        };

        let reloaded = JsonRuleRepository::load(&path).await.unwrap();
        let stored = reloaded.get_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(stored.name, "Night light");
    }

    #[tokio::test]
    async fn should_reject_invalid_rule_at_create() {
        let repo = JsonRuleRepository::load(temp_file("rules.json"))
            .await
            .unwrap();
        let invalid = Rule {
            name: String::new(),
            ..rule("placeholder")
        };
        let result = repo.create(invalid).await;
        assert!(matches!(
            result,
            Err(NidoError::Validation(ValidationError::EmptyName))
        ));
    }

    #[tokio::test]
    async fn should_list_only_enabled_rules() {
        let repo = JsonRuleRepository::load(temp_file("rules.json"))
            .await
            .unwrap();
        let mut disabled = rule("off");
        disabled.enabled = false;
        repo.create(rule("on")).await.unwrap();
        repo.create(disabled).await.unwrap();

        let enabled = repo.list_enabled().await.unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].name, "on");
    }

    #[tokio::test]
    async fn should_persist_last_fired_across_reload() {
        let path = temp_file("rules.json");
        let created = {
            let repo = JsonRuleRepository::load(&path).await.unwrap();
            let created = repo.create(rule("tracked")).await.unwrap();
            repo.record_fired(created.id, now()).await.unwrap();
            created
        };

        let reloaded = JsonRuleRepository::load(&path).await.unwrap();
        let stored = reloaded.get_by_id(created.id).await.unwrap().unwrap();
        assert!(stored.last_fired.is_some());
    }

    #[tokio::test]
    async fn should_refuse_update_of_unknown_rule() {
        let repo = JsonRuleRepository::load(temp_file("rules.json"))
            .await
            .unwrap();
        let result = repo.update(rule("ghost")).await;
        assert!(matches!(result, Err(NidoError::RuleNotFound { .. })));
    }

    #[tokio::test]
    async fn should_delete_rule() {
        let repo = JsonRuleRepository::load(temp_file("rules.json"))
            .await
            .unwrap();
        let created = repo.create(rule("doomed")).await.unwrap();
        repo.delete(created.id).await.unwrap();
        assert!(repo.get_by_id(created.id).await.unwrap().is_none());
    }
}
