use std::collections::HashMap;
use std::sync::RwLock;

/// Resolves `(aggregate_type, event_type)` to a broker topic of the form
/// `{prefix}-{environment}-{base}`.
pub struct TopicMapper {
    prefix: String,
    environment: String,
    mappings: RwLock<HashMap<(String, String), String>>,
}

impl Default for TopicMapper {
    fn default() -> Self {
        Self::new("orders", "dev")
    }
}

impl TopicMapper {
    pub fn new(prefix: impl Into<String>, environment: impl Into<String>) -> Self {
        let mapper = Self {
            prefix: prefix.into(),
            environment: environment.into(),
            mappings: RwLock::new(HashMap::new()),
        };
        mapper.add_mapping("Order", "OrderCreated", "order-created");
        mapper.add_mapping("Order", "OrderItemAdded", "order-item-added");
        mapper.add_mapping("Order", "OrderConfirmed", "order-confirmed");
        mapper
    }

    pub fn add_mapping(
        &self,
        aggregate_type: impl Into<String>,
        event_type: impl Into<String>,
        base: impl Into<String>,
    ) {
        let key = (aggregate_type.into(), event_type.into());
        let base = base.into();
        tracing::debug!(aggregate_type = %key.0, event_type = %key.1, base = %base, "Added topic mapping");
        // a poisoned lock still holds a usable map
        let mut mappings = self.mappings.write().unwrap_or_else(|e| e.into_inner());
        mappings.insert(key, base);
    }

    pub fn topic_for(&self, aggregate_type: &str, event_type: &str) -> String {
        let base = {
            let mappings = self.mappings.read().unwrap_or_else(|e| e.into_inner());
            mappings
                .get(&(aggregate_type.to_string(), event_type.to_string()))
                .cloned()
        }
        .unwrap_or_else(|| {
            format!(
                "{}-{}",
                aggregate_type.to_lowercase(),
                event_type.to_lowercase()
            )
        });
        format!("{}-{}-{}", self.prefix, self.environment, base)
    }
}
