use uuid::Uuid;

/// Client order ids of the form `<prefix>-<uuid>`
#[derive(Debug, Clone)]
pub struct ClientOrderIdGenerator {
    prefix: String,
}

impl ClientOrderIdGenerator {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.trim_end_matches('-').to_string(),
        }
    }

    pub fn next_id(&self) -> String {
        format!("{}-{}", self.prefix, Uuid::new_v4().simple())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_are_prefixed_and_unique() {
        let ids = ClientOrderIdGenerator::new("qt-");
        let generated: HashSet<String> = (0..1000).map(|_| ids.next_id()).collect();
        assert_eq!(generated.len(), 1000);
        assert!(generated.iter().all(|id| id.starts_with("qt-") && id.len() == 35));
    }
}
