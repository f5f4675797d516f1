use serde::{Deserialize, Serialize};

/// A model the user can pick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Identifier handed to the engine loader
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Approximate download size (e.g. "0.6GB")
    #[serde(default)]
    pub size: String,
    /// GGUF file name under `models.directory` (llama backend only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

/// Ordered list of selectable models. Numbering starts at 1, in
/// configuration order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ModelCatalog {
    entries: Vec<CatalogEntry>,
}

impl ModelCatalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&CatalogEntry> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    /// Looks a model up by its 1-based number.
    pub fn by_number(&self, number: usize) -> Option<&CatalogEntry> {
        number.checked_sub(1).and_then(|idx| self.entries.get(idx))
    }

    /// Resolves user input that is either a catalog number or a model id.
    pub fn resolve(&self, input: &str) -> Option<&CatalogEntry> {
        let input = input.trim();
        match input.parse::<usize>() {
            Ok(number) => self.by_number(number),
            Err(_) => self.get(input),
        }
    }

    /// Display name for `id`, falling back to the id itself.
    pub fn display_name<'a>(&'a self, id: &'a str) -> &'a str {
        self.get(id).map(|entry| entry.name.as_str()).unwrap_or(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> ModelCatalog {
        ModelCatalog::new(vec![
            CatalogEntry {
                id: "llama-3.2-3b-instruct".to_string(),
                name: "Llama 3.2 3B".to_string(),
                size: "2.0GB".to_string(),
                file: None,
            },
            CatalogEntry {
                id: "qwen2.5-0.5b-instruct".to_string(),
                name: "Qwen2.5 0.5B".to_string(),
                size: "0.4GB".to_string(),
                file: Some("qwen2.5-0.5b-instruct-q4_k_m.gguf".to_string()),
            },
        ])
    }

    #[test]
    fn test_resolve_by_number_and_id() {
        let catalog = catalog();
        assert_eq!(catalog.resolve("1").unwrap().name, "Llama 3.2 3B");
        assert_eq!(catalog.resolve(" qwen2.5-0.5b-instruct ").unwrap().size, "0.4GB");
        assert!(catalog.resolve("0").is_none());
        assert!(catalog.resolve("3").is_none());
        assert!(catalog.resolve("mistral").is_none());
    }

    #[test]
    fn test_display_name_falls_back_to_id() {
        let catalog = catalog();
        assert_eq!(catalog.display_name("llama-3.2-3b-instruct"), "Llama 3.2 3B");
        assert_eq!(catalog.display_name("custom-model"), "custom-model");
    }
}
