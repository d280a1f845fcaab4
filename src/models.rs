use serde::{Deserialize, Serialize};

/// Immutable catalog entry describing a runnable model.
///
/// Selection of a descriptor is user state, not session state; changing the
/// selection invalidates any loaded engine handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Model family, e.g. "Llama 3".
    pub group: String,
    /// Runner-facing identifier, e.g. "Llama-3-8B-Instruct-q4f16_1".
    pub name: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub badge: Option<String>,
    #[serde(default)]
    pub vision: bool,
}

impl ModelDescriptor {
    pub fn new(group: &str, name: &str, display_name: &str) -> Self {
        Self {
            group: group.to_string(),
            name: name.to_string(),
            display_name: display_name.to_string(),
            badge: None,
            vision: false,
        }
    }

    pub fn with_badge(mut self, badge: &str) -> Self {
        self.badge = Some(badge.to_string());
        self
    }

    pub fn with_vision(mut self) -> Self {
        self.vision = true;
        self
    }
}

/// Built-in model table. The first entry is the default selection.
pub fn builtin_models() -> Vec<ModelDescriptor> {
    vec![
        ModelDescriptor::new(
            "Llama 3",
            "Llama-3-8B-Instruct-q4f16_1",
            "Llama 3 8B",
        )
        .with_badge("3.8B"),
        ModelDescriptor::new("Llama 3", "Llama-3-70B-Instruct-q4f16_1", "Llama 3 70B"),
        ModelDescriptor::new("Phi 3", "Phi-3-mini-4k-instruct-q4f16_1", "Phi 3 Mini"),
        ModelDescriptor::new("Gemma", "gemma-2b-it-q4f16_1", "Gemma 2B"),
    ]
}

pub fn default_model() -> ModelDescriptor {
    builtin_models()
        .into_iter()
        .next()
        .unwrap_or_else(|| ModelDescriptor::new("Llama 3", "Llama-3-8B-Instruct-q4f16_1", "Llama 3 8B"))
}

/// Find a catalog entry by its runner-facing name.
pub fn find_model(name: &str) -> Option<ModelDescriptor> {
    builtin_models().into_iter().find(|m| m.name == name)
}

#[cfg(test)]
mod tests {
    use super::{builtin_models, default_model, find_model};

    #[test]
    fn default_model_is_first_catalog_entry() {
        assert_eq!(default_model().name, builtin_models()[0].name);
    }

    #[test]
    fn find_model_by_name() {
        let found = find_model("Llama-3-8B-Instruct-q4f16_1").unwrap();
        assert_eq!(found.display_name, "Llama 3 8B");
        assert!(find_model("no-such-model").is_none());
    }

    #[test]
    fn descriptor_roundtrips_through_json() {
        let model = default_model();
        let json = serde_json::to_string(&model).unwrap();
        let back: super::ModelDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, model);
    }
}
