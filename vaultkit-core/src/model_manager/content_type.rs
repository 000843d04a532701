//! Content-type capability registry, replacing prototype-based class lookup
//! with an explicit table the host populates (spec.md §4.3 "class map for
//! its content_type"; see REDESIGN FLAGS for why prototypes don't fit Rust).
use std::collections::HashMap;

/// Capabilities the Model Manager needs to know about a content type. Hosts
/// register one of these per `content_type` tag they use; the registry ships
/// empty, with [`ItemVariant::default_untyped`] available for items whose
/// type the host hasn't registered.
#[derive(Debug, Clone)]
pub struct ItemVariant {
    /// Extra `appData` keys to ignore, beyond [`crate::item::model::DEFAULT_APP_DATA_IGNORE_KEYS`],
    /// when comparing two items of this type for content equality.
    pub appdata_ignore_keys: Vec<String>,
    /// Whether a deleted item of this type still carries meaningful content
    /// (most content types discard content on tombstoning; a few, like
    /// history markers, do not).
    pub handles_deleted_content: bool,
}

impl ItemVariant {
    pub fn default_untyped() -> Self {
        Self {
            appdata_ignore_keys: Vec::new(),
            handles_deleted_content: false,
        }
    }
}

/// Host-populated map from `content_type` tag to its [`ItemVariant`].
#[derive(Debug, Clone, Default)]
pub struct ContentTypeRegistry {
    variants: HashMap<String, ItemVariant>,
}

impl ContentTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, content_type: impl Into<String>, variant: ItemVariant) {
        self.variants.insert(content_type.into(), variant);
    }

    /// Look up the variant for `content_type`, falling back to the
    /// documented default for content types the host never registered.
    pub fn get(&self, content_type: &str) -> ItemVariant {
        self.variants
            .get(content_type)
            .cloned()
            .unwrap_or_else(ItemVariant::default_untyped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_content_type_falls_back_to_default() {
        let registry = ContentTypeRegistry::new();
        let variant = registry.get("note");
        assert!(!variant.handles_deleted_content);
        assert!(variant.appdata_ignore_keys.is_empty());
    }

    #[test]
    fn registered_content_type_is_returned() {
        let mut registry = ContentTypeRegistry::new();
        registry.register(
            "tag",
            ItemVariant {
                appdata_ignore_keys: vec!["last_sync".to_string()],
                handles_deleted_content: true,
            },
        );

        let variant = registry.get("tag");
        assert!(variant.handles_deleted_content);
        assert_eq!(variant.appdata_ignore_keys, vec!["last_sync".to_string()]);
    }
}
