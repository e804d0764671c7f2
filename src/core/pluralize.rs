//! Plural forms for collection paths
//!
//! Entity modules name their collection routes after the plural of the
//! entity type, with underscores turned into dashes (`api_key` → `api-keys`).

pub struct Pluralizer;

impl Pluralizer {
    /// Plural of an English noun, covering the regular suffix rules
    ///
    /// ```
    /// use gatehouse::core::pluralize::Pluralizer;
    ///
    /// assert_eq!(Pluralizer::pluralize("document"), "documents");
    /// assert_eq!(Pluralizer::pluralize("category"), "categories");
    /// assert_eq!(Pluralizer::pluralize("address"), "addresses");
    /// ```
    pub fn pluralize(singular: &str) -> String {
        if singular.is_empty() {
            return String::new();
        }
        if let Some(stem) = singular.strip_suffix('y') {
            if !stem.is_empty() && !stem.ends_with(&['a', 'e', 'i', 'o', 'u'][..]) {
                return format!("{}ies", stem);
            }
        }
        if ["s", "sh", "ch", "x", "z"]
            .iter()
            .any(|suffix| singular.ends_with(suffix))
        {
            return format!("{}es", singular);
        }
        if let Some(stem) = singular.strip_suffix("fe").filter(|s| !s.is_empty()) {
            return format!("{}ves", stem);
        }
        format!("{}s", singular)
    }

    /// Path segment of an entity's collection: plural, dash separated
    ///
    /// Only the last word of a compound name is pluralized.
    pub fn collection_path(entity_type: &str) -> String {
        let (head, last) = match entity_type.rsplit_once('_') {
            Some((head, last)) => (Some(head), last),
            None => (None, entity_type),
        };
        let plural = Self::pluralize(last);
        match head {
            Some(head) => format!("{}-{}", head.replace('_', "-"), plural),
            None => plural,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regular_plurals() {
        assert_eq!(Pluralizer::pluralize("user"), "users");
        assert_eq!(Pluralizer::pluralize("key"), "keys");
        assert_eq!(Pluralizer::pluralize("company"), "companies");
        assert_eq!(Pluralizer::pluralize("box"), "boxes");
        assert_eq!(Pluralizer::pluralize("knife"), "knives");
        assert_eq!(Pluralizer::pluralize(""), "");
    }

    #[test]
    fn test_collection_path() {
        assert_eq!(Pluralizer::collection_path("document"), "documents");
        assert_eq!(Pluralizer::collection_path("api_key"), "api-keys");
        assert_eq!(Pluralizer::collection_path("user_access_policy"), "user-access-policies");
    }
}
