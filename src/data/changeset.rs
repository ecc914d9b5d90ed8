use super::osm::{Entity, Tags};

pub type ChangesetId = u64;

/// Longest value the API accepts for a changeset tag.
pub const MAX_TAG_LENGTH: usize = 255;

/// The local edit diff to commit: three sequences of entities.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EditDiff {
    pub created: Vec<Entity>,
    pub modified: Vec<Entity>,
    pub deleted: Vec<Entity>,
}

impl EditDiff {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    pub fn len(&self) -> usize {
        self.created.len() + self.modified.len() + self.deleted.len()
    }
}

/// Inputs for the tags attached to a new changeset.
#[derive(Debug, Clone, Default)]
pub struct ChangesetMetadata {
    /// Client version, reported as `created_by = "<generator> <version>"`.
    pub version: String,
    pub comment: Option<String>,
    pub imagery_used: Vec<String>,
    pub host: String,
    pub locale: String,
    pub platform: String,
}

impl ChangesetMetadata {
    pub fn new(version: impl Into<String>) -> Self {
        ChangesetMetadata {
            version: version.into(),
            platform: std::env::consts::OS.to_string(),
            ..Default::default()
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_imagery(mut self, imagery_used: Vec<String>) -> Self {
        self.imagery_used = imagery_used;
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }

    /// Flat tag mapping sent with the changeset create request. Every value is
    /// truncated to [`MAX_TAG_LENGTH`] characters; an empty comment is omitted.
    pub fn tags(&self, generator: &str) -> Tags {
        let mut tags = Tags::new();
        tags.insert("created_by".to_string(), truncate(&format!("{generator} {}", self.version)));
        tags.insert("imagery_used".to_string(), truncate(&self.imagery_used.join(";")));
        tags.insert("host".to_string(), truncate(&self.host));
        tags.insert("locale".to_string(), truncate(&self.locale));
        tags.insert("platform".to_string(), truncate(&self.platform));
        if let Some(comment) = self.comment.as_deref().filter(|c| !c.is_empty()) {
            tags.insert("comment".to_string(), truncate(comment));
        }
        tags
    }
}

/// Truncates on a character boundary.
pub fn truncate(value: &str) -> String {
    value.chars().take(MAX_TAG_LENGTH).collect()
}

/// One entry of a user's changeset history.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangesetSummary {
    pub tags: Tags,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_truncated() {
        let metadata = ChangesetMetadata::new("1.0")
            .with_comment("x".repeat(300))
            .with_imagery(vec!["a".repeat(200), "b".repeat(200)])
            .with_host("é".repeat(300))
            .with_locale("en-GB");
        let tags = metadata.tags("osm-sync");

        assert_eq!(tags["created_by"], "osm-sync 1.0");
        assert_eq!(tags["comment"].len(), 255);
        assert_eq!(tags["imagery_used"].len(), 255);
        assert!(tags["imagery_used"].contains(';'));
        assert_eq!(tags["host"].chars().count(), 255);
        assert_eq!(tags["locale"], "en-GB");
    }

    #[test]
    fn empty_comment_is_omitted() {
        let tags = ChangesetMetadata::new("1.0").with_comment("").tags("osm-sync");
        assert!(!tags.contains_key("comment"));
    }
}
