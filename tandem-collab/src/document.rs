//! Local copy of the shared document.
//!
//! Two values are tracked: the `content` the editing surface shows, and the
//! `baseline`, the last content known to be synchronized with the server.
//! They diverge while local edits are pending and after an echo of our own
//! change arrives while the user has already typed further.

/// Document state owned by the session controller.
#[derive(Debug, Clone, Default)]
pub struct DocumentState {
    document_id: Option<String>,
    content: String,
    baseline: String,
    version: u64,
    last_author: Option<String>,
}

impl DocumentState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Visible content.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Last content known to match the server.
    pub fn baseline(&self) -> &str {
        &self.baseline
    }

    pub fn document_id(&self) -> Option<&str> {
        self.document_id.as_deref()
    }

    /// Advisory server version from the last sync.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// User id of the participant last known to have authored the content.
    pub fn last_author(&self) -> Option<&str> {
        self.last_author.as_deref()
    }

    /// Optimistic local edit; the baseline is untouched until transmission.
    pub fn apply_local(&mut self, content: String, user_id: &str) {
        self.content = content;
        self.last_author = Some(user_id.to_string());
    }

    /// Our content reached the channel.
    pub fn mark_sent(&mut self, content: &str) {
        self.baseline = content.to_string();
    }

    /// Replace both visible content and baseline with a server value.
    pub fn replace(&mut self, content: String, author: Option<&str>) {
        self.baseline.clone_from(&content);
        self.content = content;
        if let Some(author) = author {
            self.last_author = Some(author.to_string());
        }
    }

    /// Move the baseline only, leaving the visible content alone.
    pub fn set_baseline(&mut self, content: String) {
        self.baseline = content;
    }

    /// Show `content` without declaring it synchronized.
    pub fn set_visible(&mut self, content: String) {
        self.content = content;
    }

    pub fn set_document_id(&mut self, document_id: String) {
        self.document_id = Some(document_id);
    }

    pub fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    /// Whether the visible content differs from the synchronized baseline.
    pub fn is_dirty(&self) -> bool {
        self.content != self.baseline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_edit_is_optimistic() {
        let mut doc = DocumentState::new();
        doc.apply_local("draft".into(), "u1");

        assert_eq!(doc.content(), "draft");
        assert_eq!(doc.baseline(), "");
        assert_eq!(doc.last_author(), Some("u1"));
        assert!(doc.is_dirty());

        doc.mark_sent("draft");
        assert!(!doc.is_dirty());
    }

    #[test]
    fn test_replace_moves_both_values() {
        let mut doc = DocumentState::new();
        doc.apply_local("mine".into(), "u1");
        doc.replace("theirs".into(), Some("u2"));

        assert_eq!(doc.content(), "theirs");
        assert_eq!(doc.baseline(), "theirs");
        assert_eq!(doc.last_author(), Some("u2"));
    }

    #[test]
    fn test_baseline_only_update_keeps_visible_content() {
        let mut doc = DocumentState::new();
        doc.apply_local("typing further".into(), "u1");
        doc.set_baseline("typing".into());

        assert_eq!(doc.content(), "typing further");
        assert_eq!(doc.baseline(), "typing");
    }
}
