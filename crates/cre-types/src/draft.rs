use serde::{Deserialize, Serialize};

use crate::content::ContentFingerprint;
use crate::error::TypeError;
use crate::ids::{ItemId, UserId};

/// Caller-supplied content for a new post.
///
/// `images` holds raw image values; they are resolved to canonical URLs
/// before anything is stored or sent.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostDraft {
    pub author_id: UserId,
    pub author: String,
    pub category: String,
    pub title: String,
    pub content: String,
    pub images: Vec<String>,
}

impl PostDraft {
    /// A post needs an author, a category and a title.
    pub fn validate(&self) -> Result<(), TypeError> {
        if self.author_id.trim().is_empty() {
            return Err(TypeError::blank("author_id"));
        }
        if self.category.trim().is_empty() {
            return Err(TypeError::blank("category"));
        }
        if self.title.trim().is_empty() {
            return Err(TypeError::blank("title"));
        }
        Ok(())
    }

    pub fn fingerprint(&self) -> ContentFingerprint {
        ContentFingerprint::new(&self.author_id, &self.category, &self.title, &self.content)
    }
}

/// Caller-supplied content for a new comment or contest entry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentDraft {
    pub post_id: ItemId,
    pub author_id: UserId,
    pub author: String,
    pub content: String,
    pub image: Option<String>,
}

impl CommentDraft {
    /// A comment needs text or an image.
    pub fn validate(&self) -> Result<(), TypeError> {
        if self.post_id.trim().is_empty() {
            return Err(TypeError::blank("post_id"));
        }
        if self.author_id.trim().is_empty() {
            return Err(TypeError::blank("author_id"));
        }
        let has_image = self
            .image
            .as_deref()
            .is_some_and(|raw| !raw.trim().is_empty());
        if self.content.trim().is_empty() && !has_image {
            return Err(TypeError::Validation {
                field: "content",
                reason: "a comment needs text or an image".into(),
            });
        }
        Ok(())
    }
}

/// Partial update of a post.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditPatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub images: Option<Vec<String>>,
}

impl EditPatch {
    pub fn validate(&self) -> Result<(), TypeError> {
        if self.title.is_none() && self.content.is_none() && self.images.is_none() {
            return Err(TypeError::Validation {
                field: "patch",
                reason: "nothing to update".into(),
            });
        }
        if self.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(TypeError::blank("title"));
        }
        Ok(())
    }

    /// Apply the patch on top of a draft (used for posts that only exist
    /// locally).
    pub fn apply_to_draft(&self, draft: &mut PostDraft) {
        if let Some(title) = &self.title {
            draft.title = title.clone();
        }
        if let Some(content) = &self.content {
            draft.content = content.clone();
        }
        if let Some(images) = &self.images {
            draft.images = images.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> PostDraft {
        PostDraft {
            author_id: "u1".into(),
            author: "Ada".into(),
            category: "community".into(),
            title: "Hello".into(),
            content: "First post".into(),
            images: vec![],
        }
    }

    #[test]
    fn valid_post_draft() {
        assert!(draft().validate().is_ok());
    }

    #[test]
    fn blank_title_is_rejected() {
        let mut d = draft();
        d.title = "   ".into();
        let err = d.validate().unwrap_err();
        assert!(matches!(err, TypeError::Validation { field: "title", .. }));
    }

    #[test]
    fn blank_category_is_rejected() {
        let mut d = draft();
        d.category.clear();
        assert!(d.validate().is_err());
    }

    #[test]
    fn comment_needs_text_or_image() {
        let mut c = CommentDraft {
            post_id: "p1".into(),
            author_id: "u1".into(),
            author: "Ada".into(),
            content: " ".into(),
            image: None,
        };
        assert!(c.validate().is_err());
        c.image = Some("uploads/a.png".into());
        assert!(c.validate().is_ok());
        c.image = None;
        c.content = "nice".into();
        assert!(c.validate().is_ok());
    }

    #[test]
    fn empty_patch_is_rejected() {
        assert!(EditPatch::default().validate().is_err());
        let p = EditPatch {
            content: Some("new".into()),
            ..Default::default()
        };
        assert!(p.validate().is_ok());
    }

    #[test]
    fn patch_applies_to_draft() {
        let mut d = draft();
        let p = EditPatch {
            title: Some("Renamed".into()),
            images: Some(vec!["a.png".into()]),
            ..Default::default()
        };
        p.apply_to_draft(&mut d);
        assert_eq!(d.title, "Renamed");
        assert_eq!(d.content, "First post");
        assert_eq!(d.images, vec!["a.png".to_string()]);
    }
}
