//! Tag propagation along the card hierarchy.
//!
//! A card's direct tags are the hashtags in its body plus, at save time, every
//! tag of its parent's ancestor closure not already present by name. Reads
//! compute the closure by walking parent links up to a self-parenting root.

use std::collections::HashSet;
use std::time::Instant;

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use zettel_core::defaults::MAX_ANCESTOR_DEPTH;
use zettel_core::{extract_hashtags, Card, Error, Result, Tag};

use crate::context::EngineContext;

/// Tag Propagation Engine.
#[derive(Clone)]
pub struct TagPropagation {
    ctx: EngineContext,
}

impl TagPropagation {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// Re-derive the direct tags of `card` from its current body.
    ///
    /// Body hashtags come first, followed by inherited names from the
    /// parent's closure. Written with one atomic replacement, so a failure
    /// leaves the previous memberships intact.
    #[instrument(skip(self, card), fields(subsystem = "graph", component = "tags", op = "rebuild_card_tags", %owner_id, card_id = %card.card_id))]
    pub async fn rebuild_card_tags(&self, owner_id: Uuid, card: &Card) -> Result<Vec<Tag>> {
        let start = Instant::now();
        let mut names = extract_hashtags(&card.body);
        let own_count = names.len();

        if !card.is_root() {
            if let Some(parent) = self.ctx.cards.fetch(owner_id, card.parent_id).await? {
                for tag in self.ancestor_tags(owner_id, &parent).await? {
                    if !names.contains(&tag.name) {
                        names.push(tag.name);
                    }
                }
            }
        }

        let tags = self
            .ctx
            .tags
            .replace_for_card(owner_id, card.id, &names)
            .await?;

        info!(
            own_count,
            inherited_count = names.len() - own_count,
            result_count = tags.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Card tags rebuilt"
        );
        Ok(tags)
    }

    /// Tag closure of `card`: ancestors' direct tags first, then its own.
    ///
    /// Duplicate names across levels are kept. The walk stops at a root, a
    /// missing parent, a revisited card or after `MAX_ANCESTOR_DEPTH` steps.
    #[instrument(skip(self, card), fields(subsystem = "graph", component = "tags", op = "ancestor_tags", %owner_id, card_id = %card.card_id))]
    pub async fn ancestor_tags(&self, owner_id: Uuid, card: &Card) -> Result<Vec<Tag>> {
        let mut chain = vec![card.id];
        let mut visited = HashSet::from([card.id]);
        let mut current = card.clone();

        while !current.is_root() {
            if chain.len() > MAX_ANCESTOR_DEPTH {
                warn!(depth = chain.len(), "Ancestor walk hit depth limit");
                break;
            }
            if !visited.insert(current.parent_id) {
                warn!(
                    parent_id = %current.parent_id,
                    "Parent cycle detected, stopping ancestor walk"
                );
                break;
            }
            match self.ctx.cards.fetch(owner_id, current.parent_id).await? {
                Some(parent) => {
                    chain.push(parent.id);
                    current = parent;
                }
                None => {
                    debug!(parent_id = %current.parent_id, "Parent not visible");
                    break;
                }
            }
        }

        let mut closure = Vec::new();
        for card_pk in chain.into_iter().rev() {
            closure.extend(self.ctx.tags.for_card(owner_id, card_pk).await?);
        }
        debug!(result_count = closure.len(), "Ancestor tags collected");
        Ok(closure)
    }

    /// Direct memberships of a card.
    pub async fn card_tags(&self, owner_id: Uuid, card_pk: Uuid) -> Result<Vec<Tag>> {
        self.ctx.tags.for_card(owner_id, card_pk).await
    }

    /// Create a tag, or revive an existing one with the same name.
    ///
    /// A leading `#` is stripped. `color: None` keeps the stored colour.
    pub async fn upsert_tag(&self, owner_id: Uuid, name: &str, color: Option<&str>) -> Result<Tag> {
        let name = name.trim().trim_start_matches('#');
        if name.is_empty() {
            return Err(Error::InvalidInput("tag name is empty".to_string()));
        }
        self.ctx.tags.upsert(owner_id, name, color).await
    }

    /// Non-deleted tags of an owner with card counts.
    pub async fn list_tags(&self, owner_id: Uuid) -> Result<Vec<Tag>> {
        self.ctx.tags.list(owner_id).await
    }

    /// Soft-delete a tag no card carries any more.
    pub async fn soft_delete_tag(&self, owner_id: Uuid, tag_id: Uuid) -> Result<()> {
        let count = self.ctx.tags.card_count(owner_id, tag_id).await?;
        if count > 0 {
            return Err(Error::Conflict(format!(
                "tag is still attached to {} card(s)",
                count
            )));
        }
        self.ctx.tags.soft_delete(owner_id, tag_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestEngine;

    fn names(tags: &[Tag]) -> Vec<&str> {
        tags.iter().map(|t| t.name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_hashtags_become_direct_tags() {
        let t = TestEngine::new();
        let card = t.store.seed_card(t.owner, "1", "One", "hello #world foo#bar");
        let tags = TagPropagation::new(t.ctx.clone());

        let direct = tags.rebuild_card_tags(t.owner, &card).await.unwrap();
        assert_eq!(names(&direct), vec!["world"]);
        assert_eq!(direct[0].color, "black");
    }

    #[tokio::test]
    async fn test_root_closure_is_own_tags() {
        let t = TestEngine::new();
        let root = t.store.seed_card(t.owner, "1", "Root", "#a #b");
        let tags = TagPropagation::new(t.ctx.clone());
        tags.rebuild_card_tags(t.owner, &root).await.unwrap();

        let closure = tags.ancestor_tags(t.owner, &root).await.unwrap();
        let direct = tags.card_tags(t.owner, root.id).await.unwrap();
        assert_eq!(closure, direct);
    }

    #[tokio::test]
    async fn test_parent_tag_propagates_on_save() {
        let t = TestEngine::new();
        let root = t.store.seed_card(t.owner, "1", "Root", "#x");
        let child = t.store.seed_card(t.owner, "1/A", "Child", "untagged");
        let tags = TagPropagation::new(t.ctx.clone());
        tags.rebuild_card_tags(t.owner, &root).await.unwrap();

        assert!(tags.card_tags(t.owner, child.id).await.unwrap().is_empty());
        tags.rebuild_card_tags(t.owner, &child).await.unwrap();

        let closure = tags.ancestor_tags(t.owner, &child).await.unwrap();
        assert!(names(&closure).contains(&"x"));
        let direct = tags.card_tags(t.owner, child.id).await.unwrap();
        assert_eq!(names(&direct), vec!["x"]);
    }

    #[tokio::test]
    async fn test_closure_keeps_duplicates_parents_first() {
        let t = TestEngine::new();
        let root = t.store.seed_card(t.owner, "1", "Root", "#x");
        let child = t.store.seed_card(t.owner, "1/A", "Child", "#y");
        let grandchild = t.store.seed_card(t.owner, "1/A.1", "Grandchild", "#z");
        let tags = TagPropagation::new(t.ctx.clone());
        for card in [&root, &child, &grandchild] {
            tags.rebuild_card_tags(t.owner, card).await.unwrap();
        }

        let closure = tags.ancestor_tags(t.owner, &grandchild).await.unwrap();
        // root: x | child: x, y | grandchild: x, y, z
        assert_eq!(names(&closure), vec!["x", "x", "y", "x", "y", "z"]);
    }

    #[tokio::test]
    async fn test_inherited_names_not_duplicated_in_direct_tags() {
        let t = TestEngine::new();
        let root = t.store.seed_card(t.owner, "1", "Root", "#x");
        let child = t.store.seed_card(t.owner, "1/A", "Child", "#x #x");
        let tags = TagPropagation::new(t.ctx.clone());
        tags.rebuild_card_tags(t.owner, &root).await.unwrap();

        let direct = tags.rebuild_card_tags(t.owner, &child).await.unwrap();
        assert_eq!(names(&direct), vec!["x"]);
    }

    #[tokio::test]
    async fn test_corrupted_parent_cycle_terminates() {
        let t = TestEngine::new();
        t.store.seed_card(t.owner, "1", "Root", "");
        let a = t.store.seed_card(t.owner, "1/A", "A", "#a");
        let b = t.store.seed_card(t.owner, "1/A.1", "B", "#b");
        t.store.set_parent(a.id, b.id);
        let tags = TagPropagation::new(t.ctx.clone());
        tags.rebuild_card_tags(t.owner, &b).await.unwrap();

        // b -> a -> b
        let closure = tags.ancestor_tags(t.owner, &b).await.unwrap();
        assert!(names(&closure).contains(&"b"));
    }

    #[tokio::test]
    async fn test_missing_parent_ends_walk() {
        let t = TestEngine::new();
        let mut orphan = t.store.seed_card(t.owner, "9/Z", "Orphan", "#o");
        orphan.parent_id = Uuid::now_v7();
        let tags = TagPropagation::new(t.ctx.clone());
        tags.rebuild_card_tags(t.owner, &orphan).await.unwrap();

        let closure = tags.ancestor_tags(t.owner, &orphan).await.unwrap();
        assert_eq!(names(&closure), vec!["o"]);
    }

    #[tokio::test]
    async fn test_failed_rebuild_keeps_memberships() {
        let t = TestEngine::new();
        let card = t.store.seed_card(t.owner, "1", "One", "#keep");
        let tags = TagPropagation::new(t.ctx.clone());
        tags.rebuild_card_tags(t.owner, &card).await.unwrap();

        t.store.set_fail_writes(true);
        let mut edited = card.clone();
        edited.body = "#other".to_string();
        assert!(tags.rebuild_card_tags(t.owner, &edited).await.is_err());

        let direct = tags.card_tags(t.owner, card.id).await.unwrap();
        assert_eq!(names(&direct), vec!["keep"]);
    }

    #[tokio::test]
    async fn test_upsert_revives_soft_deleted_tag() {
        let t = TestEngine::new();
        let tags = TagPropagation::new(t.ctx.clone());

        let created = tags.upsert_tag(t.owner, "#idea", Some("red")).await.unwrap();
        tags.soft_delete_tag(t.owner, created.id).await.unwrap();
        assert!(tags.list_tags(t.owner).await.unwrap().is_empty());

        let revived = tags.upsert_tag(t.owner, "idea", None).await.unwrap();
        assert_eq!(revived.id, created.id);
        assert_eq!(revived.color, "red");
        assert_eq!(t.store.all_tags().len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_rejects_empty_name() {
        let t = TestEngine::new();
        let tags = TagPropagation::new(t.ctx.clone());
        let err = tags.upsert_tag(t.owner, "  # ", None).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_soft_delete_refused_while_in_use() {
        let t = TestEngine::new();
        let card = t.store.seed_card(t.owner, "1", "One", "#busy");
        let tags = TagPropagation::new(t.ctx.clone());
        let direct = tags.rebuild_card_tags(t.owner, &card).await.unwrap();

        let err = tags
            .soft_delete_tag(t.owner, direct[0].id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        let listed = tags.list_tags(t.owner).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].card_count, 1);
    }
}
