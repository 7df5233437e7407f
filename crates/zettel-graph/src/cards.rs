//! Card save pipeline and full read representation.

use std::time::Instant;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use zettel_core::defaults::FIRST_ROOT_IDENTIFIER;
use zettel_core::{
    parent_identifier, Card, CardUpdate, CardView, EditCardRequest, Error, NewCard, Result,
};

use crate::context::EngineContext;
use crate::links::LinkGraph;
use crate::tags::TagPropagation;

/// Remove all whitespace from a textual identifier.
pub fn normalize_card_id(card_id: &str) -> String {
    card_id.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Creates, edits and deletes cards, keeping the derived graph in step.
///
/// After every persisted change the reference edges and the tag memberships
/// are rebuilt as two separate atomic writes, then an embedding recompute is
/// scheduled.
#[derive(Clone)]
pub struct CardService {
    ctx: EngineContext,
    links: LinkGraph,
    tags: TagPropagation,
}

impl CardService {
    pub fn new(ctx: EngineContext) -> Self {
        Self {
            links: LinkGraph::new(ctx.clone()),
            tags: TagPropagation::new(ctx.clone()),
            ctx,
        }
    }

    pub fn links(&self) -> &LinkGraph {
        &self.links
    }

    pub fn tags(&self) -> &TagPropagation {
        &self.tags
    }

    /// Internal identity of the structural parent, or `self_id` for roots
    /// and unresolvable parents.
    async fn resolve_parent(&self, owner_id: Uuid, card_id: &str, self_id: Uuid) -> Result<Uuid> {
        let parent_card_id = parent_identifier(card_id);
        if parent_card_id == card_id {
            return Ok(self_id);
        }
        Ok(self
            .ctx
            .cards
            .find_by_card_id(owner_id, &parent_card_id)
            .await?
            .map(|p| p.id)
            .unwrap_or(self_id))
    }

    async fn ensure_unique(&self, owner_id: Uuid, card_id: &str, exclude: Option<Uuid>) -> Result<()> {
        if self
            .ctx
            .cards
            .identifier_in_use(owner_id, card_id, exclude)
            .await?
        {
            return Err(Error::Conflict(format!(
                "card identifier '{}' is already in use",
                card_id
            )));
        }
        Ok(())
    }

    /// Rebuild derived state for a persisted card.
    async fn after_save(&self, owner_id: Uuid, card: &Card) -> Result<()> {
        self.links
            .rebuild_references(owner_id, card.id, &card.body)
            .await?;
        self.tags.rebuild_card_tags(owner_id, card).await?;

        if let Err(e) = self.ctx.scheduler.schedule(owner_id, card.id) {
            warn!(
                card_id = %card.card_id,
                error = %e,
                "Embedding recompute not scheduled"
            );
        }
        Ok(())
    }

    /// Create a card and derive its references and tags.
    #[instrument(skip(self, request), fields(subsystem = "graph", component = "cards", op = "create_card", %owner_id))]
    pub async fn create_card(&self, owner_id: Uuid, request: EditCardRequest) -> Result<Card> {
        let start = Instant::now();
        let card_id = normalize_card_id(&request.card_id);
        self.ensure_unique(owner_id, &card_id, None).await?;

        let id = Uuid::now_v7();
        let parent_id = self.resolve_parent(owner_id, &card_id, id).await?;
        let card = self
            .ctx
            .cards
            .insert(NewCard {
                id,
                owner_id,
                card_id,
                title: request.title,
                body: request.body,
                parent_id,
            })
            .await?;

        self.after_save(owner_id, &card).await?;
        info!(
            card_id = %card.card_id,
            is_root = card.is_root(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Card created"
        );
        Ok(card)
    }

    /// Overwrite a card and re-derive its references and tags.
    ///
    /// Children are not re-parented and do not inherit new tags until they
    /// are saved themselves.
    #[instrument(skip(self, request), fields(subsystem = "graph", component = "cards", op = "update_card", %owner_id, %id))]
    pub async fn update_card(
        &self,
        owner_id: Uuid,
        id: Uuid,
        request: EditCardRequest,
    ) -> Result<Card> {
        let start = Instant::now();
        if self.ctx.cards.fetch(owner_id, id).await?.is_none() {
            return Err(Error::CardNotFound(id));
        }

        let card_id = normalize_card_id(&request.card_id);
        self.ensure_unique(owner_id, &card_id, Some(id)).await?;
        let parent_id = self.resolve_parent(owner_id, &card_id, id).await?;

        let card = self
            .ctx
            .cards
            .update(
                owner_id,
                id,
                CardUpdate {
                    card_id,
                    title: request.title,
                    body: request.body,
                    parent_id,
                },
            )
            .await?;

        self.after_save(owner_id, &card).await?;
        info!(
            card_id = %card.card_id,
            duration_ms = start.elapsed().as_millis() as u64,
            "Card updated"
        );
        Ok(card)
    }

    /// Soft-delete a card nothing else depends on.
    ///
    /// Refused with `Conflict` while other cards link to it or nest under it.
    #[instrument(skip(self), fields(subsystem = "graph", component = "cards", op = "delete_card"))]
    pub async fn delete_card(&self, owner_id: Uuid, id: Uuid) -> Result<()> {
        let card = self
            .ctx
            .cards
            .fetch(owner_id, id)
            .await?
            .ok_or(Error::CardNotFound(id))?;

        let backlinks = self.links.backlinks(owner_id, &card.card_id).await?;
        if !backlinks.is_empty() {
            return Err(Error::Conflict(format!(
                "card '{}' is referenced by {} card(s)",
                card.card_id,
                backlinks.len()
            )));
        }
        let children = self.links.children(owner_id, &card.card_id).await?;
        if !children.is_empty() {
            return Err(Error::Conflict(format!(
                "card '{}' has {} child card(s)",
                card.card_id,
                children.len()
            )));
        }

        self.ctx.cards.soft_delete(owner_id, id).await?;
        info!(card_id = %card.card_id, "Card deleted");
        Ok(())
    }

    /// Card with its parent, children, references and ancestor tags.
    #[instrument(skip(self), fields(subsystem = "graph", component = "cards", op = "card_view"))]
    pub async fn card_view(&self, owner_id: Uuid, id: Uuid) -> Result<CardView> {
        let card = self
            .ctx
            .cards
            .fetch(owner_id, id)
            .await?
            .ok_or(Error::CardNotFound(id))?;

        let parent = if card.is_root() {
            None
        } else {
            self.ctx
                .cards
                .fetch(owner_id, card.parent_id)
                .await?
                .map(|p| p.summary())
        };
        let children = self.links.children(owner_id, &card.card_id).await?;
        let references = self.links.references(owner_id, &card).await?;
        let tags = self.tags.ancestor_tags(owner_id, &card).await?;

        Ok(CardView {
            card,
            parent,
            children,
            references,
            tags,
        })
    }

    /// Identifier for a new root card: one past the largest numeric one.
    pub async fn next_root_identifier(&self, owner_id: Uuid) -> Result<String> {
        Ok(match self.ctx.cards.max_numeric_identifier(owner_id).await? {
            Some(max) => max.saturating_add(1).to_string(),
            None => FIRST_ROOT_IDENTIFIER.to_string(),
        })
    }
}
