//! Link graph maintenance and graph queries.
//!
//! Reference edges are derived from bracket markup in card bodies and fully
//! rewritten on every save. Reads combine the stored edges (backlinks) with
//! references re-extracted from the in-memory body (direct links), so link
//! display reflects unsaved edits.

use std::collections::HashSet;
use std::time::Instant;

use tracing::{debug, info, instrument};
use uuid::Uuid;

use zettel_core::{extract_references, Card, CardSummary, Result};

use crate::context::EngineContext;

/// Graph membership of one card, computed once and checked per candidate.
#[derive(Debug, Clone)]
pub struct RelationFilter {
    main_id: Uuid,
    reference_ids: HashSet<Uuid>,
}

impl RelationFilter {
    /// True if `candidate` is a structural child of the main card or one of
    /// its references.
    pub fn is_linked_or_related(&self, candidate: &CardSummary) -> bool {
        candidate.parent_id == self.main_id || self.reference_ids.contains(&candidate.id)
    }

    /// Number of references captured.
    pub fn reference_count(&self) -> usize {
        self.reference_ids.len()
    }
}

/// Link Graph Maintainer.
#[derive(Clone)]
pub struct LinkGraph {
    ctx: EngineContext,
}

impl LinkGraph {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// Rewrite the outgoing edges of `source_id` from `body`.
    ///
    /// One atomic replacement: unresolved targets are dropped, a failure
    /// leaves the previous edges intact. Returns the number of edges written.
    #[instrument(skip(self, body), fields(subsystem = "graph", component = "links", op = "rebuild_references", %owner_id, %source_id))]
    pub async fn rebuild_references(
        &self,
        owner_id: Uuid,
        source_id: Uuid,
        body: &str,
    ) -> Result<usize> {
        let start = Instant::now();
        let targets = extract_references(body);
        let written = self
            .ctx
            .links
            .replace_outgoing(owner_id, source_id, &targets)
            .await?;

        info!(
            extracted = targets.len(),
            edge_count = written,
            duration_ms = start.elapsed().as_millis() as u64,
            "References rebuilt"
        );
        Ok(written)
    }

    /// Cards nested under `card_id`, ordered by identifier.
    pub async fn children(&self, owner_id: Uuid, card_id: &str) -> Result<Vec<CardSummary>> {
        self.ctx.cards.children(owner_id, card_id).await
    }

    /// Cards holding a stored edge to `card_id`.
    pub async fn backlinks(&self, owner_id: Uuid, card_id: &str) -> Result<Vec<CardSummary>> {
        self.ctx.links.backlinks(owner_id, card_id).await
    }

    /// Resolve the references in `body`, in order of appearance.
    ///
    /// Reads the text it is given, not the stored edges.
    pub async fn direct_links(&self, owner_id: Uuid, body: &str) -> Result<Vec<CardSummary>> {
        let mut links = Vec::new();
        for target in extract_references(body) {
            match self.ctx.cards.find_by_card_id(owner_id, &target).await? {
                Some(card) => links.push(card),
                None => debug!(
                    subsystem = "graph",
                    component = "links",
                    target = %target,
                    "Unresolved reference skipped"
                ),
            }
        }
        Ok(links)
    }

    /// Direct links and backlinks of `card`, one entry per identifier.
    ///
    /// Sorted by identifier descending; on a collision the entry that sorts
    /// first is kept (stable sort, direct links ahead of backlinks).
    #[instrument(skip(self, card), fields(subsystem = "graph", component = "links", op = "references", %owner_id, card_id = %card.card_id))]
    pub async fn references(&self, owner_id: Uuid, card: &Card) -> Result<Vec<CardSummary>> {
        let mut all = self.direct_links(owner_id, &card.body).await?;
        all.extend(self.backlinks(owner_id, &card.card_id).await?);

        all.sort_by(|a, b| b.card_id.cmp(&a.card_id));
        all.dedup_by(|b, a| a.card_id == b.card_id);

        debug!(result_count = all.len(), "References resolved");
        Ok(all)
    }

    /// Snapshot of `main`'s graph neighbourhood for candidate filtering.
    pub async fn relation_filter(&self, owner_id: Uuid, main: &Card) -> Result<RelationFilter> {
        let references = self.references(owner_id, main).await?;
        Ok(RelationFilter {
            main_id: main.id,
            reference_ids: references.into_iter().map(|c| c.id).collect(),
        })
    }

    /// True if `candidate` is a child of `main` or among its references.
    pub async fn is_linked_or_related(
        &self,
        owner_id: Uuid,
        main: &Card,
        candidate: &CardSummary,
    ) -> Result<bool> {
        Ok(self
            .relation_filter(owner_id, main)
            .await?
            .is_linked_or_related(candidate))
    }
}
