//! PostgreSQL integration tests for the card graph repositories.
//!
//! Ignored by default; run against a database with
//! `DATABASE_URL=... cargo test -p zettel-db -- --ignored`.

use zettel_core::{CardRepository, CardUpdate, Error, LinkRepository, NewCard, TagRepository};
use zettel_db::test_fixtures::TestDatabase;

fn targets(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

async fn setup() -> TestDatabase {
    let _ = dotenvy::dotenv();
    TestDatabase::new().await
}

#[tokio::test]
#[ignore]
async fn test_root_card_parents_itself() {
    let t = setup().await;
    let root = t.card("1", "Root", "").await;
    let child = t.card("1/A", "Child", "").await;

    assert!(root.is_root());
    assert_eq!(child.parent_id, root.id);

    t.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn test_duplicate_identifier_is_conflict() {
    let t = setup().await;
    t.card("7", "First", "").await;

    let id = uuid::Uuid::now_v7();
    let result = t
        .db
        .cards
        .insert(NewCard {
            id,
            owner_id: t.owner_id,
            card_id: "7".to_string(),
            title: "Second".to_string(),
            body: String::new(),
            parent_id: id,
        })
        .await;
    assert!(matches!(result, Err(Error::Conflict(_))));

    t.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn test_children_use_strict_prefix() {
    let t = setup().await;
    t.card("1", "Root", "").await;
    t.card("1/A", "A", "").await;
    t.card("1/A.1", "A1", "").await;
    t.card("10", "Other root", "").await;

    let children: Vec<String> = t
        .db
        .cards
        .children(t.owner_id, "1")
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.card_id)
        .collect();
    assert_eq!(children, vec!["1/A", "1/A.1"]);

    let children: Vec<String> = t
        .db
        .cards
        .children(t.owner_id, "1/A")
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.card_id)
        .collect();
    assert_eq!(children, vec!["1/A.1"]);

    t.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn test_replace_outgoing_drops_unresolved_and_is_idempotent() {
    let t = setup().await;
    let one = t.card("1", "One", "[2] [missing]").await;
    let two = t.card("2", "Two", "").await;

    let body_targets = targets(&["2", "missing"]);
    let written = t
        .db
        .links
        .replace_outgoing(t.owner_id, one.id, &body_targets)
        .await
        .unwrap();
    assert_eq!(written, 1);

    t.db
        .links
        .replace_outgoing(t.owner_id, one.id, &body_targets)
        .await
        .unwrap();
    let edges = t.db.links.outgoing(one.id).await.unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].target_id, two.id);

    let backlinks = t.db.links.backlinks(t.owner_id, "2").await.unwrap();
    assert_eq!(backlinks.len(), 1);
    assert_eq!(backlinks[0].card_id, "1");

    t.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn test_soft_deleted_card_hidden_from_lookups() {
    let t = setup().await;
    let card = t.card("3", "Gone", "").await;
    t.db.cards.soft_delete(t.owner_id, card.id).await.unwrap();

    assert!(t.db.cards.fetch(t.owner_id, card.id).await.unwrap().is_none());
    assert!(!t
        .db
        .cards
        .identifier_in_use(t.owner_id, "3", None)
        .await
        .unwrap());

    // Identifier is free again.
    t.card("3", "Reused", "").await;

    t.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn test_update_and_max_numeric_identifier() {
    let t = setup().await;
    let card = t.card("4", "Four", "").await;
    t.card("12", "Twelve", "").await;
    t.card("12/A", "Child", "").await;

    assert_eq!(
        t.db.cards.max_numeric_identifier(t.owner_id).await.unwrap(),
        Some(12)
    );

    let updated = t
        .db
        .cards
        .update(
            t.owner_id,
            card.id,
            CardUpdate {
                card_id: "40".to_string(),
                title: "Forty".to_string(),
                body: "new".to_string(),
                parent_id: card.id,
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.card_id, "40");
    assert_eq!(
        t.db.cards.max_numeric_identifier(t.owner_id).await.unwrap(),
        Some(40)
    );

    t.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn test_tag_revive_keeps_colour_and_counts() {
    let t = setup().await;
    let card = t.card("5", "Tagged", "#x").await;

    let tag = t
        .db
        .tags
        .upsert(t.owner_id, "x", Some("red"))
        .await
        .unwrap();
    t.db.tags.soft_delete(t.owner_id, tag.id).await.unwrap();
    assert!(t.db.tags.list(t.owner_id).await.unwrap().is_empty());

    let tags = t
        .db
        .tags
        .replace_for_card(t.owner_id, card.id, &targets(&["x", "x", "y"]))
        .await
        .unwrap();
    let names: Vec<&str> = tags.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["x", "y"]);
    assert_eq!(tags[0].id, tag.id);
    assert_eq!(tags[0].color, "red");
    assert_eq!(tags[1].color, "black");

    let listed = t.db.tags.list(t.owner_id).await.unwrap();
    assert!(listed.iter().all(|t| t.card_count == 1));

    t.db.cards.soft_delete(t.owner_id, card.id).await.unwrap();
    assert_eq!(t.db.tags.card_count(t.owner_id, tag.id).await.unwrap(), 0);

    t.cleanup().await;
}
