//! Integration tests for the Postgres record store and change feed
//!
//! Requires `DATABASE_URL` pointing at a database whose role is not a
//! superuser (superusers bypass row-level security). Ignored by default.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use backend::{
    ChangeEvent, ChangeFeed, ChangeKind, Column, EventMask, Filter, MemoryBackend, NewBookmark,
    Order, Principal, RecordStore, Table,
    feed::PgChangeFeed,
    store::PgRecordStore,
};
use common::database::{DatabaseConfig, init_pool, migrate};
use sqlx::PgPool;
use tokio::sync::mpsc;
use uuid::Uuid;

async fn create_user(pool: &PgPool) -> Result<Principal> {
    let email = format!("{}@example.com", Uuid::new_v4());
    let user_id: Uuid = sqlx::query_scalar(
        "INSERT INTO users (email, provider, provider_subject) VALUES ($1, 'google', $1) RETURNING id",
    )
    .bind(&email)
    .fetch_one(pool)
    .await?;
    Ok(Principal { user_id, email })
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL instance"]
async fn test_row_level_security_and_change_feed() -> Result<()> {
    let pool = init_pool(&DatabaseConfig::from_env()?).await?;
    migrate(&pool).await?;

    let alice = create_user(&pool).await?;
    let bob = create_user(&pool).await?;

    // The in-process backend only acts as the identity here.
    let identity = Arc::new(MemoryBackend::new(alice.clone()));
    let store = PgRecordStore::new(pool.clone(), identity.clone());
    let feed = PgChangeFeed::new(pool.clone());

    let (tx, mut rx) = mpsc::unbounded_channel::<ChangeEvent>();
    let handle = feed
        .subscribe(
            Table::Bookmarks,
            Filter::owned_by(alice.user_id),
            EventMask::ALL,
            Box::new(move |event: &ChangeEvent| {
                let _ = tx.send(*event);
            }),
        )
        .await?;

    identity.sign_in_as(bob.clone());
    store
        .insert(
            Table::Bookmarks,
            NewBookmark {
                title: "bob's".to_string(),
                url: "https://bob".to_string(),
                user_id: bob.user_id,
            },
        )
        .await?;

    identity.sign_in_as(alice.clone());
    store
        .insert(
            Table::Bookmarks,
            NewBookmark {
                title: "Paper".to_string(),
                url: "https://a".to_string(),
                user_id: alice.user_id,
            },
        )
        .await?;

    // Writing a row for someone else is refused by the policy.
    let forged = store
        .insert(
            Table::Bookmarks,
            NewBookmark {
                title: "forged".to_string(),
                url: "https://x".to_string(),
                user_id: bob.user_id,
            },
        )
        .await;
    assert!(forged.is_err());

    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await?
        .expect("feed closed");
    assert_eq!(event.kind, ChangeKind::Insert);
    assert_eq!(event.key.user_id, alice.user_id);

    // Alice sees only her row, even without an owner filter.
    let rows = store
        .query(Table::Bookmarks, &Filter::new(), Order::newest_first())
        .await?;
    assert_eq!(rows.len(), 1);
    let paper = rows[0].clone();

    // Deleting Bob's row as Alice removes nothing.
    let removed = store
        .delete(
            Table::Bookmarks,
            &Filter::owned_by(bob.user_id).eq(Column::Title, "bob's"),
        )
        .await?;
    assert_eq!(removed, 0);

    let removed = store
        .delete(
            Table::Bookmarks,
            &Filter::owned_by(alice.user_id).eq(Column::Id, paper.id),
        )
        .await?;
    assert_eq!(removed, 1);

    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await?
        .expect("feed closed");
    assert_eq!(event.kind, ChangeKind::Delete);
    assert_eq!(event.key.id, paper.id);

    feed.unsubscribe(handle);
    assert_eq!(feed.active_subscriptions(), 0);
    Ok(())
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL instance"]
async fn test_long_bookmark_insert_is_notified() -> Result<()> {
    let pool = init_pool(&DatabaseConfig::from_env()?).await?;
    migrate(&pool).await?;

    let owner = create_user(&pool).await?;
    let identity = Arc::new(MemoryBackend::new(owner.clone()));
    identity.sign_in_as(owner.clone());
    let store = PgRecordStore::new(pool.clone(), identity);
    let feed = PgChangeFeed::new(pool.clone());

    let (tx, mut rx) = mpsc::unbounded_channel::<ChangeEvent>();
    let handle = feed
        .subscribe(
            Table::Bookmarks,
            Filter::owned_by(owner.user_id),
            EventMask::ALL,
            Box::new(move |event: &ChangeEvent| {
                let _ = tx.send(*event);
            }),
        )
        .await?;

    // Well past the 8000 byte notification limit.
    let title = "t".repeat(10_000);
    store
        .insert(
            Table::Bookmarks,
            NewBookmark {
                title: title.clone(),
                url: format!("https://example.com/{}", "u".repeat(10_000)),
                user_id: owner.user_id,
            },
        )
        .await?;

    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await?
        .expect("feed closed");
    assert_eq!(event.kind, ChangeKind::Insert);

    let rows = store
        .query(Table::Bookmarks, &Filter::owned_by(owner.user_id), Order::newest_first())
        .await?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, event.key.id);
    assert_eq!(rows[0].title, title);

    feed.unsubscribe(handle);
    Ok(())
}
