//! Integration tests for the settlement core
//!
//! These tests require a running Postgres instance.
//! Run with: DATABASE_URL=postgres://... cargo test --test settlement_integration_test -- --ignored

use std::sync::Arc;

use coursepay_backend::database::purchase_repository::{NewPurchase, PurchaseRepository};
use coursepay_backend::database::{init_pool, PoolConfig};
use coursepay_backend::payments::dispatcher::{DispatchOutcome, WebhookDispatcher};
use coursepay_backend::payments::registry::ProviderRegistry;
use coursepay_backend::payments::types::Provider;
use coursepay_backend::payments::LoggingEnrollmentNotifier;
use sqlx::PgPool;
use uuid::Uuid;

async fn setup_db() -> PgPool {
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = init_pool(&database_url, Some(PoolConfig::default()))
        .await
        .expect("Failed to init DB pool");
    ensure_schema(&pool).await;
    pool
}

async fn ensure_schema(pool: &PgPool) {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS purchases (
            id UUID PRIMARY KEY,
            user_id UUID NOT NULL,
            course_id UUID NOT NULL,
            provider TEXT NOT NULL,
            provider_transaction_id TEXT,
            provider_session_ref TEXT,
            amount BIGINT NOT NULL,
            currency TEXT NOT NULL,
            discount_amount BIGINT NOT NULL DEFAULT 0,
            platform_share BIGINT NOT NULL DEFAULT 0,
            instructor_share BIGINT NOT NULL DEFAULT 0,
            coupon_id UUID,
            status TEXT NOT NULL,
            failure_reason TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            confirmed_at TIMESTAMPTZ,
            refunded_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await
    .expect("Failed to create purchases table");

    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS purchases_provider_tx_idx \
         ON purchases (provider, provider_transaction_id) \
         WHERE provider_transaction_id IS NOT NULL",
    )
    .execute(pool)
    .await
    .expect("Failed to create idempotency index");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS coupons (
            id UUID PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            discount_type TEXT NOT NULL,
            discount_value BIGINT NOT NULL,
            min_purchase BIGINT,
            max_discount BIGINT,
            max_uses INT,
            used_count INT NOT NULL DEFAULT 0,
            start_date TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            expiry_date TIMESTAMPTZ,
            course_id UUID,
            is_active BOOLEAN NOT NULL DEFAULT TRUE
        )
        "#,
    )
    .execute(pool)
    .await
    .expect("Failed to create coupons table");
}

fn dispatcher(pool: &PgPool) -> WebhookDispatcher {
    WebhookDispatcher::new(
        Arc::new(ProviderRegistry::new()),
        Arc::new(PurchaseRepository::new(pool.clone())),
        Arc::new(LoggingEnrollmentNotifier),
    )
}

async fn open_pending(
    pool: &PgPool,
    session_ref: &str,
    coupon_id: Option<Uuid>,
) -> coursepay_backend::database::purchase_repository::Purchase {
    let repo = PurchaseRepository::new(pool.clone());
    let purchase = repo
        .create_pending(&NewPurchase {
            user_id: Uuid::new_v4(),
            course_id: Uuid::new_v4(),
            provider: Provider::Card.as_str().to_string(),
            amount: 20000,
            currency: "USD".to_string(),
            discount_amount: 5000,
            platform_share: 3000,
            instructor_share: 12000,
            coupon_id,
        })
        .await
        .expect("Failed to open pending purchase");
    repo.attach_session_ref(purchase.id, session_ref)
        .await
        .expect("Failed to attach session ref");
    purchase
}

async fn insert_coupon(pool: &PgPool, code: &str, max_uses: Option<i32>) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO coupons \
         (id, code, discount_type, discount_value, max_uses, used_count, start_date, is_active) \
         VALUES ($1, $2, 'fixed', 5000, $3, 0, NOW() - INTERVAL '1 day', TRUE)",
    )
    .bind(id)
    .bind(code)
    .bind(max_uses)
    .execute(pool)
    .await
    .expect("Failed to insert coupon");
    id
}

async fn used_count(pool: &PgPool, coupon_id: Uuid) -> i32 {
    sqlx::query_scalar("SELECT used_count FROM coupons WHERE id = $1")
        .fetch_one(pool)
        .await
        .expect("Failed to read used_count")
}

#[tokio::test]
#[ignore] // Requires database running
async fn confirmation_applies_once_then_replays() {
    let pool = setup_db().await;
    let dispatcher = dispatcher(&pool);
    let repo = PurchaseRepository::new(pool.clone());

    let session_ref = format!("sess_{}", Uuid::new_v4());
    let tx_id = format!("tx_{}", Uuid::new_v4());
    let purchase = open_pending(&pool, &session_ref, None).await;

    let first = dispatcher
        .apply_confirmation(Provider::Card, &session_ref, &tx_id, 15000)
        .await
        .expect("First delivery must apply");
    assert_eq!(first, DispatchOutcome::Applied);

    let second = dispatcher
        .apply_confirmation(Provider::Card, &session_ref, &tx_id, 15000)
        .await
        .expect("Duplicate delivery must be tolerated");
    assert_eq!(second, DispatchOutcome::Replay);

    let row = repo
        .find_by_id(purchase.id)
        .await
        .expect("Lookup failed")
        .expect("Purchase must exist");
    assert_eq!(row.status, "completed");
    assert_eq!(row.provider_transaction_id.as_deref(), Some(tx_id.as_str()));
    assert!(row.confirmed_at.is_some());
    // Reconciliation invariant on the completed row
    assert_eq!(
        row.amount,
        row.discount_amount + row.platform_share + row.instructor_share
    );
}

#[tokio::test]
#[ignore] // Requires database running
async fn concurrent_duplicate_deliveries_complete_exactly_once() {
    let pool = setup_db().await;
    let session_ref = format!("sess_{}", Uuid::new_v4());
    let tx_id = format!("tx_{}", Uuid::new_v4());
    open_pending(&pool, &session_ref, None).await;

    let d1 = Arc::new(dispatcher(&pool));
    let d2 = d1.clone();
    let (s1, t1) = (session_ref.clone(), tx_id.clone());
    let (s2, t2) = (session_ref.clone(), tx_id.clone());

    let (a, b) = tokio::join!(
        tokio::spawn(async move { d1.apply_confirmation(Provider::Card, &s1, &t1, 15000).await }),
        tokio::spawn(async move { d2.apply_confirmation(Provider::Card, &s2, &t2, 15000).await }),
    );

    let outcomes = [
        a.expect("task panicked").expect("delivery must not error"),
        b.expect("task panicked").expect("delivery must not error"),
    ];
    let applied = outcomes
        .iter()
        .filter(|o| **o == DispatchOutcome::Applied)
        .count();
    assert_eq!(applied, 1, "exactly one delivery may apply: {:?}", outcomes);
}

#[tokio::test]
#[ignore] // Requires database running
async fn coupon_race_fails_the_loser() {
    let pool = setup_db().await;
    let dispatcher = dispatcher(&pool);
    let repo = PurchaseRepository::new(pool.clone());

    let coupon_id = insert_coupon(&pool, &format!("RACE-{}", Uuid::new_v4()), Some(1)).await;

    let ref_a = format!("sess_{}", Uuid::new_v4());
    let ref_b = format!("sess_{}", Uuid::new_v4());
    let winner = open_pending(&pool, &ref_a, Some(coupon_id)).await;
    let loser = open_pending(&pool, &ref_b, Some(coupon_id)).await;

    let first = dispatcher
        .apply_confirmation(Provider::Card, &ref_a, &format!("tx_{}", Uuid::new_v4()), 15000)
        .await
        .expect("Winner must settle");
    assert_eq!(first, DispatchOutcome::Applied);

    let second = dispatcher
        .apply_confirmation(Provider::Card, &ref_b, &format!("tx_{}", Uuid::new_v4()), 15000)
        .await
        .expect("Loser must settle without erroring");
    assert_eq!(second, DispatchOutcome::CouponExhausted);

    assert_eq!(used_count(&pool, coupon_id).await, 1);

    let winner_row = repo.find_by_id(winner.id).await.unwrap().unwrap();
    assert_eq!(winner_row.status, "completed");

    let loser_row = repo.find_by_id(loser.id).await.unwrap().unwrap();
    assert_eq!(loser_row.status, "failed");
    assert_eq!(loser_row.failure_reason.as_deref(), Some("coupon_exhausted"));
}

#[tokio::test]
#[ignore] // Requires database running
async fn failed_purchase_leaves_coupon_untouched() {
    let pool = setup_db().await;
    let repo = PurchaseRepository::new(pool.clone());

    let coupon_id = insert_coupon(&pool, &format!("IDLE-{}", Uuid::new_v4()), Some(10)).await;
    let session_ref = format!("sess_{}", Uuid::new_v4());
    let purchase = open_pending(&pool, &session_ref, Some(coupon_id)).await;

    let failed = repo
        .fail_if_pending(purchase.id, "provider_declined")
        .await
        .expect("CAS must not error");
    assert!(failed);
    assert_eq!(used_count(&pool, coupon_id).await, 0);
}

#[tokio::test]
#[ignore] // Requires database running
async fn confirmation_after_failure_is_rejected() {
    let pool = setup_db().await;
    let dispatcher = dispatcher(&pool);
    let repo = PurchaseRepository::new(pool.clone());

    let session_ref = format!("sess_{}", Uuid::new_v4());
    let purchase = open_pending(&pool, &session_ref, None).await;
    repo.fail_if_pending(purchase.id, "timeout")
        .await
        .expect("CAS must not error");

    let result = dispatcher
        .apply_confirmation(Provider::Card, &session_ref, &format!("tx_{}", Uuid::new_v4()), 15000)
        .await;
    assert!(result.is_err(), "failed -> completed must be rejected");

    let row = repo.find_by_id(purchase.id).await.unwrap().unwrap();
    assert_eq!(row.status, "failed");
}

#[tokio::test]
#[ignore] // Requires database running
async fn refund_only_moves_completed_rows() {
    let pool = setup_db().await;
    let dispatcher = dispatcher(&pool);
    let repo = PurchaseRepository::new(pool.clone());

    let session_ref = format!("sess_{}", Uuid::new_v4());
    let tx_id = format!("tx_{}", Uuid::new_v4());
    let purchase = open_pending(&pool, &session_ref, None).await;

    // Refund before completion must not move the row
    assert!(!repo.refund_if_completed(purchase.id).await.unwrap());

    dispatcher
        .apply_confirmation(Provider::Card, &session_ref, &tx_id, 15000)
        .await
        .expect("Confirmation must apply");

    assert!(repo.refund_if_completed(purchase.id).await.unwrap());
    // Second refund is a no-op
    assert!(!repo.refund_if_completed(purchase.id).await.unwrap());

    let row = repo.find_by_id(purchase.id).await.unwrap().unwrap();
    assert_eq!(row.status, "refunded");
    assert!(row.refunded_at.is_some());
    // Shares stay untouched for audit
    assert_eq!(row.platform_share, 3000);
    assert_eq!(row.instructor_share, 12000);
}

#[tokio::test]
#[ignore] // Requires database running
async fn refund_webhook_is_replay_tolerant() {
    let pool = setup_db().await;
    let dispatcher = dispatcher(&pool);

    let session_ref = format!("sess_{}", Uuid::new_v4());
    let tx_id = format!("tx_{}", Uuid::new_v4());
    open_pending(&pool, &session_ref, None).await;

    dispatcher
        .apply_confirmation(Provider::Card, &session_ref, &tx_id, 15000)
        .await
        .expect("Confirmation must apply");

    let repo = PurchaseRepository::new(pool.clone());
    let row = repo
        .find_by_provider_tx(Provider::Card.as_str(), &tx_id)
        .await
        .unwrap()
        .unwrap();
    assert!(repo.refund_if_completed(row.id).await.unwrap());

    // A replayed success webhook for a refunded purchase is an illegal
    // transition, not a silent overwrite
    let result = dispatcher
        .apply_confirmation(Provider::Card, &session_ref, &tx_id, 15000)
        .await;
    assert!(result.is_err());
}
