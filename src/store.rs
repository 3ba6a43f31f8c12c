use chrono::Utc;
use sqlx::{PgPool, Row};
use tracing::info;

use crate::error::CrawlError;
use crate::rank::RankResult;
use crate::reviews::CollectedReview;
use crate::vault::EncryptedCredential;

/// Persistence collaborator for the crawl core. Only plain data crosses this
/// boundary; no browser-session handle is ever stored or exposed.
#[derive(Clone)]
pub struct RankStore {
    pool: PgPool,
}

// One statement per call: prepared statements take a single command.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS keyword_ranks (
        store_id VARCHAR NOT NULL,
        keyword VARCHAR NOT NULL,
        current_rank INT,
        previous_rank INT,
        last_checked_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (store_id, keyword)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS rank_history (
        id VARCHAR PRIMARY KEY,
        store_id VARCHAR NOT NULL,
        keyword VARCHAR NOT NULL,
        rank INT,
        found BOOLEAN NOT NULL,
        total_scanned INT NOT NULL,
        checked_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS reviews (
        listing_id VARCHAR NOT NULL,
        provider VARCHAR NOT NULL,
        external_review_id VARCHAR NOT NULL,
        review_text TEXT NOT NULL,
        rating INT NOT NULL,
        author_name VARCHAR NOT NULL,
        posted_date VARCHAR,
        raw_payload TEXT NOT NULL,
        collected_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (listing_id, provider, external_review_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS listing_credentials (
        listing_id VARCHAR PRIMARY KEY,
        cipher_text TEXT NOT NULL,
        status VARCHAR NOT NULL DEFAULT 'connected',
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
];

pub async fn init_db(pool: &PgPool) -> Result<(), CrawlError> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

impl RankStore {
    pub fn new(pool: PgPool) -> Self {
        RankStore { pool }
    }

    /// Persist a rank check: roll `current_rank` into `previous_rank` on the
    /// keyword row and append an immutable history record keyed by check
    /// time. A not-found result is stored as a NULL rank, not skipped.
    pub async fn record_rank(
        &self,
        store_id: &str,
        keyword: &str,
        result: &RankResult,
    ) -> Result<(), CrawlError> {
        let rank = result.rank.map(|r| r as i32);
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO keyword_ranks (store_id, keyword, current_rank, previous_rank, last_checked_at)
            VALUES ($1, $2, $3, NULL, $4)
            ON CONFLICT (store_id, keyword) DO UPDATE
            SET previous_rank = keyword_ranks.current_rank,
                current_rank = EXCLUDED.current_rank,
                last_checked_at = EXCLUDED.last_checked_at
            "#,
        )
        .bind(store_id)
        .bind(keyword)
        .bind(rank)
        .bind(now)
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO rank_history (id, store_id, keyword, rank, found, total_scanned, checked_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(store_id)
        .bind(keyword)
        .bind(rank)
        .bind(result.found)
        .bind(result.total_scanned as i32)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Upsert collected reviews on the natural key
    /// `(listing_id, provider, external_review_id)`.
    pub async fn upsert_reviews(
        &self,
        listing_id: &str,
        provider: &str,
        reviews: &[CollectedReview],
    ) -> Result<(), CrawlError> {
        for review in reviews {
            let raw = serde_json::to_string(&review.raw_payload).unwrap_or_default();
            sqlx::query(
                r#"
                INSERT INTO reviews
                    (listing_id, provider, external_review_id, review_text, rating, author_name, posted_date, raw_payload)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (listing_id, provider, external_review_id) DO UPDATE
                SET review_text = EXCLUDED.review_text,
                    rating = EXCLUDED.rating,
                    author_name = EXCLUDED.author_name,
                    posted_date = EXCLUDED.posted_date,
                    raw_payload = EXCLUDED.raw_payload
                "#,
            )
            .bind(listing_id)
            .bind(provider)
            .bind(&review.external_review_id)
            .bind(&review.text)
            .bind(review.rating as i32)
            .bind(&review.author_name)
            .bind(&review.posted_date)
            .bind(raw)
            .execute(&self.pool)
            .await?;
        }
        info!(listing_id, count = reviews.len(), "reviews upserted");
        Ok(())
    }

    pub async fn save_credential(
        &self,
        listing_id: &str,
        cred: &EncryptedCredential,
    ) -> Result<(), CrawlError> {
        sqlx::query(
            r#"
            INSERT INTO listing_credentials (listing_id, cipher_text, status, updated_at)
            VALUES ($1, $2, 'connected', now())
            ON CONFLICT (listing_id) DO UPDATE
            SET cipher_text = EXCLUDED.cipher_text,
                status = 'connected',
                updated_at = now()
            "#,
        )
        .bind(listing_id)
        .bind(&cred.cipher_text)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load_credential(
        &self,
        listing_id: &str,
    ) -> Result<Option<EncryptedCredential>, CrawlError> {
        let row = sqlx::query("SELECT cipher_text FROM listing_credentials WHERE listing_id = $1")
            .bind(listing_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| EncryptedCredential {
            cipher_text: r.get("cipher_text"),
        }))
    }

    /// Authentication failure is a status update on the owning listing, not
    /// an exception on the crawl path.
    pub async fn mark_listing_disconnected(&self, listing_id: &str) -> Result<(), CrawlError> {
        sqlx::query(
            "UPDATE listing_credentials SET status = 'disconnected', updated_at = now() WHERE listing_id = $1",
        )
        .bind(listing_id)
        .execute(&self.pool)
        .await?;
        info!(listing_id, "listing marked disconnected");
        Ok(())
    }
}
