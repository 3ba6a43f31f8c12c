use std::env;

use anyhow::{anyhow, Context};
use dotenv::dotenv;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

use rank_crawler::{
    collect, resolve_rank, store, BrowserSession, Config, CredentialVault, ProxySelector,
    RankQuery, RankStore, StealthProfile,
};

const PROVIDER: &str = "naver";
const DEFAULT_MAX_RESULTS: usize = 300;
const DEFAULT_MAX_REVIEWS: usize = 100;

fn usage() -> ! {
    eprintln!("usage:");
    eprintln!("  rank-crawler rank <store_id> <keyword> <target_external_id> [max_results]");
    eprintln!("  rank-crawler reviews <listing_id> [max_reviews]");
    eprintln!("  rank-crawler verify <listing_id>");
    std::process::exit(2);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    // Fail-fast: a missing credential key or database URL is an operator
    // error, not something to limp along without.
    let config = Config::from_env()?;

    let pool = {
        let mut attempts = 0;
        loop {
            match PgPoolOptions::new()
                .max_connections(5)
                .connect(&config.database_url)
                .await
            {
                Ok(pool) => break pool,
                Err(e) => {
                    attempts += 1;
                    if attempts >= 15 {
                        return Err(e).context("database unreachable after 15 attempts");
                    }
                    warn!(error = %e, attempt = attempts, "database connect failed, retrying in 2s");
                    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
                }
            }
        }
    };
    store::init_db(&pool).await?;
    let store = RankStore::new(pool);

    let proxies = ProxySelector::new(config.proxy_servers.as_deref());
    let vault = CredentialVault::new(&config.credential_key);

    let args: Vec<String> = env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("rank") => {
            if args.len() < 4 {
                usage();
            }
            let store_id = args[1].clone();
            let query = RankQuery {
                keyword: args[2].clone(),
                target_external_id: args[3].clone(),
                max_results: args
                    .get(4)
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_MAX_RESULTS),
            };

            let result =
                resolve_rank(query.clone(), StealthProfile::mobile(), proxies.select()).await?;
            store.record_rank(&store_id, &query.keyword, &result).await?;

            match result.rank {
                Some(rank) => println!(
                    "keyword {:?}: rank {} of {} scanned",
                    query.keyword, rank, result.total_scanned
                ),
                None => println!(
                    "keyword {:?}: not ranked within {} scanned",
                    query.keyword, result.total_scanned
                ),
            }
        }
        Some("reviews") => {
            if args.len() < 2 {
                usage();
            }
            let listing_id = args[1].clone();
            let max_reviews = args
                .get(2)
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MAX_REVIEWS);

            let reviews = collect(
                listing_id.clone(),
                max_reviews,
                StealthProfile::mobile(),
                proxies.select(),
            )
            .await?;
            store.upsert_reviews(&listing_id, PROVIDER, &reviews).await?;
            println!("listing {listing_id}: {} reviews collected", reviews.len());
        }
        Some("verify") => {
            if args.len() < 2 {
                usage();
            }
            let listing_id = args[1].clone();
            let cred = store
                .load_credential(&listing_id)
                .await?
                .ok_or_else(|| anyhow!("no stored credential for listing {listing_id}"))?;

            let profile = StealthProfile::desktop();
            let proxy = proxies.select();
            let logged_in = tokio::task::spawn_blocking(move || {
                let session = BrowserSession::provision(&profile, proxy.as_deref())?;
                vault.inject(&session, &cred)
            })
            .await
            .map_err(|e| anyhow!("verify task panicked: {e}"))??;

            if logged_in {
                info!(listing_id, "credential still valid");
                println!("listing {listing_id}: connected");
            } else {
                store.mark_listing_disconnected(&listing_id).await?;
                println!("listing {listing_id}: disconnected");
            }
        }
        _ => usage(),
    }

    Ok(())
}
