use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::CrawlError;
use crate::search::{self, SearchResultEntity};
use crate::session::StealthProfile;

/// One rank-check request. Built per invocation and immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankQuery {
    pub keyword: String,
    pub target_external_id: String,
    pub max_results: usize,
}

/// Outcome of a rank check. `found == false` with `rank == None` is a valid,
/// expected result ("not ranked in the scanned window"), distinct from a
/// failed check, and callers persist it as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankResult {
    pub found: bool,
    pub rank: Option<u32>,
    pub total_scanned: usize,
    pub result_set: Vec<SearchResultEntity>,
    pub source_url: String,
}

/// Linear scan of an already deduplicated result list. First match wins;
/// ties cannot occur because the crawler discards duplicate identifiers.
pub fn locate(
    entities: Vec<SearchResultEntity>,
    target_external_id: &str,
    source_url: String,
) -> RankResult {
    let rank = entities
        .iter()
        .find(|e| e.external_id == target_external_id)
        .map(|e| e.rank);

    RankResult {
        found: rank.is_some(),
        rank,
        total_scanned: entities.len(),
        result_set: entities,
        source_url,
    }
}

/// Run a full rank check: crawl the search surface for the query's keyword,
/// then locate the target in the deduplicated ordering.
pub async fn resolve_rank(
    query: RankQuery,
    profile: StealthProfile,
    proxy: Option<String>,
) -> Result<RankResult, CrawlError> {
    let (entities, source_url) =
        search::search(query.keyword.clone(), query.max_results, profile, proxy).await?;

    let result = locate(entities, &query.target_external_id, source_url);
    info!(
        keyword = %query.keyword,
        target = %query.target_external_id,
        found = result.found,
        rank = ?result.rank,
        total_scanned = result.total_scanned,
        "rank check resolved"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(rank: u32, id: &str) -> SearchResultEntity {
        SearchResultEntity {
            rank,
            external_id: id.to_string(),
            name: format!("업체{rank}"),
            category: "한식".to_string(),
            address: "서울".to_string(),
            thumbnail_url: String::new(),
        }
    }

    fn window(n: u32) -> Vec<SearchResultEntity> {
        (1..=n).map(|i| entity(i, &format!("90000000{i:03}"))).collect()
    }

    #[test]
    fn target_found_at_accepted_position() {
        // Mirrors the live scenario: the target's duplicate anchors were
        // rejected by the crawler, so its first accepted occurrence is 37.
        let mut entities = window(100);
        entities[36].external_id = "2034139969".to_string();

        let result = locate(entities, "2034139969", "https://example/search".to_string());
        assert!(result.found);
        assert_eq!(result.rank, Some(37));
        assert!(result.total_scanned <= 100);
        assert_eq!(result.total_scanned, result.result_set.len());
    }

    #[test]
    fn absent_target_is_a_result_not_an_error() {
        let result = locate(window(300), "2034139969", "https://example/search".to_string());
        assert!(!result.found);
        assert_eq!(result.rank, None);
        assert_eq!(result.total_scanned, 300);
    }

    #[test]
    fn rank_is_none_iff_not_found() {
        let hit = locate(window(5), "90000000003", String::new());
        assert_eq!(hit.found, hit.rank.is_some());

        let miss = locate(window(5), "nope", String::new());
        assert_eq!(miss.found, miss.rank.is_some());
    }

    #[test]
    fn empty_window_resolves_to_not_found() {
        let result = locate(Vec::new(), "2034139969", String::new());
        assert!(!result.found);
        assert_eq!(result.total_scanned, 0);
        assert!(result.result_set.is_empty());
    }

    #[test]
    fn rank_ceiling_matches_window_size() {
        // The target sits at position 37 of the unbounded ordering; a window
        // of 36 must miss it, a window of 37 must find it.
        let mut full = window(100);
        full[36].external_id = "2034139969".to_string();

        let narrow: Vec<_> = full.iter().take(36).cloned().collect();
        assert!(!locate(narrow, "2034139969", String::new()).found);

        let exact: Vec<_> = full.iter().take(37).cloned().collect();
        let result = locate(exact, "2034139969", String::new());
        assert!(result.found);
        assert_eq!(result.rank, Some(37));
    }
}
