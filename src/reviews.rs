use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{CrawlError, ExtractionError};
use crate::session::{BrowserSession, StealthProfile};

const DEFAULT_RATING: i64 = 5;

const SETTLE_DELAY: Duration = Duration::from_millis(1500);
const ROUND_DELAY: Duration = Duration::from_millis(1200);

/// Captured bodies are bounded to keep a chatty page from ballooning memory.
const MIN_BODY_LEN: usize = 20;
const MAX_BODY_LEN: usize = 5_000_000;

const LOAD_MORE_SCRIPT: &str = r#"
    (() => {
        const more = document.querySelector("a.more_review, button[class*='more'], a[class*='more']");
        if (more) { more.click(); return "clicked"; }
        window.scrollTo(0, document.body.scrollHeight);
        return "scrolled";
    })()
"#;

/// One normalized review, best-effort by design: the upstream schema varies
/// between endpoint versions, so every field except the identifier degrades
/// instead of dropping the item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectedReview {
    pub external_review_id: String,
    pub text: String,
    pub rating: u8,
    pub author_name: String,
    pub posted_date: Option<String>,
    pub raw_payload: Value,
}

/// Known payload shapes, probed in priority order. Each matcher is a pure
/// lookup; the first one that applies wins and shapes are never merged.
type ShapeMatcher = for<'a> fn(&'a Value) -> Option<&'a Vec<Value>>;

fn shape_top_level(payload: &Value) -> Option<&Vec<Value>> {
    payload.get("reviews")?.as_array()
}

fn shape_nested_result(payload: &Value) -> Option<&Vec<Value>> {
    payload.get("result")?.get("reviews")?.as_array()
}

fn shape_data_list(payload: &Value) -> Option<&Vec<Value>> {
    payload.get("data")?.get("list")?.as_array()
}

const SHAPES: &[ShapeMatcher] = &[shape_top_level, shape_nested_result, shape_data_list];

pub(crate) fn extract_review_items(payload: &Value) -> Option<&Vec<Value>> {
    SHAPES.iter().find_map(|matcher| matcher(payload))
}

/// Look up a field under several known aliases, tolerating numeric values
/// (some endpoint versions ship numeric ids and ratings).
fn first_string(item: &Value, aliases: &[&str]) -> Option<String> {
    for key in aliases {
        match item.get(key) {
            Some(Value::String(s)) if !s.trim().is_empty() => return Some(s.clone()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

fn first_rating(item: &Value, aliases: &[&str]) -> Option<i64> {
    for key in aliases {
        match item.get(key) {
            Some(Value::Number(n)) => return n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Some(Value::String(s)) => {
                if let Ok(parsed) = s.trim().parse::<i64>() {
                    return Some(parsed);
                }
            }
            _ => {}
        }
    }
    None
}

fn author_of(item: &Value) -> String {
    for nested in [&["author", "name"], &["author", "nickname"], &["user", "nickname"], &["user", "name"]] {
        if let Some(Value::String(s)) = item.get(nested[0]).and_then(|v| v.get(nested[1])) {
            if !s.trim().is_empty() {
                return s.clone();
            }
        }
    }
    first_string(item, &["author", "nickname", "userName", "writer"])
        .unwrap_or_else(|| "Unknown".to_string())
}

/// Normalize one raw review item. Only an unobtainable identifier discards
/// the item; everything else degrades to defaults.
pub fn normalize_review(item: &Value) -> Result<CollectedReview, ExtractionError> {
    let external_review_id = first_string(item, &["id", "reviewId", "review_id", "seq"])
        .ok_or(ExtractionError::MissingId)?;

    let text = first_string(item, &["text", "content", "body", "review_text"]).unwrap_or_default();
    let rating = first_rating(item, &["rating", "score", "star"])
        .unwrap_or(DEFAULT_RATING)
        .clamp(1, 5) as u8;
    let author_name = author_of(item);
    let posted_date = first_string(item, &["date", "created", "createdAt", "visited"]);

    Ok(CollectedReview {
        external_review_id,
        text,
        rating,
        author_name,
        posted_date,
        raw_payload: item.clone(),
    })
}

/// Fold one captured body into the output set. Non-JSON bodies and payloads
/// matching no known shape are silently ignored; that is the filter working,
/// not an error. Returns how many items were skipped for a missing id.
pub(crate) fn absorb_payload(
    body: &str,
    seen: &mut HashSet<String>,
    out: &mut Vec<CollectedReview>,
    max_reviews: usize,
) -> usize {
    let payload: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(_) => return 0,
    };
    let items = match extract_review_items(&payload) {
        Some(items) => items,
        None => return 0,
    };

    let mut skipped = 0;
    for item in items {
        if out.len() >= max_reviews {
            break;
        }
        match normalize_review(item) {
            Ok(review) => {
                if seen.insert(review.external_review_id.clone()) {
                    out.push(review);
                }
            }
            Err(ExtractionError::MissingId) => skipped += 1,
            Err(_) => skipped += 1,
        }
    }
    skipped
}

fn review_page_url(listing_id: &str) -> String {
    format!("https://m.place.naver.com/place/{listing_id}/review/visitor")
}

/// Harvest up to `max_reviews` reviews for a listing by observing the review
/// page's own network traffic.
///
/// The response observer is attached before navigation so early responses are
/// not missed; scrolling and "load more" clicks then drive additional
/// traffic, bounded by an iteration cap proportional to `max_reviews`.
/// Blocking, like the search crawler; use [`collect`] from async code.
pub fn collect_reviews(
    listing_id: &str,
    max_reviews: usize,
    profile: &StealthProfile,
    proxy: Option<&str>,
) -> Result<Vec<CollectedReview>, CrawlError> {
    let session = BrowserSession::provision(profile, proxy)?;
    let captured: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let sink = captured.clone();
    let hint = listing_id.to_string();
    session
        .tab()
        .register_response_handling(
            "review_collector",
            Box::new(move |params, fetch_body| {
                let response = &params.response;
                let interesting =
                    response.url.contains("review") || response.url.contains(hint.as_str());
                let success = response.status >= 200 && response.status < 300;
                if !interesting || !success {
                    return;
                }
                // Body availability lags the event slightly.
                std::thread::sleep(Duration::from_millis(100));
                if let Ok(body) = fetch_body() {
                    if body.body.len() >= MIN_BODY_LEN && body.body.len() <= MAX_BODY_LEN {
                        if let Ok(mut sink) = sink.lock() {
                            sink.push(body.body.clone());
                        }
                    }
                }
            }),
        )
        .map_err(|e| CrawlError::Navigation(format!("response observer failed: {e}")))?;

    let url = review_page_url(listing_id);
    info!(listing_id, max_reviews, "starting review collection");
    session.navigate(&url)?;
    session.settle(SETTLE_DELAY);

    // Each round drives more review traffic through the observer.
    let rounds = max_reviews / 10 + 3;
    for _ in 0..rounds {
        session.evaluate(LOAD_MORE_SCRIPT);
        session.settle(ROUND_DELAY);
    }

    if let Err(e) = session.tab().deregister_response_handling("review_collector") {
        debug!(error = %e, "observer deregistration failed");
    }

    let bodies = match captured.lock() {
        Ok(bodies) => bodies.clone(),
        Err(_) => {
            warn!("capture buffer poisoned, returning empty set");
            Vec::new()
        }
    };

    let mut seen = HashSet::new();
    let mut reviews = Vec::new();
    let mut skipped = 0;
    for body in &bodies {
        skipped += absorb_payload(body, &mut seen, &mut reviews, max_reviews);
        if reviews.len() >= max_reviews {
            break;
        }
    }

    info!(
        listing_id,
        captured = bodies.len(),
        collected = reviews.len(),
        skipped,
        "review collection finished"
    );
    Ok(reviews)
}

/// Async wrapper over [`collect_reviews`].
pub async fn collect(
    listing_id: String,
    max_reviews: usize,
    profile: StealthProfile,
    proxy: Option<String>,
) -> Result<Vec<CollectedReview>, CrawlError> {
    tokio::task::spawn_blocking(move || {
        collect_reviews(&listing_id, max_reviews, &profile, proxy.as_deref())
    })
    .await
    .map_err(|e| CrawlError::Task(format!("review task panicked: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn top_level_shape_matches_first() {
        let payload = json!({ "reviews": [{ "id": "a" }], "data": { "list": [{ "id": "b" }] } });
        let items = extract_review_items(&payload).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["id"], "a");
    }

    #[test]
    fn nested_result_shape_matches() {
        let payload = json!({ "result": { "reviews": [{ "reviewId": "r9" }] } });
        assert_eq!(extract_review_items(&payload).unwrap().len(), 1);
    }

    #[test]
    fn data_list_scenario_normalizes_exactly() {
        let body = r#"{"data":{"list":[{"reviewId":"r1","content":"good","rating":4}]}}"#;
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let skipped = absorb_payload(body, &mut seen, &mut out, 100);

        assert_eq!(skipped, 0);
        assert_eq!(out.len(), 1);
        let review = &out[0];
        assert_eq!(review.external_review_id, "r1");
        assert_eq!(review.text, "good");
        assert_eq!(review.rating, 4);
        assert_eq!(review.author_name, "Unknown");
        assert_eq!(review.posted_date, None);
    }

    #[test]
    fn unknown_shape_yields_nothing() {
        let payload = json!({ "items": [{ "id": "x" }] });
        assert!(extract_review_items(&payload).is_none());
    }

    #[test]
    fn non_json_body_is_silently_ignored() {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        assert_eq!(absorb_payload("<html>not json</html>", &mut seen, &mut out, 10), 0);
        assert!(out.is_empty());
    }

    #[test]
    fn missing_identifier_discards_only_that_item() {
        let body = r#"{"reviews":[
            {"content":"no id here"},
            {"review_id":"r2","body":"fine","score":3}
        ]}"#;
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let skipped = absorb_payload(body, &mut seen, &mut out, 10);

        assert_eq!(skipped, 1);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].external_review_id, "r2");
        assert_eq!(out[0].text, "fine");
        assert_eq!(out[0].rating, 3);
    }

    #[test]
    fn rating_defaults_and_clamps() {
        let absent = normalize_review(&json!({ "id": "a", "text": "x" })).unwrap();
        assert_eq!(absent.rating, 5);

        let high = normalize_review(&json!({ "id": "b", "star": 9 })).unwrap();
        assert_eq!(high.rating, 5);

        let low = normalize_review(&json!({ "id": "c", "score": 0 })).unwrap();
        assert_eq!(low.rating, 1);

        let stringy = normalize_review(&json!({ "id": "d", "rating": "4" })).unwrap();
        assert_eq!(stringy.rating, 4);
    }

    #[test]
    fn numeric_sequence_id_is_accepted() {
        let review = normalize_review(&json!({ "seq": 48213, "content": "numeric id" })).unwrap();
        assert_eq!(review.external_review_id, "48213");
    }

    #[test]
    fn author_aliases_nested_and_flat() {
        let nested = normalize_review(&json!({ "id": "a", "author": { "nickname": "김리뷰" } })).unwrap();
        assert_eq!(nested.author_name, "김리뷰");

        let user = normalize_review(&json!({ "id": "b", "user": { "nickname": "박손님" } })).unwrap();
        assert_eq!(user.author_name, "박손님");

        let flat = normalize_review(&json!({ "id": "c", "nickname": "이단골" })).unwrap();
        assert_eq!(flat.author_name, "이단골");

        let missing = normalize_review(&json!({ "id": "d" })).unwrap();
        assert_eq!(missing.author_name, "Unknown");
    }

    #[test]
    fn duplicate_review_ids_collapse_across_payloads() {
        let first = r#"{"reviews":[{"id":"r1","text":"one"}]}"#;
        let second = r#"{"result":{"reviews":[{"id":"r1","text":"repeat"},{"id":"r2","text":"two"}]}}"#;

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        absorb_payload(first, &mut seen, &mut out, 10);
        absorb_payload(second, &mut seen, &mut out, 10);

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].text, "one");
        assert_eq!(out[1].external_review_id, "r2");
    }

    #[test]
    fn max_reviews_caps_collection() {
        let body = serde_json::to_string(&json!({
            "reviews": (0..50).map(|i| json!({ "id": format!("r{i}") })).collect::<Vec<_>>()
        }))
        .unwrap();

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        absorb_payload(&body, &mut seen, &mut out, 7);
        assert_eq!(out.len(), 7);
    }

    #[test]
    fn raw_payload_is_preserved() {
        let item = json!({ "id": "r1", "content": "ok", "extra": { "photos": 3 } });
        let review = normalize_review(&item).unwrap();
        assert_eq!(review.raw_payload, item);
    }
}
