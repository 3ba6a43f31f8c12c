use std::collections::HashSet;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::CrawlError;
use crate::session::{BrowserSession, StealthProfile};

/// Listing-detail hrefs carry the stable provider identifier. Category
/// variants all share the `/<vertical>/<digits>` shape.
static LISTING_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/(?:place|restaurant|cafe|hospital|hairshop|accommodation|attraction)/(\d{5,})")
        .expect("listing id pattern")
});

const SEARCH_URL_BASE: &str = "https://m.place.naver.com/place/list?query=";

const RESULT_LINK_SELECTOR: &str =
    "a[href*='/place/'], a[href*='/restaurant/'], a[href*='/cafe/']";

/// Ordered name sources, most specific first. The anchor's own text is the
/// last resort and is gated by the plausibility predicate below.
const NAME_SELECTORS: &[&str] = &["span.place_name", "span.place_bluelink", "strong.name"];
const CATEGORY_SELECTORS: &[&str] = &["span.category", "em.category", "span.cate"];
const ADDRESS_SELECTORS: &[&str] = &["span.address", "span.addr", "div.address"];

/// Anything shorter is a decorative icon-only anchor, not a listing card.
const MIN_NAME_CHARS: usize = 3;

const SELECTOR_WAIT: Duration = Duration::from_secs(10);
const SETTLE_DELAY: Duration = Duration::from_millis(1500);
const ROUND_DELAY: Duration = Duration::from_millis(900);

/// How many scroll/load-more rounds to run before giving up on new content.
const STAGNANT_ROUND_LIMIT: usize = 2;

const LOAD_MORE_SCRIPT: &str = r#"
    (() => {
        const more = document.querySelector("a.show_more, button.btn_more, a[class*='more']");
        if (more) { more.click(); return "clicked"; }
        window.scrollTo(0, document.body.scrollHeight);
        return "scrolled";
    })()
"#;

/// One deduplicated search result. `rank` counts accepted entities only, so
/// duplicate anchors in the raw DOM never perturb the numbering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResultEntity {
    pub rank: u32,
    pub external_id: String,
    pub name: String,
    pub category: String,
    pub address: String,
    pub thumbnail_url: String,
}

/// Accumulates accepted entities across pagination rounds. `seen` carries the
/// dedup set so re-parsing the grown DOM each round never re-accepts or
/// re-ranks an entity.
#[derive(Default)]
pub(crate) struct CrawlPass {
    seen: HashSet<String>,
    accepted: Vec<SearchResultEntity>,
    skipped: usize,
}

impl CrawlPass {
    pub(crate) fn accepted(&self) -> &[SearchResultEntity] {
        &self.accepted
    }

    pub(crate) fn skipped(&self) -> usize {
        self.skipped
    }

    pub(crate) fn into_entities(self) -> Vec<SearchResultEntity> {
        self.accepted
    }

    /// Scan one DOM snapshot, accepting new listings until `max_results`.
    /// Returns how many entities this round added.
    pub(crate) fn absorb(&mut self, html: &str, max_results: usize) -> usize {
        let document = Html::parse_document(html);
        let anchor_selector = Selector::parse("a[href]").expect("anchor selector");
        let before = self.accepted.len();

        for anchor in document.select(&anchor_selector) {
            if self.accepted.len() >= max_results {
                break;
            }

            let href = match anchor.value().attr("href") {
                Some(href) => href,
                None => continue,
            };
            // Photo and other sub-pages repeat the listing id but are not
            // result cards.
            if href.contains("/photo") || href.contains("/review") {
                continue;
            }
            let external_id = match LISTING_ID_RE.captures(href) {
                Some(caps) => caps[1].to_string(),
                None => continue,
            };
            if self.seen.contains(&external_id) {
                continue;
            }

            let card = enclosing_card(anchor);
            let name = match extract_name(anchor, card) {
                Some(name) => name,
                None => {
                    // Icon-only or otherwise ambiguous anchor. Not marked as
                    // seen: a later, fully rendered card for the same listing
                    // may still be accepted.
                    self.skipped += 1;
                    continue;
                }
            };

            let category = select_first_text(card, CATEGORY_SELECTORS).unwrap_or_default();
            let address = select_first_text(card, ADDRESS_SELECTORS).unwrap_or_default();
            let thumbnail_url = extract_thumbnail(card).unwrap_or_default();

            self.seen.insert(external_id.clone());
            self.accepted.push(SearchResultEntity {
                rank: self.accepted.len() as u32 + 1,
                external_id,
                name,
                category,
                address,
                thumbnail_url,
            });
        }

        self.accepted.len() - before
    }
}

/// Listing cards are list items wrapping the detail anchor; fall back to the
/// anchor itself when the structure differs.
fn enclosing_card(anchor: ElementRef) -> ElementRef {
    anchor
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "li")
        .unwrap_or(anchor)
}

fn extract_name(anchor: ElementRef, card: ElementRef) -> Option<String> {
    if let Some(name) = select_first_text(card, NAME_SELECTORS) {
        if plausible_name(&name) {
            return Some(name);
        }
    }
    // Fallback: the anchor's visible text, if it looks like a real name.
    let text = normalized_text(&anchor.text().collect::<String>());
    plausible_name(&text).then_some(text)
}

/// Evaluate an ordered selector chain against a card, returning the first
/// non-empty text it yields.
fn select_first_text(scope: ElementRef, selectors: &[&str]) -> Option<String> {
    for raw in selectors {
        let selector = match Selector::parse(raw) {
            Ok(s) => s,
            Err(_) => continue,
        };
        if let Some(el) = scope.select(&selector).next() {
            let text = normalized_text(&el.text().collect::<String>());
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    None
}

fn extract_thumbnail(card: ElementRef) -> Option<String> {
    let selector = Selector::parse("img").ok()?;
    let img = card.select(&selector).next()?;
    img.value()
        .attr("src")
        .or_else(|| img.value().attr("data-src"))
        .map(str::to_string)
}

fn normalized_text(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn plausible_name(text: &str) -> bool {
    text.chars().count() >= MIN_NAME_CHARS
}

pub fn search_url(keyword: &str) -> String {
    format!("{}{}", SEARCH_URL_BASE, urlencoding::encode(keyword))
}

/// Crawl the mobile search surface for `keyword`, returning up to
/// `max_results` deduplicated entities plus the source URL.
///
/// Blocking: drive it through [`search`] or your own `spawn_blocking` from
/// async code. Degradation policy per the error taxonomy: selector absence
/// and load-wait timeouts yield whatever was scraped so far; only
/// provisioning and fatal navigation errors propagate.
pub fn search_places(
    keyword: &str,
    max_results: usize,
    profile: &StealthProfile,
    proxy: Option<&str>,
) -> Result<(Vec<SearchResultEntity>, String), CrawlError> {
    let session = BrowserSession::provision(profile, proxy)?;
    let url = search_url(keyword);

    info!(keyword, max_results, "starting search crawl");
    session.navigate(&url)?;
    session.wait_for(RESULT_LINK_SELECTOR, SELECTOR_WAIT);
    session.settle(SETTLE_DELAY);

    let mut pass = CrawlPass::default();
    let mut stagnant_rounds = 0;
    let max_rounds = max_results / 20 + 6;

    for round in 0..max_rounds {
        let html = match session.content() {
            Ok(html) => html,
            Err(e) => {
                warn!(round, error = %e, "snapshot failed, returning partial results");
                break;
            }
        };

        let added = pass.absorb(&html, max_results);
        if pass.accepted().len() >= max_results {
            break;
        }

        if added == 0 {
            stagnant_rounds += 1;
            if stagnant_rounds >= STAGNANT_ROUND_LIMIT {
                info!(round, "result list exhausted");
                break;
            }
        } else {
            stagnant_rounds = 0;
        }

        session.evaluate(LOAD_MORE_SCRIPT);
        session.settle(ROUND_DELAY);
    }

    info!(
        keyword,
        accepted = pass.accepted().len(),
        skipped = pass.skipped(),
        "search crawl finished"
    );
    Ok((pass.into_entities(), url))
}

/// Async wrapper over [`search_places`]. Each call owns its session; the
/// blocking browser work runs on the blocking pool.
pub async fn search(
    keyword: String,
    max_results: usize,
    profile: StealthProfile,
    proxy: Option<String>,
) -> Result<(Vec<SearchResultEntity>, String), CrawlError> {
    tokio::task::spawn_blocking(move || {
        search_places(&keyword, max_results, &profile, proxy.as_deref())
    })
    .await
    .map_err(|e| CrawlError::Task(format!("search task panicked: {e}")))?
}
