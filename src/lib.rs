//! Search-rank acquisition and review-harvesting core.
//!
//! Drives stealth headless-Chrome sessions against a hostile, JS-rendered
//! local-search surface: paginating search results, resolving the rank of a
//! target listing inside the deduplicated ordering, and harvesting that
//! listing's reviews by intercepting the page's own network traffic.
//! Billing, scheduling and API layers live elsewhere and consume the plain
//! data produced here.

pub mod config;
pub mod error;
pub mod proxy;
pub mod rank;
pub mod reviews;
pub mod search;
pub mod session;
pub mod store;
pub mod vault;

pub use config::Config;
pub use error::{CrawlError, ExtractionError};
pub use proxy::ProxySelector;
pub use rank::{resolve_rank, RankQuery, RankResult};
pub use reviews::{collect, CollectedReview};
pub use search::SearchResultEntity;
pub use session::{BrowserSession, DeviceClass, StealthProfile};
pub use store::RankStore;
pub use vault::{CredentialVault, EncryptedCredential, StoredCookie};
