use rand::seq::SliceRandom;

/// Picks an egress proxy for a session.
///
/// `PROXY_SERVERS` holds zero, one, or a comma-separated list of addresses.
/// With several configured, each call picks uniformly at random to spread
/// traffic; there is no health checking here, a dead proxy surfaces through
/// the crawler's own failure path.
#[derive(Debug, Clone)]
pub struct ProxySelector {
    pool: Vec<String>,
}

impl ProxySelector {
    pub fn new(configured: Option<&str>) -> Self {
        let pool = configured
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        ProxySelector { pool }
    }

    /// `None` means direct egress.
    pub fn select(&self) -> Option<String> {
        match self.pool.len() {
            0 => None,
            1 => Some(self.pool[0].clone()),
            _ => self.pool.choose(&mut rand::thread_rng()).cloned(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }
}
