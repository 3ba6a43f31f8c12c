use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;

use headless_chrome::protocol::cdp::{Emulation, Network, Page};
use headless_chrome::{Browser, LaunchOptions, Tab};
use rand::seq::SliceRandom;
use tracing::{debug, warn};

use crate::error::CrawlError;
use crate::vault::StoredCookie;

const MOBILE_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Mobile/15E148 Safari/604.1",
    "Mozilla/5.0 (Linux; Android 14; SM-S921N) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Mobile Safari/537.36",
    "Mozilla/5.0 (Linux; Android 13; SM-G991N) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Mobile Safari/537.36",
];

const DESKTOP_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
];

// Runs before any page script. Hides the automation flag and fills in the
// surfaces a headless profile is missing compared to a consumer browser.
const STEALTH_SCRIPT: &str = r#"
    Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
    Object.defineProperty(navigator, 'languages', { get: () => ['ko-KR', 'ko', 'en-US'] });
    Object.defineProperty(navigator, 'plugins', {
        get: () => [
            { name: 'Chrome PDF Plugin', filename: 'internal-pdf-viewer' },
            { name: 'Chrome PDF Viewer', filename: 'mhjfbmdgcfjbbpaeojofohoefgiehjai' },
        ],
    });
    Object.defineProperty(navigator, 'hardwareConcurrency', { get: () => 4 });
    window.chrome = { runtime: {}, loadTimes: function() {}, csi: function() {}, app: {} };
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Desktop,
    Mobile,
}

/// How a session should present itself to the target surface.
///
/// The target renders different DOM structures per device class, so the
/// crawler pins this down instead of letting Chrome pick defaults.
#[derive(Debug, Clone)]
pub struct StealthProfile {
    pub locale: String,
    pub timezone: String,
    pub viewport: (u32, u32),
    pub device_class: DeviceClass,
    /// Drop fonts and mute audio to cut page weight on crawl passes.
    pub trim_subresources: bool,
}

impl StealthProfile {
    /// Mobile profile for the Korean market. The mobile surface is more
    /// compact and scrapes more reliably, so crawls default to this.
    pub fn mobile() -> Self {
        StealthProfile {
            locale: "ko-KR".to_string(),
            timezone: "Asia/Seoul".to_string(),
            viewport: (390, 844),
            device_class: DeviceClass::Mobile,
            trim_subresources: true,
        }
    }

    pub fn desktop() -> Self {
        StealthProfile {
            locale: "ko-KR".to_string(),
            timezone: "Asia/Seoul".to_string(),
            viewport: (1920, 1080),
            device_class: DeviceClass::Desktop,
            trim_subresources: false,
        }
    }

    fn pick_user_agent(&self) -> &'static str {
        let pool = match self.device_class {
            DeviceClass::Mobile => MOBILE_USER_AGENTS,
            DeviceClass::Desktop => DESKTOP_USER_AGENTS,
        };
        pool.choose(&mut rand::thread_rng()).copied().unwrap_or(pool[0])
    }

    fn platform(&self) -> &'static str {
        match self.device_class {
            DeviceClass::Mobile => "iPhone",
            DeviceClass::Desktop => "Win32",
        }
    }
}

/// One browser execution context bound to one logical task.
///
/// A session is provisioned, used for exactly one search or review pass, and
/// dropped. Dropping the session tears down the tab and kills the browser
/// process, so OS-level cleanup happens on every exit path including panics
/// inside the owning task.
pub struct BrowserSession {
    // Field order matters: the tab must close before the browser process.
    tab: Arc<Tab>,
    _browser: Browser,
    profile: StealthProfile,
    proxy: Option<String>,
}

impl BrowserSession {
    /// Start a fresh stealth session. Failure here means the Chrome binary
    /// could not be launched or driven at all, which is an environment
    /// problem: it propagates as fatal and is never retried by this core.
    pub fn provision(
        profile: &StealthProfile,
        proxy: Option<&str>,
    ) -> Result<BrowserSession, CrawlError> {
        let mut owned_args: Vec<String> = vec![
            "--disable-blink-features=AutomationControlled".to_string(),
            "--no-sandbox".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--disable-infobars".to_string(),
            format!("--lang={}", profile.locale),
        ];
        if profile.trim_subresources {
            owned_args.push("--disable-remote-fonts".to_string());
            owned_args.push("--mute-audio".to_string());
        }
        if let Some(addr) = proxy {
            debug!(proxy = addr, "binding session to proxy");
            owned_args.push(format!("--proxy-server={}", addr));
        }
        let args: Vec<&OsStr> = owned_args.iter().map(|s| s.as_ref()).collect();

        let browser = Browser::new(LaunchOptions {
            headless: true,
            window_size: Some(profile.viewport),
            args,
            idle_browser_timeout: Duration::from_secs(300),
            ..Default::default()
        })
        .map_err(|e| CrawlError::BrowserStart(e.to_string()))?;

        let tab = browser
            .new_tab()
            .map_err(|e| CrawlError::BrowserStart(format!("tab creation failed: {e}")))?;

        let user_agent = profile.pick_user_agent();
        let accept_language = format!("{},ko;q=0.9,en-US;q=0.8", profile.locale);
        tab.set_user_agent(user_agent, Some(&accept_language), Some(profile.platform()))
            .map_err(|e| CrawlError::BrowserStart(format!("user agent override failed: {e}")))?;

        tab.call_method(Emulation::SetTimezoneOverride {
            timezone_id: profile.timezone.clone(),
        })
        .map_err(|e| CrawlError::BrowserStart(format!("timezone override failed: {e}")))?;

        tab.call_method(Page::AddScriptToEvaluateOnNewDocument {
            source: STEALTH_SCRIPT.to_string(),
            world_name: None,
            include_command_line_api: None,
            run_immediately: None,
        })
        .map_err(|e| CrawlError::BrowserStart(format!("stealth injection failed: {e}")))?;

        debug!(
            device = ?profile.device_class,
            user_agent,
            "session provisioned"
        );

        Ok(BrowserSession {
            tab,
            _browser: browser,
            profile: profile.clone(),
            proxy: proxy.map(str::to_string),
        })
    }

    pub fn profile(&self) -> &StealthProfile {
        &self.profile
    }

    pub fn proxy(&self) -> Option<&str> {
        self.proxy.as_deref()
    }

    pub(crate) fn tab(&self) -> &Arc<Tab> {
        &self.tab
    }

    /// Navigate and wait for the initial load. An error from the navigation
    /// call itself is fatal; a load-wait timeout is not, because a partially
    /// rendered page still yields a valid partial result.
    pub fn navigate(&self, url: &str) -> Result<(), CrawlError> {
        self.tab
            .navigate_to(url)
            .map_err(|e| CrawlError::Navigation(format!("{url}: {e}")))?;
        if let Err(e) = self.tab.wait_until_navigated() {
            warn!(url, error = %e, "load wait timed out, continuing with partial render");
        }
        Ok(())
    }

    /// Bounded wait for a selector. Absence is a degraded state, not an
    /// error: the caller proceeds with whatever rendered.
    pub fn wait_for(&self, selector: &str, timeout: Duration) -> bool {
        match self.tab.wait_for_element_with_custom_timeout(selector, timeout) {
            Ok(_) => true,
            Err(e) => {
                warn!(selector, error = %e, "selector did not appear within bound");
                false
            }
        }
    }

    /// Snapshot the rendered DOM.
    pub fn content(&self) -> Result<String, CrawlError> {
        self.tab
            .get_content()
            .map_err(|e| CrawlError::Navigation(format!("content snapshot failed: {e}")))
    }

    /// Evaluate a script, returning its JSON value if any. Script failures
    /// degrade to `None`.
    pub fn evaluate(&self, script: &str) -> Option<serde_json::Value> {
        match self.tab.evaluate(script, false) {
            Ok(remote) => remote.value,
            Err(e) => {
                debug!(error = %e, "script evaluation failed");
                None
            }
        }
    }

    /// Render pipelines settle asynchronously relative to navigation, so
    /// extraction passes pause briefly before snapshotting.
    pub fn settle(&self, duration: Duration) {
        std::thread::sleep(duration);
    }

    /// Load a previously captured cookie set into this session. Individual
    /// cookie failures are logged and skipped; values never are.
    pub(crate) fn install_cookies(&self, cookies: &[StoredCookie]) {
        for cookie in cookies {
            let result = self.tab.call_method(Network::SetCookie {
                name: cookie.name.clone(),
                value: cookie.value.clone(),
                url: None,
                domain: Some(cookie.domain.clone()),
                path: Some(cookie.path.clone()),
                secure: Some(cookie.secure),
                http_only: Some(cookie.http_only),
                same_site: None,
                expires: cookie.expires,
                priority: None,
                same_party: None,
                source_scheme: None,
                source_port: None,
                partition_key: None,
            });
            if let Err(e) = result {
                warn!(cookie = %cookie.name, error = %e, "cookie injection failed");
            }
        }
    }

    /// Export the session's current cookie jar, e.g. after an interactive
    /// login, for encryption by the vault.
    pub fn export_cookies(&self) -> Result<Vec<StoredCookie>, CrawlError> {
        let cookies = self
            .tab
            .get_cookies()
            .map_err(|e| CrawlError::Navigation(format!("cookie export failed: {e}")))?;
        Ok(cookies
            .into_iter()
            .map(|c| StoredCookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
                secure: c.secure,
                http_only: c.http_only,
                expires: Some(c.expires),
            })
            .collect())
    }
}
