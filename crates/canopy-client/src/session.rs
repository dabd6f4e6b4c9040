//! Applies handed-off sessions to target-site surfaces.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use canopy_shared::protocol::WebsiteConfig;

use crate::browser::{same_origin, BrowsingContext, SessionCookie, Surface};
use crate::config::ClientConfig;
use crate::error::BrowserError;

/// Partition (cookie jar) name used for a target site.
pub fn partition_for(site: &WebsiteConfig) -> String {
    let slug: String = site
        .name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    format!("persist:{slug}")
}

/// `scheme://host[:port]` of a URL, or the empty string.
pub fn origin_of(url: &str) -> &str {
    let Some(scheme_end) = url.find("://") else {
        return "";
    };
    let rest = &url[scheme_end + 3..];
    match rest.find(['/', '?', '#']) {
        Some(i) => &url[..scheme_end + 3 + i],
        None => url,
    }
}

/// Path component of a URL (always starts with `/`).
pub fn path_of(url: &str) -> &str {
    let after_scheme = match url.find("://") {
        Some(i) => &url[i + 3..],
        None => url,
    };
    let path = match after_scheme.find('/') {
        Some(i) => &after_scheme[i..],
        None => "/",
    };
    match path.find(['?', '#']) {
        Some(i) => &path[..i],
        None => path,
    }
}

pub struct SessionApplier<B> {
    browser: Arc<B>,
    cookie_name: String,
    authenticated_markers: Vec<String>,
    login_markers: Vec<String>,
    cookie_commit_grace: Duration,
    surface_ready_grace: Duration,
}

impl<B: BrowsingContext> SessionApplier<B> {
    pub fn new(browser: Arc<B>, config: &ClientConfig) -> Self {
        Self {
            browser,
            cookie_name: config.session_cookie_name.clone(),
            authenticated_markers: config.authenticated_path_markers.clone(),
            login_markers: config.login_path_markers.clone(),
            cookie_commit_grace: config.cookie_commit_grace,
            surface_ready_grace: config.surface_ready_grace,
        }
    }

    pub fn browser(&self) -> &Arc<B> {
        &self.browser
    }

    fn cookie_for(&self, site: &WebsiteConfig, value: &str) -> SessionCookie {
        SessionCookie {
            name: self.cookie_name.clone(),
            value: value.to_string(),
            url: site.root_location(),
        }
    }

    /// Surfaces in the site's partition or currently showing its exact origin.
    pub async fn site_surfaces(&self, site: &WebsiteConfig) -> Vec<Surface> {
        let partition = partition_for(site);
        self.browser
            .surfaces()
            .await
            .into_iter()
            .filter(|s| s.partition == partition || same_origin(&s.url, &site.root_url))
            .collect()
    }

    /// Login pages never count, whatever else the path contains.
    pub fn looks_authenticated(&self, url: &str) -> bool {
        let path = path_of(url).to_ascii_lowercase();
        if self.login_markers.iter().any(|m| path.contains(&m.to_ascii_lowercase())) {
            return false;
        }
        self.authenticated_markers
            .iter()
            .any(|m| path.contains(&m.to_ascii_lowercase()))
    }

    pub async fn authenticated_surface(&self, site: &WebsiteConfig) -> Option<Surface> {
        self.site_surfaces(site)
            .await
            .into_iter()
            .find(|s| self.looks_authenticated(&s.url))
    }

    /// Write the session cookie into the site's partition.
    ///
    /// Waits `cookie_commit_grace` afterwards: the host offers no commit
    /// acknowledgement, so this is a fixed barrier.
    pub async fn apply_cookie(&self, site: &WebsiteConfig, value: &str) -> Result<(), BrowserError> {
        let partition = partition_for(site);
        self.browser
            .set_cookie(&partition, &self.cookie_for(site, value))
            .await?;
        debug!(site = %site.name, partition = %partition, "Session cookie written");
        tokio::time::sleep(self.cookie_commit_grace).await;
        Ok(())
    }

    /// Bring a surface for the site to its root location with the cookie in place.
    ///
    /// Reuses an existing site surface; otherwise opens a new one, falling
    /// back to the active surface when the host refuses.
    pub async fn navigate_with_session(
        &self,
        site: &WebsiteConfig,
        value: &str,
    ) -> Result<Surface, BrowserError> {
        let target = site.root_location();
        let cookie = self.cookie_for(site, value);

        if let Some(surface) = self.site_surfaces(site).await.into_iter().next() {
            self.browser.set_surface_cookie(surface.id, &cookie).await?;
            self.browser.navigate(surface.id, &target).await?;
            return Ok(surface);
        }

        let surface = match self.browser.open_surface(&partition_for(site), &target).await {
            Ok(surface) => surface,
            Err(e) => {
                warn!(site = %site.name, error = %e, "Could not open a surface, using the active one");
                self.browser.active_surface().await.ok_or(BrowserError::NoSurface)?
            }
        };

        // The host gives no readiness signal for fresh surfaces.
        tokio::time::sleep(self.surface_ready_grace).await;
        self.browser.set_surface_cookie(surface.id, &cookie).await?;
        self.browser.navigate(surface.id, &target).await?;
        Ok(surface)
    }

    pub async fn clear_site(&self, site: &WebsiteConfig) -> Result<(), BrowserError> {
        let origin = match origin_of(&site.root_url) {
            "" => site.root_url.as_str(),
            origin => origin,
        };
        self.browser
            .clear_site_storage(&partition_for(site), origin)
            .await
    }

    /// Close every site surface. Keeps going past failures and reports the first.
    pub async fn close_site_surfaces(&self, site: &WebsiteConfig) -> Result<usize, BrowserError> {
        let mut closed = 0;
        let mut first_error = None;
        for surface in self.site_surfaces(site).await {
            match self.browser.close_surface(surface.id).await {
                Ok(()) => closed += 1,
                Err(e) => {
                    warn!(surface = surface.id, error = %e, "Failed to close surface");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::MemoryBrowser;

    fn site() -> WebsiteConfig {
        WebsiteConfig {
            name: "My Site".into(),
            root_url: "https://site.example".into(),
            root_path: "/home".into(),
        }
    }

    fn applier(browser: Arc<MemoryBrowser>) -> SessionApplier<MemoryBrowser> {
        SessionApplier::new(browser, &ClientConfig::default())
    }

    #[test]
    fn test_url_helpers() {
        assert_eq!(partition_for(&site()), "persist:my-site");
        assert_eq!(origin_of("https://site.example:8443/a?b"), "https://site.example:8443");
        assert_eq!(origin_of("https://site.example"), "https://site.example");
        assert_eq!(origin_of("not a url"), "");
        assert_eq!(path_of("https://site.example/dashboard?tab=1"), "/dashboard");
        assert_eq!(path_of("https://site.example"), "/");
    }

    #[test]
    fn test_authenticated_heuristic() {
        let applier = applier(Arc::new(MemoryBrowser::new()));
        assert!(applier.looks_authenticated("https://site.example/dashboard"));
        assert!(!applier.looks_authenticated("https://site.example/login?next=/dashboard"));
        assert!(!applier.looks_authenticated("https://site.example/auth/dashboard"));
        assert!(!applier.looks_authenticated("https://site.example/pricing"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_site_surfaces_match_partition_or_origin() {
        let browser = Arc::new(MemoryBrowser::new());
        browser.add_surface("persist:my-site", "about:blank");
        browser.add_surface("persist:default", "https://site.example/home");
        browser.add_surface("persist:default", "https://elsewhere.example/");

        let applier = applier(browser);
        assert_eq!(applier.site_surfaces(&site()).await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookalike_hosts_are_other_sites() {
        let browser = Arc::new(MemoryBrowser::new());
        let lookalike = browser.add_surface("persist:default", "https://site.example.org/dashboard");
        let other_port = browser.add_surface("persist:default", "https://site.example:8443/dashboard");

        let applier = applier(browser.clone());
        assert!(applier.site_surfaces(&site()).await.is_empty());
        assert!(applier.authenticated_surface(&site()).await.is_none());
        assert_eq!(applier.close_site_surfaces(&site()).await.unwrap(), 0);
        assert!(browser.surface(lookalike).is_some());
        assert!(browser.surface(other_port).is_some());

        let surface = applier.navigate_with_session(&site(), "abc").await.unwrap();
        assert_ne!(surface.id, lookalike);
        assert_ne!(surface.id, other_port);
        assert_eq!(
            browser.surface(lookalike).unwrap().url,
            "https://site.example.org/dashboard"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_site_surfaces_leaves_others() {
        let browser = Arc::new(MemoryBrowser::new());
        browser.add_surface("persist:my-site", "https://site.example/home");
        let other = browser.add_surface("persist:other", "https://other.example/");

        let applier = applier(browser.clone());
        assert_eq!(applier.close_site_surfaces(&site()).await.unwrap(), 1);
        assert!(browser.surface(other).is_some());
    }
}
