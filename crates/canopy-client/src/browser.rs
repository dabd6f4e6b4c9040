//! The browsing context the session handoff flows act on.
//!
//! A host application embeds the client next to its own windowing layer
//! and implements [`BrowsingContext`] over it. [`MemoryBrowser`] is the
//! headless implementation used by the standalone binary and the tests.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use reqwest::Url;
use tracing::{debug, info};

use crate::error::BrowserError;

pub type SurfaceId = u64;

/// One browsing view (tab or window).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Surface {
    pub id: SurfaceId,
    /// Cookie jar the surface draws from.
    pub partition: String,
    pub url: String,
}

/// Both URLs parse and share scheme, host and port.
pub fn same_origin(a: &str, b: &str) -> bool {
    match (Url::parse(a), Url::parse(b)) {
        (Ok(a), Ok(b)) => {
            let origin = a.origin();
            origin.is_tuple() && origin == b.origin()
        }
        _ => false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    /// URL the cookie is scoped to.
    pub url: String,
}

pub trait BrowsingContext: Send + Sync + 'static {
    fn surfaces(&self) -> impl Future<Output = Vec<Surface>> + Send;

    fn active_surface(&self) -> impl Future<Output = Option<Surface>> + Send;

    fn open_surface(
        &self,
        partition: &str,
        url: &str,
    ) -> impl Future<Output = Result<Surface, BrowserError>> + Send;

    /// Write a cookie into a partition's jar.
    fn set_cookie(
        &self,
        partition: &str,
        cookie: &SessionCookie,
    ) -> impl Future<Output = Result<(), BrowserError>> + Send;

    /// Write a cookie straight into one surface's storage.
    fn set_surface_cookie(
        &self,
        surface: SurfaceId,
        cookie: &SessionCookie,
    ) -> impl Future<Output = Result<(), BrowserError>> + Send;

    fn navigate(
        &self,
        surface: SurfaceId,
        url: &str,
    ) -> impl Future<Output = Result<(), BrowserError>> + Send;

    fn close_surface(&self, surface: SurfaceId) -> impl Future<Output = Result<(), BrowserError>> + Send;

    /// Drop cookies and storage for `origin` inside `partition` only.
    fn clear_site_storage(
        &self,
        partition: &str,
        origin: &str,
    ) -> impl Future<Output = Result<(), BrowserError>> + Send;

    fn show_notice(&self, text: &str, duration: Duration) -> impl Future<Output = ()> + Send;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

/// Something [`MemoryBrowser`] did, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserEvent {
    Opened(SurfaceId),
    CookieSet { partition: String, value: String },
    SurfaceCookieSet { surface: SurfaceId, value: String },
    Navigated { surface: SurfaceId, url: String },
    Closed(SurfaceId),
    StorageCleared { partition: String, origin: String },
    Notice(String),
}

#[derive(Debug, Default)]
struct BrowserState {
    next_id: SurfaceId,
    surfaces: Vec<Surface>,
    active: Option<SurfaceId>,
    jars: HashMap<String, Vec<SessionCookie>>,
    surface_cookies: HashMap<SurfaceId, Vec<SessionCookie>>,
    events: Vec<BrowserEvent>,
    refuse_new_surfaces: bool,
    fail_storage_clears: bool,
}

/// Headless browsing context that keeps surfaces and cookie jars in memory.
#[derive(Debug, Default)]
pub struct MemoryBrowser {
    inner: Mutex<BrowserState>,
}

impl MemoryBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BrowserState> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Add a surface without recording an event; it becomes the active one.
    pub fn add_surface(&self, partition: &str, url: &str) -> SurfaceId {
        let mut state = self.state();
        let id = insert_surface(&mut state, partition, url);
        state.active = Some(id);
        id
    }

    /// Make `open_surface` fail, as a host with no free window slot would.
    pub fn refuse_new_surfaces(&self, refuse: bool) {
        self.state().refuse_new_surfaces = refuse;
    }

    /// Make `clear_site_storage` fail.
    pub fn fail_storage_clears(&self, fail: bool) {
        self.state().fail_storage_clears = fail;
    }

    pub fn surface(&self, id: SurfaceId) -> Option<Surface> {
        self.state().surfaces.iter().find(|s| s.id == id).cloned()
    }

    /// Cookies visible to a surface: its partition jar plus its own storage.
    pub fn cookies_for_surface(&self, id: SurfaceId) -> Vec<SessionCookie> {
        let state = self.state();
        let Some(surface) = state.surfaces.iter().find(|s| s.id == id) else {
            return Vec::new();
        };
        let mut cookies = state.jars.get(&surface.partition).cloned().unwrap_or_default();
        if let Some(own) = state.surface_cookies.get(&id) {
            cookies.extend(own.iter().cloned());
        }
        cookies
    }

    pub fn cookies_in(&self, partition: &str) -> Vec<SessionCookie> {
        self.state().jars.get(partition).cloned().unwrap_or_default()
    }

    pub fn events(&self) -> Vec<BrowserEvent> {
        self.state().events.clone()
    }
}

fn insert_surface(state: &mut BrowserState, partition: &str, url: &str) -> SurfaceId {
    state.next_id += 1;
    let id = state.next_id;
    state.surfaces.push(Surface {
        id,
        partition: partition.to_string(),
        url: url.to_string(),
    });
    id
}

fn upsert_cookie(jar: &mut Vec<SessionCookie>, cookie: &SessionCookie) {
    jar.retain(|c| !(c.name == cookie.name && c.url == cookie.url));
    jar.push(cookie.clone());
}

impl BrowsingContext for MemoryBrowser {
    async fn surfaces(&self) -> Vec<Surface> {
        self.state().surfaces.clone()
    }

    async fn active_surface(&self) -> Option<Surface> {
        let state = self.state();
        let active = state.active?;
        state.surfaces.iter().find(|s| s.id == active).cloned()
    }

    async fn open_surface(&self, partition: &str, url: &str) -> Result<Surface, BrowserError> {
        let mut state = self.state();
        if state.refuse_new_surfaces {
            return Err(BrowserError::Operation("new surfaces are disabled".into()));
        }
        let id = insert_surface(&mut state, partition, url);
        state.active = Some(id);
        state.events.push(BrowserEvent::Opened(id));
        debug!(surface = id, partition, url, "Surface opened");
        Ok(Surface {
            id,
            partition: partition.to_string(),
            url: url.to_string(),
        })
    }

    async fn set_cookie(&self, partition: &str, cookie: &SessionCookie) -> Result<(), BrowserError> {
        let mut state = self.state();
        upsert_cookie(state.jars.entry(partition.to_string()).or_default(), cookie);
        state.events.push(BrowserEvent::CookieSet {
            partition: partition.to_string(),
            value: cookie.value.clone(),
        });
        Ok(())
    }

    async fn set_surface_cookie(&self, surface: SurfaceId, cookie: &SessionCookie) -> Result<(), BrowserError> {
        let mut state = self.state();
        if !state.surfaces.iter().any(|s| s.id == surface) {
            return Err(BrowserError::SurfaceNotFound(surface));
        }
        upsert_cookie(state.surface_cookies.entry(surface).or_default(), cookie);
        state.events.push(BrowserEvent::SurfaceCookieSet {
            surface,
            value: cookie.value.clone(),
        });
        Ok(())
    }

    async fn navigate(&self, surface: SurfaceId, url: &str) -> Result<(), BrowserError> {
        let mut state = self.state();
        let entry = state
            .surfaces
            .iter_mut()
            .find(|s| s.id == surface)
            .ok_or(BrowserError::SurfaceNotFound(surface))?;
        entry.url = url.to_string();
        state.events.push(BrowserEvent::Navigated {
            surface,
            url: url.to_string(),
        });
        Ok(())
    }

    async fn close_surface(&self, surface: SurfaceId) -> Result<(), BrowserError> {
        let mut state = self.state();
        let before = state.surfaces.len();
        state.surfaces.retain(|s| s.id != surface);
        if state.surfaces.len() == before {
            return Err(BrowserError::SurfaceNotFound(surface));
        }
        state.surface_cookies.remove(&surface);
        if state.active == Some(surface) {
            state.active = state.surfaces.last().map(|s| s.id);
        }
        state.events.push(BrowserEvent::Closed(surface));
        Ok(())
    }

    async fn clear_site_storage(&self, partition: &str, origin: &str) -> Result<(), BrowserError> {
        let mut state = self.state();
        if state.fail_storage_clears {
            return Err(BrowserError::Operation("storage is locked".into()));
        }
        if let Some(jar) = state.jars.get_mut(partition) {
            jar.retain(|c| !same_origin(&c.url, origin));
        }
        let in_partition: Vec<SurfaceId> = state
            .surfaces
            .iter()
            .filter(|s| s.partition == partition)
            .map(|s| s.id)
            .collect();
        for id in in_partition {
            if let Some(jar) = state.surface_cookies.get_mut(&id) {
                jar.retain(|c| !same_origin(&c.url, origin));
            }
        }
        state.events.push(BrowserEvent::StorageCleared {
            partition: partition.to_string(),
            origin: origin.to_string(),
        });
        Ok(())
    }

    async fn show_notice(&self, text: &str, duration: Duration) {
        info!(notice = text, duration_ms = duration.as_millis() as u64, "Notice shown");
        self.state().events.push(BrowserEvent::Notice(text.to_string()));
    }
}
