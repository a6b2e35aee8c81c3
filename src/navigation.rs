use parking_lot::Mutex;
use url::{Position, Url};

/// Access to the current location and history of the host page.
pub trait Navigation: Send + Sync + 'static {
    fn current_url(&self) -> Url;

    /// Replace the current history entry without reloading.
    fn replace_url(&self, url: Url);

    /// Navigate away (full page load).
    fn assign(&self, url: Url);

    /// Path, query and fragment of the current location.
    fn current_path(&self) -> String {
        let url = self.current_url();
        url[Position::BeforePath..].to_owned()
    }
}

/// [`Navigation`] backed by a single in-memory URL.
pub struct InMemoryNavigation {
    inner: Mutex<NavigationState>,
}

struct NavigationState {
    current: Url,
    assigned: Vec<Url>,
    replaced: usize,
}

impl InMemoryNavigation {
    #[must_use]
    pub fn new(start: Url) -> Self {
        Self {
            inner: Mutex::new(NavigationState {
                current: start,
                assigned: Vec::new(),
                replaced: 0,
            }),
        }
    }

    /// Every URL passed to [`Navigation::assign`], oldest first.
    #[must_use]
    pub fn assigned(&self) -> Vec<Url> {
        self.inner.lock().assigned.clone()
    }

    /// Number of in-place history replacements.
    #[must_use]
    pub fn replace_count(&self) -> usize {
        self.inner.lock().replaced
    }
}

impl Navigation for InMemoryNavigation {
    fn current_url(&self) -> Url {
        self.inner.lock().current.clone()
    }

    fn replace_url(&self, url: Url) {
        let mut state = self.inner.lock();
        state.current = url;
        state.replaced += 1;
    }

    fn assign(&self, url: Url) {
        let mut state = self.inner.lock();
        state.assigned.push(url.clone());
        state.current = url;
    }
}
