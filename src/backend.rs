use parking_lot::Mutex;
use tracing::debug;

use crate::{
    MonitorMap, key_monitors,
    platform::{PlatformDisplayApi, PlatformError},
};

struct BackendState {
    api: Box<dyn PlatformDisplayApi>,
    caching: bool,
    cache: Option<MonitorMap>,
}

/// The platform API behind one lock, together with the snapshot cache the
/// watchdog keeps up to date.
///
/// Every platform call goes through here, so the watchdog thread and the caller
/// never reach the OS at the same time.
pub(crate) struct Backend {
    state: Mutex<BackendState>,
}

impl Backend {
    pub(crate) fn new(api: Box<dyn PlatformDisplayApi>) -> Self {
        Self {
            state: Mutex::new(BackendState {
                api,
                caching: false,
                cache: None,
            }),
        }
    }

    /// The cached snapshot while caching is on, a fresh one otherwise.
    pub(crate) fn monitors(&self) -> Result<MonitorMap, PlatformError> {
        let mut state = self.state.lock();
        if state.caching
            && let Some(cache) = &state.cache
        {
            return Ok(cache.clone());
        }

        Self::enumerate(&mut state)
    }

    /// Always asks the platform, refreshing the cache when caching is on.
    pub(crate) fn fresh_monitors(&self) -> Result<MonitorMap, PlatformError> {
        Self::enumerate(&mut self.state.lock())
    }

    fn enumerate(state: &mut BackendState) -> Result<MonitorMap, PlatformError> {
        let monitors = key_monitors(state.api.enumerate()?);
        if state.caching {
            state.cache = Some(monitors.clone());
        }
        Ok(monitors)
    }

    /// Runs a platform call that does not change any monitor.
    pub(crate) fn query<T>(
        &self,
        call: impl FnOnce(&dyn PlatformDisplayApi) -> Result<T, PlatformError>,
    ) -> Result<T, PlatformError> {
        call(self.state.lock().api.as_ref())
    }

    /// Runs a platform call that changes monitors. The cache is refreshed
    /// afterwards so readers do not see the state from before the change.
    pub(crate) fn mutate<T>(
        &self,
        call: impl FnOnce(&dyn PlatformDisplayApi) -> Result<T, PlatformError>,
    ) -> Result<T, PlatformError> {
        let mut state = self.state.lock();
        let result = call(state.api.as_ref());

        if state.caching
            && let Err(err) = Self::enumerate(&mut state)
        {
            debug!(%err, "dropping monitor cache after a failed refresh");
            state.cache = None;
        }

        result
    }

    pub(crate) fn set_caching(&self, caching: bool) {
        let mut state = self.state.lock();
        state.caching = caching;
        if !caching {
            state.cache = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakePlatform, snapshot};

    #[test]
    fn reads_come_from_the_cache_only_while_caching() {
        let platform = FakePlatform::new([snapshot("A", 1, (0, 0), (1920, 1080))]);
        let backend = Backend::new(Box::new(platform.clone()));

        backend.monitors().unwrap();
        backend.monitors().unwrap();
        assert_eq!(platform.state.lock().enumerations, 2);

        backend.set_caching(true);
        backend.fresh_monitors().unwrap();
        backend.monitors().unwrap();
        backend.monitors().unwrap();
        assert_eq!(platform.state.lock().enumerations, 3);

        backend.set_caching(false);
        backend.monitors().unwrap();
        assert_eq!(platform.state.lock().enumerations, 4);
    }

    #[test]
    fn mutations_refresh_the_cache() {
        let platform = FakePlatform::new([snapshot("A", 1, (0, 0), (1920, 1080))]);
        let backend = Backend::new(Box::new(platform.clone()));
        backend.set_caching(true);
        let handle = backend.fresh_monitors().unwrap()["A"].handle.clone();

        backend
            .mutate(|api| api.set_position(&handle, dpi::LogicalPosition::new(5, 5)))
            .unwrap();

        assert_eq!(backend.monitors().unwrap()["A"].position.x, 5);
    }
}
