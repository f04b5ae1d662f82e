use std::{collections::BTreeMap, fmt, sync::Arc, time::Duration};

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
use std::sync::OnceLock;

use tracing::debug;

use crate::{
    Arrangement, Error, LayoutPlan, Listener, Monitor, MonitorMap, Point, SavedSetup, Watchdog,
    WatchdogConfig, arrangement, backend::Backend, platform::PlatformDisplayApi, setup,
};

struct Inner {
    backend: Arc<Backend>,
    watchdog: Watchdog,
}

/// Owns the platform backend, its snapshot cache and the [`Watchdog`].
///
/// Cloning is cheap and every clone refers to the same backend. Use
/// [`DisplayManager::global`] for the process-wide instance bound to the native
/// backend, or [`DisplayManager::new`] to drive any other [`PlatformDisplayApi`].
#[derive(Clone)]
pub struct DisplayManager {
    inner: Arc<Inner>,
}

impl fmt::Debug for DisplayManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisplayManager")
            .field("watchdog_running", &self.inner.watchdog.is_running())
            .finish_non_exhaustive()
    }
}

impl DisplayManager {
    pub fn new(api: impl PlatformDisplayApi + 'static) -> Self {
        Self::with_config(api, WatchdogConfig::default())
    }

    pub fn with_config(api: impl PlatformDisplayApi + 'static, config: WatchdogConfig) -> Self {
        let backend = Arc::new(Backend::new(Box::new(api)));
        let watchdog = Watchdog::new(Arc::clone(&backend), config);

        Self {
            inner: Arc::new(Inner { backend, watchdog }),
        }
    }

    /// Create a manager for the displays of the running OS.
    ///
    /// # Errors
    /// Returns [`Error::InitializationError`] if the native backend can not be set up.
    #[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
    pub fn native() -> Result<Self, Error> {
        let api = crate::NativeDisplayApi::new().map_err(Error::InitializationError)?;
        Ok(Self::new(api))
    }

    /// The process-wide manager, created on first use.
    #[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
    pub fn global() -> Result<&'static Self, Error> {
        static GLOBAL: OnceLock<DisplayManager> = OnceLock::new();

        if let Some(manager) = GLOBAL.get() {
            return Ok(manager);
        }
        let manager = Self::native()?;
        Ok(GLOBAL.get_or_init(|| manager))
    }

    pub(crate) fn backend(&self) -> &Backend {
        &self.inner.backend
    }

    pub fn watchdog(&self) -> &Watchdog {
        &self.inner.watchdog
    }

    /// Snapshots of every connected monitor, from the watchdog cache when update
    /// caching is enabled.
    pub fn snapshots(&self) -> Result<MonitorMap, Error> {
        Ok(self.backend().monitors()?)
    }

    pub fn get_all_monitors(&self) -> Result<Vec<Monitor>, Error> {
        Ok(self
            .snapshots()?
            .into_iter()
            .map(|(name, snapshot)| Monitor::bind(self.clone(), name, &snapshot))
            .collect())
    }

    pub fn get_all_monitors_as_mapping(&self) -> Result<BTreeMap<String, Monitor>, Error> {
        Ok(self
            .snapshots()?
            .into_iter()
            .map(|(name, snapshot)| {
                let monitor = Monitor::bind(self.clone(), name.clone(), &snapshot);
                (name, monitor)
            })
            .collect())
    }

    pub fn get_monitors_count(&self) -> Result<usize, Error> {
        Ok(self.snapshots()?.len())
    }

    pub fn get_primary(&self) -> Result<Monitor, Error> {
        Monitor::new(self, None)
    }

    /// Monitors whose bounds contain the point, edges included.
    pub fn find_monitors_at_point(&self, x: i32, y: i32) -> Result<Vec<Monitor>, Error> {
        Ok(self
            .snapshots()?
            .into_iter()
            .filter(|(_, snapshot)| snapshot.bounds().contains(x, y))
            .map(|(name, snapshot)| Monitor::bind(self.clone(), name, &snapshot))
            .collect())
    }

    pub fn find_monitor_by_name(&self, name: &str) -> Result<Option<Monitor>, Error> {
        Ok(self
            .snapshots()?
            .remove_entry(name)
            .map(|(name, snapshot)| Monitor::bind(self.clone(), name, &snapshot)))
    }

    pub fn get_mouse_position(&self) -> Result<Point, Error> {
        Ok(self.backend().query(|api| api.mouse_position())?)
    }

    /// Apply a complete monitor layout.
    ///
    /// The arrangement is planned against a fresh snapshot. If it is invalid, an
    /// [`Error::Arrangement`] is returned and no monitor is touched.
    pub fn arrange_monitors(&self, arrangement: &Arrangement) -> Result<LayoutPlan, Error> {
        let monitors = self.backend().fresh_monitors()?;
        self.apply_arrangement(arrangement, &monitors)
    }

    pub(crate) fn apply_arrangement(
        &self,
        arrangement: &Arrangement,
        monitors: &MonitorMap,
    ) -> Result<LayoutPlan, Error> {
        let plan = arrangement::plan(arrangement, monitors)?;
        let targets = plan.targets(monitors);

        self.backend().mutate(|api| api.apply_layout(&targets))?;
        debug!(primary = %plan.primary, monitors = targets.len(), "applied monitor arrangement");

        Ok(plan)
    }

    /// Capture the state of every monitor so it can be brought back with
    /// [`DisplayManager::restore_setup`].
    pub fn save_setup(&self) -> Result<SavedSetup, Error> {
        setup::save(self)
    }

    pub fn restore_setup(&self, setup: &SavedSetup) -> Result<(), Error> {
        setup::restore(self, setup)
    }

    /// See [`Watchdog::enable`].
    pub fn enable_watchdog(
        &self,
        interval: Option<Duration>,
        on_count_changed: Option<Listener>,
        on_props_changed: Option<Listener>,
    ) -> Result<(), Error> {
        self.watchdog()
            .enable(interval, on_count_changed, on_props_changed)
    }

    pub fn disable_watchdog(&self) -> Result<(), Error> {
        self.watchdog().disable()
    }

    pub fn is_watchdog_running(&self) -> bool {
        self.watchdog().is_running()
    }

    pub fn update_watchdog_interval(&self, interval: Duration) {
        self.watchdog().update_interval(interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ArrangementError, Placement, Position,
        platform::MockPlatformDisplayApi,
        testing::{FakePlatform, primary, snapshot},
    };

    fn two_monitors() -> FakePlatform {
        FakePlatform::new([
            primary(snapshot("A", 1, (0, 0), (1920, 1080))),
            snapshot("B", 2, (1920, 0), (1680, 1050)),
        ])
    }

    #[test]
    fn left_of_primary_is_normalized_to_the_origin() {
        let platform = two_monitors();
        let manager = DisplayManager::new(platform.clone());

        let arrangement = Arrangement::new()
            .primary("A")
            .relative("B", Position::LeftTop, "A");
        let plan = manager.arrange_monitors(&arrangement).unwrap();

        assert_eq!(plan.offset, Point::new(1680, 0));
        let monitors = manager.snapshots().unwrap();
        assert_eq!(monitors["B"].position, Point::new(0, 0));
        assert_eq!(monitors["A"].position, Point::new(1680, 0));
        assert!(monitors["A"].is_primary);
    }

    #[test]
    fn invalid_arrangement_never_reaches_the_platform() {
        let mut api = MockPlatformDisplayApi::new();
        api.expect_enumerate().returning(|| {
            Ok(vec![
                primary(snapshot("A", 1, (0, 0), (1920, 1080))),
                snapshot("B", 2, (1920, 0), (1680, 1050)),
            ])
        });
        api.expect_apply_layout().never();
        api.expect_set_position().never();
        api.expect_set_primary().never();
        let manager = DisplayManager::new(api);

        let missing = Arrangement::new().primary("A");
        assert!(matches!(
            manager.arrange_monitors(&missing),
            Err(Error::Arrangement(ArrangementError::MissingMonitor(name))) if name == "B"
        ));

        let cycle = Arrangement::new()
            .with("A", Placement::absolute(0, 0))
            .relative("B", Position::RightTop, "B");
        assert!(matches!(
            manager.arrange_monitors(&cycle),
            Err(Error::Arrangement(ArrangementError::SelfReference(_)))
        ));
    }

    #[test]
    fn queries_find_monitors() {
        let manager = DisplayManager::new(two_monitors());

        assert_eq!(manager.get_monitors_count().unwrap(), 2);
        assert_eq!(manager.get_primary().unwrap().name().unwrap(), "A");
        assert_eq!(manager.get_mouse_position().unwrap(), Point::new(10, 20));
        assert!(manager.find_monitor_by_name("C").unwrap().is_none());
        assert_eq!(
            manager
                .find_monitor_by_name("B")
                .unwrap()
                .unwrap()
                .size()
                .unwrap(),
            crate::Size::new(1680, 1050)
        );

        let names: Vec<String> = manager
            .find_monitors_at_point(1920, 500)
            .unwrap()
            .iter()
            .map(|monitor| monitor.name().unwrap())
            .collect();
        assert_eq!(names, ["A", "B"]);

        let mapping = manager.get_all_monitors_as_mapping().unwrap();
        assert_eq!(mapping.keys().collect::<Vec<_>>(), ["A", "B"]);
    }

    #[test]
    fn query_failures_are_reported() {
        let mut api = MockPlatformDisplayApi::new();
        api.expect_enumerate()
            .returning(|| Err(crate::PlatformError::Parse("garbage".into())));
        let manager = DisplayManager::new(api);

        assert!(matches!(
            manager.get_all_monitors(),
            Err(Error::PlatformError(crate::PlatformError::Parse(_)))
        ));
    }
}
