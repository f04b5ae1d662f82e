//! Windows backend built on GDI display settings and DDC/CI through DXVA2.

use std::{
    ffi::{OsStr, OsString},
    fmt::Display,
    os::windows::ffi::{OsStrExt, OsStringExt},
};

use tracing::{debug, warn};
use windows::{
    Win32::{
        Devices::Display::*,
        Foundation::*,
        Graphics::Gdi::*,
        UI::{HiDpi::*, WindowsAndMessaging::*},
    },
    core::{BOOL, PCWSTR},
};

use crate::{
    DisplayMode, Dpi, MonitorHandle, MonitorSnapshot, Orientation, Point, PowerState, Rect, Scale,
    Size,
    platform::{LayoutTarget, PlatformDisplayApi, PlatformError},
};

const USER_DEFAULT_SCREEN_DPI: u32 = 96;
/// VCP code of the DDC/CI power mode.
const VCP_POWER_MODE: u8 = 0xD6;

/// Makes the process per-monitor DPI aware, so monitors with a scale other than
/// 100% report physical pixels instead of virtualized ones.
///
/// [`WindowsDisplayApi::new`] calls it. The awareness of a process can only be
/// set once; when a GUI framework already did it, the call fails and the
/// existing setting stays.
///
/// # Errors
/// Returns a [`PlatformError`] if `SetProcessDpiAwareness` fails.
pub fn set_process_per_monitor_dpi_aware() -> Result<(), PlatformError> {
    unsafe { SetProcessDpiAwareness(PROCESS_PER_MONITOR_DPI_AWARE)? };
    Ok(())
}

/// The display API of Windows.
///
/// Handles carry the `HMONITOR` value and the GDI device name (`\\.\DISPLAY1`).
/// Settings are addressed by device name, since `HMONITOR` values change whenever
/// the desktop is reconfigured.
#[derive(Debug)]
pub struct WindowsDisplayApi {
    _private: (),
}

impl WindowsDisplayApi {
    pub fn new() -> Result<Self, PlatformError> {
        if let Err(err) = set_process_per_monitor_dpi_aware() {
            debug!(%err, "DPI awareness was already set");
        }
        Ok(Self { _private: () })
    }
}

fn wide(text: &str) -> Vec<u16> {
    OsStr::new(text).encode_wide().chain(Some(0)).collect()
}

fn from_wide(buffer: &[u16]) -> String {
    let len = buffer
        .iter()
        .position(|&c| c == 0)
        .unwrap_or(buffer.len());
    OsString::from_wide(&buffer[..len])
        .to_string_lossy()
        .into_owned()
}

fn empty_mode() -> DEVMODEW {
    DEVMODEW {
        dmSize: std::mem::size_of::<DEVMODEW>() as u16,
        ..Default::default()
    }
}

fn settings(device: &[u16], mode: ENUM_DISPLAY_SETTINGS_MODE) -> Option<DEVMODEW> {
    let mut settings = empty_mode();
    unsafe { EnumDisplaySettingsW(PCWSTR(device.as_ptr()), mode, &mut settings) }
        .as_bool()
        .then_some(settings)
}

fn current_settings(device: &[u16]) -> Result<DEVMODEW, PlatformError> {
    settings(device, ENUM_CURRENT_SETTINGS)
        .ok_or_else(|| PlatformError::NotFound(String::from_utf16_lossy(device)))
}

fn to_mode(settings: &DEVMODEW) -> DisplayMode {
    DisplayMode::new(
        settings.dmPelsWidth,
        settings.dmPelsHeight,
        f64::from(settings.dmDisplayFrequency),
    )
}

fn to_orientation(settings: &DEVMODEW) -> Orientation {
    match unsafe { settings.Anonymous1.Anonymous2.dmDisplayOrientation } {
        DMDO_90 => Orientation::Right,
        DMDO_180 => Orientation::Inverted,
        DMDO_270 => Orientation::Left,
        _ => Orientation::Normal,
    }
}

/// Stages or applies a settings change for one device.
fn change_settings(
    device: &[u16],
    settings: &DEVMODEW,
    flags: CDS_TYPE,
) -> Result<(), PlatformError> {
    let result = unsafe {
        ChangeDisplaySettingsExW(
            PCWSTR(device.as_ptr()),
            Some(settings as *const DEVMODEW),
            None,
            flags,
            None,
        )
    };
    check_change(result)
}

/// Applies every change staged with `CDS_NORESET`.
fn commit_settings() -> Result<(), PlatformError> {
    let result =
        unsafe { ChangeDisplaySettingsExW(PCWSTR::null(), None, None, CDS_TYPE(0), None) };
    check_change(result)
}

/// Position settings of one device, ready to be written to the registry.
struct Staging {
    device: Vec<u16>,
    settings: DEVMODEW,
    primary: bool,
}

fn stage_settings(staging: &Staging) -> Result<(), PlatformError> {
    let mut flags = CDS_UPDATEREGISTRY | CDS_NORESET;
    if staging.primary {
        flags |= CDS_SET_PRIMARY;
    }
    change_settings(&staging.device, &staging.settings, flags)
}

/// Stages `changes` in order. When one fails, `originals` are staged again
/// before the error is returned, so no half-written layout is left behind for
/// the next commit.
fn stage_all<T, E: Display>(
    changes: &[T],
    originals: &[T],
    mut stage: impl FnMut(&T) -> Result<(), E>,
) -> Result<(), E> {
    for change in changes {
        if let Err(err) = stage(change) {
            rollback(originals, &mut stage);
            return Err(err);
        }
    }
    Ok(())
}

fn rollback<T, E: Display>(originals: &[T], mut stage: impl FnMut(&T) -> Result<(), E>) {
    for original in originals {
        if let Err(err) = stage(original) {
            warn!(%err, "failed to stage the previous display settings");
        }
    }
}

fn check_change(result: DISP_CHANGE) -> Result<(), PlatformError> {
    if result == DISP_CHANGE_SUCCESSFUL {
        Ok(())
    } else {
        Err(PlatformError::Command {
            program: "ChangeDisplaySettingsExW".into(),
            reason: format!("returned {}", result.0),
        })
    }
}

fn get_dpi(hdc: HDC, h_monitor: HMONITOR) -> Dpi {
    // NOTE: https://learn.microsoft.com/en-us/windows/win32/learnwin32/dpi-and-device-independent-pixels
    let mut dpi_x = 0;
    let mut dpi_y = 0;
    let result = unsafe { GetDpiForMonitor(h_monitor, MDT_EFFECTIVE_DPI, &mut dpi_x, &mut dpi_y) };

    if result.is_err() {
        dpi_x = if unsafe { IsProcessDPIAware().as_bool() } {
            unsafe { GetDeviceCaps(Some(hdc), LOGPIXELSX) as _ }
        } else {
            USER_DEFAULT_SCREEN_DPI
        };
        dpi_y = dpi_x;
    };

    Dpi::new(dpi_x, dpi_y)
}

fn to_rect(rect: &RECT) -> Rect {
    Rect::new(rect.left, rect.top, rect.right, rect.bottom)
}

struct EnumDisplayMonitorsUserData {
    monitors: Vec<(HMONITOR, MonitorSnapshot)>,
    result: Result<(), PlatformError>,
}

unsafe extern "system" fn monitor_enum_proc(
    h_monitor: HMONITOR,
    hdc: HDC,
    _rect: *mut RECT,
    user_data: LPARAM,
) -> BOOL {
    let monitors_ptr = user_data.0 as *mut EnumDisplayMonitorsUserData;
    if monitors_ptr.is_null() {
        return false.into();
    }

    let user_data = unsafe { &mut *monitors_ptr };

    let mut monitor_info = MONITORINFOEXW::default();
    monitor_info.monitorInfo.cbSize = std::mem::size_of::<MONITORINFOEXW>() as _;

    if let Err(e) = unsafe { GetMonitorInfoW(h_monitor, &raw mut monitor_info as _) }.ok() {
        user_data.result = Err(e.into());
        return true.into(); // Skip this monitor but continue enumeration
    }

    let device = from_wide(&monitor_info.szDevice);
    let info = &monitor_info.monitorInfo;
    let position = Point::new(info.rcMonitor.left, info.rcMonitor.top);
    let size = Size::new(
        (info.rcMonitor.right - info.rcMonitor.left) as u32,
        (info.rcMonitor.bottom - info.rcMonitor.top) as u32,
    );

    let settings = match current_settings(&wide(&device)) {
        Ok(settings) => settings,
        Err(e) => {
            user_data.result = Err(e);
            return true.into();
        }
    };

    let dpi = get_dpi(hdc, h_monitor);
    let scale = |dpi: u32| (f64::from(dpi) / f64::from(USER_DEFAULT_SCREEN_DPI) * 100.0).round();

    let snapshot = MonitorSnapshot {
        system_name: device.trim_start_matches(r"\\.\").to_owned(),
        handle: MonitorHandle::new(h_monitor.0 as usize as u64, device.as_str()),
        is_primary: (info.dwFlags & MONITORINFOF_PRIMARY) != 0,
        position,
        size,
        work_area: to_rect(&info.rcWork),
        scale: Scale::new(scale(dpi.x), scale(dpi.y)),
        dpi,
        orientation: to_orientation(&settings),
        frequency: f64::from(settings.dmDisplayFrequency),
        color_depth: settings.dmBitsPerPel,
    };
    user_data.monitors.push((h_monitor, snapshot));

    true.into()
}

fn enumerate_monitors() -> Result<Vec<(HMONITOR, MonitorSnapshot)>, PlatformError> {
    let mut user_data = EnumDisplayMonitorsUserData {
        monitors: Vec::new(),
        result: Ok(()),
    };

    unsafe {
        EnumDisplayMonitors(
            None,
            None,
            Some(monitor_enum_proc),
            LPARAM(&raw mut user_data as isize),
        )
        .ok()?;
    };

    user_data.result.map(|_| user_data.monitors)
}

/// The current `HMONITOR` of a device.
fn monitor_of(handle: &MonitorHandle) -> Result<HMONITOR, PlatformError> {
    enumerate_monitors()?
        .into_iter()
        .find(|(_, snapshot)| snapshot.handle.device() == handle.device())
        .map(|(h_monitor, _)| h_monitor)
        .ok_or_else(|| PlatformError::NotFound(handle.to_string()))
}

/// Runs `call` with the first physical monitor behind `handle`.
fn with_physical_monitor<T>(
    handle: &MonitorHandle,
    call: impl FnOnce(HANDLE) -> Result<T, PlatformError>,
) -> Result<T, PlatformError> {
    let h_monitor = monitor_of(handle)?;

    let mut count = 0;
    unsafe { GetNumberOfPhysicalMonitorsFromHMONITOR(h_monitor, &mut count)? };
    if count == 0 {
        return Err(PlatformError::unsupported("DDC/CI"));
    }

    let mut physical = vec![PHYSICAL_MONITOR::default(); count as usize];
    unsafe { GetPhysicalMonitorsFromHMONITOR(h_monitor, &mut physical)? };

    let result = call(physical[0].hPhysicalMonitor);

    if let Err(err) = unsafe { DestroyPhysicalMonitors(&physical) } {
        warn!(%err, %handle, "DestroyPhysicalMonitors failed");
    }
    result
}

fn ddc_failed(operation: &'static str) -> PlatformError {
    PlatformError::Command {
        program: operation.into(),
        reason: "the monitor did not answer over DDC/CI".into(),
    }
}

fn to_percent(current: u32, min: u32, max: u32) -> u32 {
    if max <= min {
        return current.min(100);
    }
    ((current.saturating_sub(min)) * 100 + (max - min) / 2) / (max - min)
}

fn from_percent(percent: u32, min: u32, max: u32) -> u32 {
    min + ((max.saturating_sub(min)) * percent + 50) / 100
}

fn set_power_mode(handle: &MonitorHandle, value: u32) -> Result<(), PlatformError> {
    with_physical_monitor(handle, |monitor| {
        if unsafe { SetVCPFeature(monitor, VCP_POWER_MODE, value) } == 0 {
            return Err(ddc_failed("SetVCPFeature"));
        }
        Ok(())
    })
}

impl PlatformDisplayApi for WindowsDisplayApi {
    fn enumerate(&self) -> Result<Vec<MonitorSnapshot>, PlatformError> {
        Ok(enumerate_monitors()?
            .into_iter()
            .map(|(_, snapshot)| snapshot)
            .collect())
    }

    /// Stages every move with `CDS_NORESET` and applies them with one final call.
    ///
    /// Windows requires the primary monitor at `(0, 0)`, so the whole layout is
    /// shifted to put it there.
    fn apply_layout(&self, layout: &[LayoutTarget]) -> Result<(), PlatformError> {
        let origin = layout
            .iter()
            .find(|target| target.primary)
            .map_or(Point::new(0, 0), |target| target.position);

        let primary = enumerate_monitors()?
            .into_iter()
            .find_map(|(_, monitor)| monitor.is_primary.then_some(monitor.handle))
            .map(|handle| handle.device().to_owned());

        // Every device is looked up before anything is staged.
        let mut changes = Vec::with_capacity(layout.len());
        let mut originals = Vec::with_capacity(layout.len());
        for target in layout {
            let device = wide(target.handle.device());
            let mut original = current_settings(&device)?;
            original.dmFields = DM_POSITION;

            let mut settings = original;
            let position = POINTL {
                x: target.position.x - origin.x,
                y: target.position.y - origin.y,
            };
            unsafe { settings.Anonymous1.Anonymous2.dmPosition = position };

            changes.push(Staging {
                device: device.clone(),
                settings,
                primary: target.primary,
            });
            originals.push(Staging {
                device,
                settings: original,
                primary: primary.as_deref() == Some(target.handle.device()),
            });
        }

        stage_all(&changes, &originals, stage_settings)?;
        if let Err(err) = commit_settings() {
            rollback(&originals, stage_settings);
            return Err(err);
        }
        Ok(())
    }

    fn set_position(&self, handle: &MonitorHandle, position: Point) -> Result<(), PlatformError> {
        self.apply_layout(&[LayoutTarget {
            handle: handle.clone(),
            position,
            primary: false,
        }])
    }

    fn set_primary(&self, handle: &MonitorHandle) -> Result<(), PlatformError> {
        let monitors = self.enumerate()?;
        let origin = monitors
            .iter()
            .find(|monitor| monitor.handle.device() == handle.device())
            .map(|monitor| monitor.position)
            .ok_or_else(|| PlatformError::NotFound(handle.to_string()))?;

        let layout: Vec<LayoutTarget> = monitors
            .into_iter()
            .map(|monitor| LayoutTarget {
                primary: monitor.handle.device() == handle.device(),
                position: Point::new(monitor.position.x - origin.x, monitor.position.y - origin.y),
                handle: monitor.handle,
            })
            .collect();
        self.apply_layout(&layout)
    }

    fn current_mode(&self, handle: &MonitorHandle) -> Result<DisplayMode, PlatformError> {
        Ok(to_mode(&current_settings(&wide(handle.device()))?))
    }

    /// The largest mode with the highest refresh rate, which is the native mode of
    /// the panel in practice.
    fn default_mode(&self, handle: &MonitorHandle) -> Result<DisplayMode, PlatformError> {
        self.all_modes(handle)?
            .into_iter()
            .max_by(|a, b| {
                (u64::from(a.width) * u64::from(a.height))
                    .cmp(&(u64::from(b.width) * u64::from(b.height)))
                    .then(a.frequency.total_cmp(&b.frequency))
            })
            .ok_or_else(|| PlatformError::NotFound(format!("modes of {handle}")))
    }

    fn all_modes(&self, handle: &MonitorHandle) -> Result<Vec<DisplayMode>, PlatformError> {
        let device = wide(handle.device());
        let depth = current_settings(&device)?.dmBitsPerPel;
        let mut modes: Vec<DisplayMode> = Vec::new();

        let mut index = 0;
        while let Some(settings) = self::settings(&device, ENUM_DISPLAY_SETTINGS_MODE(index)) {
            index += 1;
            let mode = to_mode(&settings);
            if settings.dmBitsPerPel == depth && !modes.contains(&mode) {
                modes.push(mode);
            }
        }

        Ok(modes)
    }

    fn set_mode(&self, handle: &MonitorHandle, mode: &DisplayMode) -> Result<(), PlatformError> {
        let device = wide(handle.device());
        let mut settings = empty_mode();
        settings.dmFields = DM_PELSWIDTH | DM_PELSHEIGHT | DM_DISPLAYFREQUENCY;
        settings.dmPelsWidth = mode.width;
        settings.dmPelsHeight = mode.height;
        settings.dmDisplayFrequency = mode.frequency.round() as u32;

        change_settings(&device, &settings, CDS_UPDATEREGISTRY)
    }

    fn set_orientation(
        &self,
        handle: &MonitorHandle,
        orientation: Orientation,
    ) -> Result<(), PlatformError> {
        let device = wide(handle.device());
        let mut settings = current_settings(&device)?;

        let was_portrait = matches!(
            to_orientation(&settings),
            Orientation::Right | Orientation::Left
        );
        let portrait = matches!(orientation, Orientation::Right | Orientation::Left);
        if was_portrait != portrait {
            std::mem::swap(&mut settings.dmPelsWidth, &mut settings.dmPelsHeight);
        }

        settings.dmFields = DM_DISPLAYORIENTATION | DM_PELSWIDTH | DM_PELSHEIGHT;
        let rotation = match orientation {
            Orientation::Normal => DMDO_DEFAULT,
            Orientation::Right => DMDO_90,
            Orientation::Inverted => DMDO_180,
            Orientation::Left => DMDO_270,
        };
        unsafe { settings.Anonymous1.Anonymous2.dmDisplayOrientation = rotation };

        change_settings(&device, &settings, CDS_UPDATEREGISTRY)
    }

    fn brightness(&self, handle: &MonitorHandle) -> Result<u32, PlatformError> {
        with_physical_monitor(handle, |monitor| {
            let (mut min, mut current, mut max) = (0, 0, 0);
            if unsafe { GetMonitorBrightness(monitor, &mut min, &mut current, &mut max) } == 0 {
                return Err(ddc_failed("GetMonitorBrightness"));
            }
            Ok(to_percent(current, min, max))
        })
    }

    fn set_brightness(&self, handle: &MonitorHandle, percent: u32) -> Result<(), PlatformError> {
        with_physical_monitor(handle, |monitor| {
            let (mut min, mut current, mut max) = (0, 0, 0);
            if unsafe { GetMonitorBrightness(monitor, &mut min, &mut current, &mut max) } == 0 {
                return Err(ddc_failed("GetMonitorBrightness"));
            }
            if unsafe { SetMonitorBrightness(monitor, from_percent(percent, min, max)) } == 0 {
                return Err(ddc_failed("SetMonitorBrightness"));
            }
            Ok(())
        })
    }

    fn contrast(&self, handle: &MonitorHandle) -> Result<u32, PlatformError> {
        with_physical_monitor(handle, |monitor| {
            let (mut min, mut current, mut max) = (0, 0, 0);
            if unsafe { GetMonitorContrast(monitor, &mut min, &mut current, &mut max) } == 0 {
                return Err(ddc_failed("GetMonitorContrast"));
            }
            Ok(to_percent(current, min, max))
        })
    }

    fn set_contrast(&self, handle: &MonitorHandle, percent: u32) -> Result<(), PlatformError> {
        with_physical_monitor(handle, |monitor| {
            let (mut min, mut current, mut max) = (0, 0, 0);
            if unsafe { GetMonitorContrast(monitor, &mut min, &mut current, &mut max) } == 0 {
                return Err(ddc_failed("GetMonitorContrast"));
            }
            if unsafe { SetMonitorContrast(monitor, from_percent(percent, min, max)) } == 0 {
                return Err(ddc_failed("SetMonitorContrast"));
            }
            Ok(())
        })
    }

    fn power_on(&self, handle: &MonitorHandle) -> Result<(), PlatformError> {
        set_power_mode(handle, 1)
    }

    fn power_off(&self, handle: &MonitorHandle) -> Result<(), PlatformError> {
        set_power_mode(handle, 5)
    }

    fn suspend(&self, handle: &MonitorHandle) -> Result<(), PlatformError> {
        set_power_mode(handle, 4)
    }

    fn power_state(&self, handle: &MonitorHandle) -> Result<PowerState, PlatformError> {
        with_physical_monitor(handle, |monitor| {
            let mut current = 0;
            let reply = unsafe {
                GetVCPFeatureAndVCPFeatureReply(monitor, VCP_POWER_MODE, None, &mut current, None)
            };
            if reply == 0 {
                return Err(ddc_failed("GetVCPFeatureAndVCPFeatureReply"));
            }

            match current {
                1 => Ok(PowerState::On),
                2..=4 => Ok(PowerState::Suspended),
                5 => Ok(PowerState::Off),
                other => Err(PlatformError::Parse(format!("unknown power mode {other}"))),
            }
        })
    }

    /// Restores the mode saved in the registry and adds the monitor back to the
    /// desktop.
    fn attach(&self, handle: &MonitorHandle) -> Result<(), PlatformError> {
        let device = wide(handle.device());
        let mut settings = settings(&device, ENUM_REGISTRY_SETTINGS)
            .ok_or_else(|| PlatformError::NotFound(handle.to_string()))?;
        settings.dmFields = DM_POSITION | DM_PELSWIDTH | DM_PELSHEIGHT;

        change_settings(&device, &settings, CDS_UPDATEREGISTRY | CDS_NORESET)?;
        commit_settings()
    }

    fn detach(&self, handle: &MonitorHandle, permanent: bool) -> Result<(), PlatformError> {
        let device = wide(handle.device());
        let mut settings = empty_mode();
        settings.dmFields = DM_POSITION | DM_PELSWIDTH | DM_PELSHEIGHT;

        let flags = if permanent {
            CDS_UPDATEREGISTRY | CDS_NORESET
        } else {
            CDS_NORESET
        };
        change_settings(&device, &settings, flags)?;
        commit_settings()
    }

    fn is_attached(&self, handle: &MonitorHandle) -> Result<bool, PlatformError> {
        let mut index = 0;
        loop {
            let mut device = DISPLAY_DEVICEW {
                cb: std::mem::size_of::<DISPLAY_DEVICEW>() as u32,
                ..Default::default()
            };
            if !unsafe { EnumDisplayDevicesW(PCWSTR::null(), index, &mut device, 0) }.as_bool() {
                return Err(PlatformError::NotFound(handle.to_string()));
            }
            index += 1;

            if from_wide(&device.DeviceName) == handle.device() {
                return Ok((device.StateFlags & DISPLAY_DEVICE_ATTACHED_TO_DESKTOP).0 != 0);
            }
        }
    }

    fn mouse_position(&self) -> Result<Point, PlatformError> {
        let mut point = POINT::default();
        unsafe { GetCursorPos(&mut point)? };
        Ok(Point::new(point.x, point.y))
    }
}
