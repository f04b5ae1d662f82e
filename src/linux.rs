//! X11 backend driving the `xrandr`, `xprop`, `xwininfo`, `xset` and `xdotool`
//! command line tools.
//!
//! Outputs are addressed by their name (`DP-1`, `HDMI-1`, ...), which is also
//! the device part of their [`MonitorHandle`]. The raw part is the position of the
//! output in the `xrandr` listing, starting at 1.

use std::ffi::OsStr;

use tracing::{debug, warn};

use crate::{
    Bounds, DisplayMode, Dpi, MonitorHandle, MonitorSnapshot, Orientation, Point, PowerState, Rect,
    Scale, Size,
    platform::{LayoutTarget, PlatformDisplayApi, PlatformError, run},
};

const XRANDR: &str = "xrandr";
const DEFAULT_DPI: u32 = 96;
const DEFAULT_DEPTH: u32 = 24;

/// One output of `xrandr --query`.
#[derive(Debug, Clone, PartialEq, Default)]
struct Output {
    name: String,
    index: u64,
    connected: bool,
    primary: bool,
    /// Position and size; `None` while the output is not part of the desktop.
    geometry: Option<(Point, Size)>,
    orientation: Orientation,
    /// Physical size in millimetres.
    physical: Option<(u32, u32)>,
    modes: Vec<DisplayMode>,
    current: Option<DisplayMode>,
    preferred: Option<DisplayMode>,
}

impl Output {
    fn handle(&self) -> MonitorHandle {
        MonitorHandle::new(self.index, self.name.as_str())
    }

    fn dpi(&self, size: Size) -> Dpi {
        let axis = |pixels: u32, millimetres: u32| {
            if millimetres == 0 {
                DEFAULT_DPI
            } else {
                (f64::from(pixels) * 25.4 / f64::from(millimetres)).round() as u32
            }
        };

        match self.physical {
            Some((width, height)) => Dpi::new(axis(size.width, width), axis(size.height, height)),
            None => Dpi::new(DEFAULT_DPI, DEFAULT_DPI),
        }
    }
}

/// The display API backed by the X11 command line tools.
#[derive(Debug)]
pub struct XrandrDisplayApi {
    _private: (),
}

impl XrandrDisplayApi {
    /// Checks that `xrandr` can be run and reaches an X server.
    pub fn new() -> Result<Self, PlatformError> {
        run(XRANDR, ["--current"])?;
        Ok(Self { _private: () })
    }

    fn outputs(&self) -> Result<Vec<Output>, PlatformError> {
        parse_query(&run(XRANDR, ["--query"])?)
    }

    fn output(&self, handle: &MonitorHandle) -> Result<Output, PlatformError> {
        self.outputs()?
            .into_iter()
            .find(|output| output.name == handle.device())
            .ok_or_else(|| PlatformError::NotFound(handle.to_string()))
    }

    fn configure<I, S>(&self, handle: &MonitorHandle, args: I) -> Result<(), PlatformError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = vec!["--output".to_owned(), handle.device().to_owned()];
        command.extend(
            args.into_iter()
                .map(|arg| arg.as_ref().to_string_lossy().into_owned()),
        );
        run(XRANDR, &command).map(drop)
    }
}

impl PlatformDisplayApi for XrandrDisplayApi {
    fn enumerate(&self) -> Result<Vec<MonitorSnapshot>, PlatformError> {
        let outputs = self.outputs()?;
        let desktop_work_area = work_area();
        let color_depth = color_depth();

        Ok(outputs
            .iter()
            .filter(|output| output.connected)
            .filter_map(|output| {
                let (position, size) = output.geometry?;
                let bounds = Rect::from_bounds(Bounds::new(position, size));
                let dpi = output.dpi(size);

                Some(MonitorSnapshot {
                    system_name: output.name.clone(),
                    handle: output.handle(),
                    is_primary: output.primary,
                    position,
                    size,
                    work_area: desktop_work_area
                        .and_then(|area| area.intersect(&bounds))
                        .unwrap_or(bounds),
                    scale: Scale::new(
                        (f64::from(dpi.x) / f64::from(DEFAULT_DPI) * 100.0).round(),
                        (f64::from(dpi.y) / f64::from(DEFAULT_DPI) * 100.0).round(),
                    ),
                    dpi,
                    orientation: output.orientation,
                    frequency: output.current.map_or(0.0, |mode| mode.frequency),
                    color_depth,
                })
            })
            .collect())
    }

    /// Moves every output with a single `xrandr` call, so the X server applies
    /// the whole layout at once.
    fn apply_layout(&self, layout: &[LayoutTarget]) -> Result<(), PlatformError> {
        let mut args = Vec::with_capacity(layout.len() * 5);
        for target in layout {
            args.push("--output".to_owned());
            args.push(target.handle.device().to_owned());
            args.push("--pos".to_owned());
            args.push(format!("{}x{}", target.position.x, target.position.y));
            if target.primary {
                args.push("--primary".to_owned());
            }
        }
        run(XRANDR, &args).map(drop)
    }

    fn set_position(&self, handle: &MonitorHandle, position: Point) -> Result<(), PlatformError> {
        self.configure(
            handle,
            ["--pos", format!("{}x{}", position.x, position.y).as_str()],
        )
    }

    fn set_primary(&self, handle: &MonitorHandle) -> Result<(), PlatformError> {
        self.configure(handle, ["--primary"])
    }

    fn current_mode(&self, handle: &MonitorHandle) -> Result<DisplayMode, PlatformError> {
        self.output(handle)?
            .current
            .ok_or_else(|| PlatformError::NotFound(format!("current mode of {handle}")))
    }

    fn default_mode(&self, handle: &MonitorHandle) -> Result<DisplayMode, PlatformError> {
        let output = self.output(handle)?;
        output
            .preferred
            .or_else(|| output.modes.first().copied())
            .ok_or_else(|| PlatformError::NotFound(format!("default mode of {handle}")))
    }

    fn all_modes(&self, handle: &MonitorHandle) -> Result<Vec<DisplayMode>, PlatformError> {
        Ok(self.output(handle)?.modes)
    }

    fn set_mode(&self, handle: &MonitorHandle, mode: &DisplayMode) -> Result<(), PlatformError> {
        self.configure(
            handle,
            [
                "--mode".to_owned(),
                format!("{}x{}", mode.width, mode.height),
                "--rate".to_owned(),
                format!("{:.2}", mode.frequency),
            ],
        )
    }

    fn set_orientation(
        &self,
        handle: &MonitorHandle,
        orientation: Orientation,
    ) -> Result<(), PlatformError> {
        self.configure(handle, ["--rotate", rotation_name(orientation)])
    }

    fn brightness(&self, handle: &MonitorHandle) -> Result<u32, PlatformError> {
        let verbose = run(XRANDR, ["--verbose"])?;
        let value = parse_brightness(&verbose, handle.device())
            .ok_or_else(|| PlatformError::Parse(format!("no brightness for {handle}")))?;
        Ok((value * 100.0).round().clamp(0.0, 100.0) as u32)
    }

    /// Software brightness through the gamma ramp; the backlight is not touched.
    fn set_brightness(&self, handle: &MonitorHandle, percent: u32) -> Result<(), PlatformError> {
        self.configure(
            handle,
            ["--brightness", format!("{:.2}", f64::from(percent) / 100.0).as_str()],
        )
    }

    // DPMS is global to the X server, so every power call affects all outputs.
    fn power_on(&self, _handle: &MonitorHandle) -> Result<(), PlatformError> {
        run("xset", ["dpms", "force", "on"]).map(drop)
    }

    fn power_off(&self, _handle: &MonitorHandle) -> Result<(), PlatformError> {
        run("xset", ["dpms", "force", "off"]).map(drop)
    }

    fn suspend(&self, _handle: &MonitorHandle) -> Result<(), PlatformError> {
        run("xset", ["dpms", "force", "suspend"]).map(drop)
    }

    fn power_state(&self, _handle: &MonitorHandle) -> Result<PowerState, PlatformError> {
        parse_power_state(&run("xset", ["q"])?)
    }

    fn attach(&self, handle: &MonitorHandle) -> Result<(), PlatformError> {
        self.configure(handle, ["--auto"])
    }

    fn detach(&self, handle: &MonitorHandle, permanent: bool) -> Result<(), PlatformError> {
        if permanent {
            debug!(%handle, "xrandr changes do not outlive the X session");
        }
        self.configure(handle, ["--off"])
    }

    fn is_attached(&self, handle: &MonitorHandle) -> Result<bool, PlatformError> {
        Ok(self.output(handle)?.geometry.is_some())
    }

    fn mouse_position(&self) -> Result<Point, PlatformError> {
        parse_mouse_location(&run("xdotool", ["getmouselocation", "--shell"])?)
    }
}

/// Desktop area not covered by panels, from `_NET_WORKAREA` of the first desktop.
fn work_area() -> Option<Rect> {
    match run("xprop", ["-root", "_NET_WORKAREA"]) {
        Ok(text) => parse_work_area(&text),
        Err(err) => {
            debug!(%err, "no work area, using monitor bounds");
            None
        }
    }
}

fn color_depth() -> u32 {
    match run("xwininfo", ["-root"]) {
        Ok(text) => parse_depth(&text).unwrap_or(DEFAULT_DEPTH),
        Err(err) => {
            warn!(%err, "failed to query the root window depth");
            DEFAULT_DEPTH
        }
    }
}

fn rotation_name(orientation: Orientation) -> &'static str {
    match orientation {
        Orientation::Normal => "normal",
        Orientation::Right => "right",
        Orientation::Inverted => "inverted",
        Orientation::Left => "left",
    }
}

fn parse_rotation(word: &str) -> Option<Orientation> {
    match word {
        "normal" => Some(Orientation::Normal),
        "right" => Some(Orientation::Right),
        "inverted" => Some(Orientation::Inverted),
        "left" => Some(Orientation::Left),
        _ => None,
    }
}

/// Parses the output of `xrandr --query`.
fn parse_query(text: &str) -> Result<Vec<Output>, PlatformError> {
    let mut outputs: Vec<Output> = Vec::new();

    for line in text.lines() {
        if line.trim().is_empty() || line.starts_with("Screen ") {
            continue;
        }

        if line.starts_with(char::is_whitespace) {
            // Mode lines belong to the last output header.
            if let Some(output) = outputs.last_mut() {
                parse_mode_line(line, output);
            }
            continue;
        }

        let index = outputs.len() as u64 + 1;
        outputs.push(parse_header(line, index)?);
    }

    Ok(outputs)
}

/// Parses the header line of an output, e.g.
/// `DP-1 connected primary 1920x1080+0+0 left (normal left ...) 527mm x 296mm`.
fn parse_header(line: &str, index: u64) -> Result<Output, PlatformError> {
    let (settings, capabilities) = match line.split_once('(') {
        Some((settings, rest)) => (settings, rest.split_once(')').map_or("", |(_, tail)| tail)),
        None => (line, ""),
    };

    let mut words = settings.split_whitespace();
    let name = words
        .next()
        .ok_or_else(|| PlatformError::Parse(format!("empty output line: {line}")))?;

    let mut output = Output {
        name: name.to_owned(),
        index,
        ..Output::default()
    };

    for word in words {
        match word {
            "connected" => output.connected = true,
            "primary" => output.primary = true,
            _ => {
                if let Some(geometry) = parse_geometry(word) {
                    output.geometry = Some(geometry);
                } else if let Some(orientation) = parse_rotation(word) {
                    output.orientation = orientation;
                }
            }
        }
    }

    output.physical = parse_physical(capabilities);
    Ok(output)
}

/// Parses `WxH+X+Y`. Offsets may be negative (`WxH-X+Y`).
fn parse_geometry(word: &str) -> Option<(Point, Size)> {
    let (width, rest) = word.split_once('x')?;
    let offset = rest.find(['+', '-'])?;
    let (height, offsets) = rest.split_at(offset);

    let second = offsets[1..].find(['+', '-'])? + 1;
    let (x, y) = offsets.split_at(second);

    Some((
        Point::new(x.parse().ok()?, y.parse().ok()?),
        Size::new(width.parse().ok()?, height.parse().ok()?),
    ))
}

/// Parses `527mm x 296mm`.
fn parse_physical(text: &str) -> Option<(u32, u32)> {
    let mut words = text.split_whitespace();
    let width = words.next()?.strip_suffix("mm")?.parse().ok()?;
    (words.next()? == "x").then_some(())?;
    let height = words.next()?.strip_suffix("mm")?.parse().ok()?;
    Some((width, height))
}

/// Parses a line like `   1920x1080     60.00*+  59.94    50.00`.
/// `*` marks the current rate, `+` the preferred one.
fn parse_mode_line(line: &str, output: &mut Output) {
    let mut words = line.split_whitespace();
    let Some(resolution) = words.next() else {
        return;
    };
    let Some((width, height)) = resolution.split_once('x') else {
        return;
    };
    let (Ok(width), Ok(height)) = (
        width.parse::<u32>(),
        height.trim_end_matches(|c: char| !c.is_ascii_digit()).parse::<u32>(),
    ) else {
        return;
    };

    for word in words {
        if word == "+" {
            output.preferred = output.modes.last().copied();
            continue;
        }

        let rate = word.trim_end_matches(['*', '+']);
        let Ok(frequency) = rate.parse::<f64>() else {
            continue;
        };
        let mode = DisplayMode::new(width, height, frequency);

        if word.contains('*') {
            output.current = Some(mode);
        }
        if word.ends_with('+') {
            output.preferred = Some(mode);
        }
        output.modes.push(mode);
    }
}

/// Finds `Brightness: 0.80` in the block of `output` in `xrandr --verbose`.
fn parse_brightness(text: &str, output: &str) -> Option<f64> {
    let mut inside = false;

    for line in text.lines() {
        if !line.starts_with(char::is_whitespace) {
            inside = line.split_whitespace().next() == Some(output);
            continue;
        }
        if inside && let Some(value) = line.trim().strip_prefix("Brightness:") {
            return value.trim().parse().ok();
        }
    }

    None
}

/// Parses `_NET_WORKAREA(CARDINAL) = 0, 27, 3600, 1053, ...`.
fn parse_work_area(text: &str) -> Option<Rect> {
    let (_, values) = text.split_once('=')?;
    let mut values = values.split(',').map(|value| value.trim().parse::<i32>());

    let x = values.next()?.ok()?;
    let y = values.next()?.ok()?;
    let width = values.next()?.ok()?;
    let height = values.next()?.ok()?;

    Some(Rect::new(x, y, x + width, y + height))
}

fn parse_depth(text: &str) -> Option<u32> {
    text.lines()
        .find_map(|line| line.trim().strip_prefix("Depth:"))
        .and_then(|depth| depth.trim().parse().ok())
}

/// Parses the DPMS section of `xset q`.
fn parse_power_state(text: &str) -> Result<PowerState, PlatformError> {
    if text.contains("DPMS is Disabled") {
        return Ok(PowerState::On);
    }

    let state = text
        .lines()
        .find_map(|line| line.trim().strip_prefix("Monitor is "))
        .ok_or_else(|| PlatformError::Parse("no monitor state in `xset q`".into()))?;

    match state.trim() {
        "On" => Ok(PowerState::On),
        "Off" => Ok(PowerState::Off),
        "Standby" | "Suspend" => Ok(PowerState::Suspended),
        other => Err(PlatformError::Parse(format!("unknown monitor state `{other}`"))),
    }
}

/// Parses `xdotool getmouselocation --shell`.
fn parse_mouse_location(text: &str) -> Result<Point, PlatformError> {
    let value = |key: &str| {
        text.lines()
            .find_map(|line| line.strip_prefix(key))
            .and_then(|value| value.trim().parse::<i32>().ok())
            .ok_or_else(|| PlatformError::Parse(format!("no `{key}` in mouse location")))
    };

    Ok(Point::new(value("X=")?, value("Y=")?))
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUERY: &str = "\
Screen 0: minimum 8 x 8, current 3600 x 1080, maximum 32767 x 32767
DP-1 connected primary 1920x1080+0+0 (normal left inverted right x axis y axis) 527mm x 296mm
   1920x1080     60.00*+  59.94    50.00
   1680x1050     59.95
   1280x1024     75.02    60.02
HDMI-1 connected 1050x1680+1920+0 left (normal left inverted right x axis y axis) 474mm x 296mm
   1680x1050     59.88 +
   1280x1024     60.02*
VGA-1 disconnected (normal left inverted right x axis y axis)
DP-2 connected (normal left inverted right x axis y axis) 0mm x 0mm
   1920x1080i    60.00 +
";

    #[test]
    fn parses_outputs_and_modes() {
        let outputs = parse_query(QUERY).unwrap();
        assert_eq!(outputs.len(), 4);

        let dp1 = &outputs[0];
        assert_eq!(dp1.index, 1);
        assert!(dp1.connected && dp1.primary);
        assert_eq!(
            dp1.geometry,
            Some((Point::new(0, 0), Size::new(1920, 1080)))
        );
        assert_eq!(dp1.physical, Some((527, 296)));
        assert_eq!(dp1.modes.len(), 6);
        assert_eq!(dp1.current, Some(DisplayMode::new(1920, 1080, 60.0)));
        assert_eq!(dp1.preferred, Some(DisplayMode::new(1920, 1080, 60.0)));
        assert_eq!(dp1.dpi(Size::new(1920, 1080)), Dpi::new(93, 93));

        let hdmi = &outputs[1];
        assert!(!hdmi.primary);
        assert_eq!(hdmi.orientation, Orientation::Left);
        assert_eq!(hdmi.current, Some(DisplayMode::new(1280, 1024, 60.02)));
        assert_eq!(hdmi.preferred, Some(DisplayMode::new(1680, 1050, 59.88)));

        assert!(!outputs[2].connected);
        assert_eq!(outputs[2].handle(), MonitorHandle::new(3, "VGA-1"));

        let detached = &outputs[3];
        assert!(detached.connected);
        assert_eq!(detached.geometry, None);
        assert_eq!(detached.modes, [DisplayMode::new(1920, 1080, 60.0)]);
        assert_eq!(detached.preferred, detached.modes.first().copied());
        assert_eq!(detached.dpi(Size::new(1920, 1080)), Dpi::new(96, 96));
    }

    #[test]
    fn parses_negative_offsets() {
        assert_eq!(
            parse_geometry("1280x1024-1280-30"),
            Some((Point::new(-1280, -30), Size::new(1280, 1024)))
        );
        assert_eq!(parse_geometry("connected"), None);
        assert_eq!(parse_geometry("1920x1080"), None);
    }

    #[test]
    fn finds_brightness_of_the_right_output() {
        let verbose = "\
Screen 0: minimum 8 x 8, current 3600 x 1080, maximum 32767 x 32767
DP-1 connected primary 1920x1080+0+0 (0x48) normal (normal left inverted right x axis y axis) 527mm x 296mm
\tIdentifier: 0x42
\tBrightness: 1.0
HDMI-1 connected 1680x1050+1920+0 (0x4a) normal (normal left inverted right x axis y axis) 474mm x 296mm
\tIdentifier: 0x43
\tBrightness: 0.75
";
        assert_eq!(parse_brightness(verbose, "DP-1"), Some(1.0));
        assert_eq!(parse_brightness(verbose, "HDMI-1"), Some(0.75));
        assert_eq!(parse_brightness(verbose, "VGA-1"), None);
    }

    #[test]
    fn parses_desktop_properties() {
        assert_eq!(
            parse_work_area("_NET_WORKAREA(CARDINAL) = 0, 27, 3600, 1053, 0, 27, 3600, 1053\n"),
            Some(Rect::new(0, 27, 3600, 1080))
        );
        assert_eq!(parse_work_area("_NET_WORKAREA:  not found.\n"), None);

        assert_eq!(parse_depth("  Width: 3600\n  Height: 1080\n  Depth: 24\n"), Some(24));

        let xset = "\
DPMS (Energy Star):
  Standby: 600    Suspend: 600    Off: 600
  DPMS is Enabled
  Monitor is Off
";
        assert_eq!(parse_power_state(xset).unwrap(), PowerState::Off);
        assert_eq!(
            parse_power_state("  DPMS is Disabled\n").unwrap(),
            PowerState::On
        );
        assert!(parse_power_state("").is_err());

        assert_eq!(
            parse_mouse_location("X=812\nY=-4\nSCREEN=0\nWINDOW=1234\n").unwrap(),
            Point::new(812, -4)
        );
        assert!(parse_mouse_location("garbage").is_err());
    }
}
