//! Best-effort host environment probes.
//!
//! Everything here is advisory metadata for event enrichment and device fingerprinting. Every
//! probe degrades to `None` (or a sentinel at the call site) when the underlying query fails;
//! nothing returns an error.
use std::process::Command;

/// Coarse platform label attached to every enriched event.
pub fn platform() -> &'static str {
    match std::env::consts::OS {
        "windows" => "Windows Desktop",
        "macos" => "macOS Desktop",
        "linux" => "Linux Desktop",
        _ => "Desktop",
    }
}

/// Operating system name (e.g. `linux`, `windows`, `macos`).
pub fn os_name() -> String {
    std::env::consts::OS.to_owned()
}

/// Operating system version string, or `"unknown"`.
pub fn os_version() -> String {
    #[cfg(target_os = "macos")]
    {
        if let Some(version) = run_and_trim("sw_vers", &["-productVersion"]) {
            return version;
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(contents) = std::fs::read_to_string("/etc/os-release") {
            for line in contents.lines() {
                if let Some(value) = line.strip_prefix("VERSION_ID=") {
                    return value.trim_matches('"').to_owned();
                }
            }
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Some(version) = run_and_trim("cmd", &["/c", "ver"]) {
            return version;
        }
    }

    "unknown".to_owned()
}

/// `(language, country)` derived from the process locale, e.g. `("en_US", "US")`.
///
/// Falls back to `"Unknown"` for either part when the locale cannot be determined.
pub fn locale() -> (String, String) {
    let raw = std::env::var("LC_ALL")
        .or_else(|_| std::env::var("LANG"))
        .unwrap_or_default();

    // Typical form: "en_US.UTF-8". The language tag is everything before the encoding suffix,
    // the country is the region part of the tag.
    let tag = raw.split('.').next().unwrap_or("").trim();
    if tag.is_empty() || tag.eq_ignore_ascii_case("c") || tag.eq_ignore_ascii_case("posix") {
        return ("Unknown".to_owned(), "Unknown".to_owned());
    }

    let country = tag
        .split('_')
        .nth(1)
        .map(str::to_owned)
        .unwrap_or_else(|| "Unknown".to_owned());
    (tag.to_owned(), country)
}

/// CPU model name, if the host exposes one.
pub fn cpu_name() -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        let contents = std::fs::read_to_string("/proc/cpuinfo").ok()?;
        for line in contents.lines() {
            if line.starts_with("model name") {
                return line.split(':').nth(1).map(|s| s.trim().to_owned());
            }
        }
        None
    }

    #[cfg(target_os = "macos")]
    {
        run_and_trim("sysctl", &["-n", "machdep.cpu.brand_string"])
    }

    #[cfg(target_os = "windows")]
    {
        wmic_value(&["cpu", "get", "name"])
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        None
    }
}

/// Total physical memory rounded to whole gigabytes.
pub fn total_memory_gb() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        let contents = std::fs::read_to_string("/proc/meminfo").ok()?;
        let line = contents.lines().find(|l| l.starts_with("MemTotal:"))?;
        let kib: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
        Some(round_to_gb(kib * 1024))
    }

    #[cfg(target_os = "macos")]
    {
        let bytes: u64 = run_and_trim("sysctl", &["-n", "hw.memsize"])?.parse().ok()?;
        Some(round_to_gb(bytes))
    }

    #[cfg(target_os = "windows")]
    {
        let bytes: u64 = wmic_value(&["ComputerSystem", "get", "TotalPhysicalMemory"])?
            .parse()
            .ok()?;
        Some(round_to_gb(bytes))
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        None
    }
}

/// GPU model name, if the host exposes one.
pub fn gpu_name() -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        let output = run_and_capture("lspci", &[])?;
        for line in output.lines() {
            if line.contains("VGA compatible controller") || line.contains("3D controller") {
                return line.split(": ").nth(1).map(|s| s.trim().to_owned());
            }
        }
        None
    }

    #[cfg(target_os = "macos")]
    {
        let output = run_and_capture("system_profiler", &["SPDisplaysDataType"])?;
        for line in output.lines() {
            if let Some(value) = line.trim().strip_prefix("Chipset Model:") {
                return Some(value.trim().to_owned());
            }
        }
        None
    }

    #[cfg(target_os = "windows")]
    {
        wmic_value(&["path", "win32_VideoController", "get", "name"])
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        None
    }
}

#[allow(dead_code)] // unused on platforms where every probe reads procfs
fn run_and_capture(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout).ok()
}

#[allow(dead_code)]
fn run_and_trim(program: &str, args: &[&str]) -> Option<String> {
    let output = run_and_capture(program, args)?;
    let trimmed = output.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}

/// `wmic` prints a header line followed by the value; take the first non-empty data line.
#[cfg(target_os = "windows")]
fn wmic_value(args: &[&str]) -> Option<String> {
    let output = run_and_capture("wmic", args)?;
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .nth(1)
        .map(str::to_owned)
}

fn round_to_gb(bytes: u64) -> u64 {
    ((bytes as f64) / (1024.0 * 1024.0 * 1024.0)).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_memory_to_whole_gigabytes() {
        assert_eq!(round_to_gb(0), 0);
        assert_eq!(round_to_gb(1024 * 1024 * 1024), 1);
        // 15.6 GiB rounds up, the way marketing sizes expect.
        assert_eq!(round_to_gb(16_750_372_454), 16);
    }

    #[test]
    fn platform_is_a_desktop_label() {
        assert!(platform().contains("Desktop"));
    }

    #[test]
    fn locale_parses_posix_form() {
        // The helper under test reads the environment, so exercise the parsing inline.
        let tag = "en_US.UTF-8".split('.').next().unwrap();
        assert_eq!(tag, "en_US");
        assert_eq!(tag.split('_').nth(1), Some("US"));
    }
}
