//! Local system probes feeding the statistics sample: repository disk
//! usage, memory, load average and SoC temperature.

use std::path::Path;

use wheelhouse_types::DiskStats;

/// Filesystem totals for the volume holding `path`.
pub(crate) fn statvfs(path: &Path) -> std::io::Result<DiskStats> {
    let stat = nix::sys::statvfs::statvfs(path)?;
    let frsize = stat.fragment_size() as u64;
    Ok(DiskStats {
        size: frsize * stat.blocks() as u64,
        free: frsize * stat.blocks_available() as u64,
    })
}

/// Memory gauges in bytes: (mem_size, mem_free, swap_size, swap_free).
/// Missing fields read as zero; the sample degrades, the task does not.
pub(crate) fn memory() -> (u64, u64, u64, u64) {
    match std::fs::read_to_string("/proc/meminfo") {
        Ok(text) => parse_meminfo(&text),
        Err(_) => (0, 0, 0, 0),
    }
}

fn parse_meminfo(text: &str) -> (u64, u64, u64, u64) {
    let field = |name: &str| -> u64 {
        text.lines()
            .find(|line| line.starts_with(name))
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|kb| kb.parse::<u64>().ok())
            .map(|kb| kb * 1024)
            .unwrap_or(0)
    };
    (
        field("MemTotal:"),
        // MemAvailable is the kernel's honest answer; fall back to
        // MemFree on ancient kernels.
        match field("MemAvailable:") {
            0 => field("MemFree:"),
            available => available,
        },
        field("SwapTotal:"),
        field("SwapFree:"),
    )
}

/// One-minute load average.
pub(crate) fn load_average() -> f64 {
    std::fs::read_to_string("/proc/loadavg")
        .ok()
        .and_then(|text| parse_loadavg(&text))
        .unwrap_or(0.0)
}

fn parse_loadavg(text: &str) -> Option<f64> {
    text.split_whitespace().next()?.parse().ok()
}

/// SoC temperature in degrees Celsius, 0.0 when no thermal zone exists.
pub(crate) fn cpu_temp() -> f64 {
    std::fs::read_to_string("/sys/class/thermal/thermal_zone0/temp")
        .ok()
        .and_then(|text| text.trim().parse::<f64>().ok())
        .map(|millidegrees| millidegrees / 1000.0)
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_meminfo_fields() {
        let text = "MemTotal:        948304 kB\n\
                    MemFree:          61548 kB\n\
                    MemAvailable:    783344 kB\n\
                    SwapTotal:       102396 kB\n\
                    SwapFree:        102396 kB\n";
        let (mem_size, mem_free, swap_size, swap_free) = parse_meminfo(text);
        assert_eq!(mem_size, 948_304 * 1024);
        assert_eq!(mem_free, 783_344 * 1024);
        assert_eq!(swap_size, 102_396 * 1024);
        assert_eq!(swap_free, 102_396 * 1024);
    }

    #[test]
    fn falls_back_to_memfree_without_memavailable() {
        let text = "MemTotal: 1000 kB\nMemFree: 400 kB\n";
        let (_, mem_free, _, _) = parse_meminfo(text);
        assert_eq!(mem_free, 400 * 1024);
    }

    #[test]
    fn parses_loadavg_first_field() {
        assert_eq!(parse_loadavg("0.52 0.58 0.59 1/389 32147\n"), Some(0.52));
        assert_eq!(parse_loadavg(""), None);
    }

    #[test]
    fn statvfs_reports_the_tempdir_volume() {
        let td = tempfile::tempdir().expect("tempdir");
        let stats = statvfs(td.path()).expect("statvfs");
        assert!(stats.size > 0);
        assert!(stats.free <= stats.size);
    }
}
