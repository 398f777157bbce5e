// Copyright © 2025 mailsync
// Licensed under the mailsync License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

const POWER_SUPPLY_DIR: &str = "/sys/class/power_supply";
const POWER_RECHECK_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PowerSource {
    Ac,
    Battery,
}

impl PowerSource {
    pub fn detect() -> Self {
        Self::detect_in(Path::new(POWER_SUPPLY_DIR))
    }

    /// Reads the Linux power-supply class directory. Anything unreadable
    /// counts as AC.
    fn detect_in(dir: &Path) -> Self {
        let Ok(entries) = fs::read_dir(dir) else {
            return PowerSource::Ac;
        };
        let mut discharging = false;
        for entry in entries.flatten() {
            let path = entry.path();
            let read = |name: &str| {
                fs::read_to_string(path.join(name))
                    .map(|v| v.trim().to_string())
                    .unwrap_or_default()
            };
            match read("type").as_str() {
                "Mains" | "USB" if read("online") == "1" => return PowerSource::Ac,
                "Battery" if read("status") == "Discharging" => discharging = true,
                _ => {}
            }
        }
        if discharging {
            PowerSource::Battery
        } else {
            PowerSource::Ac
        }
    }
}

/// Caches the detected power source so the sysfs scan runs at most once
/// per recheck interval, off the async workers.
pub struct PowerMonitor {
    source: PowerSource,
    checked_at: Option<Instant>,
    recheck: Duration,
}

impl Default for PowerMonitor {
    fn default() -> Self {
        Self::with_recheck(POWER_RECHECK_INTERVAL)
    }
}

impl PowerMonitor {
    fn with_recheck(recheck: Duration) -> Self {
        Self {
            source: PowerSource::Ac,
            checked_at: None,
            recheck,
        }
    }

    fn needs_check(&self, now: Instant) -> bool {
        self.checked_at
            .map_or(true, |at| now.duration_since(at) >= self.recheck)
    }

    pub async fn current(&mut self) -> PowerSource {
        let now = Instant::now();
        if self.needs_check(now) {
            self.source = tokio::task::spawn_blocking(PowerSource::detect)
                .await
                .unwrap_or(self.source);
            self.checked_at = Some(now);
        }
        self.source
    }
}

/// Pause after a chunk that took `elapsed` so that processing stays under
/// `max_cpu` of one core.
pub fn throttle_delay(elapsed: Duration, max_cpu: f64) -> Duration {
    if !(max_cpu > 0.0 && max_cpu < 1.0) {
        return Duration::ZERO;
    }
    elapsed.mul_f64(1.0 / max_cpu - 1.0)
}
