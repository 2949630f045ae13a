use std::fmt;

use serde::Serialize;

pub const KIB: f64 = 1024.0;
pub const MIB: f64 = 1024.0 * 1024.0;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum DisplayUnit {
    BytesPerSec,
    KilobytesPerSec,
    MegabytesPerSec,
    KilobitsPerSec,
    MegabitsPerSec,
}

impl DisplayUnit {
    /// Bytes per second represented by one of this unit.
    pub fn factor(self) -> f64 {
        match self {
            DisplayUnit::BytesPerSec => 1.0,
            DisplayUnit::KilobytesPerSec => KIB,
            DisplayUnit::MegabytesPerSec => MIB,
            DisplayUnit::KilobitsPerSec => KIB * 8.0,
            DisplayUnit::MegabitsPerSec => MIB * 8.0,
        }
    }

    pub fn suffix(self) -> &'static str {
        match self {
            DisplayUnit::BytesPerSec => "B/s",
            DisplayUnit::KilobytesPerSec => "KB/s",
            DisplayUnit::MegabytesPerSec => "MB/s",
            DisplayUnit::KilobitsPerSec => "Kbps",
            DisplayUnit::MegabitsPerSec => "Mbps",
        }
    }
}

impl fmt::Display for DisplayUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum UnitPreference {
    /// Pick B/s, KB/s or MB/s by magnitude.
    #[default]
    Auto,
    /// Always present in this unit.
    Fixed(DisplayUnit),
}

/// A rate scaled into its presentation unit.
#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct Reading {
    pub value: f64,
    pub unit: DisplayUnit,
}

impl Reading {
    pub fn from_bytes_per_sec(bps: f64, pref: UnitPreference) -> Self {
        let bps = bps.max(0.0);
        match pref {
            UnitPreference::Fixed(unit) => Reading { value: bps / unit.factor(), unit },
            UnitPreference::Auto => auto_scale(bps),
        }
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.unit {
            DisplayUnit::BytesPerSec => write!(f, "{:.0} {}", self.value, self.unit),
            _ => write!(f, "{:.2} {}", self.value, self.unit),
        }
    }
}

fn auto_scale(bps: f64) -> Reading {
    let kb = bps / KIB;
    if kb >= KIB {
        Reading { value: kb / KIB, unit: DisplayUnit::MegabytesPerSec }
    } else if kb >= 1.0 {
        Reading { value: kb, unit: DisplayUnit::KilobytesPerSec }
    } else {
        Reading { value: bps, unit: DisplayUnit::BytesPerSec }
    }
}
