use bincode::{Decode, Encode};
use std::fmt::{Display, Formatter};
use std::time::Duration;

pub const BK0010_CLOCK_FREQUENCY_HZ: u64 = 3_000_000;
pub const BK0011M_CLOCK_FREQUENCY_HZ: u64 = 4_000_000;

const NANOS_PER_SECOND: u128 = 1_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Encode, Decode)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum BkModel {
    #[default]
    Bk0010,
    Bk0011M,
}

impl BkModel {
    pub const ALL: [Self; 2] = [Self::Bk0010, Self::Bk0011M];

    #[inline]
    #[must_use]
    pub fn default_clock_frequency_hz(self) -> u64 {
        match self {
            Self::Bk0010 => BK0010_CLOCK_FREQUENCY_HZ,
            Self::Bk0011M => BK0011M_CLOCK_FREQUENCY_HZ,
        }
    }
}

impl Display for BkModel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bk0010 => write!(f, "BK-0010"),
            Self::Bk0011M => write!(f, "BK-0011M"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BkConfig {
    pub model: BkModel,
    pub clock_frequency_hz: u64,
}

impl BkConfig {
    #[must_use]
    pub fn for_model(model: BkModel) -> Self {
        Self { model, clock_frequency_hz: model.default_clock_frequency_hz() }
    }

    /// Convert a CPU tick count into emulated wall-clock time
    #[must_use]
    pub fn ticks_to_duration(&self, ticks: u64) -> Duration {
        let frequency = u128::from(self.clock_frequency_hz.max(1));
        let nanos = u128::from(ticks) * NANOS_PER_SECOND / frequency;
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    /// Number of whole CPU ticks that fit in `duration`
    #[must_use]
    pub fn duration_to_ticks(&self, duration: Duration) -> u64 {
        let ticks = duration.as_nanos() * u128::from(self.clock_frequency_hz) / NANOS_PER_SECOND;
        u64::try_from(ticks).unwrap_or(u64::MAX)
    }
}

impl Default for BkConfig {
    fn default() -> Self {
        Self::for_model(BkModel::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_clock_defaults() {
        assert_eq!(BkConfig::default().clock_frequency_hz, 3_000_000);
        assert_eq!(BkConfig::for_model(BkModel::Bk0011M).clock_frequency_hz, 4_000_000);
        assert_eq!(BkModel::Bk0011M.to_string(), "BK-0011M");
    }

    #[test]
    fn tick_conversion() {
        let config = BkConfig::default();
        assert_eq!(config.ticks_to_duration(3_000_000), Duration::from_secs(1));
        assert_eq!(config.ticks_to_duration(3), Duration::from_micros(1));
        assert_eq!(config.duration_to_ticks(Duration::from_millis(20)), 60_000);

        // Partial ticks round down
        assert_eq!(config.duration_to_ticks(Duration::from_nanos(500)), 1);
    }
}
