//! Simulation configuration
//!
//! Loaded from TOML; every key is optional:
//!
//! ```toml
//! [nor]
//! size = "0x4000000"        # words
//! erase_size = 0x10000      # words
//! write_buffer_words = 256
//! timing_preset = "accelerated"
//! mutation = "on_ready"
//! read_while_busy = "array_data"
//!
//! [nor.timing]
//! t_acc_ns = 180
//! erase_sector_us = 20
//!
//! [nor_bus]
//! access_ns = 200
//!
//! [qspi]
//! freq_mhz = 22.0
//! sce_active_high = true
//!
//! [wishbone]
//! clk_period_ns = 21.5
//!
//! [sim]
//! time_limit_ms = 100
//! ```

use std::fs;
use std::path::Path;

use serde::Deserialize;

use norsim_kernel::time::{ms, ns, ns_f64, us};
use norsim_kernel::SimTime;

use crate::error::{Error, Result};
use crate::nor::{MutationPolicy, NorBusTiming, NorGeometry, NorParams, NorTiming, ReadWhileBusy};
use crate::qspi::{period_ps, QspiHostConfig, QspiTargetConfig};

/// Base timing the `[nor.timing]` overrides apply to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimingPreset {
    /// Datasheet operation times
    #[default]
    Datasheet,
    /// Operation times shortened to microseconds
    Accelerated,
}

impl TimingPreset {
    /// The timing this preset stands for
    pub fn timing(self) -> NorTiming {
        match self {
            Self::Datasheet => NorTiming::default(),
            Self::Accelerated => NorTiming::accelerated(),
        }
    }
}

/// Local Wishbone clock domain
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WishboneConfig {
    /// Clock period in ns
    pub clk_period_ns: f64,
    /// Cycles `rst` is held at start
    pub reset_cycles: u32,
}

impl Default for WishboneConfig {
    fn default() -> Self {
        Self {
            clk_period_ns: 13.33,
            reset_cycles: 5,
        }
    }
}

impl WishboneConfig {
    /// Clock period
    pub fn clk_period(&self) -> SimTime {
        ns_f64(self.clk_period_ns)
    }
}

/// Scheduler settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimSettings {
    /// Simulated time after which a run is aborted
    pub time_limit: SimTime,
}

impl Default for SimSettings {
    fn default() -> Self {
        Self {
            time_limit: norsim_kernel::DEFAULT_TIME_LIMIT,
        }
    }
}

/// Complete configuration of a testbench
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SimConfig {
    /// NOR device
    pub nor: NorParams,
    /// Controller side NOR bus timing
    pub nor_bus: NorBusTiming,
    /// QSPI clocking
    pub qspi: QspiHostConfig,
    /// Wishbone clock domain
    pub wishbone: WishboneConfig,
    /// Scheduler
    pub sim: SimSettings,
}

impl SimConfig {
    /// Defaults with shortened operation times
    pub fn accelerated() -> Self {
        Self {
            nor: NorParams {
                timing: NorTiming::accelerated(),
                ..NorParams::default()
            },
            ..Self::default()
        }
    }

    /// Target side view of the QSPI settings
    pub fn qspi_target(&self) -> QspiTargetConfig {
        QspiTargetConfig {
            sce_active_high: self.qspi.sce_active_high,
            opcode_lanes: self.qspi.opcode_lanes,
        }
    }

    /// Check values that would make the models misbehave
    pub fn validate(&self) -> Result<()> {
        let g = &self.nor.geometry;
        if g.size == 0 || g.erase_size == 0 {
            return Err(Error::Config("array and erase block size must be non-zero".into()));
        }
        if g.size % g.erase_size != 0 {
            return Err(Error::Config(format!(
                "array size {:#x} is not a multiple of the erase block size {:#x}",
                g.size, g.erase_size
            )));
        }
        if g.write_buffer_words == 0 || g.write_buffer_words > g.erase_size {
            return Err(Error::Config(format!(
                "write buffer of {} words does not fit an erase block",
                g.write_buffer_words
            )));
        }
        if !self.nor.timing.page_words.is_power_of_two() {
            return Err(Error::Config(format!(
                "page size {} is not a power of two",
                self.nor.timing.page_words
            )));
        }
        period_ps(self.qspi.freq_mhz)?;
        if !(self.wishbone.clk_period_ns.is_finite() && self.wishbone.clk_period() >= 2) {
            return Err(Error::Config(format!(
                "invalid wishbone clock period {} ns",
                self.wishbone.clk_period_ns
            )));
        }
        if self.sim.time_limit == 0 {
            return Err(Error::Config("time limit must be non-zero".into()));
        }
        Ok(())
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: TomlConfigFile = toml::from_str(content)?;
        let config = file.into_config();
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        log::debug!("loading configuration from {}", path.display());
        Self::from_toml_str(&content)
    }
}

/// A number written as an integer or as a decimal/hex string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Number(u64);

impl<'de> Deserialize<'de> for Number {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum HexOrInt {
            Int(u64),
            Str(String),
        }

        match HexOrInt::deserialize(deserializer)? {
            HexOrInt::Int(n) => Ok(Number(n)),
            HexOrInt::Str(s) => parse_number(&s).map(Number).map_err(serde::de::Error::custom),
        }
    }
}

/// Parse a number that can be hex (0x...) or decimal, with `_` separators
fn parse_number(s: &str) -> std::result::Result<u64, String> {
    let s = s.trim().replace('_', "");
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).map_err(|e| format!("invalid hex '{}': {}", s, e))
    } else {
        s.parse().map_err(|e| format!("invalid number '{}': {}", s, e))
    }
}

fn to_u32(n: Number, what: &str) -> u32 {
    u32::try_from(n.0).unwrap_or_else(|_| {
        log::warn!("{} {:#x} does not fit 32 bits, clamping", what, n.0);
        u32::MAX
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct TomlConfigFile {
    nor: TomlNor,
    nor_bus: NorBusTiming,
    qspi: QspiHostConfig,
    wishbone: TomlWishbone,
    sim: TomlSim,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct TomlNor {
    size: Option<Number>,
    erase_size: Option<Number>,
    write_buffer_words: Option<Number>,
    timing_preset: TimingPreset,
    mutation: MutationPolicy,
    read_while_busy: ReadWhileBusy,
    timing: TomlNorTiming,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct TomlNorTiming {
    t_wp_ns: Option<Number>,
    t_ceh_ns: Option<Number>,
    t_acc_ns: Option<Number>,
    t_pacc_ns: Option<Number>,
    t_busy_ns: Option<Number>,
    page_words: Option<Number>,
    program_us: Option<Number>,
    buffer_program_us: Option<Number>,
    erase_sector_us: Option<Number>,
    erase_chip_us: Option<Number>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct TomlWishbone {
    clk_period_ns: Option<f64>,
    reset_cycles: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct TomlSim {
    time_limit_ms: Option<Number>,
}

impl TomlConfigFile {
    fn into_config(self) -> SimConfig {
        let defaults = SimConfig::default();
        let geometry = NorGeometry {
            size: self.nor.size.map_or(defaults.nor.geometry.size, |n| to_u32(n, "size")),
            erase_size: self
                .nor
                .erase_size
                .map_or(defaults.nor.geometry.erase_size, |n| to_u32(n, "erase_size")),
            write_buffer_words: self
                .nor
                .write_buffer_words
                .map_or(defaults.nor.geometry.write_buffer_words, |n| {
                    to_u32(n, "write_buffer_words")
                }),
        };

        let t = &self.nor.timing;
        let base = self.nor.timing_preset.timing();
        let nanos = |v: Option<Number>, d: SimTime| v.map_or(d, |n| ns(n.0));
        let micros = |v: Option<Number>, d: SimTime| v.map_or(d, |n| us(n.0));
        let timing = NorTiming {
            t_wp: nanos(t.t_wp_ns, base.t_wp),
            t_ceh: nanos(t.t_ceh_ns, base.t_ceh),
            t_acc: nanos(t.t_acc_ns, base.t_acc),
            t_pacc: nanos(t.t_pacc_ns, base.t_pacc),
            t_busy: nanos(t.t_busy_ns, base.t_busy),
            page_words: t.page_words.map_or(base.page_words, |n| to_u32(n, "page_words")),
            busy_program: micros(t.program_us, base.busy_program),
            busy_buffer_program: micros(t.buffer_program_us, base.busy_buffer_program),
            busy_erase_sector: micros(t.erase_sector_us, base.busy_erase_sector),
            busy_erase_chip: micros(t.erase_chip_us, base.busy_erase_chip),
        };

        SimConfig {
            nor: NorParams {
                geometry,
                timing,
                mutation: self.nor.mutation,
                read_while_busy: self.nor.read_while_busy,
            },
            nor_bus: self.nor_bus,
            qspi: self.qspi,
            wishbone: WishboneConfig {
                clk_period_ns: self
                    .wishbone
                    .clk_period_ns
                    .unwrap_or(defaults.wishbone.clk_period_ns),
                reset_cycles: self
                    .wishbone
                    .reset_cycles
                    .unwrap_or(defaults.wishbone.reset_cycles),
            },
            sim: SimSettings {
                time_limit: self.sim.time_limit_ms.map_or(defaults.sim.time_limit, |n| ms(n.0)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qspi::Lanes;

    #[test]
    fn test_empty_is_default() {
        let config = SimConfig::from_toml_str("").unwrap();
        assert_eq!(config, SimConfig::default());
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("0x10000"), Ok(0x10000));
        assert_eq!(parse_number("65_536"), Ok(65536));
        assert_eq!(parse_number(" 42 "), Ok(42));
        assert!(parse_number("0xZZ").is_err());
    }

    #[test]
    fn test_full_file() {
        let config = SimConfig::from_toml_str(
            r#"
            [nor]
            size = "0x100000"
            erase_size = 0x1000
            write_buffer_words = 32
            timing_preset = "accelerated"
            mutation = "on_ready"
            read_while_busy = "array_data"

            [nor.timing]
            t_acc_ns = 150
            erase_sector_us = "0x10"

            [nor_bus]
            access_ns = 180

            [qspi]
            freq_mhz = 22.0
            opcode_lanes = "quad"

            [wishbone]
            clk_period_ns = 21.5

            [sim]
            time_limit_ms = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.nor.geometry.size, 0x100000);
        assert_eq!(config.nor.geometry.erase_size, 0x1000);
        assert_eq!(config.nor.geometry.write_buffer_words, 32);
        assert_eq!(config.nor.mutation, MutationPolicy::OnReady);
        assert_eq!(config.nor.read_while_busy, ReadWhileBusy::ArrayData);
        assert_eq!(config.nor.timing.t_acc, ns(150));
        assert_eq!(config.nor.timing.busy_erase_sector, us(16));
        assert_eq!(config.nor.timing.busy_program, us(1));
        assert_eq!(config.nor_bus.access_ns, 180);
        assert_eq!(config.nor_bus.write_pulse_ns, 50);
        assert_eq!(config.qspi.freq_mhz, 22.0);
        assert_eq!(config.qspi.opcode_lanes, Lanes::Quad);
        assert!(config.qspi.sce_active_high);
        assert_eq!(config.wishbone.clk_period(), 21_500);
        assert_eq!(config.sim.time_limit, ms(5));
        assert_eq!(config.qspi_target().opcode_lanes, Lanes::Quad);
    }

    #[test]
    fn test_validate_rejects_bad_geometry() {
        let err = SimConfig::from_toml_str("[nor]\nsize = 1000\nerase_size = 64\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = SimConfig::from_toml_str("[nor.timing]\npage_words = 6\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = SimConfig::from_toml_str("[qspi]\nfreq_mhz = 0.0\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_unknown_key() {
        let err = SimConfig::from_toml_str("[nor]\nsectors = 4\n").unwrap_err();
        assert!(matches!(err, Error::Toml(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = SimConfig::load("/nonexistent/norsim.toml").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
