use crate::{MAX_GRDB, MHZ, MIN_GRDB};

/// Reduction headroom of the RSP front end: a requested gain of 0 dB is
/// 102 dB of total reduction.
pub const MAX_REDUCTION: i32 = 102;

/// Gains advertised through `get_tuner_gains`, in tenths of dB.
pub const TUNER_GAINS: [i32; 11] = [0, 100, 200, 250, 300, 350, 400, 450, 500, 550, 600];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HwVersion {
    Rsp1,
    Rsp2,
    Rsp1a,
    RspDuo,
}

impl HwVersion {
    /// Maps the `hwVer` byte reported by device enumeration.
    pub fn from_hw_ver(hw_ver: u8) -> HwVersion {
        match hw_ver {
            1 => HwVersion::Rsp1,
            2 => HwVersion::Rsp2,
            3 => HwVersion::RspDuo,
            _ => HwVersion::Rsp1a,
        }
    }

    /// Full-scale magnitude of the raw samples the receiver delivers.
    pub fn downscale(&self) -> f32 {
        match self {
            HwVersion::Rsp1 | HwVersion::Rsp2 => 2048.0,
            HwVersion::Rsp1a | HwVersion::RspDuo => 8192.0,
        }
    }

    pub fn bands(&self) -> &'static [GainBand] {
        match self {
            HwVersion::Rsp1 => &RSP1_BANDS,
            HwVersion::Rsp2 => &RSP2_BANDS,
            HwVersion::Rsp1a | HwVersion::RspDuo => &RSP1A_BANDS,
        }
    }

    pub fn gain_band(&self, frequency: u32) -> &'static GainBand {
        let bands = self.bands();
        bands
            .iter()
            .find(|b| b.upper.is_none_or(|upper| frequency < upper))
            .unwrap_or(&bands[bands.len() - 1])
    }

    pub fn max_lna_state(&self, frequency: u32) -> u8 {
        (self.gain_band(frequency).thresholds.len() - 1) as u8
    }
}

/// One frequency range of a gain table: cumulative LNA reductions per state.
#[derive(Debug)]
pub struct GainBand {
    /// Exclusive upper edge in Hz; `None` for the topmost range.
    pub upper: Option<u32>,
    pub thresholds: &'static [i32],
}

static RSP1_BANDS: [GainBand; 3] = [
    // the vendor lists 19 dB for state 2; a first-match scan never selects it
    GainBand {
        upper: Some(420 * MHZ),
        thresholds: &[0, 24, 24, 43],
    },
    GainBand {
        upper: Some(1000 * MHZ),
        thresholds: &[0, 7, 19, 26],
    },
    GainBand {
        upper: None,
        thresholds: &[0, 5, 19, 24],
    },
];

static RSP2_BANDS: [GainBand; 3] = [
    GainBand {
        upper: Some(420 * MHZ),
        thresholds: &[0, 10, 15, 21, 24, 34, 39, 45, 64],
    },
    GainBand {
        upper: Some(1000 * MHZ),
        thresholds: &[0, 7, 10, 17, 22, 41],
    },
    // vendor values 15, 15 for states 3 and 4 are unreachable behind 21
    GainBand {
        upper: None,
        thresholds: &[0, 5, 21, 21, 21, 32],
    },
];

static RSP1A_BANDS: [GainBand; 4] = [
    GainBand {
        upper: Some(60 * MHZ),
        thresholds: &[0, 6, 12, 18, 37, 42, 61],
    },
    GainBand {
        upper: Some(420 * MHZ),
        thresholds: &[0, 6, 12, 18, 20, 26, 32, 38, 57, 62],
    },
    GainBand {
        upper: Some(1000 * MHZ),
        thresholds: &[0, 7, 13, 19, 20, 27, 33, 39, 45, 64],
    },
    GainBand {
        upper: None,
        thresholds: &[0, 6, 12, 20, 26, 32, 38, 43, 62],
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GainSetting {
    pub lna_state: u8,
    pub grdb: i32,
    /// The request asked for less gain than the band can take away; the
    /// deepest LNA state was used.
    pub saturated: bool,
}

pub fn clamp_grdb(grdb: i32) -> i32 {
    grdb.clamp(MIN_GRDB, MAX_GRDB)
}

/// Resolves a linear gain in tenths of dB into an LNA state and IF gain reduction.
pub fn map_gain(hw: HwVersion, frequency: u32, gain: i32) -> GainSetting {
    let reduction = MAX_REDUCTION - gain / 10;
    let band = hw.gain_band(frequency);
    let target = reduction / 3;

    match band.thresholds.iter().position(|t| *t >= target) {
        Some(state) => GainSetting {
            lna_state: state as u8,
            grdb: clamp_grdb(reduction - band.thresholds[state]),
            saturated: false,
        },
        None => {
            let state = band.thresholds.len() - 1;
            log::warn!(
                "{:?} at {} Hz: gain {} needs {} dB reduction, saturating at LNA state {}",
                hw,
                frequency,
                gain,
                reduction,
                state
            );
            GainSetting {
                lna_state: state as u8,
                grdb: clamp_grdb(reduction - band.thresholds[state]),
                saturated: true,
            }
        }
    }
}
