use crate::{
    MHZ,
    convert::ConverterConfig,
    error::Error,
    gains::{GainSetting, HwVersion, clamp_grdb, map_gain},
    queue::Signal,
    sdk::{Bandwidth, StreamParams},
};

pub const DEFAULT_FREQUENCY: u32 = 220 * MHZ;
pub const DEFAULT_RATE: u32 = 2_048_000;
pub const DEFAULT_GRDB: i32 = 45;
pub const DEFAULT_LNA_STATE: u8 = 3;
pub const DEFAULT_TUNER_GAIN: i32 = 40;
pub const MIN_INPUT_RATE: u32 = 2 * MHZ;

/// Input rate the receiver runs at to deliver `rate` to the client.
///
/// Rates from 1 to 2 MHz are read at twice the speed and decimated 2:1.
pub fn input_rate_for(rate: u32) -> Result<u32, Error> {
    if rate >= MIN_INPUT_RATE {
        Ok(rate)
    } else if rate >= MHZ {
        Ok(2 * rate)
    } else {
        Err(Error::RateTooLow { rate })
    }
}

/// Configuration of one open receiver.
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor {
    pub hw: HwVersion,
    pub index: u32,

    pub frequency: u32,
    pub ppm: i32,
    pub bandwidth: Bandwidth,
    pub input_rate: u32,
    pub output_rate: u32,

    /// Last gain handed to `set_tuner_gain`, tenths of dB.
    pub tuner_gain: i32,
    /// Whether `lna_state`/`grdb` were derived from `tuner_gain`.
    pub gain_mapped: bool,
    pub lna_state: u8,
    pub grdb: i32,
    pub agc: bool,
    pub manual_gain: bool,
    pub test_mode: bool,

    pub buf_num: u32,
    pub buf_len: u32,

    /// Gain or AGC changed from inside the read callback while the streaming
    /// thread owned the receiver; it pushes them after its current step.
    pub gain_deferred: bool,
    pub ppm_deferred: bool,
}

impl Descriptor {
    pub fn new(hw: HwVersion, index: u32) -> Self {
        Self {
            hw,
            index,
            frequency: DEFAULT_FREQUENCY,
            ppm: 0,
            bandwidth: Bandwidth::Bw1536k,
            input_rate: DEFAULT_RATE,
            output_rate: DEFAULT_RATE,
            tuner_gain: DEFAULT_TUNER_GAIN,
            gain_mapped: false,
            lna_state: DEFAULT_LNA_STATE,
            grdb: DEFAULT_GRDB,
            agc: false,
            manual_gain: false,
            test_mode: false,
            buf_num: 0,
            buf_len: 0,
            gain_deferred: false,
            ppm_deferred: false,
        }
    }

    pub fn stream_params(&self) -> StreamParams {
        StreamParams {
            grdb: self.grdb,
            sample_rate: self.input_rate,
            frequency: self.frequency,
            bandwidth: self.bandwidth,
            lna_state: self.lna_state,
        }
    }

    pub fn decimating(&self) -> bool {
        self.input_rate > self.output_rate
    }

    pub fn converter_config(&self) -> ConverterConfig {
        ConverterConfig {
            decimate: self.decimating(),
            downscale: self.hw.downscale(),
            test_mode: self.test_mode,
        }
    }

    pub fn set_frequency(&mut self, frequency: u32) {
        self.frequency = frequency;
        self.retarget_gain();
    }

    pub fn set_rate(&mut self, rate: u32) -> Result<(), Error> {
        self.input_rate = input_rate_for(rate)?;
        self.output_rate = rate;
        Ok(())
    }

    /// Stores the requested gain. Negative requests are kept for
    /// `get_tuner_gain` but leave the LNA/IF pair alone.
    pub fn set_gain(&mut self, gain: i32) -> Option<GainSetting> {
        self.tuner_gain = gain;
        if gain < 0 {
            self.gain_mapped = false;
            return None;
        }
        let setting = map_gain(self.hw, self.frequency, gain);
        self.apply_setting(setting);
        self.gain_mapped = true;
        Some(setting)
    }

    pub fn apply_setting(&mut self, setting: GainSetting) {
        self.lna_state = setting.lna_state;
        self.grdb = clamp_grdb(setting.grdb);
    }

    pub fn gain_setting(&self) -> GainSetting {
        GainSetting {
            lna_state: self.lna_state,
            grdb: self.grdb,
            saturated: false,
        }
    }

    /// Keeps the LNA state valid for the gain table of the current frequency.
    pub fn retarget_gain(&mut self) {
        if self.gain_mapped {
            let setting = map_gain(self.hw, self.frequency, self.tuner_gain);
            self.apply_setting(setting);
        } else {
            self.lna_state = self.lna_state.min(self.hw.max_lna_state(self.frequency));
        }
    }

    pub fn clamp_grdb(&mut self) {
        self.grdb = clamp_grdb(self.grdb);
    }

    /// Records a queued request that never reached a running stream.
    pub fn store(&mut self, signal: Signal) {
        match signal {
            Signal::SetFrequency(frequency) => self.set_frequency(frequency),
            Signal::SetBandwidth(bandwidth) => self.bandwidth = bandwidth,
            Signal::SetRate(rate) => {
                if let Err(e) = self.set_rate(rate) {
                    log::warn!("dropping queued rate: {}", e);
                }
            }
            Signal::Cancel => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MAX_GRDB, MIN_GRDB};

    #[test]
    fn test_defaults() {
        let d = Descriptor::new(HwVersion::Rsp1a, 0);
        assert_eq!(d.frequency, 220 * MHZ);
        assert_eq!(d.grdb, 45);
        assert_eq!(d.lna_state, 3);
        assert_eq!(d.input_rate, d.output_rate);
        assert!(!d.decimating());
        assert!(!d.agc);
    }

    #[test]
    fn test_rate_rules() {
        assert_eq!(input_rate_for(2_400_000), Ok(2_400_000));
        assert_eq!(input_rate_for(2_000_000), Ok(2_000_000));
        assert_eq!(input_rate_for(1_200_000), Ok(2_400_000));
        assert_eq!(input_rate_for(1_000_000), Ok(2_000_000));
        assert_eq!(
            input_rate_for(960_000),
            Err(Error::RateTooLow { rate: 960_000 })
        );
    }

    #[test]
    fn test_set_rate_low_leaves_state() {
        let mut d = Descriptor::new(HwVersion::Rsp2, 0);
        d.set_rate(1_536_000).unwrap();
        assert_eq!(d.input_rate, 3_072_000);
        assert!(d.decimating());
        assert!(d.set_rate(250_000).is_err());
        assert_eq!(d.output_rate, 1_536_000);
        assert_eq!(d.input_rate, 3_072_000);
    }

    #[test]
    fn test_frequency_change_keeps_lna_valid() {
        let mut d = Descriptor::new(HwVersion::Rsp1a, 0);
        d.set_frequency(100 * MHZ);
        d.lna_state = 9;
        d.set_frequency(1500 * MHZ);
        assert_eq!(d.lna_state, 8);
    }

    #[test]
    fn test_frequency_change_remaps_requested_gain() {
        let mut d = Descriptor::new(HwVersion::Rsp1a, 0);
        d.set_frequency(100 * MHZ);
        // reduction 72, target 24: 26 dB at 100 MHz, 27 dB at 500 MHz
        let at_100 = d.set_gain(300).unwrap();
        assert_eq!((at_100.lna_state, at_100.grdb), (5, 46));
        d.set_frequency(500 * MHZ);
        assert_eq!(d.lna_state, 5);
        assert_eq!(d.grdb, 45);
    }

    #[test]
    fn test_negative_gain_not_mapped() {
        let mut d = Descriptor::new(HwVersion::Rsp1, 0);
        assert!(d.set_gain(-10).is_none());
        assert_eq!(d.tuner_gain, -10);
        assert_eq!(d.grdb, DEFAULT_GRDB);
        assert!(!d.gain_mapped);
    }

    #[test]
    fn test_store_queued_signals() {
        let mut d = Descriptor::new(HwVersion::Rsp1a, 0);
        d.store(Signal::SetFrequency(433 * MHZ));
        d.store(Signal::SetRate(1_200_000));
        d.store(Signal::SetBandwidth(Bandwidth::Bw600k));
        d.store(Signal::Cancel);
        assert_eq!(d.frequency, 433 * MHZ);
        assert_eq!((d.input_rate, d.output_rate), (2_400_000, 1_200_000));
        assert_eq!(d.bandwidth, Bandwidth::Bw600k);
    }

    #[test]
    fn test_gain_stays_clamped() {
        let mut d = Descriptor::new(HwVersion::Rsp1a, 0);
        for gain in [0, 100, 400, 900, 1500] {
            d.set_gain(gain);
            assert!((MIN_GRDB..=MAX_GRDB).contains(&d.grdb));
        }
    }
}
