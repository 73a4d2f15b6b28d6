use crate::MHZ;

/// RF front-end band of the RSP tuner. Retuning inside one band is cheap,
/// crossing into another one needs a full reinit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Band {
    AmLo,
    AmMid,
    AmHi,
    Vhf,
    Band3,
    BandX,
    Band4_5,
    BandL,
    Above,
}

/// Upper (exclusive) edge of every band except [`Band::Above`].
const BREAKPOINTS: [(u32, Band); 8] = [
    (12 * MHZ, Band::AmLo),
    (30 * MHZ, Band::AmMid),
    (60 * MHZ, Band::AmHi),
    (120 * MHZ, Band::Vhf),
    (250 * MHZ, Band::Band3),
    (420 * MHZ, Band::BandX),
    (1000 * MHZ, Band::Band4_5),
    (2000 * MHZ, Band::BandL),
];

impl Band {
    pub fn of(frequency: u32) -> Band {
        BREAKPOINTS
            .iter()
            .find(|(edge, _)| frequency < *edge)
            .map(|(_, band)| *band)
            .unwrap_or(Band::Above)
    }

    /// Half-open `[low, high)` interval in Hz; `high` is `None` for the top band.
    pub fn range(&self) -> (u32, Option<u32>) {
        let idx = BREAKPOINTS.iter().position(|(_, b)| b == self);
        match idx {
            Some(0) => (0, Some(BREAKPOINTS[0].0)),
            Some(i) => (BREAKPOINTS[i - 1].0, Some(BREAKPOINTS[i].0)),
            None => (BREAKPOINTS[BREAKPOINTS.len() - 1].0, None),
        }
    }

    pub fn same_band(a: u32, b: u32) -> bool {
        Band::of(a) == Band::of(b)
    }
}
