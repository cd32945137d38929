//! Miscellaneous utility structs and functions.

use std::fmt::Debug;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The maximum number of lanes a road segment may have.
pub const MAX_LANES: usize = 32;

/// An interval on the real number line.
#[derive(Copy, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Interval<T> {
    pub min: T,
    pub max: T,
}

impl<T> Interval<T> {
    /// Creates a new interval.
    pub const fn new(min: T, max: T) -> Self {
        Self { min, max }
    }
}

impl<T: std::cmp::PartialOrd> Interval<T> {
    /// Returns true if this interval contains the value.
    pub fn contains(&self, value: T) -> bool {
        value >= self.min && value <= self.max
    }
}

impl<T: std::ops::Sub<T, Output = T> + Copy> Interval<T> {
    /// Gets the magnitude of the interval.
    pub fn length(&self) -> T {
        self.max - self.min
    }
}

impl Interval<f64> {
    /// Linearly interpolates between the interval's end points.
    pub fn lerp(&self, t: f64) -> f64 {
        self.min + t * (self.max - self.min)
    }
}

impl<T: Debug> Debug for Interval<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Interval({:?}, {:?})", &self.min, &self.max)
    }
}

/// A set of 1-based lane indices, stored as a bit mask.
#[derive(Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LaneMask(u32);

impl LaneMask {
    /// The mask containing every lane.
    pub const ALL: Self = Self(u32::MAX);

    /// The empty mask.
    pub const NONE: Self = Self(0);

    /// Creates a mask containing a single lane.
    pub fn single(lane: usize) -> Self {
        let mut mask = Self::NONE;
        mask.insert(lane);
        mask
    }

    /// Adds a lane to the mask.
    pub fn insert(&mut self, lane: usize) {
        assert!(
            (1..=MAX_LANES).contains(&lane),
            "lane index {} out of range 1..={}",
            lane,
            MAX_LANES
        );
        self.0 |= 1 << (lane - 1);
    }

    /// Returns true if the mask contains the given lane.
    pub fn contains(&self, lane: usize) -> bool {
        (1..=MAX_LANES).contains(&lane) && self.0 & (1 << (lane - 1)) != 0
    }
}

impl Default for LaneMask {
    fn default() -> Self {
        Self::ALL
    }
}

impl FromIterator<usize> for LaneMask {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut mask = Self::NONE;
        for lane in iter {
            mask.insert(lane);
        }
        mask
    }
}

impl Debug for LaneMask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lanes = (1..=MAX_LANES).filter(|lane| self.contains(*lane));
        f.debug_set().entries(lanes).finish()
    }
}
