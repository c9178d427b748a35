// 🏅 Masters Bands - Age → category letter
// Fixed table of masters rowing categories, ascending by minimum age.
//
// A rower (or a crew, via its average age) belongs to the band with the
// largest threshold that does not exceed their age.

use crate::rower::Rower;

// ============================================================================
// BAND DEFINITION
// ============================================================================

/// One masters category: letter plus the minimum age that qualifies
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Band {
    pub letter: &'static str,
    pub min_age: f64,
}

const MASTERS_BANDS: &[Band] = &[
    Band { letter: "A", min_age: 27.0 },
    Band { letter: "B", min_age: 36.0 },
    Band { letter: "C", min_age: 43.0 },
    Band { letter: "D", min_age: 50.0 },
    Band { letter: "E", min_age: 55.0 },
    Band { letter: "F", min_age: 60.0 },
    Band { letter: "G", min_age: 65.0 },
    Band { letter: "H", min_age: 70.0 },
    Band { letter: "I", min_age: 75.0 },
    Band { letter: "J", min_age: 80.0 },
    Band { letter: "K", min_age: 85.0 },
];

// ============================================================================
// BAND TABLE
// ============================================================================

/// Immutable, ordered band table
///
/// Cheap to copy (it only borrows the static table), so the engine and the
/// rower factory each hold one by value.
#[derive(Debug, Clone, Copy)]
pub struct BandTable {
    bands: &'static [Band],
}

impl BandTable {
    /// The standard masters table (A ≥ 27 … K ≥ 85)
    pub fn masters() -> Self {
        BandTable {
            bands: MASTERS_BANDS,
        }
    }

    /// All bands, ascending by threshold
    pub fn bands(&self) -> &'static [Band] {
        self.bands
    }

    /// Letter of the last band whose threshold is ≤ `age`.
    /// `None` when the age is below the lowest threshold.
    pub fn band_for(&self, age: f64) -> Option<&'static str> {
        let mut found = None;
        for band in self.bands {
            if band.min_age > age {
                break;
            }
            found = Some(band.letter);
        }
        found
    }

    /// Lowest qualifying age (27)
    pub fn min_age(&self) -> f64 {
        self.bands.first().map(|b| b.min_age).unwrap_or(0.0)
    }

    /// Threshold of the oldest band (85)
    pub fn max_age(&self) -> f64 {
        self.bands.last().map(|b| b.min_age).unwrap_or(0.0)
    }
}

impl Default for BandTable {
    fn default() -> Self {
        Self::masters()
    }
}

/// Arithmetic mean of the rowers' ages; 0 for an empty roster
pub fn average_age(rowers: &[Rower]) -> f64 {
    if rowers.is_empty() {
        return 0.0;
    }
    let total: i64 = rowers.iter().map(|r| r.age as i64).sum();
    total as f64 / rowers.len() as f64
}
