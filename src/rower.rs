// 🚣 Rower Entity - validated roster entry
//
// A rower is built once from raw form input (name + birth year or age) and
// never changes afterwards. The only way to get rid of one is to remove it
// from its roster.

use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::bands::BandTable;
use crate::error::SessionError;

/// Inputs below this are ages, at or above it birth years
pub const BIRTH_YEAR_THRESHOLD: i32 = 200;

// ============================================================================
// CLOCK
// ============================================================================

/// Source of the current calendar year
pub trait Clock: Send + Sync {
    fn current_year(&self) -> i32;
}

/// Wall clock (UTC)
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn current_year(&self) -> i32 {
        Utc::now().year()
    }
}

/// Clock pinned to a date, for deterministic tests and replays
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    today: NaiveDate,
}

impl FixedClock {
    pub fn new(today: NaiveDate) -> Self {
        FixedClock { today }
    }

    /// Clock pinned to the 1st of January of `year`
    pub fn year(year: i32) -> Self {
        let today = NaiveDate::from_ymd_opt(year, 1, 1).unwrap_or_default();
        FixedClock { today }
    }
}

impl Clock for FixedClock {
    fn current_year(&self) -> i32 {
        self.today.year()
    }
}

// ============================================================================
// ROWER
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rower {
    pub name: String,
    pub birth_year: i32,
    /// Age on their birthday this year
    pub age: i32,
    /// Masters band letter
    pub category: String,
}

impl Rower {
    /// Validate input and build a rower.
    ///
    /// `birth_year_or_age` below 200 is an age, otherwise a birth year.
    pub fn create(
        name: &str,
        birth_year_or_age: i32,
        clock: &dyn Clock,
        bands: &BandTable,
    ) -> Result<Rower, SessionError> {
        let this_year = clock.current_year();
        let invalid = || SessionError::InvalidAge(birth_year_or_age);

        let birth_year = if birth_year_or_age < BIRTH_YEAR_THRESHOLD {
            this_year.checked_sub(birth_year_or_age).ok_or_else(invalid)?
        } else {
            birth_year_or_age
        };

        let age = this_year.checked_sub(birth_year).ok_or_else(invalid)?;
        if age < 1 {
            return Err(invalid());
        }

        let category = bands
            .band_for(age as f64)
            .ok_or_else(|| SessionError::TooYoung {
                name: name.to_string(),
                age,
            })?;

        Ok(Rower {
            name: name.to_string(),
            birth_year,
            age,
            category: category.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create(name: &str, value: i32) -> Result<Rower, SessionError> {
        Rower::create(name, value, &FixedClock::year(2025), &BandTable::masters())
    }

    #[test]
    fn test_create_from_birth_year() {
        let alice = create("Alice", 1988).unwrap();

        assert_eq!(alice.name, "Alice");
        assert_eq!(alice.birth_year, 1988);
        assert_eq!(alice.age, 37);
        assert_eq!(alice.category, "B");
    }

    #[test]
    fn test_create_from_age() {
        let carol = create("Carol", 52).unwrap();

        assert_eq!(carol.birth_year, 1973);
        assert_eq!(carol.age, 52);
        assert_eq!(carol.category, "D");
    }

    #[test]
    fn test_too_young() {
        match create("Bob", 26) {
            Err(SessionError::TooYoung { name, age }) => {
                assert_eq!(name, "Bob");
                assert_eq!(age, 26);
            }
            other => panic!("expected TooYoung, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_age() {
        // Born this year or in the future
        assert!(matches!(create("Dan", 2025), Err(SessionError::InvalidAge(2025))));
        assert!(matches!(create("Eve", 2030), Err(SessionError::InvalidAge(2030))));
        // Zero and negative ages
        assert!(matches!(create("Fay", 0), Err(SessionError::InvalidAge(0))));
        assert!(matches!(create("Gus", -4), Err(SessionError::InvalidAge(-4))));
        // Extremes must not overflow
        assert!(matches!(create("Zed", i32::MIN), Err(SessionError::InvalidAge(i32::MIN))));
        assert!(matches!(create("Max", i32::MAX), Err(SessionError::InvalidAge(i32::MAX))));
    }

    #[test]
    fn test_threshold_between_age_and_year() {
        // 199 is an age, 200 a (very old) birth year
        let old = create("Methuselah", 199).unwrap();
        assert_eq!(old.age, 199);
        assert_eq!(old.birth_year, 1826);

        let older = create("Ancient", 200).unwrap();
        assert_eq!(older.birth_year, 200);
        assert_eq!(older.age, 1825);
        assert_eq!(older.category, "K");
    }

    #[test]
    fn test_birth_year_matches_clock() {
        let clock = FixedClock::new(NaiveDate::from_ymd_opt(2031, 6, 30).unwrap());
        let rower = Rower::create("Hal", 40, &clock, &BandTable::masters()).unwrap();
        assert_eq!(rower.birth_year + rower.age, 2031);
    }

    #[test]
    fn test_wire_names() {
        let rower = create("Alice", 1988).unwrap();
        let json = serde_json::to_value(&rower).unwrap();

        assert_eq!(json["name"], "Alice");
        assert_eq!(json["birthYear"], 1988);
        assert_eq!(json["age"], 37);
        assert_eq!(json["category"], "B");
    }
}
