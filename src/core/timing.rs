//! Timing calculator - turns a course start time into the six-stage reveal ladder.
//!
//! Offsets are minutes before the course starts. They are merged from three layers:
//! global defaults (config.toml) -> event-level overrides -> per-course overrides.
//! When travel adjustment is on and a travel duration is known, the street and
//! house-number offsets are stretched so a guest always learns the exact address
//! early enough to set off.

use crate::{
    config::TimingSettings,
    entities::{Course, event},
    errors::{Error, Result},
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Minutes before course start for each reveal stage. `opened` is always 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RevealOffsets {
    /// Teaser
    pub teasing: u32,
    /// First clue
    pub clue_1: u32,
    /// Second clue
    pub clue_2: u32,
    /// Street name
    pub street: u32,
    /// House number
    pub number: u32,
}

impl Default for RevealOffsets {
    fn default() -> Self {
        Self {
            teasing: 360,
            clue_1: 120,
            clue_2: 30,
            street: 15,
            number: 5,
        }
    }
}

impl RevealOffsets {
    /// True when no later stage is revealed before an earlier one.
    #[must_use]
    pub const fn is_ordered(&self) -> bool {
        self.teasing >= self.clue_1
            && self.clue_1 >= self.clue_2
            && self.clue_2 >= self.street
            && self.street >= self.number
    }

    /// Raises earlier stages so the ladder is ordered. Never moves a stage later.
    #[must_use]
    pub fn normalized(self) -> Self {
        let street = self.street.max(self.number);
        let clue_2 = self.clue_2.max(street);
        let clue_1 = self.clue_1.max(clue_2);
        let teasing = self.teasing.max(clue_1);
        Self {
            teasing,
            clue_1,
            clue_2,
            street,
            number: self.number,
        }
    }

    /// Applies the set fields of an override layer.
    #[must_use]
    pub fn with(self, layer: &OffsetOverrides) -> Self {
        Self {
            teasing: layer.teasing.unwrap_or(self.teasing),
            clue_1: layer.clue_1.unwrap_or(self.clue_1),
            clue_2: layer.clue_2.unwrap_or(self.clue_2),
            street: layer.street.unwrap_or(self.street),
            number: layer.number.unwrap_or(self.number),
        }
    }

    /// Stretches street/number offsets for the guest's travel time.
    ///
    /// Bands: up to 8 minutes the street is revealed at least `travel + 5` minutes
    /// ahead, up to 15 minutes `travel + 8`, beyond that `travel + 10`. The house
    /// number always comes at least `travel` minutes ahead.
    #[must_use]
    pub fn travel_adjusted(self, travel_minutes: u32) -> Self {
        let street_margin = match travel_minutes {
            0..=8 => 5,
            9..=15 => 8,
            _ => 10,
        };
        Self {
            street: self.street.max(travel_minutes.saturating_add(street_margin)),
            number: self.number.max(travel_minutes),
            ..self
        }
        .normalized()
    }
}

/// One override layer; unset fields fall through to the layer below.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OffsetOverrides {
    /// Minutes before the course for the teaser
    pub teasing: Option<u32>,
    /// Minutes before the course for the first clue
    pub clue_1: Option<u32>,
    /// Minutes before the course for the second clue
    pub clue_2: Option<u32>,
    /// Minutes before the course for the street
    pub street: Option<u32>,
    /// Minutes before the course for the house number
    pub number: Option<u32>,
}

/// Per-event timing configuration as stored in `events.timing_overrides`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimingOverrides {
    /// Event-level layer
    pub offsets: OffsetOverrides,
    /// Per-course layer
    pub courses: BTreeMap<Course, OffsetOverrides>,
    /// Overrides the global travel adjustment flag
    pub travel_adjustment: Option<bool>,
}

impl TimingOverrides {
    /// Parses and validates the stored JSON blob.
    pub fn parse(raw: Option<&str>) -> Result<Self> {
        match raw.map(str::trim) {
            None | Some("") => Ok(Self::default()),
            Some(raw) => serde_json::from_str(raw).map_err(|e| Error::InvalidInput {
                message: format!("Invalid timing overrides: {e}"),
            }),
        }
    }
}

/// Fully merged timing configuration for one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTiming {
    /// Global offsets from the config file
    pub defaults: RevealOffsets,
    /// The event's own layers
    pub overrides: TimingOverrides,
    /// Whether street and number reveals move earlier by the travel time
    pub travel_adjustment: bool,
}

impl EventTiming {
    /// Merges global settings with an event's overrides.
    #[must_use]
    pub fn new(settings: &TimingSettings, overrides: TimingOverrides) -> Self {
        Self {
            defaults: settings.offsets,
            travel_adjustment: overrides
                .travel_adjustment
                .unwrap_or(settings.travel_adjustment),
            overrides,
        }
    }

    /// Builds the timing for an event row, validating its JSON overrides.
    pub fn for_event(settings: &TimingSettings, event: &event::Model) -> Result<Self> {
        let overrides = TimingOverrides::parse(event.timing_overrides.as_deref())?;
        Ok(Self::new(settings, overrides))
    }

    /// Base offsets for a course after merging all three layers.
    #[must_use]
    pub fn offsets_for(&self, course: Course) -> RevealOffsets {
        let merged = self.defaults.with(&self.overrides.offsets);
        self.overrides
            .courses
            .get(&course)
            .map_or(merged, |layer| merged.with(layer))
            .normalized()
    }
}

/// The six reveal timestamps of one envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealSchedule {
    /// Teaser
    pub teasing_at: DateTime<Utc>,
    /// First clue
    pub clue_1_at: DateTime<Utc>,
    /// Second clue
    pub clue_2_at: DateTime<Utc>,
    /// Street name
    pub street_at: DateTime<Utc>,
    /// House number
    pub number_at: DateTime<Utc>,
    /// Fully opened, at the course start
    pub opened_at: DateTime<Utc>,
}

impl RevealSchedule {
    /// Schedule for a course start with the given (already merged) offsets.
    #[must_use]
    pub fn from_offsets(course_start: DateTime<Utc>, offsets: &RevealOffsets) -> Self {
        let before = |minutes: u32| course_start - Duration::minutes(i64::from(minutes));
        Self {
            teasing_at: before(offsets.teasing),
            clue_1_at: before(offsets.clue_1),
            clue_2_at: before(offsets.clue_2),
            street_at: before(offsets.street),
            number_at: before(offsets.number),
            opened_at: course_start,
        }
    }

    /// Stages in reveal order.
    #[must_use]
    pub const fn stages(&self) -> [DateTime<Utc>; 6] {
        [
            self.teasing_at,
            self.clue_1_at,
            self.clue_2_at,
            self.street_at,
            self.number_at,
            self.opened_at,
        ]
    }

    const fn from_stages(stages: [DateTime<Utc>; 6]) -> Self {
        Self {
            teasing_at: stages[0],
            clue_1_at: stages[1],
            clue_2_at: stages[2],
            street_at: stages[3],
            number_at: stages[4],
            opened_at: stages[5],
        }
    }

    /// `teasing <= clue 1 <= clue 2 <= street <= number <= opened`
    #[must_use]
    pub fn is_monotonic(&self) -> bool {
        self.stages().windows(2).all(|pair| pair[0] <= pair[1])
    }

    /// Moves every stage by the same amount.
    #[must_use]
    pub fn shifted(&self, delta: Duration) -> Self {
        Self::from_stages(self.stages().map(|stage| stage + delta))
    }

    /// Manual "activate course" override: stages already past stay put, the
    /// remaining ones fire `step` apart starting at `now`. A stage is never
    /// moved later than it was.
    #[must_use]
    pub fn forced_open(&self, now: DateTime<Utc>, step: Duration) -> Self {
        let mut next = now;
        Self::from_stages(self.stages().map(|stage| {
            if stage <= now {
                stage
            } else {
                let forced = next.min(stage);
                next += step;
                forced
            }
        }))
    }
}

/// Computes the reveal ladder for one envelope.
///
/// `travel_minutes` is optional; without it (or with adjustment disabled) the
/// merged offsets are used unchanged.
#[must_use]
pub fn compute_envelope_times(
    course_start: DateTime<Utc>,
    timing: &EventTiming,
    course: Course,
    travel_minutes: Option<u32>,
) -> RevealSchedule {
    let base = timing.offsets_for(course);
    let offsets = match travel_minutes {
        Some(minutes) if timing.travel_adjustment => base.travel_adjusted(minutes),
        _ => base,
    };
    RevealSchedule::from_offsets(course_start, &offsets)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 13, h, m, 0).unwrap()
    }

    fn timing(travel_adjustment: bool) -> EventTiming {
        let settings = TimingSettings {
            travel_adjustment,
            ..TimingSettings::default()
        };
        EventTiming::new(&settings, TimingOverrides::default())
    }

    #[test]
    fn test_default_offsets_without_travel() {
        let schedule = compute_envelope_times(at(19, 0), &timing(false), Course::Main, None);
        assert_eq!(schedule.teasing_at, at(13, 0));
        assert_eq!(schedule.clue_1_at, at(17, 0));
        assert_eq!(schedule.clue_2_at, at(18, 30));
        assert_eq!(schedule.street_at, at(18, 45));
        assert_eq!(schedule.number_at, at(18, 55));
        assert_eq!(schedule.opened_at, at(19, 0));
        assert!(schedule.is_monotonic());
    }

    #[test]
    fn test_long_travel_stretches_street_and_number() {
        let schedule = compute_envelope_times(at(19, 0), &timing(true), Course::Main, Some(20));
        assert!(schedule.street_at <= at(18, 40));
        assert!(schedule.number_at <= at(18, 40));
        assert_eq!(schedule.street_at, at(18, 30));
        assert_eq!(schedule.number_at, at(18, 40));
        assert_eq!(schedule.opened_at, at(19, 0));
        assert!(schedule.is_monotonic());
    }

    #[test]
    fn test_travel_ignored_when_adjustment_disabled() {
        let schedule = compute_envelope_times(at(19, 0), &timing(false), Course::Main, Some(20));
        assert_eq!(schedule.street_at, at(18, 45));
        assert_eq!(schedule.number_at, at(18, 55));
    }

    #[test]
    fn test_travel_bands() {
        let base = RevealOffsets::default();
        let short = base.travel_adjusted(6);
        assert_eq!((short.street, short.number), (15, 6));
        let medium = base.travel_adjusted(12);
        assert_eq!((medium.street, medium.number), (20, 12));
        let long = base.travel_adjusted(40);
        assert_eq!((long.street, long.number), (50, 40));
        // clue 2 is pulled earlier so the ladder stays ordered
        assert_eq!(long.clue_2, 50);
        assert!(long.is_ordered());
    }

    #[test]
    fn test_layers_merge_in_order() {
        let mut overrides = TimingOverrides {
            offsets: OffsetOverrides {
                teasing: Some(240),
                street: Some(20),
                ..OffsetOverrides::default()
            },
            ..TimingOverrides::default()
        };
        overrides.courses.insert(
            Course::Dessert,
            OffsetOverrides {
                street: Some(25),
                ..OffsetOverrides::default()
            },
        );
        let timing = EventTiming::new(&TimingSettings::default(), overrides);

        let main = timing.offsets_for(Course::Main);
        assert_eq!((main.teasing, main.clue_1, main.street), (240, 120, 20));
        let dessert = timing.offsets_for(Course::Dessert);
        assert_eq!((dessert.teasing, dessert.street, dessert.number), (240, 25, 5));
    }

    #[test]
    fn test_misordered_layers_are_normalized() {
        let overrides = TimingOverrides {
            offsets: OffsetOverrides {
                clue_2: Some(10),
                ..OffsetOverrides::default()
            },
            ..TimingOverrides::default()
        };
        let timing = EventTiming::new(&TimingSettings::default(), overrides);
        let offsets = timing.offsets_for(Course::Starter);
        assert_eq!(offsets.clue_2, 15);
        let schedule = compute_envelope_times(at(19, 0), &timing, Course::Starter, None);
        assert!(schedule.is_monotonic());
    }

    #[test]
    fn test_overrides_json_roundtrip_and_validation() {
        let parsed = TimingOverrides::parse(Some(
            r#"{"offsets":{"teasing":300},"courses":{"main":{"number":8}},"travel_adjustment":true}"#,
        ))
        .unwrap();
        assert_eq!(parsed.offsets.teasing, Some(300));
        assert_eq!(parsed.courses[&Course::Main].number, Some(8));
        assert_eq!(parsed.travel_adjustment, Some(true));

        assert_eq!(TimingOverrides::parse(None).unwrap(), TimingOverrides::default());
        assert!(matches!(
            TimingOverrides::parse(Some(r#"{"courses":{"brunch":{}}}"#)),
            Err(Error::InvalidInput { .. })
        ));
        assert!(matches!(
            TimingOverrides::parse(Some(r#"{"offsets":{"teaser":1}}"#)),
            Err(Error::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_event_flag_overrides_global_travel_flag() {
        let overrides = TimingOverrides {
            travel_adjustment: Some(true),
            ..TimingOverrides::default()
        };
        let timing = EventTiming::new(&TimingSettings::default(), overrides);
        assert!(timing.travel_adjustment);
    }

    #[test]
    fn test_shift_and_forced_open() {
        let schedule = compute_envelope_times(at(19, 0), &timing(false), Course::Main, None);
        let later = schedule.shifted(Duration::minutes(15));
        assert_eq!(later.teasing_at, at(13, 15));
        assert_eq!(later.opened_at, at(19, 15));

        let now = at(18, 0);
        let forced = schedule.forced_open(now, Duration::seconds(30));
        assert_eq!(forced.teasing_at, at(13, 0));
        assert_eq!(forced.clue_1_at, at(17, 0));
        assert_eq!(forced.clue_2_at, now);
        assert_eq!(forced.street_at, now + Duration::seconds(30));
        assert_eq!(forced.number_at, now + Duration::seconds(60));
        assert_eq!(forced.opened_at, now + Duration::seconds(90));
        assert!(forced.is_monotonic());
    }

    #[test]
    fn test_forced_open_never_delays_a_stage() {
        let schedule = compute_envelope_times(at(19, 0), &timing(false), Course::Main, None);
        let now = at(18, 53);
        let forced = schedule.forced_open(now, Duration::minutes(10));
        assert_eq!(forced.number_at, now);
        assert_eq!(forced.opened_at, at(19, 0));
        assert!(forced.is_monotonic());
    }
}
