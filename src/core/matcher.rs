//! Pairing generator - assigns every guest couple to a host for each meal.
//!
//! Pure and deterministic: the same input always yields the same pairings, in the
//! same order. Frozen courses are copied verbatim from the previous plan. For every
//! other meal each active guest couple is placed with exactly one host that still
//! has room and is not on the blocked list. When greedy placement gets stuck, an
//! augmenting-path search tries to shuffle already placed guests to make room; if
//! that fails too the guest is reported as unplaced instead of failing the run.
//!
//! Host ranking for a guest, best first:
//! 1. host has not hosted this guest in another course of the plan
//! 2. most remaining capacity
//! 3. host has not met this guest in an earlier round (co-guests or swapped roles)
//! 4. lowest couple id

use crate::{
    entities::Course,
    errors::{Error, Result},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// A couple as the matcher sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchCouple {
    /// Couple id
    pub id: i64,
    /// People in this unit, used for headcount statistics
    pub person_count: u32,
    /// Active and not a reserve
    pub matchable: bool,
}

/// A hosting assignment: `couple_id` hosts `course` for up to `max_guests` guest couples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostSlot {
    /// Hosting couple
    pub couple_id: i64,
    /// Course hosted
    pub course: Course,
    /// Guest couples that fit at the table
    pub max_guests: u32,
}

/// Unordered set of couple pairs that must never meet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockedPairs(HashSet<(i64, i64)>);

impl BlockedPairs {
    const fn key(a: i64, b: i64) -> (i64, i64) {
        if a < b { (a, b) } else { (b, a) }
    }

    /// Blocks `a` and `b` from meeting, in either role.
    pub fn insert(&mut self, a: i64, b: i64) {
        self.0.insert(Self::key(a, b));
    }

    /// True if `a` and `b` must not meet.
    #[must_use]
    pub fn contains(&self, a: i64, b: i64) -> bool {
        self.0.contains(&Self::key(a, b))
    }

    /// Number of blocked pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when nothing is blocked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(i64, i64)> for BlockedPairs {
    fn from_iter<T: IntoIterator<Item = (i64, i64)>>(iter: T) -> Self {
        let mut pairs = Self::default();
        for (a, b) in iter {
            pairs.insert(a, b);
        }
        pairs
    }
}

/// A host -> guest edge before it is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PairingDraft {
    /// Meal of the visit
    pub course: Course,
    /// Couple cooking
    pub host_couple_id: i64,
    /// Couple visiting
    pub guest_couple_id: i64,
}

/// Why a guest could not be placed for a course.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnplacedReason {
    /// Nobody hosts this course
    NoHosts,
    /// Every host with room is blocked for this guest
    Blocked,
    /// All eligible hosts are full
    NoCapacity,
    /// The course is frozen and this guest has no pairing in it
    FrozenCourse,
}

/// A guest left without a host for one course, for manual resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnplacedGuest {
    /// Guest couple without a host
    pub couple_id: i64,
    /// Meal it has no host for
    pub course: Course,
    /// Why no host was found
    pub reason: UnplacedReason,
}

/// Per-course summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseStats {
    /// Host-guest edges in the course
    pub pairings: usize,
    /// Couples hosting the course
    pub hosts: usize,
    /// Sum of `max_guests` over the course's hosts
    pub capacity: u32,
    /// Guest couples placed
    pub guests_placed: u32,
    /// People placed as guests
    pub guest_headcount: u32,
    /// Guests left without a host
    pub unplaced: usize,
    /// Copied unchanged from the previous plan
    pub frozen: bool,
    /// Hosts holding more guests than their capacity (only possible in frozen courses)
    pub over_capacity_hosts: Vec<i64>,
}

impl CourseStats {
    /// Share of host capacity in use, 0.0 when there is no capacity.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            f64::from(self.guests_placed) / f64::from(self.capacity)
        }
    }
}

/// Summary of one matcher run, stored on the plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchStats {
    /// Per-meal breakdown
    pub courses: BTreeMap<Course, CourseStats>,
    /// Pairings over all meals
    pub total_pairings: usize,
    /// Unplaced entries over all meals
    pub total_unplaced: usize,
    /// Host-guest pairs accepted a second time because no alternative existed
    pub repeat_pairs: usize,
    /// Guests moved by the augmenting search to make room for someone else
    pub relocations: usize,
}

/// Everything the matcher needs.
#[derive(Debug, Clone, Copy)]
pub struct MatchInput<'a> {
    /// Every couple of the event, unmatchable ones included
    pub couples: &'a [MatchCouple],
    /// Hosting assignments
    pub host_slots: &'a [HostSlot],
    /// Pairs that must never meet
    pub blocked: &'a BlockedPairs,
    /// Pairings to copy unchanged, keyed by frozen course
    pub frozen: &'a BTreeMap<Course, Vec<PairingDraft>>,
}

/// Result of a matcher run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchOutcome {
    /// Frozen pairings followed by fresh ones
    pub pairings: Vec<PairingDraft>,
    /// Run statistics
    pub stats: MatchStats,
    /// Guests that could not be seated
    pub unplaced: Vec<UnplacedGuest>,
}

/// Relationship history across the courses matched so far.
#[derive(Debug, Default)]
struct History {
    hosted: HashSet<(i64, i64)>,
    met: HashSet<(i64, i64)>,
}

impl History {
    fn record_course(&mut self, pairings: &[PairingDraft]) {
        let mut tables: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
        for pairing in pairings {
            self.hosted
                .insert((pairing.host_couple_id, pairing.guest_couple_id));
            tables
                .entry(pairing.host_couple_id)
                .or_default()
                .push(pairing.guest_couple_id);
        }
        for (host, guests) in tables {
            let mut seats = guests;
            seats.push(host);
            for (i, a) in seats.iter().enumerate() {
                for b in &seats[i + 1..] {
                    self.met.insert(BlockedPairs::key(*a, *b));
                }
            }
        }
    }

    fn has_hosted(&self, host: i64, guest: i64) -> bool {
        self.hosted.contains(&(host, guest))
    }

    fn has_met(&self, a: i64, b: i64) -> bool {
        self.met.contains(&BlockedPairs::key(a, b))
    }
}

/// Working state for one non-frozen course.
struct CourseTable<'a> {
    hosts: Vec<(i64, u32)>,
    load: HashMap<i64, u32>,
    seated: BTreeMap<i64, BTreeSet<i64>>,
    placement: HashMap<i64, i64>,
    blocked: &'a BlockedPairs,
    history: &'a History,
    relocations: usize,
}

impl<'a> CourseTable<'a> {
    fn new(hosts: Vec<(i64, u32)>, blocked: &'a BlockedPairs, history: &'a History) -> Self {
        Self {
            load: hosts.iter().map(|(id, _)| (*id, 0)).collect(),
            seated: hosts.iter().map(|(id, _)| (*id, BTreeSet::new())).collect(),
            hosts,
            placement: HashMap::new(),
            blocked,
            history,
            relocations: 0,
        }
    }

    fn remaining(&self, host: i64, max_guests: u32) -> u32 {
        max_guests.saturating_sub(self.load.get(&host).copied().unwrap_or(0))
    }

    fn allowed(&self, guest: i64, host: i64) -> bool {
        guest != host && !self.blocked.contains(guest, host)
    }

    /// Hosts this guest may sit with, best first.
    fn ranked_hosts(&self, guest: i64, with_room_only: bool) -> Vec<i64> {
        let mut ranked: Vec<_> = self
            .hosts
            .iter()
            .filter(|(host, _)| self.allowed(guest, *host))
            .map(|(host, max)| (*host, self.remaining(*host, *max)))
            .filter(|(_, room)| !with_room_only || *room > 0)
            .collect();
        ranked.sort_by_key(|(host, room)| {
            (
                self.history.has_hosted(*host, guest),
                std::cmp::Reverse(*room),
                self.history.has_met(*host, guest),
                *host,
            )
        });
        ranked.into_iter().map(|(host, _)| host).collect()
    }

    fn seat(&mut self, guest: i64, host: i64) {
        *self.load.entry(host).or_default() += 1;
        self.seated.entry(host).or_default().insert(guest);
        self.placement.insert(guest, host);
    }

    fn unseat(&mut self, guest: i64, host: i64) {
        if let Some(load) = self.load.get_mut(&host) {
            *load = load.saturating_sub(1);
        }
        if let Some(seats) = self.seated.get_mut(&host) {
            seats.remove(&guest);
        }
        self.placement.remove(&guest);
    }

    fn place(&mut self, guest: i64) -> bool {
        if let Some(host) = self.ranked_hosts(guest, true).first().copied() {
            self.seat(guest, host);
            return true;
        }
        let mut visited = HashSet::new();
        self.augment(guest, &mut visited)
    }

    /// Kuhn-style augmenting path: free a seat by moving a seated guest elsewhere.
    fn augment(&mut self, guest: i64, visited: &mut HashSet<i64>) -> bool {
        for host in self.ranked_hosts(guest, false) {
            if !visited.insert(host) {
                continue;
            }
            let max = self
                .hosts
                .iter()
                .find(|(id, _)| *id == host)
                .map_or(0, |(_, max)| *max);
            if self.remaining(host, max) > 0 {
                self.seat(guest, host);
                return true;
            }
            let occupants: Vec<i64> = self
                .seated
                .get(&host)
                .map(|seats| seats.iter().copied().collect())
                .unwrap_or_default();
            for occupant in occupants {
                if self.augment(occupant, visited) {
                    // occupant now holds a second seat elsewhere; release this one
                    self.unseat_from(occupant, host);
                    self.seat(guest, host);
                    self.relocations += 1;
                    return true;
                }
            }
        }
        false
    }

    fn unseat_from(&mut self, guest: i64, host: i64) {
        let new_host = self.placement.get(&guest).copied();
        self.unseat(guest, host);
        if let Some(new_host) = new_host.filter(|h| *h != host) {
            self.placement.insert(guest, new_host);
        }
    }

    fn unplaced_reason(&self, guest: i64) -> UnplacedReason {
        if self.hosts.is_empty() {
            UnplacedReason::NoHosts
        } else if self.hosts.iter().all(|(host, _)| !self.allowed(guest, *host)) {
            UnplacedReason::Blocked
        } else {
            UnplacedReason::NoCapacity
        }
    }

    fn into_pairings(self, course: Course) -> Vec<PairingDraft> {
        self.seated
            .into_iter()
            .flat_map(|(host, guests)| {
                guests.into_iter().map(move |guest| PairingDraft {
                    course,
                    host_couple_id: host,
                    guest_couple_id: guest,
                })
            })
            .collect()
    }
}

fn validate(input: &MatchInput<'_>) -> Result<()> {
    let mut seen = HashSet::new();
    for slot in input.host_slots {
        if !slot.course.is_meal() {
            return Err(Error::InvalidInput {
                message: format!("Couple {} cannot host the {}", slot.couple_id, slot.course),
            });
        }
        if !seen.insert((slot.couple_id, slot.course)) {
            return Err(Error::InvalidInput {
                message: format!(
                    "Couple {} has more than one hosting slot for {}",
                    slot.couple_id, slot.course
                ),
            });
        }
    }
    for (course, pairings) in input.frozen {
        if let Some(bad) = pairings.iter().find(|p| p.course != *course) {
            return Err(Error::InvalidInput {
                message: format!("Frozen {course} pairing {bad:?} belongs to another course"),
            });
        }
    }
    Ok(())
}

/// Produces pairings for all three meals plus statistics and unplaced guests.
///
/// # Errors
/// Only malformed input is rejected: duplicate hosting slots, slots for the
/// afterparty, or frozen pairings filed under the wrong course.
pub fn generate_pairings(input: &MatchInput<'_>) -> Result<MatchOutcome> {
    validate(input)?;

    let couples: BTreeMap<i64, MatchCouple> = input
        .couples
        .iter()
        .filter(|c| c.matchable)
        .map(|c| (c.id, *c))
        .collect();

    let mut history = History::default();
    let mut by_course: BTreeMap<Course, Vec<PairingDraft>> = BTreeMap::new();
    let mut outcome = MatchOutcome::default();

    // frozen courses first so the rest of the plan can avoid repeating them
    for course in Course::MEALS {
        if let Some(frozen) = input.frozen.get(&course) {
            let mut pairings = frozen.clone();
            pairings.sort();
            history.record_course(&pairings);
            by_course.insert(course, pairings);
        }
    }

    for course in Course::MEALS {
        let slots: BTreeMap<i64, u32> = input
            .host_slots
            .iter()
            .filter(|s| s.course == course && couples.contains_key(&s.couple_id))
            .map(|s| (s.couple_id, s.max_guests))
            .collect();

        if let Some(pairings) = by_course.get(&course) {
            let seated: HashSet<i64> = pairings
                .iter()
                .flat_map(|p| [p.host_couple_id, p.guest_couple_id])
                .collect();
            for id in couples.keys() {
                if !slots.contains_key(id) && !seated.contains(id) {
                    outcome.unplaced.push(UnplacedGuest {
                        couple_id: *id,
                        course,
                        reason: UnplacedReason::FrozenCourse,
                    });
                }
            }
            continue;
        }

        let guests: Vec<i64> = couples
            .keys()
            .copied()
            .filter(|id| !slots.contains_key(id))
            .collect();
        let mut table = CourseTable::new(slots.into_iter().collect(), input.blocked, &history);

        // most constrained guests first
        let mut order = guests;
        order.sort_by_key(|guest| (table.ranked_hosts(*guest, true).len(), *guest));

        for guest in order {
            if !table.place(guest) {
                outcome.unplaced.push(UnplacedGuest {
                    couple_id: guest,
                    course,
                    reason: table.unplaced_reason(guest),
                });
            }
        }

        outcome.stats.relocations += table.relocations;
        let pairings = table.into_pairings(course);
        history.record_course(&pairings);
        by_course.insert(course, pairings);
    }

    outcome.unplaced.sort_by_key(|u| (u.course, u.couple_id));
    outcome.pairings = by_course.values().flatten().copied().collect();
    outcome.stats = summarize(input, &couples, &by_course, &outcome);
    Ok(outcome)
}

fn summarize(
    input: &MatchInput<'_>,
    couples: &BTreeMap<i64, MatchCouple>,
    by_course: &BTreeMap<Course, Vec<PairingDraft>>,
    outcome: &MatchOutcome,
) -> MatchStats {
    let headcount = |id: i64| couples.get(&id).map_or(1, |c| c.person_count);
    let mut stats = MatchStats {
        relocations: outcome.stats.relocations,
        total_pairings: outcome.pairings.len(),
        total_unplaced: outcome.unplaced.len(),
        ..MatchStats::default()
    };

    let mut pair_counts: HashMap<(i64, i64), usize> = HashMap::new();
    for pairing in &outcome.pairings {
        *pair_counts
            .entry((pairing.host_couple_id, pairing.guest_couple_id))
            .or_default() += 1;
    }
    stats.repeat_pairs = pair_counts.values().map(|n| n.saturating_sub(1)).sum();

    for (course, pairings) in by_course {
        let slots: HashMap<i64, u32> = input
            .host_slots
            .iter()
            .filter(|s| s.course == *course && couples.contains_key(&s.couple_id))
            .map(|s| (s.couple_id, s.max_guests))
            .collect();
        let mut loads: BTreeMap<i64, u32> = BTreeMap::new();
        for pairing in pairings {
            *loads.entry(pairing.host_couple_id).or_default() += 1;
        }
        let over_capacity_hosts = loads
            .iter()
            .filter(|(host, load)| **load > slots.get(host).copied().unwrap_or(0))
            .map(|(host, _)| *host)
            .collect();
        let guests_placed = u32::try_from(pairings.len()).unwrap_or(u32::MAX);

        stats.courses.insert(
            *course,
            CourseStats {
                pairings: pairings.len(),
                hosts: slots
                    .keys()
                    .chain(loads.keys())
                    .collect::<HashSet<_>>()
                    .len(),
                capacity: slots.values().sum(),
                guests_placed,
                guest_headcount: pairings.iter().map(|p| headcount(p.guest_couple_id)).sum(),
                unplaced: outcome.unplaced.iter().filter(|u| u.course == *course).count(),
                frozen: input.frozen.contains_key(course),
                over_capacity_hosts,
            },
        );
    }

    stats
}
