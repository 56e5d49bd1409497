//! Clue allocator - splits a host's personal facts across the three meals.
//!
//! With six or more facts every course gets its own disjoint pair. Smaller pools
//! degrade in steps (6 -> 4 -> 2 -> 1 -> 0 usable facts) and allow overlap; an
//! empty or single-fact pool is topped up with clues synthesised from age,
//! travel time and name initials.

use crate::entities::Course;
use std::collections::BTreeMap;

/// Clues shown per course.
pub const CLUES_PER_COURSE: usize = 2;

/// A single clue: either an index into the host's fact pool or generated text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Clue {
    /// Index into the host's fact list
    Fact(usize),
    /// Fallback text built from ages, initials or travel time
    Synthetic(String),
}

impl Clue {
    /// Text shown to the guest.
    #[must_use]
    pub fn render(&self, facts: &[String]) -> String {
        match self {
            Self::Fact(index) => facts.get(*index).cloned().unwrap_or_default(),
            Self::Synthetic(text) => text.clone(),
        }
    }
}

/// What the allocator knows about a host.
#[derive(Debug, Clone, Default)]
pub struct HostProfile {
    /// Both partners' facts, combined into one ordered list
    pub facts: Vec<String>,
    /// Known ages
    pub ages: Vec<i32>,
    /// e.g. "A. & B."
    pub initials: String,
    /// Travel time from the guest, if known
    pub travel_minutes: Option<u32>,
}

/// Number of facts that are actually handed out for a pool of `pool_len`.
#[must_use]
pub const fn usable_facts(pool_len: usize) -> usize {
    match pool_len {
        0 => 0,
        1 => 1,
        2 | 3 => 2,
        4 | 5 => 4,
        _ => 6,
    }
}

/// Fact indices per meal. Disjoint pairs for pools of six or more; smaller pools wrap around.
#[must_use]
pub fn allocate_fact_indices(pool_len: usize) -> [Vec<usize>; 3] {
    let usable = usable_facts(pool_len);
    std::array::from_fn(|course| match usable {
        0 => Vec::new(),
        1 => vec![0],
        _ => (0..CLUES_PER_COURSE)
            .map(|slot| (course * CLUES_PER_COURSE + slot) % usable)
            .collect(),
    })
}

fn synthetic_clues(profile: &HostProfile) -> Vec<String> {
    let mut clues = Vec::new();
    if !profile.ages.is_empty() {
        let total: i32 = profile.ages.iter().sum();
        if profile.ages.len() > 1 {
            clues.push(format!("Together your hosts are {total} years young."));
        } else {
            clues.push(format!("Your host is {total} years young."));
        }
    }
    if let Some(minutes) = profile.travel_minutes {
        clues.push(format!("Your destination is about {minutes} minutes away."));
    }
    if !profile.initials.is_empty() {
        clues.push(format!("Look for the initials {} on the doorbell.", profile.initials));
    }
    if clues.len() < CLUES_PER_COURSE {
        clues.push("Your hosts are already warming up the kitchen.".to_string());
        clues.push("Bring an appetite, not a map.".to_string());
    }
    clues
}

/// Picks the clues for every meal of one host. Always returns two clues per meal.
#[must_use]
pub fn allocate_clues(profile: &HostProfile) -> BTreeMap<Course, Vec<Clue>> {
    let indices = allocate_fact_indices(profile.facts.len());
    let synthetic = synthetic_clues(profile);

    Course::MEALS
        .iter()
        .zip(indices)
        .enumerate()
        .map(|(course_index, (course, facts))| {
            let mut clues: Vec<Clue> = facts.into_iter().map(Clue::Fact).collect();
            // rotate so each course starts at a different synthetic clue
            let mut offset = course_index;
            while clues.len() < CLUES_PER_COURSE {
                clues.push(Clue::Synthetic(
                    synthetic[offset % synthetic.len()].clone(),
                ));
                offset += 1;
            }
            (*course, clues)
        })
        .collect()
}
