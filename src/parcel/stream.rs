// CLASSIFICATION: COMMUNITY
// Filename: stream.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-16

//! Ordering and grouping checks over an observed parcel stream.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use thiserror::Error;

use super::{Disposition, Parcel, Sequence};

/// A parcel that broke the stream contract. `index` is its arrival position.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "violation", rename_all = "kebab-case")]
pub enum StreamViolation {
    #[error("parcel #{index} from {sender}: sequence {current} does not follow {previous}")]
    SequenceRegression {
        index: usize,
        sender: String,
        previous: Sequence,
        current: Sequence,
    },
    #[error("parcel #{index} from {sender}: group {group_id} already terminated")]
    GroupAfterLast {
        index: usize,
        sender: String,
        group_id: u64,
    },
}

/// Incremental validator; feed parcels in arrival order.
///
/// Per sender, sequences must strictly increase: a larger major, or the same
/// major with a larger minor. A group is closed by its `Last` parcel and no
/// parcel may join it afterwards.
#[derive(Debug, Default)]
pub struct StreamValidator {
    observed: usize,
    last_sequence: HashMap<String, Sequence>,
    open: HashSet<(String, u64)>,
    closed: HashSet<(String, u64)>,
}

impl StreamValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, parcel: &Parcel) -> Result<(), StreamViolation> {
        let index = self.observed;
        self.observed += 1;
        let sender = parcel.sender();
        let current = parcel.sequence();

        if let Some(previous) = self.last_sequence.get(sender).copied() {
            if current <= previous {
                return Err(StreamViolation::SequenceRegression {
                    index,
                    sender: sender.into(),
                    previous,
                    current,
                });
            }
        }
        self.last_sequence.insert(sender.into(), current);

        if let Some(group) = parcel.group() {
            let key = (sender.to_string(), group.id);
            if self.closed.contains(&key) {
                return Err(StreamViolation::GroupAfterLast {
                    index,
                    sender: sender.into(),
                    group_id: group.id,
                });
            }
            match group.disposition {
                Disposition::Part => {
                    self.open.insert(key);
                }
                Disposition::Last => {
                    self.open.remove(&key);
                    self.closed.insert(key);
                }
            }
        }
        Ok(())
    }

    /// Groups that received parts but no `Last` yet.
    pub fn open_groups(&self) -> Vec<(String, u64)> {
        let mut open: Vec<_> = self.open.iter().cloned().collect();
        open.sort();
        open
    }

    /// Validate a whole stream, returning every violation in arrival order.
    pub fn validate(parcels: &[Parcel]) -> Vec<StreamViolation> {
        let mut validator = Self::new();
        parcels
            .iter()
            .filter_map(|p| validator.observe(p).err())
            .collect()
    }
}
