//! Automatic server-side preparation of frequently executed queries.

use crate::oids::Oid;
use bytes::Bytes;
use log::debug;
use lru::LruCache;

/// The default number of executions before a query is prepared.
pub const DEFAULT_PREPARE_THRESHOLD: usize = 5;

/// The default maximum number of statements prepared on a connection.
pub const DEFAULT_PREPARED_MAX: usize = 100;

/// Whether to prepare a query on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Prepare {
    /// Prepare the query once it was executed `prepare_threshold` times.
    #[default]
    Auto,
    /// Prepare the query now, if it isn't prepared already.
    Force,
    /// Don't prepare the query, nor use a statement prepared before.
    Never,
}

/// What to do with a query about to be executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Decision {
    /// Execute the query unprepared.
    No,
    /// The query is prepared with this name.
    Yes(String),
    /// Prepare the query with `name`, after deallocating `evict`.
    Should { name: String, evict: Vec<String> },
}

type Key = (Bytes, Vec<Oid>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Seen {
    Counting(usize),
    // returned several results: a simple query with several statements
    Unpreparable,
}

/// The preparation state of the queries of a connection.
///
/// A query is identified by its rewritten text and the oids of its
/// parameters, so queries rewriting to the same text share a statement.
pub(crate) struct PrepareManager {
    prepare_threshold: Option<usize>,
    prepared_max: usize,
    // executions of the queries not prepared yet
    counts: LruCache<Key, Seen>,
    prepared: LruCache<Key, String>,
    next_id: usize,
}

impl PrepareManager {
    pub(crate) fn new(prepare_threshold: Option<usize>, prepared_max: usize) -> PrepareManager {
        PrepareManager {
            prepare_threshold,
            prepared_max,
            counts: LruCache::unbounded(),
            prepared: LruCache::unbounded(),
            next_id: 0,
        }
    }

    pub(crate) fn prepare_threshold(&self) -> Option<usize> {
        self.prepare_threshold
    }

    pub(crate) fn set_prepare_threshold(&mut self, threshold: Option<usize>) {
        self.prepare_threshold = threshold;
    }

    pub(crate) fn prepared_max(&self) -> usize {
        self.prepared_max
    }

    pub(crate) fn set_prepared_max(&mut self, max: usize) {
        self.prepared_max = max;
        while self.counts.len() > max {
            self.counts.pop_lru();
        }
    }

    /// Decides how to execute `query`.
    ///
    /// `simple` queries are sent without parameters and may hold several
    /// statements: they are only prepared automatically after an execution
    /// returned a single result.
    pub(crate) fn get(
        &mut self,
        query: &Bytes,
        types: &[Oid],
        hint: Prepare,
        simple: bool,
    ) -> Decision {
        if hint == Prepare::Never || self.prepared_max == 0 {
            return Decision::No;
        }

        let key = (query.clone(), types.to_vec());
        if let Some(name) = self.prepared.get(&key) {
            return Decision::Yes(name.clone());
        }

        let count = match self.counts.peek(&key) {
            Some(Seen::Unpreparable) => return Decision::No,
            Some(Seen::Counting(n)) => *n,
            None => 0,
        };
        let should = match (hint, self.prepare_threshold) {
            (Prepare::Force, _) => true,
            (_, None) => false,
            (_, Some(_)) if simple && count == 0 => false,
            (_, Some(threshold)) => count >= threshold,
        };
        if !should {
            return Decision::No;
        }

        let extra = (self.prepared.len() + 1).saturating_sub(self.prepared_max);
        let evict = self
            .prepared
            .iter()
            .rev()
            .take(extra)
            .map(|(_, name)| name.clone())
            .collect();

        self.next_id += 1;
        Decision::Should {
            name: format!("_pg3_{}", self.next_id),
            evict,
        }
    }

    /// Records a successful execution of `query` with `decision`, which
    /// returned `nresults` results.
    pub(crate) fn maintain(
        &mut self,
        query: &Bytes,
        types: &[Oid],
        hint: Prepare,
        decision: &Decision,
        nresults: usize,
    ) {
        let key = (query.clone(), types.to_vec());
        match decision {
            Decision::No => {
                if hint != Prepare::Auto || self.prepare_threshold.is_none() {
                    return;
                }
                if nresults != 1 {
                    self.counts.put(key, Seen::Unpreparable);
                } else {
                    match self.counts.get_mut(&key) {
                        Some(Seen::Counting(count)) => *count += 1,
                        Some(Seen::Unpreparable) => {}
                        None => {
                            self.counts.put(key, Seen::Counting(1));
                        }
                    }
                }
                if self.counts.len() > self.prepared_max {
                    self.counts.pop_lru();
                }
            }
            Decision::Yes(_) => {}
            Decision::Should { name, .. } => {
                debug!("prepared statement {}", name);
                self.counts.pop(&key);
                self.prepared.put(key, name.clone());
            }
        }
    }

    /// Forgets a statement deallocated on the server.
    pub(crate) fn forget(&mut self, name: &str) {
        let key = self
            .prepared
            .iter()
            .find(|(_, n)| n.as_str() == name)
            .map(|(k, _)| k.clone());
        if let Some(key) = key {
            debug!("deallocated statement {}", name);
            self.prepared.pop(&key);
        }
    }

    /// Forgets every statement, e.g. after the server discarded them.
    pub(crate) fn clear(&mut self) {
        self.counts.clear();
        self.prepared.clear();
    }

    #[cfg(test)]
    pub(crate) fn prepared_len(&self) -> usize {
        self.prepared.len()
    }
}
