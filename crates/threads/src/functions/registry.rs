//! Origin-side bookkeeping shared by both strategies.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::function::Function;
use crate::functions::FunctionId;
use crate::message::random_id;

/// Bidirectional function <-> id map.
#[derive(Default)]
pub(crate) struct FunctionRegistry {
    ids: DashMap<usize, FunctionId>,
    functions: DashMap<FunctionId, Function>,
}

impl FunctionRegistry {
    pub(crate) fn register(&self, function: &Function) -> FunctionId {
        match self.ids.entry(function.identity()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let id = loop {
                    let candidate = random_id();
                    if !self.functions.contains_key(&candidate) {
                        break candidate;
                    }
                };
                self.functions.insert(id.clone(), function.clone());
                entry.insert(id.clone());
                id
            }
        }
    }

    pub(crate) fn get(&self, id: &str) -> Option<Function> {
        self.functions.get(id).map(|f| f.clone())
    }

    pub(crate) fn release(&self, id: &str) -> bool {
        match self.functions.remove(id) {
            Some((_, function)) => {
                self.ids.remove(&function.identity());
                true
            }
            None => false,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.functions.len()
    }

    /// Removes entries one by one so no shard lock is held while a function
    /// (and whatever its closure captured) is dropped.
    pub(crate) fn clear(&self) {
        let ids: Vec<FunctionId> = self.functions.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.release(&id);
        }
        self.ids.clear();
    }
}
