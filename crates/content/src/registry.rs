use std::collections::BTreeMap;

/// Ordered index of live jobs keyed by id.
///
/// Ids are never reused while a job is registered: `add` refuses a key that
/// is already present and leaves the existing entry untouched.
#[derive(Debug)]
pub struct JobRegistry<J> {
    jobs: BTreeMap<u64, J>,
}

impl<J> Default for JobRegistry<J> {
    fn default() -> Self {
        Self {
            jobs: BTreeMap::new(),
        }
    }
}

impl<J> JobRegistry<J> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `job` under `id`. Returns `false` if the id is taken.
    pub fn add(&mut self, id: u64, job: J) -> bool {
        if self.contains(id) {
            return false;
        }
        self.jobs.insert(id, job);
        true
    }

    pub fn get(&self, id: u64) -> Option<&J> {
        self.jobs.get(&id)
    }

    /// Removes the job under `id`. Returns `false` if nothing was registered.
    pub fn remove(&mut self, id: u64) -> bool {
        self.jobs.remove(&id).is_some()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.jobs.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Registered ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.jobs.keys().copied()
    }
}
