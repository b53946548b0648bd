//! managed set: container id -> ordered rack ids, for one acting identity
//!
//! every mutation builds a new `ManagedSet` and swaps it in whole, so a
//! reader never sees a half-applied change. the live value sits in a
//! `tokio::sync::watch` channel; the write-back task rides its change
//! notifications, which is what coalesces several mutations made in one
//! turn into a single write.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// how `add_rack` treats a rack id already present in the container
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RackListPolicy {
    /// ordered, repeated adds append again
    #[default]
    Sequence,
    /// ordered, repeated adds are ignored
    Set,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManagedSet(BTreeMap<String, Vec<String>>);

/// one entry of the remote representation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRacks {
    pub container_id: String,
    pub rack_ids: Vec<String>,
}

/// body of the write-back POST
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ManagedSetUpload {
    pub email: String,
    pub containers: Vec<ContainerRacks>,
}

/// combine the remote snapshot with the local view
///
/// shallow, key-level override: a container present locally keeps its
/// local rack list untouched; containers only the remote knows are kept.
pub fn merge(remote: &ManagedSet, local: &ManagedSet) -> ManagedSet {
    let mut merged = remote.0.clone();
    for (container, racks) in &local.0 {
        merged.insert(container.clone(), racks.clone());
    }
    ManagedSet(merged)
}

impl ManagedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn racks(&self, container_id: &str) -> Option<&[String]> {
        self.0.get(container_id).map(Vec::as_slice)
    }

    pub fn contains(&self, container_id: &str) -> bool {
        self.0.contains_key(container_id)
    }

    pub fn containers(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// empty rack lists for new ids; existing ids are left alone
    pub fn with_containers<I, S>(&self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut next = self.0.clone();
        for id in ids {
            let id = id.as_ref();
            if !id.is_empty() {
                next.entry(id.to_string()).or_default();
            }
        }
        Self(next)
    }

    pub fn without_containers<I, S>(&self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut next = self.0.clone();
        for id in ids {
            next.remove(id.as_ref());
        }
        Self(next)
    }

    /// append `rack_id`; a container not yet managed is created
    pub fn with_rack(&self, container_id: &str, rack_id: &str, policy: RackListPolicy) -> Self {
        if container_id.is_empty() || rack_id.is_empty() {
            return self.clone();
        }
        let mut next = self.0.clone();
        let racks = next.entry(container_id.to_string()).or_default();
        if policy == RackListPolicy::Sequence || !racks.iter().any(|r| r == rack_id) {
            racks.push(rack_id.to_string());
        }
        Self(next)
    }

    /// drop every occurrence of `rack_id` from the container
    pub fn without_rack(&self, container_id: &str, rack_id: &str) -> Self {
        let mut next = self.0.clone();
        if let Some(racks) = next.get_mut(container_id) {
            racks.retain(|r| r != rack_id);
        }
        Self(next)
    }

    pub fn to_wire(&self) -> Vec<ContainerRacks> {
        self.0
            .iter()
            .map(|(container_id, rack_ids)| ContainerRacks {
                container_id: container_id.clone(),
                rack_ids: rack_ids.clone(),
            })
            .collect()
    }

    /// later entries win if the origin repeats a container id
    pub fn from_wire(entries: Vec<ContainerRacks>) -> Self {
        Self(
            entries
                .into_iter()
                .map(|c| (c.container_id, c.rack_ids))
                .collect(),
        )
    }
}

impl<K, V> FromIterator<(K, V)> for ManagedSet
where
    K: Into<String>,
    V: IntoIterator,
    V::Item: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, racks)| (k.into(), racks.into_iter().map(Into::into).collect()))
                .collect(),
        )
    }
}

// ==============================================================================
// live store
// ==============================================================================

#[derive(Debug)]
struct Slot {
    set: ManagedSet,
    open: bool,
}

/// the live managed set of one dashboard view
#[derive(Debug)]
pub struct ManagedSetStore {
    tx: watch::Sender<Slot>,
    policy: RackListPolicy,
}

/// read-only view for rendering code
#[derive(Debug, Clone)]
pub struct ManagedSetReader {
    rx: watch::Receiver<Slot>,
}

/// change feed consumed by the write-back task
#[derive(Debug)]
pub struct ManagedSetChanges {
    rx: watch::Receiver<Slot>,
}

impl ManagedSetStore {
    pub fn new(initial: ManagedSet, policy: RackListPolicy) -> Self {
        let (tx, _) = watch::channel(Slot {
            set: initial,
            open: true,
        });
        Self { tx, policy }
    }

    pub fn current(&self) -> ManagedSet {
        self.tx.borrow().set.clone()
    }

    pub fn reader(&self) -> ManagedSetReader {
        ManagedSetReader {
            rx: self.tx.subscribe(),
        }
    }

    /// changes after this call; the current value counts as already seen
    pub fn changes(&self) -> ManagedSetChanges {
        ManagedSetChanges {
            rx: self.tx.subscribe(),
        }
    }

    /// swap in a whole new set; true when it differed
    pub fn replace(&self, next: ManagedSet) -> bool {
        self.apply(|_| next)
    }

    pub fn add_containers<I, S>(&self, ids: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.apply(|set| set.with_containers(ids))
    }

    pub fn remove_containers<I, S>(&self, ids: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.apply(|set| set.without_containers(ids))
    }

    pub fn add_rack(&self, container_id: &str, rack_id: &str) -> bool {
        let policy = self.policy;
        self.apply(|set| set.with_rack(container_id, rack_id, policy))
    }

    pub fn remove_rack(&self, container_id: &str, rack_id: &str) -> bool {
        self.apply(|set| set.without_rack(container_id, rack_id))
    }

    /// later mutations become no-ops; readers keep the last value
    ///
    /// change streams are woken once more so they can see the store is shut.
    pub fn close(&self) {
        self.tx.send_if_modified(|slot| std::mem::replace(&mut slot.open, false));
    }

    pub fn is_open(&self) -> bool {
        self.tx.borrow().open
    }

    fn apply(&self, update: impl FnOnce(&ManagedSet) -> ManagedSet) -> bool {
        self.tx.send_if_modified(|slot| {
            if !slot.open {
                return false;
            }
            let next = update(&slot.set);
            if next == slot.set {
                return false;
            }
            slot.set = next;
            true
        })
    }
}

impl ManagedSetReader {
    pub fn current(&self) -> ManagedSet {
        self.rx.borrow().set.clone()
    }

    pub fn racks(&self, container_id: &str) -> Option<Vec<String>> {
        self.rx.borrow().set.racks(container_id).map(<[String]>::to_vec)
    }
}

impl ManagedSetChanges {
    /// wait for the next change and return the latest value
    ///
    /// several changes made before this wakes up collapse into one.
    /// `None` once the store is gone.
    pub async fn next(&mut self) -> Option<ManagedSet> {
        self.rx.changed().await.ok()?;
        let slot = self.rx.borrow_and_update();
        Some(slot.set.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(entries: &[(&str, &[&str])]) -> ManagedSet {
        entries
            .iter()
            .map(|(c, racks)| (c.to_string(), racks.iter().map(|r| r.to_string())))
            .collect()
    }

    #[test]
    fn merge_local_overrides_and_keeps_remote_only() {
        let local = set(&[("1", &["1", "2"])]);
        let remote = set(&[("1", &["9"]), ("2", &[])]);

        assert_eq!(merge(&remote, &local), set(&[("1", &["1", "2"]), ("2", &[])]));
    }

    #[test]
    fn merge_does_not_union_rack_lists() {
        let local = set(&[("1", &[])]);
        let remote = set(&[("1", &["4", "5"])]);

        assert_eq!(merge(&remote, &local).racks("1"), Some(&[][..]));
    }

    #[test]
    fn add_containers_keeps_existing_racks() {
        let start = set(&[("1", &["a"])]);
        let next = start.with_containers(["1", "2", ""]);

        assert_eq!(next, set(&[("1", &["a"]), ("2", &[])]));
        // the original snapshot is untouched
        assert_eq!(start, set(&[("1", &["a"])]));
    }

    #[test]
    fn remove_containers_drops_rack_lists() {
        let start = set(&[("1", &["a"]), ("2", &["b"]), ("3", &[])]);
        assert_eq!(start.without_containers(["1", "3", "missing"]), set(&[("2", &["b"])]));
    }

    #[test]
    fn rack_policy_controls_duplicates() {
        let start = set(&[("1", &["a"])]);

        let seq = start.with_rack("1", "a", RackListPolicy::Sequence);
        assert_eq!(seq.racks("1"), Some(&["a".to_string(), "a".to_string()][..]));

        let dedup = start.with_rack("1", "a", RackListPolicy::Set);
        assert_eq!(dedup, start);

        let created = start.with_rack("2", "x", RackListPolicy::Sequence);
        assert_eq!(created.racks("2"), Some(&["x".to_string()][..]));

        assert_eq!(start.with_rack("1", "", RackListPolicy::Sequence), start);
    }

    #[test]
    fn remove_rack_drops_every_occurrence() {
        let start = set(&[("1", &["a", "b", "a"])]);
        assert_eq!(start.without_rack("1", "a"), set(&[("1", &["b"])]));
        assert_eq!(start.without_rack("9", "a"), start);
    }

    #[test]
    fn wire_round_trip_keeps_rack_order() {
        let start = set(&[("1", &["3", "1", "2"]), ("2", &[])]);
        let wire = start.to_wire();
        assert_eq!(wire[0].container_id, "1");
        assert_eq!(wire[0].rack_ids, vec!["3", "1", "2"]);
        assert_eq!(ManagedSet::from_wire(wire), start);
    }

    #[test]
    fn store_reports_only_real_changes() {
        let store = ManagedSetStore::new(ManagedSet::new(), RackListPolicy::Sequence);
        let reader = store.reader();

        assert!(store.add_containers(["1"]));
        assert!(!store.add_containers(["1"]));
        assert!(store.add_rack("1", "2"));
        assert!(!store.remove_rack("1", "missing"));
        assert_eq!(reader.racks("1"), Some(vec!["2".to_string()]));

        store.close();
        assert!(!store.add_containers(["5"]));
        assert!(!reader.current().contains("5"));
    }

    #[tokio::test]
    async fn changes_coalesce_within_a_turn() {
        let store = ManagedSetStore::new(ManagedSet::new(), RackListPolicy::Sequence);
        let mut changes = store.changes();

        store.add_containers(["1"]);
        store.add_rack("1", "a");
        store.add_rack("1", "b");

        let seen = changes.next().await.unwrap();
        assert_eq!(seen, set(&[("1", &["a", "b"])]));

        let again =
            tokio::time::timeout(std::time::Duration::from_millis(20), changes.next()).await;
        assert!(again.is_err(), "no second notification expected");
    }

    #[tokio::test]
    async fn closing_wakes_the_change_stream_once() {
        let store = ManagedSetStore::new(set(&[("1", &[])]), RackListPolicy::Sequence);
        let mut changes = store.changes();

        store.close();
        assert!(!store.is_open());
        assert_eq!(changes.next().await, Some(set(&[("1", &[])])));

        // closing twice is not another change
        store.close();
        let again =
            tokio::time::timeout(std::time::Duration::from_millis(20), changes.next()).await;
        assert!(again.is_err());
    }
}
