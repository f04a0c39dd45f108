//! Open-addressed, linear-probing hash table keyed by interned strings.
//!
//! Keys compare by pointer identity (they're always already interned by
//! the time they reach a `Table`), which is why `find_entry` only has to
//! compare `Rc` pointers rather than string content. `find_string` is the
//! one exception: it's the routine that makes interning sound in the
//! first place, run *before* a string is known to be interned, so it has
//! to compare by length, hash, and content.

use std::rc::Rc;

use crate::value::StringRef;

const MAX_LOAD: f64 = 0.75;

enum Slot<V> {
    Empty,
    Tombstone,
    Occupied(StringRef, V),
}

pub struct Table<V> {
    entries: Vec<Slot<V>>,
    /// Occupied slots plus tombstones, matching the source's `count`
    /// field, which is what load-factor growth is measured against.
    count: usize,
}

impl<V: Clone> Default for Table<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> Table<V> {
    pub fn new() -> Self {
        Table {
            entries: Vec::new(),
            count: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.entries.len()
    }

    fn find_entry(entries: &[Slot<V>], key: &StringRef) -> usize {
        let capacity = entries.len();
        let mut index = (key.hash as usize) % capacity;
        let mut tombstone: Option<usize> = None;

        loop {
            match &entries[index] {
                Slot::Empty => return tombstone.unwrap_or(index),
                Slot::Tombstone => {
                    if tombstone.is_none() {
                        tombstone = Some(index);
                    }
                }
                Slot::Occupied(k, _) => {
                    if Rc::ptr_eq(k, key) {
                        return index;
                    }
                }
            }
            index = (index + 1) % capacity;
        }
    }

    fn grow(&mut self, new_capacity: usize) {
        let mut new_entries: Vec<Slot<V>> = (0..new_capacity).map(|_| Slot::Empty).collect();
        let mut new_count = 0;

        for slot in self.entries.drain(..) {
            if let Slot::Occupied(key, value) = slot {
                let idx = Self::find_entry(&new_entries, &key);
                new_entries[idx] = Slot::Occupied(key, value);
                new_count += 1;
            }
        }

        self.entries = new_entries;
        self.count = new_count;
    }

    pub fn get(&self, key: &StringRef) -> Option<V> {
        if self.entries.is_empty() {
            return None;
        }
        let idx = Self::find_entry(&self.entries, key);
        match &self.entries[idx] {
            Slot::Occupied(_, value) => Some(value.clone()),
            _ => None,
        }
    }

    /// Returns `true` if `key` did not already exist in the table.
    pub fn set(&mut self, key: &StringRef, value: V) -> bool {
        if self.count + 1 > (self.capacity() as f64 * MAX_LOAD) as usize {
            let new_capacity = grow_capacity(self.capacity());
            self.grow(new_capacity);
        }

        let idx = Self::find_entry(&self.entries, key);
        let was_tombstone = matches!(self.entries[idx], Slot::Tombstone);
        let is_new = !matches!(self.entries[idx], Slot::Occupied(_, _));

        if is_new && !was_tombstone {
            self.count += 1;
        }

        self.entries[idx] = Slot::Occupied(key.clone(), value);
        is_new
    }

    pub fn delete(&mut self, key: &StringRef) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let idx = Self::find_entry(&self.entries, key);
        if !matches!(self.entries[idx], Slot::Occupied(_, _)) {
            return false;
        }
        self.entries[idx] = Slot::Tombstone;
        true
    }

    /// The separate probe used only to detect an existing interned
    /// string during string construction, by (length, hash, content)
    /// rather than by pointer.
    pub fn find_string(&self, chars: &str, hash: u32) -> Option<StringRef> {
        if self.entries.is_empty() {
            return None;
        }

        let capacity = self.entries.len();
        let mut index = (hash as usize) % capacity;

        loop {
            match &self.entries[index] {
                Slot::Empty => return None,
                Slot::Tombstone => {}
                Slot::Occupied(key, _) => {
                    if key.hash == hash && key.chars == chars {
                        return Some(key.clone());
                    }
                }
            }
            index = (index + 1) % capacity;
        }
    }
}

fn grow_capacity(old: usize) -> usize {
    if old < 8 {
        8
    } else {
        old * 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::LoxString;

    fn key(s: &str) -> StringRef {
        Rc::new(LoxString::new(s.to_string()))
    }

    #[test]
    fn set_then_get_roundtrips() {
        let mut table: Table<i32> = Table::new();
        let k = key("foo");
        assert!(table.set(&k, 42));
        assert_eq!(table.get(&k), Some(42));
    }

    #[test]
    fn set_existing_key_returns_false_and_overwrites() {
        let mut table: Table<i32> = Table::new();
        let k = key("foo");
        table.set(&k, 1);
        assert!(!table.set(&k, 2));
        assert_eq!(table.get(&k), Some(2));
    }

    #[test]
    fn delete_then_get_is_none_but_lookup_still_probes_past_tombstone() {
        let mut table: Table<i32> = Table::new();
        let a = key("a");
        let b = key("b");
        table.set(&a, 1);
        table.set(&b, 2);
        assert!(table.delete(&a));
        assert_eq!(table.get(&a), None);
        assert_eq!(table.get(&b), Some(2));
    }

    #[test]
    fn grows_past_load_factor() {
        let mut table: Table<i32> = Table::new();
        let keys: Vec<StringRef> = (0..100).map(|i| key(&format!("k{i}"))).collect();
        for (i, k) in keys.iter().enumerate() {
            table.set(k, i as i32);
        }
        for (i, k) in keys.iter().enumerate() {
            assert_eq!(table.get(k), Some(i as i32));
        }
    }

    #[test]
    fn find_string_matches_by_content_not_identity() {
        let mut table: Table<()> = Table::new();
        let interned = key("hello");
        table.set(&interned, ());
        let found = table.find_string("hello", interned.hash);
        assert!(found.is_some());
        assert!(Rc::ptr_eq(&found.unwrap(), &interned));
    }
}
