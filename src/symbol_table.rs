//! Process-wide address-to-name map, plus the user-supplied filter name
//! list and the derived filter-address set (spec.md §3, §4.3, §4.7).

use std::collections::{HashMap, HashSet};

pub struct SymbolTable {
    names: HashMap<u32, String>,
    filter_names: Vec<String>,
    filter_addrs: HashSet<u32>,
}

impl SymbolTable {
    pub fn new(filter_names: Vec<String>) -> SymbolTable {
        SymbolTable { names: HashMap::new(), filter_names, filter_addrs: HashSet::new() }
    }

    /// Registers a resolved symbol. If its name matches an entry in the
    /// user-supplied filter list, the address is added to the
    /// filter-address set (spec.md §4.3, SYMBOL dispatch).
    pub fn register(&mut self, addr: u32, name: String) {
        if self.filter_names.iter().any(|f| f == &name) {
            log!(crate::log::LogInfo, "filter apicall: {} addr: {:#x}", name, addr);
            self.filter_addrs.insert(addr);
        }
        self.names.insert(addr, name);
    }

    pub fn lookup(&self, addr: u32) -> Option<&str> {
        self.names.get(&addr).map(|s| s.as_str())
    }

    pub fn is_filtered(&self, addr: u32) -> bool {
        self.filter_addrs.contains(&addr)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u32, &String)> {
        self.names.iter()
    }

    pub fn clear(&mut self) {
        self.names.clear();
    }

    pub fn insert_raw(&mut self, addr: u32, name: String) {
        self.names.insert(addr, name);
    }
}

impl PartialEq for SymbolTable {
    fn eq(&self, other: &Self) -> bool {
        self.names == other.names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registering_a_filtered_name_adds_its_address() {
        let mut t = SymbolTable::new(vec!["CreateThread".to_string()]);
        t.register(0x1000, "CreateThread".to_string());
        t.register(0x2000, "CreateFileA".to_string());
        assert!(t.is_filtered(0x1000));
        assert!(!t.is_filtered(0x2000));
        assert_eq!(t.lookup(0x1000), Some("CreateThread"));
    }
}
