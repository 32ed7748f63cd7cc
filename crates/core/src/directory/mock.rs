//! In-memory directory used by the async tests.
//!
//! Implements the connector/session pair over a shared entry list with a
//! minimal filter evaluator (conjunction, negation, equality, presence)
//! and counters for every session operation, so tests can assert on
//! directory traffic rather than on internals.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::directory::attrs::{AttributeChange, AttributeMap};
use crate::directory::connection::{DirectoryConnector, DirectoryEntry, DirectorySession};
use crate::errors::DirectoryError;

#[derive(Debug, Clone)]
struct MockEntry {
    dn: String,
    /// Attribute names are stored lowercased.
    attrs: HashMap<String, Vec<String>>,
}

#[derive(Debug, Default)]
struct MockState {
    entries: Vec<MockEntry>,
    connects: usize,
    closes: usize,
    searches: usize,
    reads: usize,
    modifies: usize,
    fail_connects: bool,
    fail_requests: bool,
    last_filter: Option<String>,
}

/// Shared in-memory directory. Clones share the same state.
#[derive(Clone, Default)]
pub struct MockDirectory {
    state: Arc<Mutex<MockState>>,
    search_delay: Option<Duration>,
}

impl MockDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory whose searches take `delay`, so tests can overlap
    /// concurrent callers.
    pub fn with_search_delay(delay: Duration) -> Self {
        Self {
            state: Arc::default(),
            search_delay: Some(delay),
        }
    }

    /// Add an entry. Repeated attribute names accumulate multiple values.
    /// Inserting the same DN twice creates a duplicate entry on purpose.
    pub fn insert(&self, dn: &str, attrs: &[(&str, &str)]) {
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        for (name, value) in attrs {
            map.entry(name.to_lowercase())
                .or_default()
                .push((*value).to_string());
        }
        self.state.lock().unwrap().entries.push(MockEntry {
            dn: dn.to_string(),
            attrs: map,
        });
    }

    /// Replace all values of one attribute on the first entry at `dn`.
    pub fn set_attr(&self, dn: &str, name: &str, values: &[&str]) {
        let mut state = self.state.lock().unwrap();
        let entry = state
            .entries
            .iter_mut()
            .find(|e| e.dn == dn)
            .unwrap_or_else(|| panic!("no mock entry at {dn}"));
        entry.attrs.insert(
            name.to_lowercase(),
            values.iter().map(|v| (*v).to_string()).collect(),
        );
    }

    /// Remove every entry at `dn`.
    pub fn remove(&self, dn: &str) {
        self.state.lock().unwrap().entries.retain(|e| e.dn != dn);
    }

    /// Current values of one attribute on the first entry at `dn`.
    pub fn attr(&self, dn: &str, name: &str) -> Option<Vec<String>> {
        let state = self.state.lock().unwrap();
        state
            .entries
            .iter()
            .find(|e| e.dn == dn)?
            .attrs
            .get(&name.to_lowercase())
            .cloned()
    }

    pub fn fail_connects(&self, fail: bool) {
        self.state.lock().unwrap().fail_connects = fail;
    }

    /// Make every session operation fail with a connection error.
    pub fn fail_requests(&self, fail: bool) {
        self.state.lock().unwrap().fail_requests = fail;
    }

    pub fn connects(&self) -> usize {
        self.state.lock().unwrap().connects
    }

    pub fn closes(&self) -> usize {
        self.state.lock().unwrap().closes
    }

    pub fn searches(&self) -> usize {
        self.state.lock().unwrap().searches
    }

    pub fn reads(&self) -> usize {
        self.state.lock().unwrap().reads
    }

    pub fn modifies(&self) -> usize {
        self.state.lock().unwrap().modifies
    }

    /// Filter string of the most recent subtree search.
    pub fn last_filter(&self) -> Option<String> {
        self.state.lock().unwrap().last_filter.clone()
    }
}

impl DirectoryConnector for MockDirectory {
    type Session = MockSession;

    async fn connect(&self) -> Result<MockSession, DirectoryError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_connects {
            return Err(DirectoryError::Connection("injected connect failure".into()));
        }
        state.connects += 1;
        Ok(MockSession {
            state: self.state.clone(),
            search_delay: self.search_delay,
        })
    }
}

pub struct MockSession {
    state: Arc<Mutex<MockState>>,
    search_delay: Option<Duration>,
}

impl DirectorySession for MockSession {
    async fn search_entries(
        &mut self,
        base: &str,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        if let Some(delay) = self.search_delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock().unwrap();
        state.searches += 1;
        state.last_filter = Some(filter.to_string());
        if state.fail_requests {
            return Err(DirectoryError::Connection("injected search failure".into()));
        }
        let parsed = parse_filter(filter)
            .ok_or_else(|| DirectoryError::Protocol(format!("mock cannot parse filter {filter}")))?;
        Ok(state
            .entries
            .iter()
            .filter(|e| in_subtree(&e.dn, base))
            .filter(|e| eval_filter(&parsed, &e.attrs))
            .map(|e| project(e, attrs))
            .collect())
    }

    async fn read_entry(
        &mut self,
        dn: &str,
        attrs: &[&str],
    ) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        let mut state = self.state.lock().unwrap();
        state.reads += 1;
        if state.fail_requests {
            return Err(DirectoryError::Connection("injected read failure".into()));
        }
        Ok(state
            .entries
            .iter()
            .filter(|e| e.dn == dn)
            .map(|e| project(e, attrs))
            .collect())
    }

    async fn modify_entry(
        &mut self,
        dn: &str,
        changes: &[AttributeChange],
    ) -> Result<(), DirectoryError> {
        let mut state = self.state.lock().unwrap();
        state.modifies += 1;
        if state.fail_requests {
            return Err(DirectoryError::Connection("injected modify failure".into()));
        }
        let Some(entry) = state.entries.iter_mut().find(|e| e.dn == dn) else {
            return Err(DirectoryError::Protocol(format!("no such entry: {dn}")));
        };
        for change in changes {
            match change {
                AttributeChange::Replace { name, value } => {
                    entry.attrs.insert(name.to_lowercase(), vec![value.clone()]);
                }
                AttributeChange::Delete { name } => {
                    entry.attrs.remove(&name.to_lowercase());
                }
            }
        }
        Ok(())
    }

    async fn close(self) {
        self.state.lock().unwrap().closes += 1;
    }
}

fn in_subtree(dn: &str, base: &str) -> bool {
    dn == base || dn.ends_with(&format!(",{base}"))
}

fn project(entry: &MockEntry, attrs: &[&str]) -> DirectoryEntry {
    let selected: HashMap<String, Vec<String>> = if attrs.is_empty() {
        entry.attrs.clone()
    } else {
        entry
            .attrs
            .iter()
            .filter(|(name, _)| attrs.iter().any(|a| a.eq_ignore_ascii_case(name)))
            .map(|(name, values)| (name.clone(), values.clone()))
            .collect()
    };
    DirectoryEntry {
        dn: entry.dn.clone(),
        attrs: AttributeMap::from_search_attrs(selected),
    }
}

// ---------------------------------------------------------------------------
// Filter evaluation
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Filter {
    And(Vec<Filter>),
    Not(Box<Filter>),
    Present(String),
    Equals(String, String),
}

fn parse_filter(input: &str) -> Option<Filter> {
    let (filter, rest) = parse_node(input)?;
    rest.is_empty().then_some(filter)
}

fn parse_node(input: &str) -> Option<(Filter, &str)> {
    let rest = input.strip_prefix('(')?;
    if let Some(mut cur) = rest.strip_prefix('&') {
        let mut items = Vec::new();
        while cur.starts_with('(') {
            let (node, next) = parse_node(cur)?;
            items.push(node);
            cur = next;
        }
        Some((Filter::And(items), cur.strip_prefix(')')?))
    } else if let Some(rest) = rest.strip_prefix('!') {
        let (node, next) = parse_node(rest)?;
        Some((Filter::Not(Box::new(node)), next.strip_prefix(')')?))
    } else {
        let end = rest.find(')')?;
        let (name, value) = rest[..end].split_once('=')?;
        let node = if value == "*" {
            Filter::Present(name.to_lowercase())
        } else {
            Filter::Equals(name.to_lowercase(), unescape_value(value))
        };
        Some((node, &rest[end + 1..]))
    }
}

fn eval_filter(filter: &Filter, attrs: &HashMap<String, Vec<String>>) -> bool {
    match filter {
        Filter::And(items) => items.iter().all(|f| eval_filter(f, attrs)),
        Filter::Not(inner) => !eval_filter(inner, attrs),
        Filter::Present(name) => attrs.contains_key(name),
        Filter::Equals(name, value) => attrs
            .get(name)
            .is_some_and(|vals| vals.iter().any(|v| v.eq_ignore_ascii_case(value))),
    }
}

/// Undo `ldap_escape`: `\XX` hex pairs back to their characters.
fn unescape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            let hex: String = chars.by_ref().take(2).collect();
            match u8::from_str_radix(&hex, 16) {
                Ok(byte) => out.push(byte as char),
                Err(_) => {
                    out.push(c);
                    out.push_str(&hex);
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> HashMap<String, Vec<String>> {
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        for (name, value) in pairs {
            map.entry(name.to_lowercase())
                .or_default()
                .push((*value).to_string());
        }
        map
    }

    #[test]
    fn test_filter_equality_and_presence() {
        let entry = attrs(&[("objectClass", "labMember"), ("uid", "alice")]);
        let filter = parse_filter("(&(objectClass=labMember)(uid=alice))").unwrap();
        assert!(eval_filter(&filter, &entry));

        let filter = parse_filter("(uid=*)").unwrap();
        assert!(eval_filter(&filter, &entry));

        let filter = parse_filter("(chatId=*)").unwrap();
        assert!(!eval_filter(&filter, &entry));
    }

    #[test]
    fn test_filter_negation() {
        let unlinked = attrs(&[("objectClass", "labMember"), ("chatNickname", "alice_r")]);
        let linked = attrs(&[
            ("objectClass", "labMember"),
            ("chatNickname", "alice_r"),
            ("chatId", "42"),
        ]);
        let filter =
            parse_filter("(&(objectClass=labMember)(!(chatId=*))(chatNickname=alice_r))").unwrap();
        assert!(eval_filter(&filter, &unlinked));
        assert!(!eval_filter(&filter, &linked));
    }

    #[test]
    fn test_filter_unescapes_values() {
        let entry = attrs(&[("inviteCode", "a*b(c)d\\e")]);
        let escaped = ldap3::ldap_escape("a*b(c)d\\e");
        let filter = parse_filter(&format!("(inviteCode={escaped})")).unwrap();
        assert!(eval_filter(&filter, &entry));
    }

    #[test]
    fn test_filter_rejects_trailing_garbage() {
        assert!(parse_filter("(uid=alice)x").is_none());
        assert!(parse_filter("(uid=alice").is_none());
    }

    #[test]
    fn test_subtree_scoping() {
        assert!(in_subtree(
            "uid=alice,ou=people,dc=example,dc=com",
            "ou=people,dc=example,dc=com"
        ));
        assert!(!in_subtree(
            "uid=alice,ou=invites,dc=example,dc=com",
            "ou=people,dc=example,dc=com"
        ));
        assert!(in_subtree(
            "ou=people,dc=example,dc=com",
            "ou=people,dc=example,dc=com"
        ));
    }
}
