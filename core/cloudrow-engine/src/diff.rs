//! Identity/equality diff between two collections of entities.

use std::collections::HashMap;

/// A matched pair whose sides are not equal.
#[derive(Debug, Clone, PartialEq)]
pub struct Changed<E> {
    pub a: E,
    pub b: E,
}

/// Three-way classification of two collections.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffResult<E> {
    /// Identities present only on side A.
    pub only_in_a: Vec<E>,
    /// Identities present only on side B.
    pub only_in_b: Vec<E>,
    /// Matched identities whose entities differ.
    pub changed: Vec<Changed<E>>,
    /// Matched identities whose entities are equal.
    pub unchanged: usize,
}

impl<E> DiffResult<E> {
    /// Creates + deletes + changes.
    pub fn pending(&self) -> usize {
        self.only_in_a.len() + self.only_in_b.len() + self.changed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending() == 0
    }
}

impl<E> Default for DiffResult<E> {
    fn default() -> Self {
        Self {
            only_in_a: Vec::new(),
            only_in_b: Vec::new(),
            changed: Vec::new(),
            unchanged: 0,
        }
    }
}

/// Keeps the last entity per identity, at the position of the first.
fn index<E: Clone, F>(side: &[E], entity_id: &F) -> (Vec<String>, HashMap<String, E>)
where
    F: Fn(&E) -> String,
{
    let mut order = Vec::with_capacity(side.len());
    let mut by_id = HashMap::with_capacity(side.len());
    for e in side {
        let id = entity_id(e);
        if by_id.insert(id.clone(), e.clone()).is_none() {
            order.push(id);
        }
    }
    (order, by_id)
}

/// Diffs two collections by identity, then by `equals` for matched pairs.
///
/// Output order follows input order, so repeated calls on the same input
/// produce the same result.
pub fn diff<E, I, Q>(side_a: &[E], side_b: &[E], entity_id: I, equals: Q) -> DiffResult<E>
where
    E: Clone,
    I: Fn(&E) -> String,
    Q: Fn(&E, &E) -> bool,
{
    let (a_order, mut a_by_id) = index(side_a, &entity_id);
    let (b_order, mut b_by_id) = index(side_b, &entity_id);

    let mut out = DiffResult::default();
    for id in &a_order {
        let Some(a) = a_by_id.remove(id) else { continue };
        match b_by_id.remove(id) {
            None => out.only_in_a.push(a),
            Some(b) if equals(&a, &b) => out.unchanged += 1,
            Some(b) => out.changed.push(Changed { a, b }),
        }
    }
    // Whatever is left on B was never matched.
    for id in &b_order {
        if let Some(b) = b_by_id.remove(id) {
            out.only_in_b.push(b);
        }
    }
    out
}
