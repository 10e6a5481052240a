use std::collections::BTreeMap;

use crate::firestore::api::Query;

use super::view::View;

/// Binds a listened `Query` to its allocated `TargetId` and the `View`
/// materializing its result.
pub struct QueryView {
    pub query: Query,
    pub target_id: i32,
    pub view: View,
}

impl QueryView {
    pub fn new(query: Query, target_id: i32, view: View) -> Self {
        Self {
            query,
            target_id,
            view,
        }
    }
}

/// Keeps `QueryView`s indexed both by the query that produced them (via
/// `Query::canonical_id`, since `Query` is not itself `Hash`/`Eq`) and by
/// their allocated target id, so the Sync Controller can look either way up
/// without a linear scan.
#[derive(Default)]
pub struct QueryViewRegistry {
    by_query: BTreeMap<String, i32>,
    by_target: BTreeMap<i32, QueryView>,
}

impl QueryViewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains_query(&self, query: &Query) -> bool {
        self.by_query.contains_key(&query.canonical_id())
    }

    pub fn get_by_query(&self, query: &Query) -> Option<&QueryView> {
        let target_id = *self.by_query.get(&query.canonical_id())?;
        self.by_target.get(&target_id)
    }

    pub fn get_by_query_mut(&mut self, query: &Query) -> Option<&mut QueryView> {
        let target_id = *self.by_query.get(&query.canonical_id())?;
        self.by_target.get_mut(&target_id)
    }

    pub fn get_by_target(&self, target_id: i32) -> Option<&QueryView> {
        self.by_target.get(&target_id)
    }

    pub fn get_by_target_mut(&mut self, target_id: i32) -> Option<&mut QueryView> {
        self.by_target.get_mut(&target_id)
    }

    pub fn insert(&mut self, query_view: QueryView) {
        self.by_query.insert(query_view.query.canonical_id(), query_view.target_id);
        self.by_target.insert(query_view.target_id, query_view);
    }

    pub fn remove_by_query(&mut self, query: &Query) -> Option<QueryView> {
        let target_id = self.by_query.remove(&query.canonical_id())?;
        self.by_target.remove(&target_id)
    }

    pub fn remove_by_target(&mut self, target_id: i32) -> Option<QueryView> {
        let query_view = self.by_target.remove(&target_id)?;
        self.by_query.remove(&query_view.query.canonical_id());
        Some(query_view)
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueryView> {
        self.by_target.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut QueryView> {
        self.by_target.values_mut()
    }

    pub fn len(&self) -> usize {
        self.by_target.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_target.is_empty()
    }
}
