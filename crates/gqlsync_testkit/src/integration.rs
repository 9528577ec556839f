//! Cross-crate integration test helpers.
//!
//! [`OverlayHarness`] drives optimistic writes, reconciliations and rollbacks
//! against a real store while tracking the expected `ListPosts` result.

use crate::fixtures::{ListPostsData, ListPostsQuery, Post};
use gqlsync_cache::{CacheStore, MutationId, WriteMode};
use std::collections::BTreeMap;

/// A test harness that checks overlay resolution against a model.
///
/// Each optimistic write appends a post to whatever list is visible at that
/// moment, so the model keeps the list each pending mutation wrote. The
/// visible list is the one written by the newest pending mutation, or the
/// base list when nothing is pending.
pub struct OverlayHarness {
    /// The store under test.
    pub store: CacheStore,
    base: Vec<Post>,
    pending: BTreeMap<MutationId, Vec<Post>>,
    next_id: u64,
}

impl OverlayHarness {
    /// Creates a harness whose base list holds `posts`.
    pub fn new(posts: Vec<Post>) -> Self {
        Self {
            store: crate::fixtures::seeded_store(&posts),
            base: posts,
            pending: BTreeMap::new(),
            next_id: 1,
        }
    }

    fn expected(&self) -> &[Post] {
        self.pending
            .values()
            .next_back()
            .map_or(self.base.as_slice(), Vec::as_slice)
    }

    /// Optimistically appends `post` under a fresh mutation.
    pub fn optimistic_add(&mut self, post: Post) -> MutationId {
        let mutation = MutationId::new(self.next_id);
        self.next_id += 1;

        let mut list = self.expected().to_vec();
        list.push(post.clone());
        self.store
            .transaction(WriteMode::Optimistic(mutation), |tx| {
                tx.update(&ListPostsQuery, |data| data.posts.push(post))
            })
            .expect("Optimistic update failed");
        self.pending.insert(mutation, list);
        mutation
    }

    /// Reconciles `mutation` with the server's version of the post.
    pub fn reconcile(&mut self, mutation: MutationId, saved: Post) {
        let appended = saved.clone();
        self.store
            .reconcile(mutation, |tx| {
                tx.update(&ListPostsQuery, |data| data.posts.push(appended))
            })
            .expect("Reconcile failed");
        self.base.push(saved);
        self.pending.remove(&mutation);
    }

    /// Drops `mutation`'s overlay without writing anything.
    pub fn rollback(&mut self, mutation: MutationId) {
        self.store.discard_overlay(mutation);
        self.pending.remove(&mutation);
    }

    /// Returns the pending mutations, oldest first.
    pub fn pending(&self) -> Vec<MutationId> {
        self.pending.keys().copied().collect()
    }

    /// Asserts that the store matches the model.
    pub fn verify(&self) {
        let visible: ListPostsData = self
            .store
            .materialize(&ListPostsQuery)
            .expect("Failed to materialize");
        assert_eq!(visible.posts, self.expected(), "visible list mismatch");

        let base = self
            .store
            .transaction(WriteMode::Authoritative, |tx| tx.read(&ListPostsQuery))
            .expect("Failed to read base");
        assert_eq!(base.posts, self.base, "base list mismatch");

        assert_eq!(self.store.pending_mutations(), self.pending(), "pending mismatch");
    }
}
