//! Ephemeral in-process store

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{apply_transition, check_edge, sort_posts, IdLocks, Mutator, PostFilter, PostStore};
use crate::error::{Result, SchedcastError};
use crate::types::{Post, PostStatus};

/// Keeps posts in a map; nothing survives the process.
#[derive(Default)]
pub struct MemoryStore {
    posts: RwLock<HashMap<String, Post>>,
    locks: IdLocks,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.posts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.posts.read().await.is_empty()
    }
}

#[async_trait]
impl PostStore for MemoryStore {
    async fn create(&self, post: &Post) -> Result<String> {
        let mut posts = self.posts.write().await;
        if posts.contains_key(&post.id) {
            return Err(SchedcastError::InvalidInput(format!(
                "post id {} already exists",
                post.id
            )));
        }
        posts.insert(post.id.clone(), post.clone());
        Ok(post.id.clone())
    }

    async fn get(&self, id: &str) -> Result<Option<Post>> {
        Ok(self.posts.read().await.get(id).cloned())
    }

    async fn query(&self, filter: &PostFilter) -> Result<Vec<Post>> {
        let mut matching: Vec<Post> = self
            .posts
            .read()
            .await
            .values()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect();
        sort_posts(&mut matching);
        if let Some(limit) = filter.limit {
            matching.truncate(limit);
        }
        Ok(matching)
    }

    async fn compare_and_transition(
        &self,
        id: &str,
        expected: PostStatus,
        new: PostStatus,
        mutator: Mutator,
    ) -> Result<Option<Post>> {
        check_edge(expected, new)?;
        let _guard = self.locks.lock(id).await;

        let current = match self.posts.read().await.get(id) {
            Some(post) if post.status == expected => post.clone(),
            _ => return Ok(None),
        };

        let next = apply_transition(&current, new, mutator)?;
        self.posts.write().await.insert(id.to_string(), next.clone());
        Ok(Some(next))
    }
}
