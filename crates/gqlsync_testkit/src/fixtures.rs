//! Test fixtures: a small blog schema and store helpers.
//!
//! The operations mirror what generated code would produce for:
//!
//! ```graphql
//! query ListPosts { posts { __typename id title } }
//! query GetPost($id: ID!) { post(id: $id) { __typename id title } }
//! mutation CreatePost($title: String!) { createPost(title: $title) { __typename id title } }
//! mutation RenamePost($id: ID!, $title: String!) { renamePost(id: $id, title: $title) { __typename id title } }
//! ```

use gqlsync_cache::{CacheStore, Field, GraphQLOperation, InputValue, OperationType, Variables};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A post as selected by every fixture operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    /// Always `"Post"`.
    #[serde(rename = "__typename")]
    pub typename: String,
    /// Post ID.
    pub id: String,
    /// Post title.
    pub title: String,
}

impl Post {
    /// Creates a post.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            typename: "Post".into(),
            id: id.into(),
            title: title.into(),
        }
    }

    /// Returns the post as a result graph object.
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({"__typename": self.typename, "id": self.id, "title": self.title})
    }
}

fn post_selections() -> Vec<Field> {
    vec![
        Field::scalar("__typename"),
        Field::scalar("id"),
        Field::scalar("title"),
    ]
}

/// Data for [`ListPostsQuery`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ListPostsData {
    /// Every post.
    pub posts: Vec<Post>,
}

impl ListPostsData {
    /// Returns the post IDs in order.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.posts.iter().map(|p| p.id.clone()).collect()
    }
}

/// `query ListPosts`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListPostsQuery;

impl GraphQLOperation for ListPostsQuery {
    type Data = ListPostsData;
    const OPERATION_TYPE: OperationType = OperationType::Query;

    fn operation_name(&self) -> &str {
        "ListPosts"
    }

    fn document(&self) -> &str {
        "query ListPosts { posts { __typename id title } }"
    }

    fn selections(&self) -> Vec<Field> {
        vec![Field::object("posts", post_selections())]
    }
}

/// Data for [`GetPostQuery`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetPostData {
    /// The post, if it exists.
    pub post: Option<Post>,
}

/// `query GetPost($id: ID!)`.
#[derive(Debug, Clone)]
pub struct GetPostQuery {
    /// Post ID.
    pub id: String,
}

impl GetPostQuery {
    /// Creates the query for `id`.
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl GraphQLOperation for GetPostQuery {
    type Data = GetPostData;
    const OPERATION_TYPE: OperationType = OperationType::Query;

    fn operation_name(&self) -> &str {
        "GetPost"
    }

    fn document(&self) -> &str {
        "query GetPost($id: ID!) { post(id: $id) { __typename id title } }"
    }

    fn variables(&self) -> Variables {
        let mut variables = Variables::new();
        variables.insert("id".into(), json!(self.id));
        variables
    }

    fn selections(&self) -> Vec<Field> {
        vec![Field::object("post", post_selections()).arg("id", InputValue::variable("id"))]
    }
}

/// Data for [`CreatePostMutation`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePostData {
    /// The created post.
    #[serde(rename = "createPost")]
    pub create_post: Post,
}

/// `mutation CreatePost($title: String!)`.
#[derive(Debug, Clone)]
pub struct CreatePostMutation {
    /// Title of the new post.
    pub title: String,
}

impl CreatePostMutation {
    /// Creates the mutation.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
        }
    }
}

impl GraphQLOperation for CreatePostMutation {
    type Data = CreatePostData;
    const OPERATION_TYPE: OperationType = OperationType::Mutation;

    fn operation_name(&self) -> &str {
        "CreatePost"
    }

    fn document(&self) -> &str {
        "mutation CreatePost($title: String!) { createPost(title: $title) { __typename id title } }"
    }

    fn variables(&self) -> Variables {
        let mut variables = Variables::new();
        variables.insert("title".into(), json!(self.title));
        variables
    }

    fn selections(&self) -> Vec<Field> {
        vec![Field::object("createPost", post_selections())
            .arg("title", InputValue::variable("title"))]
    }
}

/// Data for [`RenamePostMutation`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenamePostData {
    /// The renamed post.
    #[serde(rename = "renamePost")]
    pub rename_post: Post,
}

/// `mutation RenamePost($id: ID!, $title: String!)`.
#[derive(Debug, Clone)]
pub struct RenamePostMutation {
    /// Post ID.
    pub id: String,
    /// New title.
    pub title: String,
}

impl RenamePostMutation {
    /// Creates the mutation.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
        }
    }
}

impl GraphQLOperation for RenamePostMutation {
    type Data = RenamePostData;
    const OPERATION_TYPE: OperationType = OperationType::Mutation;

    fn operation_name(&self) -> &str {
        "RenamePost"
    }

    fn document(&self) -> &str {
        "mutation RenamePost($id: ID!, $title: String!) { renamePost(id: $id, title: $title) { __typename id title } }"
    }

    fn variables(&self) -> Variables {
        let mut variables = Variables::new();
        variables.insert("id".into(), json!(self.id));
        variables.insert("title".into(), json!(self.title));
        variables
    }

    fn selections(&self) -> Vec<Field> {
        vec![Field::object("renamePost", post_selections())
            .arg("id", InputValue::variable("id"))
            .arg("title", InputValue::variable("title"))]
    }
}

/// Builds a `ListPosts` result graph.
#[must_use]
pub fn list_posts_json(posts: &[Post]) -> Value {
    json!({"posts": posts.iter().map(Post::to_json).collect::<Vec<_>>()})
}

/// Builds a `CreatePost` result graph.
#[must_use]
pub fn create_post_json(post: &Post) -> Value {
    json!({"createPost": post.to_json()})
}

/// A cache store with automatic cleanup.
pub struct TestStore {
    /// The store.
    pub store: CacheStore,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
    path: Option<PathBuf>,
}

impl TestStore {
    /// Creates an in-memory store.
    pub fn memory() -> Self {
        Self {
            store: CacheStore::in_memory(),
            _temp_dir: None,
            path: None,
        }
    }

    /// Creates a file-backed store in a temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("cache").join("records.log");
        let store = CacheStore::open_file(&path).expect("Failed to open file store");
        Self {
            store,
            _temp_dir: Some(temp_dir),
            path: Some(path),
        }
    }

    /// Returns the log path if file-backed.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Closes and reopens a file-backed store, dropping overlays.
    pub fn reopen(self) -> Self {
        let Self {
            store,
            _temp_dir,
            path,
        } = self;
        drop(store);
        let store = match &path {
            Some(path) => CacheStore::open_file(path).expect("Failed to reopen file store"),
            None => CacheStore::in_memory(),
        };
        Self {
            store,
            _temp_dir,
            path,
        }
    }
}

impl std::ops::Deref for TestStore {
    type Target = CacheStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Returns an in-memory store holding a `ListPosts` result for `posts`.
pub fn seeded_store(posts: &[Post]) -> CacheStore {
    let store = CacheStore::in_memory();
    store
        .write_result(&ListPostsQuery, &list_posts_json(posts))
        .expect("Failed to seed store");
    store
}

/// Runs `f` with a temporary in-memory store.
pub fn with_temp_store<F, R>(f: F) -> R
where
    F: FnOnce(&CacheStore) -> R,
{
    let test_store = TestStore::memory();
    f(&test_store.store)
}
