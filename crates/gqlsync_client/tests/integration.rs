//! Integration tests for the client: optimistic updates, the operation
//! queue and reconciliation.

use gqlsync_client::{
    is_temporary_id, temporary_id, CacheKey, CachePolicy, CacheResult, CacheStore, Client,
    ClientConfig, ClientError, FieldValue, GraphQLError, GraphQLResponse, MockTransport, MutationOptions,
    MutationState, ReachabilityMonitor, Record, ResponseSource, RetryConfig, Transaction,
};
use gqlsync_testkit::{
    create_post_json, list_posts_json, CreatePostData, CreatePostMutation, GetPostData,
    GetPostQuery, ListPostsData, ListPostsQuery, Post, RenamePostMutation,
};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn new_client(config: ClientConfig, reachability: ReachabilityMonitor) -> Client<MockTransport> {
    init_tracing();
    Client::new(config, MockTransport::new(), reachability).unwrap()
}

fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig::new(max_attempts)
        .with_initial_delay(Duration::from_millis(1))
        .with_jitter(false)
}

fn seed_posts(client: &Client<MockTransport>, posts: Vec<Post>) {
    client
        .transaction(|tx| tx.write(&ListPostsQuery, &ListPostsData { posts }))
        .unwrap();
}

fn append_post(post: Post) -> impl FnOnce(&mut Transaction<'_>) -> CacheResult<()> + 'static {
    move |tx: &mut Transaction<'_>| {
        tx.update_or_init(&ListPostsQuery, ListPostsData::default, |data| {
            data.posts.push(post)
        })
    }
}

fn save_created_post(
) -> impl FnOnce(&mut Transaction<'_>, &CreatePostData) -> CacheResult<()> + Send + 'static {
    |tx: &mut Transaction<'_>, data: &CreatePostData| {
        let saved = data.create_post.clone();
        tx.update_or_init(&ListPostsQuery, ListPostsData::default, |list| {
            list.posts.push(saved)
        })
    }
}

fn created(id: &str, title: &str) -> GraphQLResponse {
    GraphQLResponse::ok(create_post_json(&Post::new(id, title)))
}

fn cached_ids(client: &Client<MockTransport>) -> Vec<String> {
    client.read_query(&ListPostsQuery).unwrap().ids()
}

#[tokio::test]
async fn optimistic_append_to_empty_cache_is_visible_before_response() {
    let client = new_client(ClientConfig::default(), ReachabilityMonitor::reachable());
    client.transport().push_response(created("srv-1", "Hello"));
    client.transport().pause();

    let temp_id = temporary_id();
    let handle = client
        .perform(
            CreatePostMutation::new("Hello"),
            MutationOptions::new()
                .optimistic(append_post(Post::new(temp_id.clone(), "Hello")))
                .on_response(save_created_post()),
        )
        .unwrap();

    let cached = client
        .fetch_one(&ListPostsQuery, CachePolicy::CacheOnly)
        .await
        .unwrap();
    assert_eq!(cached.source, ResponseSource::Cache);
    assert_eq!(cached.data.ids(), vec![temp_id.clone()]);
    assert!(is_temporary_id(&cached.data.posts[0].id));

    client.transport().resume();
    let response = handle.await.unwrap();
    assert_eq!(response.data.create_post.id, "srv-1");

    assert_eq!(cached_ids(&client), vec!["srv-1"]);
    assert!(client.store().pending_mutations().is_empty());
}

#[tokio::test]
async fn optimistic_prepend_to_populated_cache_preserves_order() {
    let client = new_client(ClientConfig::default(), ReachabilityMonitor::reachable());
    seed_posts(
        &client,
        vec![Post::new("1", "one"), Post::new("2", "two"), Post::new("3", "three")],
    );
    client.transport().push_response(created("4", "four"));
    client.transport().pause();

    let temp = Post::new(temporary_id(), "four");
    let temp_id = temp.id.clone();
    let _handle = client
        .perform(
            CreatePostMutation::new("four"),
            MutationOptions::new().optimistic(move |tx| {
                tx.update(&ListPostsQuery, |data| data.posts.insert(0, temp))
            }),
        )
        .unwrap();

    let cached = client
        .fetch_one(&ListPostsQuery, CachePolicy::CacheOnly)
        .await
        .unwrap();
    assert_eq!(cached.data.ids(), vec![temp_id.as_str(), "1", "2", "3"]);
    assert_eq!(cached.data.posts[1].title, "one");

    // The authoritative layer still has the three server posts.
    let base = client
        .store()
        .read_base(&CacheKey::query_root())
        .unwrap()
        .unwrap();
    assert!(matches!(base.get("posts"), Some(FieldValue::List(posts)) if posts.len() == 3));
}

#[tokio::test]
async fn mutation_without_optimistic_update_leaves_cache_unchanged() {
    let client = new_client(ClientConfig::default(), ReachabilityMonitor::reachable());
    let seed = vec![Post::new("1", "one"), Post::new("2", "two"), Post::new("3", "three")];
    seed_posts(&client, seed.clone());
    client.transport().push_response(created("4", "four"));
    client.transport().pause();

    let handle = client
        .perform(CreatePostMutation::new("four"), MutationOptions::new())
        .unwrap();
    assert_eq!(client.read_query(&ListPostsQuery).unwrap().posts, seed);
    assert!(client.store().pending_mutations().is_empty());

    client.transport().resume();
    handle.await.unwrap();

    // Server data is normalized, but no query was told to include it.
    assert_eq!(client.read_query(&ListPostsQuery).unwrap().posts, seed);
    assert!(client
        .store()
        .read(&CacheKey::entity("Post", "4"))
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn unreachable_network_holds_mutation_in_queue() {
    let reachability = ReachabilityMonitor::unreachable();
    let client = new_client(ClientConfig::default(), reachability.clone());
    client.transport().push_response(created("srv-1", "Offline"));

    let temp = Post::new(temporary_id(), "Offline");
    let handle = client
        .perform(
            CreatePostMutation::new("Offline"),
            MutationOptions::new()
                .optimistic(append_post(temp.clone()))
                .on_response(save_created_post()),
        )
        .unwrap();

    assert_eq!(cached_ids(&client), vec![temp.id.clone()]);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(handle.state(), MutationState::Queued);
    assert_eq!(client.queued_mutations(), 1);
    assert_eq!(client.transport().send_count(), 0);

    reachability.set_reachable(true);
    handle.await.unwrap();
    assert_eq!(client.transport().send_count(), 1);
    assert_eq!(cached_ids(&client), vec!["srv-1"]);
}

#[tokio::test]
async fn mutations_are_sent_in_perform_order() {
    let client = new_client(ClientConfig::default(), ReachabilityMonitor::reachable());
    client.transport().set_responder(|request| {
        let title = request
            .variables
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        GraphQLResponse::ok(create_post_json(&Post::new(format!("srv-{title}"), title)))
    });
    client.transport().pause();

    let handles: Vec<_> = ["a", "b", "c"]
        .into_iter()
        .map(|title| {
            client
                .perform(CreatePostMutation::new(title), MutationOptions::new())
                .unwrap()
        })
        .collect();

    client.transport().resume();
    for handle in handles {
        handle.await.unwrap();
    }

    let titles: Vec<_> = client
        .transport()
        .sent_requests()
        .iter()
        .map(|r| r.variables.get("title").cloned())
        .collect();
    assert_eq!(
        titles,
        vec![Some(json!("a")), Some(json!("b")), Some(json!("c"))]
    );
}

#[tokio::test]
async fn server_error_drops_overlay() {
    let client = new_client(ClientConfig::default(), ReachabilityMonitor::reachable());
    seed_posts(&client, vec![Post::new("1", "one")]);
    client
        .transport()
        .push_response(GraphQLResponse::errors(vec![GraphQLError::new("title taken")]));

    let handle = client
        .perform(
            CreatePostMutation::new("one"),
            MutationOptions::new().optimistic(append_post(Post::new(temporary_id(), "one"))),
        )
        .unwrap();
    let id = handle.id();

    let err = handle.await.unwrap_err();
    assert!(matches!(err, ClientError::Server(ref errors) if errors[0].message == "title taken"));
    assert!(!client.store().has_overlay(id));
    assert_eq!(cached_ids(&client), vec!["1"]);
    assert_eq!(client.transport().send_count(), 1);

    let stats = client.stats();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.retries, 0);
}

#[tokio::test]
async fn retryable_failures_are_retried_with_backoff() {
    let client = new_client(
        ClientConfig::default().with_retry(fast_retry(3)),
        ReachabilityMonitor::reachable(),
    );
    client.transport().push_failure("connection reset", true);
    client.transport().push_failure("connection reset", true);
    client.transport().push_response(created("srv-1", "Retry"));

    let handle = client
        .perform(
            CreatePostMutation::new("Retry"),
            MutationOptions::new()
                .optimistic(append_post(Post::new(temporary_id(), "Retry")))
                .on_response(save_created_post()),
        )
        .unwrap();

    handle.await.unwrap();
    assert_eq!(client.transport().send_count(), 3);
    assert_eq!(cached_ids(&client), vec!["srv-1"]);

    let stats = client.stats();
    assert_eq!(stats.performed, 1);
    assert_eq!(stats.sent, 3);
    assert_eq!(stats.retries, 2);
    assert_eq!(stats.succeeded, 1);
}

#[tokio::test]
async fn exhausted_retries_fail_and_roll_back() {
    let client = new_client(
        ClientConfig::default().with_retry(fast_retry(2)),
        ReachabilityMonitor::reachable(),
    );
    client.transport().push_failure("timeout", true);
    client.transport().push_failure("timeout", true);
    client.transport().push_response(created("never", "never"));

    let handle = client
        .perform(
            CreatePostMutation::new("Doomed"),
            MutationOptions::new().optimistic(append_post(Post::new(temporary_id(), "Doomed"))),
        )
        .unwrap();
    let id = handle.id();

    let err = handle.await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(client.transport().send_count(), 2);
    assert!(!client.store().has_overlay(id));
    // The optimistic append created the list; rolling back removes it again.
    assert!(client.read_query(&ListPostsQuery).unwrap_err().is_cache_miss());
}

#[tokio::test]
async fn fatal_transport_error_is_not_retried() {
    let client = new_client(
        ClientConfig::default().with_retry(fast_retry(5)),
        ReachabilityMonitor::reachable(),
    );
    client.transport().push_failure("400 bad request", false);

    let handle = client
        .perform(CreatePostMutation::new("Bad"), MutationOptions::new())
        .unwrap();
    let err = handle.await.unwrap_err();
    assert!(matches!(err, ClientError::Transport { retryable: false, .. }));
    assert_eq!(client.transport().send_count(), 1);
}

#[tokio::test]
async fn cancel_before_send_drops_overlay() {
    let reachability = ReachabilityMonitor::unreachable();
    let client = new_client(ClientConfig::default(), reachability.clone());

    let handle = client
        .perform(
            CreatePostMutation::new("Cancelled"),
            MutationOptions::new().optimistic(append_post(Post::new(temporary_id(), "Cancelled"))),
        )
        .unwrap();
    let id = handle.id();
    assert!(client.store().has_overlay(id));

    assert!(handle.cancel());
    assert!(!handle.cancel());
    assert_eq!(handle.state(), MutationState::Cancelled);
    assert!(matches!(handle.await, Err(ClientError::Cancelled)));
    assert!(!client.store().has_overlay(id));
    assert_eq!(client.queued_mutations(), 0);

    reachability.set_reachable(true);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(client.transport().send_count(), 0);
    assert_eq!(client.stats().cancelled, 1);
}

#[tokio::test]
async fn cancel_after_send_still_reconciles() {
    let client = new_client(ClientConfig::default(), ReachabilityMonitor::reachable());
    client.transport().push_response(created("srv-1", "Sent"));
    client.transport().pause();

    let handle = client
        .perform(
            CreatePostMutation::new("Sent"),
            MutationOptions::new()
                .optimistic(append_post(Post::new(temporary_id(), "Sent")))
                .on_response(save_created_post()),
        )
        .unwrap();

    client.transport().wait_for_sends(1).await;
    assert_eq!(handle.state(), MutationState::Sent);
    assert!(!handle.cancel());

    client.transport().resume();
    handle.await.unwrap();
    assert_eq!(cached_ids(&client), vec!["srv-1"]);
}

#[tokio::test]
async fn offline_timeout_fails_queued_mutation() {
    let client = new_client(
        ClientConfig::default().with_offline_timeout(Duration::from_millis(30)),
        ReachabilityMonitor::unreachable(),
    );

    let handle = client
        .perform(
            CreatePostMutation::new("Stranded"),
            MutationOptions::new().optimistic(append_post(Post::new(temporary_id(), "Stranded"))),
        )
        .unwrap();
    let id = handle.id();

    let err = handle.await.unwrap_err();
    assert!(matches!(err, ClientError::Unreachable { waited } if waited >= Duration::from_millis(30)));
    assert!(!client.store().has_overlay(id));
    assert_eq!(client.transport().send_count(), 0);
    assert_eq!(client.queued_mutations(), 0);
}

#[tokio::test]
async fn shutdown_resolves_queued_mutations() {
    let client = new_client(ClientConfig::default(), ReachabilityMonitor::unreachable());

    let first = client
        .perform(
            CreatePostMutation::new("one"),
            MutationOptions::new().optimistic(append_post(Post::new(temporary_id(), "one"))),
        )
        .unwrap();
    let second = client
        .perform(CreatePostMutation::new("two"), MutationOptions::new())
        .unwrap();

    client.shutdown().await;

    assert!(matches!(first.await, Err(ClientError::Shutdown)));
    assert!(matches!(second.await, Err(ClientError::Shutdown)));
    assert!(client.store().pending_mutations().is_empty());

    let rejected = client.perform(CreatePostMutation::new("three"), MutationOptions::new());
    assert!(matches!(rejected, Err(ClientError::Shutdown)));
}

#[tokio::test]
async fn shutdown_interrupts_in_flight_send() {
    let client = new_client(ClientConfig::default(), ReachabilityMonitor::reachable());
    client.transport().push_response(created("srv-1", "Late"));
    client.transport().pause();

    let handle = client
        .perform(
            CreatePostMutation::new("Late"),
            MutationOptions::new().optimistic(append_post(Post::new(temporary_id(), "Late"))),
        )
        .unwrap();
    let id = handle.id();
    client.transport().wait_for_sends(1).await;

    client.shutdown().await;
    assert!(matches!(handle.await, Err(ClientError::Shutdown)));
    assert!(!client.store().has_overlay(id));
}

#[tokio::test]
async fn partial_response_is_reconciled_with_errors() {
    let client = new_client(ClientConfig::default(), ReachabilityMonitor::reachable());
    client.transport().push_response(
        created("srv-1", "Partial").with_errors(vec![GraphQLError::new("notification failed")]),
    );

    let handle = client
        .perform(
            CreatePostMutation::new("Partial"),
            MutationOptions::new().on_response(save_created_post()),
        )
        .unwrap();

    let response = handle.await.unwrap();
    assert!(response.is_partial());
    assert_eq!(response.errors[0].message, "notification failed");
    assert_eq!(cached_ids(&client), vec!["srv-1"]);
}

#[tokio::test]
async fn failing_optimistic_update_queues_nothing() {
    let client = new_client(ClientConfig::default(), ReachabilityMonitor::reachable());

    // `update` requires the query to be cached already.
    let result = client.perform(
        CreatePostMutation::new("Nowhere"),
        MutationOptions::new().optimistic(|tx| {
            tx.update(&ListPostsQuery, |data| data.posts.push(Post::new("x", "x")))
        }),
    );

    assert!(matches!(result, Err(ClientError::Cache(_))));
    assert_eq!(client.queued_mutations(), 0);
    assert!(client.store().pending_mutations().is_empty());
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(client.transport().send_count(), 0);
    assert_eq!(client.stats().performed, 0);
}

#[tokio::test]
async fn overlapping_overlays_reconcile_independently() {
    let reachability = ReachabilityMonitor::reachable();
    let client = new_client(ClientConfig::default(), reachability.clone());
    let query = GetPostQuery::new("1");
    client
        .transaction(|tx| {
            tx.write(
                &query,
                &GetPostData {
                    post: Some(Post::new("1", "draft")),
                },
            )
        })
        .unwrap();

    let rename = |title: &'static str| {
        let query = GetPostQuery::new("1");
        MutationOptions::new().optimistic(move |tx| {
            tx.update(&query, |data| {
                if let Some(post) = data.post.as_mut() {
                    post.title = title.to_string();
                }
            })
        })
    };
    let renamed = |title: &str| {
        GraphQLResponse::ok(json!({
            "renamePost": {"__typename": "Post", "id": "1", "title": title}
        }))
    };
    let title = |client: &Client<MockTransport>| {
        client.read_query(&GetPostQuery::new("1")).unwrap().post.map(|p| p.title)
    };

    client.transport().push_response(renamed("first (server)"));
    client.transport().push_response(renamed("second (server)"));
    client.transport().pause();

    let first = client
        .perform(RenamePostMutation::new("1", "first"), rename("first"))
        .unwrap();
    let second = client
        .perform(RenamePostMutation::new("1", "second"), rename("second"))
        .unwrap();
    let second_id = second.id();
    assert_eq!(title(&client).as_deref(), Some("second"));

    // Hold the second mutation in the queue while the first completes.
    client.transport().wait_for_sends(1).await;
    reachability.set_reachable(false);
    client.transport().resume();
    first.await.unwrap();

    assert!(client.store().has_overlay(second_id));
    assert_eq!(title(&client).as_deref(), Some("second"));
    let base = client.store().read_base(&CacheKey::entity("Post", "1")).unwrap().unwrap();
    assert_eq!(base.get("title"), Some(&FieldValue::from(json!("first (server)"))));

    reachability.set_reachable(true);
    second.await.unwrap();
    assert_eq!(title(&client).as_deref(), Some("second (server)"));
    assert!(client.store().pending_mutations().is_empty());
}

#[tokio::test]
async fn reconciling_the_same_response_twice_is_idempotent() {
    let client = new_client(ClientConfig::default(), ReachabilityMonitor::reachable());
    let mutation = CreatePostMutation::new("Twice");
    let data = create_post_json(&Post::new("srv-1", "Twice"));
    client
        .transport()
        .push_response(GraphQLResponse::ok(data.clone()));

    client
        .perform(mutation.clone(), MutationOptions::new())
        .unwrap()
        .await
        .unwrap();
    let once = client.store().snapshot().unwrap();

    client.store().write_result(&mutation, &data).unwrap();
    assert_eq!(client.store().snapshot().unwrap(), once);
}

#[tokio::test]
async fn cache_only_miss_is_surfaced() {
    let client = new_client(ClientConfig::default(), ReachabilityMonitor::reachable());
    let err = client
        .fetch_one(&ListPostsQuery, CachePolicy::CacheOnly)
        .await
        .unwrap_err();
    assert!(err.is_cache_miss());
    assert_eq!(client.transport().send_count(), 0);
}

#[tokio::test]
async fn network_fetch_retries_then_caches() {
    let client = new_client(
        ClientConfig::default().with_retry(fast_retry(2)),
        ReachabilityMonitor::reachable(),
    );
    client.transport().push_failure("reset", true);
    client
        .transport()
        .push_response(GraphQLResponse::ok(list_posts_json(&[Post::new("1", "one")])));

    let response = client
        .fetch_one(&ListPostsQuery, CachePolicy::NetworkOnly)
        .await
        .unwrap();
    assert_eq!(response.source, ResponseSource::Network);
    assert_eq!(response.data.ids(), vec!["1"]);
    assert_eq!(client.transport().send_count(), 2);
    assert_eq!(cached_ids(&client), vec!["1"]);
}

#[tokio::test]
async fn custom_key_resolver_is_used_for_network_results() {
    let config = ClientConfig::default().with_cache_key_resolver(|object: &Map<String, Value>| {
        let id = object.get("id")?.as_str()?;
        Some(CacheKey::new(format!("Node:{id}")))
    });
    let client = new_client(config, ReachabilityMonitor::reachable());
    client
        .transport()
        .push_response(GraphQLResponse::ok(list_posts_json(&[Post::new("7", "seven")])));

    client
        .fetch_one(&ListPostsQuery, CachePolicy::NetworkOnly)
        .await
        .unwrap();
    assert!(client.store().read(&CacheKey::new("Node:7")).unwrap().is_some());
    assert!(client.store().read(&CacheKey::entity("Post", "7")).unwrap().is_none());
}

#[tokio::test]
async fn file_store_keeps_reconciled_data_across_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.log");

    {
        let client = new_client(
            ClientConfig::default().with_file_store(&path),
            ReachabilityMonitor::reachable(),
        );
        client.transport().push_response(created("srv-1", "Saved"));
        client
            .perform(
                CreatePostMutation::new("Saved"),
                MutationOptions::new()
                    .optimistic(append_post(Post::new(temporary_id(), "Saved")))
                    .on_response(save_created_post()),
            )
            .unwrap()
            .await
            .unwrap();

        client.reachability().set_reachable(false);
        let _pending = client
            .perform(
                CreatePostMutation::new("Unsent"),
                MutationOptions::new().optimistic(append_post(Post::new(temporary_id(), "Unsent"))),
            )
            .unwrap();
        assert_eq!(cached_ids(&client).len(), 2);
        client.shutdown().await;
    }

    let reopened = CacheStore::open_file(&path).unwrap();
    let data = reopened.materialize(&ListPostsQuery).unwrap();
    assert_eq!(data.ids(), vec!["srv-1"]);
}

#[tokio::test]
async fn on_failure_persists_marker_and_drops_overlay() {
    let client = new_client(ClientConfig::default(), ReachabilityMonitor::reachable());
    seed_posts(&client, vec![Post::new("1", "one")]);
    client
        .transport()
        .push_response(GraphQLResponse::errors(vec![GraphQLError::new("title taken")]));

    let temp_id = temporary_id();
    let marker_key = CacheKey::entity("FailedPost", &temp_id);
    let handle = client
        .perform(
            CreatePostMutation::new("one"),
            MutationOptions::new()
                .optimistic(append_post(Post::new(temp_id.clone(), "one")))
                .on_failure({
                    let marker_key = marker_key.clone();
                    move |tx: &mut Transaction<'_>, err: &ClientError| {
                        tx.write_record(Record::with_fields(
                            marker_key,
                            [
                                ("title", FieldValue::from(json!("one"))),
                                ("error", FieldValue::from(json!(err.to_string()))),
                            ],
                        ))
                    }
                }),
        )
        .unwrap();
    let id = handle.id();

    let err = handle.await.unwrap_err();
    assert!(matches!(err, ClientError::Server(_)));
    assert!(!client.store().has_overlay(id));
    assert_eq!(cached_ids(&client), vec!["1"]);

    let marker = client.store().read_base(&marker_key).unwrap().unwrap();
    assert!(matches!(
        marker.get("error"),
        Some(FieldValue::Scalar(Value::String(message))) if message.contains("title taken")
    ));
}

#[tokio::test]
async fn retry_resumes_after_network_returns() {
    let client = new_client(
        ClientConfig::default().with_retry(
            RetryConfig::new(3)
                .with_initial_delay(Duration::from_millis(100))
                .with_jitter(false),
        ),
        ReachabilityMonitor::reachable(),
    );
    client.transport().push_failure("connection reset", true);
    client.transport().push_response(created("srv-1", "Patient"));

    let handle = client
        .perform(
            CreatePostMutation::new("Patient"),
            MutationOptions::new()
                .optimistic(append_post(Post::new(temporary_id(), "Patient")))
                .on_response(save_created_post()),
        )
        .unwrap();
    let id = handle.id();

    client.transport().wait_for_sends(1).await;
    client.reachability().set_reachable(false);

    // The backoff has passed; the retry is held until the network returns.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(client.transport().send_count(), 1);
    assert_eq!(handle.state(), MutationState::Queued);
    assert!(client.store().has_overlay(id));

    client.reachability().set_reachable(true);
    handle.await.unwrap();
    assert_eq!(client.transport().send_count(), 2);
    assert_eq!(cached_ids(&client), vec!["srv-1"]);
    assert_eq!(client.stats().retries, 1);
}

#[tokio::test]
async fn retry_fails_when_network_stays_down_past_offline_timeout() {
    let client = new_client(
        ClientConfig::default()
            .with_offline_timeout(Duration::from_millis(50))
            .with_retry(
                RetryConfig::new(3)
                    .with_initial_delay(Duration::from_millis(20))
                    .with_jitter(false),
            ),
        ReachabilityMonitor::reachable(),
    );
    client.transport().push_failure("connection reset", true);
    client.transport().push_response(created("never", "never"));

    let handle = client
        .perform(
            CreatePostMutation::new("Stranded"),
            MutationOptions::new().optimistic(append_post(Post::new(temporary_id(), "Stranded"))),
        )
        .unwrap();
    let id = handle.id();

    client.transport().wait_for_sends(1).await;
    client.reachability().set_reachable(false);

    let err = handle.await.unwrap_err();
    assert!(matches!(err, ClientError::Unreachable { waited } if waited >= Duration::from_millis(50)));
    assert!(!client.store().has_overlay(id));
    assert_eq!(client.transport().send_count(), 1);
}

#[tokio::test]
async fn offline_clock_starts_when_network_drops() {
    let client = new_client(
        ClientConfig::default().with_offline_timeout(Duration::from_millis(100)),
        ReachabilityMonitor::reachable(),
    );
    client.transport().push_response(created("srv-1", "Slow"));
    client.transport().push_response(created("srv-2", "Behind"));
    client.transport().pause();

    let slow = client
        .perform(CreatePostMutation::new("Slow"), MutationOptions::new())
        .unwrap();
    let behind = client
        .perform(CreatePostMutation::new("Behind"), MutationOptions::new())
        .unwrap();

    // The second mutation spends longer than the offline timeout queued
    // behind a slow send while the network is still up.
    client.transport().wait_for_sends(1).await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    client.reachability().set_reachable(false);
    client.transport().resume();
    slow.await.unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(behind.state(), MutationState::Queued);

    client.reachability().set_reachable(true);
    let response = behind.await.unwrap();
    assert_eq!(response.data.create_post.id, "srv-2");
}

#[tokio::test]
async fn unbounded_offline_timeout_waits_for_network() {
    let client = new_client(
        ClientConfig::default().with_offline_timeout(Duration::MAX),
        ReachabilityMonitor::unreachable(),
    );
    client.transport().push_response(created("srv-1", "Eventually"));

    let handle = client
        .perform(CreatePostMutation::new("Eventually"), MutationOptions::new())
        .unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(handle.state(), MutationState::Queued);

    client.reachability().set_reachable(true);
    let response = tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("drain loop stalled")
        .unwrap();
    assert_eq!(response.data.create_post.id, "srv-1");
}

#[tokio::test]
async fn negative_backoff_multiplier_still_retries() {
    let client = new_client(
        ClientConfig::default().with_retry(fast_retry(3).with_backoff_multiplier(-2.0)),
        ReachabilityMonitor::reachable(),
    );
    client.transport().push_failure("connection reset", true);
    client.transport().push_failure("connection reset", true);
    client.transport().push_response(created("srv-1", "Odd"));

    let handle = client
        .perform(CreatePostMutation::new("Odd"), MutationOptions::new())
        .unwrap();

    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("drain loop stalled")
        .unwrap();
    assert_eq!(client.transport().send_count(), 3);
}

#[tokio::test]
async fn shutdown_compacts_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.log");

    let client = new_client(
        ClientConfig::default().with_file_store(&path),
        ReachabilityMonitor::reachable(),
    );
    for revision in 0..20 {
        seed_posts(&client, vec![Post::new("1", format!("revision {revision}"))]);
    }
    client.store().flush().unwrap();
    let before = std::fs::metadata(&path).unwrap().len();

    client.shutdown().await;
    let after = std::fs::metadata(&path).unwrap().len();
    assert!(after < before, "{after} >= {before}");
    drop(client);

    let reopened = CacheStore::open_file(&path).unwrap();
    let data = reopened.materialize(&ListPostsQuery).unwrap();
    assert_eq!(data.posts, vec![Post::new("1", "revision 19")]);
}
