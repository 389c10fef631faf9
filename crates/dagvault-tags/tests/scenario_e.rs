// SPDX-License-Identifier: Apache-2.0
//! Scenario E from spec.md §8 — optimistic CAS conflict: two concurrent
//! callers racing `compare_and_swap` against the same expected version
//! must have exactly one winner, with the tag ending one version past the
//! winner's target and no move row left over from the loser's attempt.

use std::sync::Arc;

use dagvault_core::{Id, TagName, Username};
use dagvault_tags::{MemoryTagRegistry, NewTarget, TagKey, TagRegistry, TargetKind};

fn key() -> TagKey {
    TagKey::new(
        Username::new("alice").expect("valid username"),
        TagName::new("main").expect("valid tag name"),
    )
}

fn target(id: Id) -> NewTarget {
    NewTarget {
        kind: TargetKind::DagVersion,
        id,
        hash: None,
    }
}

#[tokio::test]
async fn exactly_one_concurrent_cas_wins() {
    let registry = Arc::new(MemoryTagRegistry::new());
    let k = key();
    let original_id = Id::new();
    let created = registry
        .create(&k, target(original_id), "alice")
        .await
        .expect("create succeeds");

    // Move the tag three times to reach version 5, matching the spec's
    // literal "two concurrent callers read main at version v=5" setup.
    let mut version = created.version;
    let mut current_id = original_id;
    while version < 5 {
        let next_id = Id::new();
        registry
            .r#move(&k, target(next_id), "alice")
            .await
            .expect("move succeeds");
        version += 1;
        current_id = next_id;
    }
    assert_eq!(version, 5);

    let x_id = Id::new();
    let y_id = Id::new();
    let (caller_x, caller_y) = (registry.clone(), registry.clone());
    let (kx, ky) = (k.clone(), k.clone());
    let task_x = tokio::spawn(async move {
        caller_x
            .compare_and_swap(&kx, 5, current_id, target(x_id), "alice")
            .await
    });
    let task_y = tokio::spawn(async move {
        caller_y
            .compare_and_swap(&ky, 5, current_id, target(y_id), "alice")
            .await
    });

    let result_x = task_x.await.expect("task x joins").expect("no error");
    let result_y = task_y.await.expect("task y joins").expect("no error");

    assert_ne!(result_x, result_y, "exactly one of the two racing CAS calls wins");

    let winner_id = if result_x { x_id } else { y_id };
    let after = registry.get(&k).await.expect("get succeeds").expect("tag exists");
    assert_eq!(after.version, 6);
    assert_eq!(after.target_id, winner_id);
}

#[tokio::test]
async fn cas_law_false_leaves_tag_untouched() {
    let registry = MemoryTagRegistry::new();
    let k = key();
    let original_id = Id::new();
    let created = registry
        .create(&k, target(original_id), "alice")
        .await
        .expect("create succeeds");

    let stale = registry
        .compare_and_swap(&k, created.version + 1, original_id, target(Id::new()), "alice")
        .await
        .expect("no backing error");
    assert!(!stale);

    let unchanged = registry.get(&k).await.expect("get succeeds").expect("tag exists");
    assert_eq!(unchanged.version, created.version);
    assert_eq!(unchanged.target_id, original_id);
}
