mod support;

use ldaps_core::error::{NOT_ALLOWED_ON_NON_LEAF, NO_SUCH_ATTRIBUTE, NO_SUCH_OBJECT};
use ldaps_core::Error;
use ldaps_directory::{
    AttributeSet, DirectorySession, Modification, SearchRequest, SearchScope, SessionState,
};
use std::ops::ControlFlow;
use support::{params, FakeDirectory, PASSWORD};

const ENTRY: &str = "cn=tempuser,cn=users,dc=example2,dc=com";

fn tempuser() -> AttributeSet {
    AttributeSet::new()
        .with_value("samaccountname", "tempuser")
        .with_value("objectClass", "user")
}

async fn bound_session(directory: &FakeDirectory) -> DirectorySession {
    let mut session = DirectorySession::new(directory.connector());
    session.bind(&params(PASSWORD)).await.unwrap();
    session
}

async fn wait_for_releases(directory: &FakeDirectory, expected: usize) {
    for _ in 0..50 {
        if directory.search_releases().iter().sum::<usize>() >= expected {
            return;
        }
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_operations_before_bind_are_invalid_state() {
    let directory = FakeDirectory::new();
    let mut session = DirectorySession::new(directory.connector());

    let request = SearchRequest::new("dc=example2,dc=com", "(objectClass=*)").unwrap();
    let results = [
        session.add_entry(ENTRY, &tempuser()).await,
        session
            .modify_entry(ENTRY, &[Modification::add_value("sn", "sv")])
            .await,
        session
            .rename_entry(ENTRY, "cn=other,cn=users,dc=example2,dc=com")
            .await,
        session.delete_entry(ENTRY).await,
        session.search(&request).await.map(|_| ()),
    ];

    for result in results {
        assert!(matches!(result, Err(Error::InvalidState { .. })));
    }
    assert_eq!(session.state(), SessionState::Unbound);
    assert_eq!(directory.connections(), 0);
    assert!(!directory.contains(ENTRY));
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let directory = FakeDirectory::new();
    let mut session = bound_session(&directory).await;

    session.close().await;
    session.close().await;
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(directory.unbinds(), 1);

    let err = session.delete_entry(ENTRY).await.unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }));

    let mut never_bound = DirectorySession::new(directory.connector());
    never_bound.close().await;
    never_bound.close().await;
    assert_eq!(never_bound.state(), SessionState::Closed);
    assert_eq!(directory.unbinds(), 1);
}

#[tokio::test]
async fn test_every_cursor_is_released_once() {
    let directory = FakeDirectory::new()
        .with_entry(
            "cn=alice,cn=users,dc=example2,dc=com",
            &[("samaccountname", "alice")],
        )
        .with_entry(
            "cn=bob,cn=users,dc=example2,dc=com",
            &[("samaccountname", "bob")],
        );
    let mut session = bound_session(&directory).await;
    let request = SearchRequest::new("dc=example2,dc=com", "(samaccountname=*)").unwrap();

    // drained to the end
    let visited = session
        .search_for_each(&request, |_| ControlFlow::Continue(()))
        .await
        .unwrap();
    assert_eq!(visited, 2);

    // aborted after the first entry
    let visited = session
        .search_for_each(&request, |_| ControlFlow::Break(()))
        .await
        .unwrap();
    assert_eq!(visited, 1);

    // failed on a missing base
    let missing = SearchRequest::new("dc=redhat,dc=com", "(uid=*)").unwrap();
    let err = session
        .search_for_each(&missing, |_| ControlFlow::Continue(()))
        .await
        .unwrap_err();
    assert!(err.is_no_such_object());

    // closed explicitly after a partial read
    let mut cursor = session.search(&request).await.unwrap();
    assert!(cursor.next().await.unwrap().is_some());
    cursor.close().await.unwrap();

    // dropped without close
    let mut cursor = session.search(&request).await.unwrap();
    assert!(cursor.next().await.unwrap().is_some());
    drop(cursor);
    wait_for_releases(&directory, 5).await;

    assert_eq!(directory.search_releases(), vec![1, 1, 1, 1, 1]);
    session.close().await;
}

#[tokio::test]
async fn test_removing_absent_value_fails() {
    let directory = FakeDirectory::new();
    let mut session = bound_session(&directory).await;
    session.add_entry(ENTRY, &tempuser()).await.unwrap();

    let err = session
        .modify_entry(ENTRY, &[Modification::remove_value("sn", "sv")])
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "MODIFY_ERROR");
    assert_eq!(err.result_code(), Some(NO_SUCH_ATTRIBUTE));

    // the session keeps working after the failure
    session
        .modify_entry(ENTRY, &[Modification::add_value("sn", "sv")])
        .await
        .unwrap();
    session
        .modify_entry(ENTRY, &[Modification::remove_value("sn", "sv")])
        .await
        .unwrap();
    assert!(!directory.attributes(ENTRY).unwrap().contains("sn"));

    session.close().await;
}

#[tokio::test]
async fn test_modifications_apply_atomically() {
    let directory = FakeDirectory::new();
    let mut session = bound_session(&directory).await;
    session.add_entry(ENTRY, &tempuser()).await.unwrap();

    let err = session
        .modify_entry(
            ENTRY,
            &[
                Modification::add_value("sn", "sv"),
                Modification::remove_value("title", "missing"),
            ],
        )
        .await
        .unwrap_err();
    assert_eq!(err.result_code(), Some(NO_SUCH_ATTRIBUTE));
    assert!(!directory.attributes(ENTRY).unwrap().contains("sn"));

    session.close().await;
}

#[tokio::test]
async fn test_rename_into_missing_parent_fails() {
    let directory = FakeDirectory::new();
    let mut session = bound_session(&directory).await;
    session.add_entry(ENTRY, &tempuser()).await.unwrap();

    let err = session
        .rename_entry(ENTRY, "cn=new_tempuser,cn=users,dc=WRONG,dc=com")
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "RENAME_ERROR");
    assert_eq!(err.result_code(), Some(NO_SUCH_OBJECT));
    assert!(directory.contains(ENTRY));

    session.close().await;
}

#[tokio::test]
async fn test_rename_moves_entry() {
    let renamed = "cn=new_tempuser,cn=users,dc=example2,dc=com";
    let directory = FakeDirectory::new();
    let mut session = bound_session(&directory).await;
    session.add_entry(ENTRY, &tempuser()).await.unwrap();

    session.rename_entry(ENTRY, renamed).await.unwrap();
    assert!(directory.contains(renamed));
    assert!(!directory.contains(ENTRY));

    let lookup = |dn: &str| {
        SearchRequest::new(dn, "(objectClass=*)")
            .unwrap()
            .with_scope(SearchScope::Base)
    };
    let found = session.search_collect(&lookup(renamed)).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].first("cn"), Some("new_tempuser"));

    let err = session.search_collect(&lookup(ENTRY)).await.unwrap_err();
    assert!(err.is_no_such_object());

    session.close().await;
}

#[tokio::test]
async fn test_delete_requires_existing_leaf() {
    let directory = FakeDirectory::new();
    let mut session = bound_session(&directory).await;

    let err = session.delete_entry(ENTRY).await.unwrap_err();
    assert_eq!(err.error_code(), "DELETE_ERROR");
    assert_eq!(err.result_code(), Some(NO_SUCH_OBJECT));

    session.add_entry(ENTRY, &tempuser()).await.unwrap();
    let err = session
        .delete_entry("cn=users,dc=example2,dc=com")
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "DELETE_ERROR");
    assert_eq!(err.result_code(), Some(NOT_ALLOWED_ON_NON_LEAF));
    assert!(directory.contains("cn=users,dc=example2,dc=com"));
    assert!(directory.contains(ENTRY));

    // once the child is gone the container is a leaf again
    session.delete_entry(ENTRY).await.unwrap();
    session
        .delete_entry("cn=users,dc=example2,dc=com")
        .await
        .unwrap();
    assert!(!directory.contains("cn=users,dc=example2,dc=com"));

    session.close().await;
}

#[tokio::test]
async fn test_unreachable_server_is_bind_error() {
    let directory = FakeDirectory::new().unreachable();
    let mut session = DirectorySession::new(directory.connector());

    let err = session.bind(&params(PASSWORD)).await.unwrap_err();
    assert_eq!(err.error_code(), "BIND_ERROR");
    assert_eq!(err.result_code(), None);
    assert_eq!(session.state(), SessionState::Unbound);
    session.close().await;
}
