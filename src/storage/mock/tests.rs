use super::*;

fn user(email: &str) -> NewUser {
    NewUser {
        name: "Ada".to_string(),
        email: email.to_string(),
        password_hash: "digest".to_string(),
    }
}

#[tokio::test]
async fn test_queries_are_counted() {
    let store = MockStore::new();
    assert_eq!(store.query_count(), 0);

    UserStore::insert(&store, user("a@example.com")).await.unwrap();
    store.find_by_email("a@example.com").await.unwrap();

    assert_eq!(store.query_count(), 2);
}

#[tokio::test]
async fn test_failure_toggle() {
    let store = MockStore::new();
    store.set_fail(true);

    assert!(matches!(
        store.find_by_id(1).await,
        Err(StorageError::Query(_))
    ));

    store.set_fail(false);
    assert!(store.find_by_id(1).await.unwrap().is_none());
}

#[tokio::test]
async fn test_duplicate_email() {
    let store = MockStore::new();
    UserStore::insert(&store, user("a@example.com")).await.unwrap();

    let result = UserStore::insert(&store, user("a@example.com")).await;
    assert!(matches!(result, Err(StorageError::Duplicate(_))));
}

#[tokio::test]
async fn test_update_profile_email_collision() {
    let store = MockStore::new();
    let a = UserStore::insert(&store, user("a@example.com")).await.unwrap();
    UserStore::insert(&store, user("b@example.com")).await.unwrap();

    // Keeping one's own email is not a collision.
    assert!(store.update_profile(a, None, Some("a@example.com")).await.unwrap());
    assert!(matches!(
        store.update_profile(a, None, Some("b@example.com")).await,
        Err(StorageError::Duplicate(_))
    ));
}

#[tokio::test]
async fn test_bookings_for_user() {
    let store = MockStore::new();
    for user_id in [1, 2, 1] {
        BookingStore::insert(
            &store,
            NewBooking {
                user_id,
                shelter_id: 3,
                booking_date: "2024-05-01".to_string(),
            },
        )
        .await
        .unwrap();
    }

    assert_eq!(store.list_for_user(1).await.unwrap().len(), 2);
    assert!(store.list_for_user(9).await.unwrap().is_empty());
}
