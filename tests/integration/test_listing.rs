//! Integration tests for totals and paginated activity listing.

use garmin_export::activity_sync::{ActivityLister, LIST_CACHE_KEY, TOTALS_CACHE_KEY};
use garmin_export::common::types::ExportError;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

use crate::common::{self, ACCOUNT, Harness};

fn lister(harness: &Harness, page_size: u32) -> ActivityLister<'_> {
    ActivityLister::new(
        &harness.client,
        &harness.cache,
        page_size,
        harness.config.cache_ttl,
    )
}

#[tokio::test]
async fn test_totals_are_cached_per_account() {
    let harness = Harness::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/proxy/userstats-service/statistics/{ACCOUNT}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "userMetrics": [{ "totalActivities": 57.0, "totalDistance": 4200.5 }]
        })))
        .expect(1)
        .mount(&harness.connect)
        .await;

    let lister = lister(&harness, 20);
    let totals = lister.totals(ACCOUNT).await.unwrap();
    assert_eq!(totals.activities, 57);
    assert_eq!(totals.distance, Some(4200.5));
    assert_eq!(totals.calories, None);

    assert_eq!(lister.total_activities(ACCOUNT).await.unwrap(), 57);
    assert!(
        harness
            .config
            .cache_dir
            .join(format!("{TOTALS_CACHE_KEY}_{ACCOUNT}"))
            .exists()
    );
}

#[tokio::test]
async fn test_listing_walks_pages_backwards_and_caches() {
    let harness = Harness::start().await;
    common::mount_statistics(&harness.connect, 5).await;

    // 5 activities in pages of 2: (3, 2), (1, 2), then the boundary page (1, 1).
    for (start, limit, ids) in [(3u64, 2u64, vec![2u64, 1]), (1, 2, vec![4, 3]), (1, 1, vec![4])] {
        Mock::given(method("GET"))
            .and(path(format!("/proxy/activitylist-service/activities/{ACCOUNT}")))
            .and(query_param("start", start.to_string()))
            .and(query_param("limit", limit.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "activityList": ids.into_iter().map(common::activity_json).collect::<Vec<_>>()
            })))
            .expect(1)
            .mount(&harness.connect)
            .await;
    }

    let lister = lister(&harness, 2);
    let activities = lister.list_activities(ACCOUNT).await.unwrap();
    let ids: Vec<u64> = activities.iter().map(|a| a.id).collect();
    assert_eq!(ids, vec![2, 1, 4, 3, 4]);
    assert_eq!(activities[0].activity_type, "running");
    assert_eq!(activities[0].start_time.gmt, "2024-05-04 05:30:00");

    // Served from the cache: page mocks above are each expected once.
    let cached = lister.list_activities(ACCOUNT).await.unwrap();
    assert_eq!(cached, activities);
}

#[tokio::test]
async fn test_invalidate_forces_refetch() {
    let harness = Harness::start().await;
    common::mount_statistics(&harness.connect, 1).await;
    Mock::given(method("GET"))
        .and(path(format!("/proxy/activitylist-service/activities/{ACCOUNT}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "activityList": [common::activity_json(9)]
        })))
        .expect(2)
        .mount(&harness.connect)
        .await;

    let lister = lister(&harness, 20);
    lister.list_activities(ACCOUNT).await.unwrap();
    lister.invalidate(ACCOUNT);
    lister.list_activities(ACCOUNT).await.unwrap();
}

#[tokio::test]
async fn test_page_without_activity_list_is_not_cached() {
    let harness = Harness::start().await;
    common::mount_statistics(&harness.connect, 3).await;
    Mock::given(method("GET"))
        .and(path(format!("/proxy/activitylist-service/activities/{ACCOUNT}")))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "activities": [] })),
        )
        .mount(&harness.connect)
        .await;

    let err = lister(&harness, 20).list_activities(ACCOUNT).await.unwrap_err();

    assert!(matches!(err, ExportError::UpstreamFormat(_)));
    assert!(
        !harness
            .config
            .cache_dir
            .join(format!("{LIST_CACHE_KEY}_{ACCOUNT}"))
            .exists()
    );
}

#[tokio::test]
async fn test_listing_error_status() {
    let harness = Harness::start().await;
    common::mount_statistics(&harness.connect, 3).await;
    Mock::given(method("GET"))
        .and(path(format!("/proxy/activitylist-service/activities/{ACCOUNT}")))
        .respond_with(ResponseTemplate::new(503))
        .mount(&harness.connect)
        .await;

    let err = lister(&harness, 20).list_activities(ACCOUNT).await.unwrap_err();

    match err {
        ExportError::HttpStatus { status, .. } => assert_eq!(status.as_u16(), 503),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_implausible_total_is_rejected_before_listing() {
    let harness = Harness::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/proxy/userstats-service/statistics/{ACCOUNT}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "userMetrics": [{ "totalActivities": 1e12 }]
        })))
        .mount(&harness.connect)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/proxy/activitylist-service/activities/{ACCOUNT}")))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&harness.connect)
        .await;

    let lister = lister(&harness, 20);
    let err = lister.list_activities(ACCOUNT).await.unwrap_err();

    assert!(matches!(err, ExportError::UpstreamFormat(_)));
    assert!(
        !harness
            .config
            .cache_dir
            .join(format!("{TOTALS_CACHE_KEY}_{ACCOUNT}"))
            .exists()
    );
}
