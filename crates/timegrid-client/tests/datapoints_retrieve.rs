//! End-to-end retrieval tests against a mock platform server.

use std::sync::Arc;

use serde_json::{Value as Json, json};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use timegrid_client::{
    Aggregate, ApiSession, Config, DatapointsClient, DatapointsQuery, Error, Granularity, Identifier,
};

fn client(server: &MockServer) -> DatapointsClient {
    let mut config = Config::new("secret", "test");
    config.base_url = server.uri();
    config.disable_gzip = true;
    config.max_retries = 0;
    DatapointsClient::new(Arc::new(ApiSession::new(config).unwrap()))
}

const DATA_GET: &str = "/api/test/timeseries/data/get";

/// Matches a `data/get` body on any combination of series identity, start
/// and limit.
struct ReadBody {
    id: Option<i64>,
    external_id: Option<&'static str>,
    start: Option<i64>,
    limit: Option<u64>,
}

impl ReadBody {
    fn for_id(id: i64) -> Self {
        Self {
            id: Some(id),
            external_id: None,
            start: None,
            limit: None,
        }
    }

    fn for_external_id(external_id: &'static str) -> Self {
        Self {
            id: None,
            external_id: Some(external_id),
            start: None,
            limit: None,
        }
    }

    fn with_start(mut self, start: i64) -> Self {
        self.start = Some(start);
        self
    }

    fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

impl wiremock::Match for ReadBody {
    fn matches(&self, request: &Request) -> bool {
        let Ok(body) = serde_json::from_slice::<Json>(&request.body) else {
            return false;
        };
        let item = &body["items"][0];
        self.id.is_none_or(|v| item["id"] == json!(v))
            && self.external_id.is_none_or(|v| item["externalId"] == json!(v))
            && self.start.is_none_or(|v| body["start"] == json!(v))
            && self.limit.is_none_or(|v| body["limit"] == json!(v))
    }
}

fn raw_points(timestamps: impl IntoIterator<Item = i64>) -> Vec<Json> {
    timestamps
        .into_iter()
        .map(|ts| json!({"timestamp": ts, "value": ts as f64}))
        .collect()
}

fn response_for(identity: Json, datapoints: Vec<Json>) -> ResponseTemplate {
    let mut item = identity;
    item["datapoints"] = Json::Array(datapoints);
    ResponseTemplate::new(200).set_body_json(json!({"data": {"items": [item]}}))
}

#[tokio::test]
async fn basic_raw_read_single_series() {
    let server = MockServer::start().await;

    // First-timestamp probe.
    Mock::given(method("POST"))
        .and(path(DATA_GET))
        .and(ReadBody::for_id(42).with_limit(1))
        .respond_with(response_for(json!({"id": 42}), raw_points([1_000_005])))
        .expect(1)
        .mount(&server)
        .await;
    // Single window starting at the probed first timestamp.
    Mock::given(method("POST"))
        .and(path(DATA_GET))
        .and(ReadBody::for_id(42).with_start(1_000_005).with_limit(100_000))
        .respond_with(response_for(
            json!({"id": 42}),
            vec![
                json!({"timestamp": 1_000_005, "value": 1.0}),
                json!({"timestamp": 1_000_020, "value": 2.0}),
                json!({"timestamp": 1_000_035, "value": 3.0}),
            ],
        ))
        .expect(1)
        .mount(&server)
        .await;

    let dps = client(&server)
        .retrieve_one(
            Identifier::id(42),
            &DatapointsQuery::new(1_000_000_i64, 1_000_050_i64),
        )
        .await
        .unwrap();

    assert_eq!(dps.id, Some(42));
    assert_eq!(dps.timestamp, vec![1_000_005, 1_000_020, 1_000_035]);
    let values: Vec<f64> = dps
        .value
        .unwrap()
        .iter()
        .map(|v| v.as_f64().unwrap())
        .collect();
    assert_eq!(values, vec![1.0, 2.0, 3.0]);
}

#[tokio::test]
async fn paged_read_at_the_request_cap_issues_one_more_request() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(DATA_GET))
        .and(ReadBody::for_id(1).with_limit(1))
        .respond_with(response_for(json!({"id": 1}), raw_points([0])))
        .expect(1)
        .mount(&server)
        .await;
    // Page one fills the cap exactly, so the fetcher must page once more.
    Mock::given(method("POST"))
        .and(path(DATA_GET))
        .and(ReadBody::for_id(1).with_start(0).with_limit(100_000))
        .respond_with(response_for(json!({"id": 1}), raw_points(0..100_000)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(DATA_GET))
        .and(ReadBody::for_id(1).with_start(100_000).with_limit(100_000))
        .respond_with(response_for(json!({"id": 1}), raw_points(100_000..150_000)))
        .expect(1)
        .mount(&server)
        .await;

    let dps = client(&server)
        .retrieve_one(
            Identifier::id(1),
            &DatapointsQuery::new(0_i64, 10_000_000_i64),
        )
        .await
        .unwrap();

    assert_eq!(dps.len(), 150_000);
    assert!(dps.timestamp.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(dps.timestamp[0], 0);
    assert_eq!(dps.timestamp[149_999], 149_999);
}

#[tokio::test]
async fn aggregate_read_returns_bucket_aligned_rows() {
    let server = MockServer::start().await;
    let hour = 3_600_000_i64;

    let buckets: Vec<Json> = (0..24)
        .map(|i| {
            json!({
                "timestamp": i as i64 * hour,
                "average": i as f64,
                "count": 60.0,
            })
        })
        .collect();

    Mock::given(method("POST"))
        .and(path(DATA_GET))
        .and(ReadBody::for_external_id("foo").with_limit(1))
        .respond_with(response_for(
            json!({"externalId": "foo"}),
            vec![json!({"timestamp": 0, "average": 0.0, "count": 60.0})],
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(DATA_GET))
        .and(ReadBody::for_external_id("foo").with_limit(10_000))
        .respond_with(response_for(json!({"externalId": "foo"}), buckets))
        .expect(1)
        .mount(&server)
        .await;

    let query = DatapointsQuery::new(0_i64, 24 * hour).with_aggregates(
        vec![Aggregate::Average],
        Granularity::parse("1h").unwrap(),
    );
    let list = client(&server)
        .retrieve(None, Some("foo".into()), &query)
        .await
        .unwrap();

    assert_eq!(list.len(), 1);
    let dps = &list[0];
    assert_eq!(dps.external_id.as_deref(), Some("foo"));
    assert_eq!(dps.len(), 24);
    assert!(dps.timestamp.iter().all(|ts| ts % hour == 0));
    assert!(dps.timestamp.windows(2).all(|pair| pair[1] - pair[0] == hour));
    assert_eq!(dps.count.as_ref().unwrap()[0], 60);
    assert!(dps.value.is_none());
}

#[tokio::test]
async fn multi_series_read_preserves_caller_order() {
    let server = MockServer::start().await;

    for id in [10_i64, 20] {
        Mock::given(method("POST"))
            .and(path(DATA_GET))
            .and(ReadBody::for_id(id).with_limit(1))
            .respond_with(response_for(json!({"id": id}), raw_points([100])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(DATA_GET))
            .and(ReadBody::for_id(id).with_limit(100_000))
            .respond_with(response_for(
                json!({"id": id}),
                raw_points(100..105),
            ))
            .expect(1)
            .mount(&server)
            .await;
    }
    Mock::given(method("POST"))
        .and(path(DATA_GET))
        .and(ReadBody::for_external_id("abc").with_limit(1))
        .respond_with(response_for(json!({"externalId": "abc"}), raw_points([100])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(DATA_GET))
        .and(ReadBody::for_external_id("abc").with_limit(100_000))
        .respond_with(response_for(
            json!({"externalId": "abc"}),
            raw_points(100..105),
        ))
        .expect(1)
        .mount(&server)
        .await;

    let list = client(&server)
        .retrieve(
            Some(vec![10, 20].into()),
            Some("abc".into()),
            &DatapointsQuery::new(0_i64, 1_000_i64),
        )
        .await
        .unwrap();

    assert_eq!(list.len(), 3);
    assert_eq!(list[0].id, Some(10));
    assert_eq!(list[1].id, Some(20));
    assert_eq!(list[2].external_id.as_deref(), Some("abc"));
    assert!(list.iter().all(|dps| dps.len() == 5));
}

#[tokio::test]
async fn outside_points_at_a_window_seam_are_deduplicated() {
    let server = MockServer::start().await;
    // The probe moves the data start to 10; the remaining 149_999_990 ms of
    // raw range split into two windows with a seam at 10 + 74_999_995.
    let seam = 75_000_005_i64;

    Mock::given(method("POST"))
        .and(path(DATA_GET))
        .and(ReadBody::for_id(5).with_limit(1))
        .respond_with(response_for(json!({"id": 5}), raw_points([10])))
        .expect(1)
        .mount(&server)
        .await;
    // Window one: its outside-after point is the seam point itself.
    Mock::given(method("POST"))
        .and(path(DATA_GET))
        .and(ReadBody::for_id(5).with_start(10).with_limit(100_000))
        .respond_with(response_for(
            json!({"id": 5}),
            raw_points([10, seam - 10, seam]),
        ))
        .expect(1)
        .mount(&server)
        .await;
    // Window two: its outside-before point duplicates the last point of
    // window one, and the seam point is its first inside point.
    Mock::given(method("POST"))
        .and(path(DATA_GET))
        .and(ReadBody::for_id(5).with_start(seam).with_limit(100_000))
        .respond_with(response_for(
            json!({"id": 5}),
            raw_points([seam - 10, seam, seam + 20_000_000]),
        ))
        .expect(1)
        .mount(&server)
        .await;

    let query = DatapointsQuery::new(0_i64, 150_000_000_i64).with_outside_points();
    let dps = client(&server)
        .retrieve_one(Identifier::id(5), &query)
        .await
        .unwrap();

    assert_eq!(
        dps.timestamp,
        vec![10, seam - 10, seam, seam + 20_000_000]
    );
    assert_eq!(dps.value.as_ref().unwrap().len(), 4);
}

#[tokio::test]
async fn caller_limit_is_served_from_one_window() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(DATA_GET))
        .and(ReadBody::for_id(3).with_limit(1))
        .respond_with(response_for(json!({"id": 3}), raw_points([0])))
        .expect(1)
        .mount(&server)
        .await;
    // The caller limit caps the request limit; one full page ends the fetch.
    Mock::given(method("POST"))
        .and(path(DATA_GET))
        .and(ReadBody::for_id(3).with_limit(7))
        .respond_with(response_for(json!({"id": 3}), raw_points(0..7)))
        .expect(1)
        .mount(&server)
        .await;

    let query = DatapointsQuery::new(0_i64, 100_000_000_i64).with_limit(7);
    let dps = client(&server)
        .retrieve_one(Identifier::id(3), &query)
        .await
        .unwrap();

    assert_eq!(dps.len(), 7);
}

#[tokio::test]
async fn empty_series_yields_empty_result_with_identity() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(DATA_GET))
        .and(ReadBody::for_id(404))
        .respond_with(response_for(json!({"id": 404}), vec![]))
        .mount(&server)
        .await;

    let dps = client(&server)
        .retrieve_one(Identifier::id(404), &DatapointsQuery::new(0_i64, 1_000_i64))
        .await
        .unwrap();

    assert_eq!(dps.id, Some(404));
    assert!(dps.is_empty());
}

#[tokio::test]
async fn server_rejection_fails_the_whole_read() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(DATA_GET))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(json!({"error": {"code": 400, "message": "no such series"}}))
                .insert_header("x-request-id", "req-77"),
        )
        .mount(&server)
        .await;

    let error = client(&server)
        .retrieve_one(Identifier::id(9), &DatapointsQuery::new(0_i64, 1_000_i64))
        .await
        .unwrap_err();

    match error {
        Error::ClientError {
            status,
            message,
            request_id,
            ..
        } => {
            assert_eq!(status, 400);
            assert_eq!(message, "no such series");
            assert_eq!(request_id.as_deref(), Some("req-77"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn cancelled_token_aborts_before_any_request() {
    let server = MockServer::start().await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let error = client(&server)
        .retrieve_with_cancel(
            Some(1.into()),
            None,
            &DatapointsQuery::new(0_i64, 1_000_i64),
            cancel,
        )
        .await
        .unwrap_err();

    assert!(matches!(error, Error::Cancelled));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn inverted_range_is_rejected_without_io() {
    let server = MockServer::start().await;

    let error = client(&server)
        .retrieve_one(Identifier::id(1), &DatapointsQuery::new(1_000_i64, 0_i64))
        .await
        .unwrap_err();

    assert!(matches!(error, Error::InvalidTimestamp(_)));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn retriable_status_is_retried_until_success() {
    let server = MockServer::start().await;

    let mut config = Config::new("secret", "test");
    config.base_url = server.uri();
    config.disable_gzip = true;
    config.max_retries = 3;
    config.max_retry_backoff_secs = 0;
    let client = DatapointsClient::new(Arc::new(ApiSession::new(config).unwrap()));

    Mock::given(method("POST"))
        .and(path(DATA_GET))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(DATA_GET))
        .and(ReadBody::for_id(2).with_limit(1))
        .respond_with(response_for(json!({"id": 2}), raw_points([5])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(DATA_GET))
        .and(ReadBody::for_id(2).with_limit(100_000))
        .respond_with(response_for(json!({"id": 2}), raw_points([5, 6])))
        .mount(&server)
        .await;

    let dps = client
        .retrieve_one(Identifier::id(2), &DatapointsQuery::new(0_i64, 1_000_i64))
        .await
        .unwrap();

    assert_eq!(dps.timestamp, vec![5, 6]);
}
