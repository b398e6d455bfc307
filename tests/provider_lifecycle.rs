use hemmer_provider_squadcast::testing::{assert_plan_no_changes, ProviderTester, TestError};
use hemmer_provider_squadcast::{ProviderError, SquadcastProvider};
use serde_json::{json, Value};
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TEAM: &str = "611262fcd5b4ea846b534a8a";

async fn configured() -> (MockServer, ProviderTester<SquadcastProvider>) {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/oauth/access-token"))
        .and(header("X-Refresh-Token", "refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"access_token": "access", "token_type": "Bearer"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let tester = ProviderTester::new(SquadcastProvider::new());
    tester
        .configure(json!({
            "refresh_token": "refresh",
            "endpoint": server.uri(),
            "timeout_seconds": 5
        }))
        .await
        .unwrap();
    (server, tester)
}

fn graphql(field: &str, data: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"data": {field: data}}))
}

fn schedule(description: &str) -> Value {
    json!({
        "ID": 7,
        "name": "Primary",
        "description": description,
        "timeZone": "UTC",
        "teamID": TEAM,
        "tags": [],
        "owner": {"ID": TEAM, "type": "team"}
    })
}

#[tokio::test]
async fn schedule_crud_lifecycle() {
    let (server, tester) = configured().await;

    Mock::given(method("POST"))
        .and(path("/v3/graphql"))
        .and(header("Authorization", "Bearer access"))
        .and(body_string_contains("createSchedule"))
        .respond_with(graphql("createSchedule", schedule("")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v3/graphql"))
        .and(body_string_contains("updateSchedule"))
        .respond_with(graphql("updateSchedule", schedule("Night shift")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v3/graphql"))
        .and(body_string_contains("deleteSchedule"))
        .respond_with(graphql("deleteSchedule", json!({"ID": 7})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v3/graphql"))
        .and(body_string_contains("schedule(ID: $ID)"))
        .respond_with(graphql("schedule", schedule("")))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v3/graphql"))
        .and(body_string_contains("schedule(ID: $ID)"))
        .respond_with(graphql("schedule", schedule("Night shift")))
        .mount(&server)
        .await;

    let initial = json!({"name": "Primary", "timezone": "UTC", "team_id": TEAM});
    let updated = json!({
        "name": "Primary",
        "timezone": "UTC",
        "team_id": TEAM,
        "description": "Night shift"
    });

    let state = tester
        .lifecycle_crud("squadcast_schedule_v2", initial, updated.clone())
        .await
        .unwrap();
    assert_eq!(state["id"], "7");
    assert_eq!(state["description"], "Night shift");

    let plan = tester
        .plan_update("squadcast_schedule_v2", state, updated)
        .await
        .unwrap();
    assert_plan_no_changes(&plan);
}

#[tokio::test]
async fn webform_import_then_refresh_after_remote_delete() {
    let (server, tester) = configured().await;

    Mock::given(method("GET"))
        .and(path("/v3/webform/42"))
        .and(query_param("owner_id", TEAM))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "id": 42,
                "name": "Support",
                "owner_id": TEAM,
                "form_owner_type": "team",
                "form_owner_id": TEAM,
                "form_owner_name": "Platform",
                "header": "h",
                "title": "t",
                "footer_text": "f",
                "footer_link": "https://example.com",
                "services": [{"service_id": "s1", "webform_id": 42, "name": "API"}],
                "severity": [{"type": "critical", "description": "Down"}]
            }
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v3/webform/42"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "meta": {"status": 404, "error_message": "Webform not found"}
        })))
        .mount(&server)
        .await;

    let state = tester
        .import_state("squadcast_webform", &format!("{}:42", TEAM))
        .await
        .unwrap();
    assert_eq!(state["id"], "42");
    assert_eq!(state["services"][0]["name"], "API");

    let refreshed = tester.read("squadcast_webform", state).await.unwrap();
    assert_eq!(refreshed, Value::Null);
}

#[tokio::test]
async fn schedule_data_source_lookup() {
    let (server, tester) = configured().await;
    Mock::given(method("GET"))
        .and(path("/v3/schedules"))
        .and(query_param("owner_id", TEAM))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{
                "id": "abc",
                "name": "Legacy",
                "colour": "#fff",
                "owner": {"id": TEAM, "type": "team"}
            }]
        })))
        .mount(&server)
        .await;

    let config = json!({"name": "Legacy", "team_id": TEAM});
    tester
        .validate_data_source_config("squadcast_schedule", config.clone())
        .await
        .unwrap();
    let data = tester
        .read_data_source("squadcast_schedule", config)
        .await
        .unwrap();
    assert_eq!(data["id"], "abc");
    assert_eq!(data["color"], "#fff");
}

#[tokio::test]
async fn rotation_rules_block_lifecycle() {
    let (_server, tester) = configured().await;
    let config = json!({
        "schedule_id": 7,
        "name": "Primary",
        "start_date": "2024-01-01T00:00:00Z",
        "period": "custom",
        "change_participants_frequency": 1,
        "change_participants_unit": "rotation",
        "shift_timeslots": [{"start_hour": 9, "start_minute": 0, "duration": 60}]
    });

    let err = tester
        .lifecycle_create("squadcast_schedule_rotation_v2", config)
        .await
        .unwrap_err();
    match err {
        TestError::Diagnostics(diagnostics) => {
            assert_eq!(diagnostics[0].attribute.as_deref(), Some("custom_period_frequency"));
        },
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn stop_drops_the_client() {
    let (_server, tester) = configured().await;
    tester.stop().await.unwrap();

    let err = tester
        .read("squadcast_webform", json!({"id": "42", "team_id": TEAM}))
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::FailedPrecondition(_)));
}
