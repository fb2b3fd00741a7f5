#![allow(clippy::unwrap_used)]
// Integration tests for `ApplianceClient` using wiremock.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use pretty_assertions::assert_eq;
use secrecy::SecretString;
use serde_json::json;
use tokio_test::assert_ok;
use url::Url;
use wiremock::matchers::{body_json, body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use homelink_api::transport::BSH_JSON_V1;
use homelink_api::{
    ApplianceClient, BucketConfig, Credential, CredentialProvider, Error, ProgramTarget,
    RateLimitConfig, RateLimiter, Resource, TransportConfig, Value, ValueKind,
};

const HA_ID: &str = "SIEMENS-KI36FP60-68A40E1A1C2B";

// ── Helpers ─────────────────────────────────────────────────────────

/// Provider whose token expires at a controllable time and counts refreshes.
struct CountingProvider {
    expires_at: Mutex<DateTime<Utc>>,
    refreshes: AtomicU32,
    refresh_fails: bool,
}

impl CountingProvider {
    fn expiring_in(delta: TimeDelta) -> Arc<Self> {
        Arc::new(Self {
            expires_at: Mutex::new(Utc::now() + delta),
            refreshes: AtomicU32::new(0),
            refresh_fails: false,
        })
    }

    fn failing_refresh(delta: TimeDelta) -> Arc<Self> {
        Arc::new(Self {
            expires_at: Mutex::new(Utc::now() + delta),
            refreshes: AtomicU32::new(0),
            refresh_fails: true,
        })
    }

    fn refreshes(&self) -> u32 {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialProvider for CountingProvider {
    async fn valid_token(&self, identity: &str) -> Result<Credential, Error> {
        let expires_at = *self.expires_at.lock().unwrap();
        let token = SecretString::from("test-token".to_owned());
        Ok(Credential::new(identity, token).with_expiry(expires_at))
    }

    async fn refresh(&self, credential: &Credential) -> Result<Credential, Error> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        if self.refresh_fails {
            return Err(Error::Authentication {
                message: "refresh failed".into(),
            });
        }
        let expires_at = Utc::now() + TimeDelta::hours(1);
        *self.expires_at.lock().unwrap() = expires_at;
        Ok(credential.clone().with_expiry(expires_at))
    }
}

fn generous_limits() -> RateLimitConfig {
    let bucket = BucketConfig {
        capacity: 1000,
        refill_tokens: 1000,
        refill_period: Duration::from_secs(1),
        initial_tokens: 1000,
    };
    RateLimitConfig {
        sustained: bucket,
        burst: bucket,
        max_wait: Some(Duration::from_secs(5)),
    }
}

fn client_for(
    uri: &str,
    provider: Arc<CountingProvider>,
    limits: RateLimitConfig,
) -> ApplianceClient {
    ApplianceClient::connect(
        Url::parse(uri).unwrap(),
        "user@example.com",
        provider,
        Arc::new(RateLimiter::new(limits)),
        &TransportConfig::default(),
    )
    .unwrap()
}

async fn setup() -> (MockServer, ApplianceClient, Arc<CountingProvider>) {
    let server = MockServer::start().await;
    let provider = CountingProvider::expiring_in(TimeDelta::hours(1));
    let client = client_for(&server.uri(), Arc::clone(&provider), generous_limits());
    (server, client, provider)
}

fn ha_path(suffix: &str) -> String {
    format!("/api/homeappliances/{HA_ID}/{suffix}")
}

const ECO_MODE: &str = "Refrigeration.Common.Setting.EcoMode";
const FRIDGE_SETPOINT: &str = "Refrigeration.FridgeFreezer.Setting.SetpointTemperatureRefrigerator";

// ── Settings and status ─────────────────────────────────────────────

#[tokio::test]
async fn test_get_setting() {
    let (server, client, _) = setup().await;

    Mock::given(method("GET"))
        .and(path(ha_path(&format!("settings/{ECO_MODE}"))))
        .and(header("authorization", "Bearer test-token"))
        .and(header("accept", BSH_JSON_V1))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "key": ECO_MODE, "value": true }
        })))
        .mount(&server)
        .await;

    let value = client.get_setting(HA_ID, ECO_MODE).await.unwrap();
    assert_eq!(value.key, ECO_MODE);
    assert!(value.as_bool());

    let log = client.latest_requests();
    assert_eq!(log.len(), 1);
    let record = &log[0];
    assert_eq!(record.appliance_id.as_deref(), Some(HA_ID));
    assert_eq!(record.response.as_ref().unwrap().status, 200);
    assert!(
        record
            .request
            .headers
            .iter()
            .any(|(k, v)| k == "authorization" && v == "Bearer ***")
    );
}

#[tokio::test]
async fn test_get_status_offline() {
    let (server, client, _) = setup().await;

    Mock::given(method("GET"))
        .and(path(ha_path("status/BSH.Common.Status.DoorState")))
        .respond_with(
            ResponseTemplate::new(409).set_body_json(json!({ "error": "appliance offline" })),
        )
        .mount(&server)
        .await;

    let result = client.get_door_state(HA_ID).await;
    assert!(
        matches!(result, Err(Error::ApplianceOffline { status: 409, .. })),
        "expected ApplianceOffline, got: {result:?}"
    );
    // The failing exchange stays inspectable.
    let log = client.latest_requests();
    assert_eq!(log.len(), 1);
    assert!(
        log[0]
            .response
            .as_ref()
            .unwrap()
            .body
            .as_deref()
            .unwrap()
            .contains("offline")
    );
}

#[tokio::test]
async fn test_conflict_without_offline_marker() {
    let (server, client, _) = setup().await;

    Mock::given(method("GET"))
        .and(path(ha_path(&format!("settings/{ECO_MODE}"))))
        .respond_with(ResponseTemplate::new(409).set_body_string("program running"))
        .mount(&server)
        .await;

    let result = client.get_setting(HA_ID, ECO_MODE).await;
    assert!(matches!(result, Err(Error::Communication { status: 409, .. })));
}

#[tokio::test]
async fn test_too_many_requests_carries_retry_after() {
    let (server, client, _) = setup().await;

    Mock::given(method("GET"))
        .and(path(ha_path(&format!("settings/{ECO_MODE}"))))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("Retry-After", "42")
                .set_body_json(json!({
                    "error": { "key": "429", "description": "Too many requests" }
                })),
        )
        .mount(&server)
        .await;

    let result = client.get_setting(HA_ID, ECO_MODE).await;
    assert!(matches!(
        result,
        Err(Error::RateLimited {
            retry_after_secs: Some(42),
            ..
        })
    ));
}

#[tokio::test]
async fn test_put_setting_encodes_int_with_unit() {
    let server = MockServer::start().await;
    // No read permits at all: writes must not touch the limiter.
    let starved = RateLimitConfig {
        sustained: BucketConfig {
            initial_tokens: 0,
            ..RateLimitConfig::default().sustained
        },
        max_wait: Some(Duration::ZERO),
        ..RateLimitConfig::default()
    };
    let client = client_for(
        &server.uri(),
        CountingProvider::expiring_in(TimeDelta::hours(1)),
        starved,
    );

    Mock::given(method("PUT"))
        .and(path(ha_path(&format!("settings/{FRIDGE_SETPOINT}"))))
        .and(header("content-type", BSH_JSON_V1))
        .and(body_json(json!({
            "data": { "key": FRIDGE_SETPOINT, "value": 4, "unit": "°C" }
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    client
        .set_fridge_setpoint_temperature(HA_ID, "4", "°C")
        .await
        .unwrap();

    let read = client.get_setting(HA_ID, FRIDGE_SETPOINT).await;
    assert!(matches!(read, Err(Error::RateLimitTimeout { .. })));
}

#[tokio::test]
async fn test_super_mode_shortcuts() {
    let (server, client, _) = setup().await;
    let key = "Refrigeration.FridgeFreezer.Setting.SuperModeFreezer";

    Mock::given(method("GET"))
        .and(path(ha_path(&format!("settings/{key}"))))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "key": key, "value": true }
        })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(ha_path(
            "settings/Refrigeration.FridgeFreezer.Setting.SuperModeRefrigerator",
        )))
        .and(body_json(json!({
            "data": {
                "key": "Refrigeration.FridgeFreezer.Setting.SuperModeRefrigerator",
                "value": false
            }
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    assert!(client.get_freezer_super_mode(HA_ID).await.unwrap());
    assert_ok!(client.set_fridge_super_mode(HA_ID, false).await);
}

#[tokio::test]
async fn test_light_shortcuts_encode_per_kind() {
    let (server, client, _) = setup().await;
    let brightness = "Cooking.Common.Setting.LightingBrightness";
    let custom = "BSH.Common.Setting.AmbientLightCustomColor";

    Mock::given(method("PUT"))
        .and(path(ha_path(&format!("settings/{brightness}"))))
        .and(body_json(json!({
            "data": { "key": brightness, "value": 80, "unit": "%" }
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(ha_path("settings/BSH.Common.Setting.AmbientLightEnabled")))
        .and(body_json(json!({
            "data": { "key": "BSH.Common.Setting.AmbientLightEnabled", "value": true }
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(ha_path(&format!("settings/{custom}"))))
        .and(body_json(json!({
            "data": { "key": custom, "value": "#ff8800" }
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(ha_path("settings/BSH.Common.Setting.AmbientLightColor")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "key": "BSH.Common.Setting.AmbientLightColor",
                "value": "BSH.Common.EnumType.AmbientLightColor.Color42"
            }
        })))
        .mount(&server)
        .await;

    assert_ok!(client.set_functional_light_brightness(HA_ID, 80).await);
    assert_ok!(client.set_ambient_light_state(HA_ID, true).await);
    assert_ok!(client.set_ambient_light_custom_color(HA_ID, "#ff8800").await);
    let color = client.get_ambient_light_color(HA_ID).await.unwrap();
    assert_eq!(
        color.raw(),
        Some("BSH.Common.EnumType.AmbientLightColor.Color42")
    );
}

#[tokio::test]
async fn test_cavity_temperature_reads_status() {
    let (server, client, _) = setup().await;
    let key = "Cooking.Oven.Status.CurrentCavityTemperature";

    Mock::given(method("GET"))
        .and(path(ha_path(&format!("status/{key}"))))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "key": key, "value": 180.5, "unit": "°C" }
        })))
        .mount(&server)
        .await;

    let value = client.get_current_cavity_temperature(HA_ID).await.unwrap();
    assert_eq!(value.as_double().unwrap(), 180.5);
    assert_eq!(value.unit.as_deref(), Some("°C"));
}

// ── Credentials ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_refreshes_once_when_near_expiry() {
    let server = MockServer::start().await;
    let provider = CountingProvider::expiring_in(TimeDelta::seconds(30));
    let client = client_for(&server.uri(), Arc::clone(&provider), generous_limits());

    Mock::given(method("GET"))
        .and(path(ha_path(&format!("settings/{ECO_MODE}"))))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "key": ECO_MODE, "value": false }
        })))
        .mount(&server)
        .await;

    assert_ok!(client.get_setting(HA_ID, ECO_MODE).await);
    assert_eq!(provider.refreshes(), 1);

    assert_ok!(client.get_setting(HA_ID, ECO_MODE).await);
    assert_eq!(provider.refreshes(), 1, "fresh token must not be refreshed again");
}

#[tokio::test]
async fn test_failed_proactive_refresh_is_not_retried() {
    let server = MockServer::start().await;
    let provider = CountingProvider::failing_refresh(TimeDelta::seconds(30));
    let client = client_for(&server.uri(), Arc::clone(&provider), generous_limits());

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let result = client.get_setting(HA_ID, ECO_MODE).await;
    assert!(
        matches!(result, Err(Error::Authentication { ref message }) if message == "refresh failed"),
        "expected Authentication error, got: {result:?}"
    );
    assert_eq!(provider.refreshes(), 1);
    assert!(client.latest_requests().is_empty());
}

#[tokio::test]
async fn test_unauthorized_forces_refresh_and_retries_once() {
    let (server, client, provider) = setup().await;

    Mock::given(method("GET"))
        .and(path(ha_path(&format!("settings/{ECO_MODE}"))))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(ha_path(&format!("settings/{ECO_MODE}"))))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "key": ECO_MODE, "value": true }
        })))
        .mount(&server)
        .await;

    let value = client.get_setting(HA_ID, ECO_MODE).await.unwrap();
    assert!(value.as_bool());
    assert_eq!(provider.refreshes(), 1);
    assert_eq!(client.latest_requests().len(), 2);
}

#[tokio::test]
async fn test_repeated_unauthorized_is_auth_error() {
    let (server, client, provider) = setup().await;

    Mock::given(method("GET"))
        .and(path(ha_path(&format!("settings/{ECO_MODE}"))))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    let result = client.get_setting(HA_ID, ECO_MODE).await;
    assert!(
        matches!(result, Err(Error::Authentication { .. })),
        "expected Authentication error, got: {result:?}"
    );
    assert_eq!(provider.refreshes(), 1);
}

// ── Programs ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_active_program_absent_is_none() {
    let (server, client, _) = setup().await;

    Mock::given(method("GET"))
        .and(path(ha_path("programs/active")))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": { "key": "SDK.Error.NoProgramActive" }
        })))
        .mount(&server)
        .await;

    assert!(client.get_active_program(HA_ID).await.unwrap().is_none());
}

#[tokio::test]
async fn test_active_program_with_options() {
    let (server, client, _) = setup().await;

    Mock::given(method("GET"))
        .and(path(ha_path("programs/active")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "key": "LaundryCare.Washer.Program.Cotton",
                "options": [
                    { "key": "BSH.Common.Option.RemainingProgramTime", "value": 3540, "unit": "seconds" },
                    { "key": "LaundryCare.Washer.Option.Temperature",
                      "value": "LaundryCare.Washer.EnumType.Temperature.GC40" }
                ]
            }
        })))
        .mount(&server)
        .await;

    let program = client.get_active_program(HA_ID).await.unwrap().unwrap();
    assert_eq!(program.key, "LaundryCare.Washer.Program.Cotton");
    assert_eq!(program.options.len(), 2);

    let time_left = client
        .read_resource(HA_ID, &Resource::WASHER_TIME_LEFT)
        .await
        .unwrap();
    assert_eq!(time_left.as_int().unwrap(), 3540);

    let active = client
        .read_resource(HA_ID, &Resource::WASHER_ACTIVE_PROGRAM)
        .await
        .unwrap();
    assert!(active.as_bool());
}

#[tokio::test]
async fn test_start_selected_program_copies_document() {
    let (server, client, _) = setup().await;

    let selected = json!({
        "data": {
            "key": "LaundryCare.Washer.Program.Mix",
            "options": [{ "key": "LaundryCare.Washer.Option.SpinSpeed",
                          "value": "LaundryCare.Washer.EnumType.SpinSpeed.RPM800" }]
        }
    })
    .to_string();

    Mock::given(method("GET"))
        .and(path(ha_path("programs/selected")))
        .respond_with(ResponseTemplate::new(200).set_body_string(selected.clone()))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(ha_path("programs/active")))
        .and(body_string(selected))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    assert_ok!(client.start_selected_program(HA_ID).await);
}

#[tokio::test]
async fn test_start_and_stop_program() {
    let (server, client, _) = setup().await;

    Mock::given(method("PUT"))
        .and(path(ha_path("programs/active")))
        .and(body_json(json!({ "data": { "key": "LaundryCare.Washer.Program.Cotton" } })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(ha_path("programs/active")))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    client
        .start_program(HA_ID, "LaundryCare.Washer.Program.Cotton")
        .await
        .unwrap();
    assert_ok!(client.stop_program(HA_ID).await);
}

#[tokio::test]
async fn test_set_selected_program_option() {
    let (server, client, _) = setup().await;

    Mock::given(method("PUT"))
        .and(path(ha_path("programs/selected/options")))
        .and(body_json(json!({
            "data": { "options": [{ "key": "BSH.Common.Option.FinishInRelative", "value": 7200, "unit": "seconds" }] }
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let option = Value::new("BSH.Common.Option.FinishInRelative", "7200").with_unit("seconds");
    client
        .set_program_options(HA_ID, &option, ValueKind::Int, ProgramTarget::Selected)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_available_programs_drop_malformed_entries() {
    let (server, client, _) = setup().await;

    Mock::given(method("GET"))
        .and(path(ha_path("programs/available")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "programs": [
                { "key": "LaundryCare.Washer.Program.Cotton",
                  "constraints": { "available": true, "execution": "selectandstart" } },
                { "key": "LaundryCare.Washer.Program.Broken" }
            ]}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(ha_path("programs")))
        .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
        .mount(&server)
        .await;

    let available = client.get_available_programs(HA_ID).await.unwrap();
    assert_eq!(available.len(), 1);
    assert_eq!(available[0].execution, "selectandstart");

    // Wrong envelope shape is logged and yields nothing.
    assert!(client.get_programs(HA_ID).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_program_options_are_cached() {
    let (server, client, _) = setup().await;
    let program = "LaundryCare.Washer.Program.Cotton";

    Mock::given(method("GET"))
        .and(path(ha_path(&format!("programs/available/{program}"))))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "key": program, "options": [
                { "key": "LaundryCare.Washer.Option.Temperature",
                  "constraints": { "allowedvalues": [
                      "LaundryCare.Washer.EnumType.Temperature.Cold",
                      "LaundryCare.Washer.EnumType.Temperature.GC40"
                  ]}}
            ]}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let first = client.get_program_options(HA_ID, program).await.unwrap();
    let second = client.get_program_options(HA_ID, program).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first[0].allowed_values.len(), 2);
    assert_eq!(client.latest_requests().len(), 1);
}

// ── Appliances ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_list_home_appliances() {
    let (server, client, _) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/homeappliances"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "homeappliances": [{
                "haId": HA_ID,
                "name": "Fridge",
                "type": "FridgeFreezer",
                "brand": "SIEMENS",
                "vib": "KI36FP60",
                "enumber": "KI36FP60/01",
                "connected": true
            }]}
        })))
        .mount(&server)
        .await;

    let appliances = client.get_home_appliances().await.unwrap();
    assert_eq!(appliances.len(), 1);
    assert_eq!(appliances[0].ha_id, HA_ID);
    assert_eq!(appliances[0].kind, "FridgeFreezer");
    assert!(appliances[0].connected);
}

// ── Resource dispatch ───────────────────────────────────────────────

#[tokio::test]
async fn test_status_resources_are_read_only() {
    let (_server, client, _) = setup().await;

    let result = client
        .write_resource(HA_ID, &Resource::DOOR_STATE, &Value::new("x", "Open"))
        .await;
    assert!(matches!(result, Err(Error::UnsupportedOperation(_))));
    assert!(client.latest_requests().is_empty());
}

#[tokio::test]
async fn test_unsupported_setting_maps_to_unsupported_operation() {
    let (server, client, _) = setup().await;

    Mock::given(method("GET"))
        .and(path(ha_path(&format!("settings/{ECO_MODE}"))))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": { "key": "SDK.Error.UnsupportedSetting", "description": "Setting unsupported" }
        })))
        .mount(&server)
        .await;

    let result = client.read_resource(HA_ID, &Resource::FRIDGE_ECO_MODE).await;
    assert!(matches!(result, Err(Error::UnsupportedOperation(_))));
}

// ── Diagnostics ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_request_log_is_bounded() {
    let (server, client, _) = setup().await;

    Mock::given(method("GET"))
        .and(path(ha_path(&format!("settings/{ECO_MODE}"))))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "key": ECO_MODE, "value": true }
        })))
        .mount(&server)
        .await;

    for _ in 0..55 {
        assert_ok!(client.get_setting(HA_ID, ECO_MODE).await);
    }
    assert_eq!(client.latest_requests().len(), 50);
}

#[tokio::test]
async fn test_transport_failure_is_logged_without_response() {
    // Nothing listens on port 9 of the loopback interface.
    let client = client_for(
        "http://127.0.0.1:9",
        CountingProvider::expiring_in(TimeDelta::hours(1)),
        generous_limits(),
    );

    let result = client.get_setting(HA_ID, ECO_MODE).await;
    assert!(matches!(result, Err(Error::Transport(_))));

    let log = client.latest_requests();
    assert_eq!(log.len(), 1);
    assert!(log[0].response.is_none());
}
