mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::http::StatusCode;
use common::{account, body_json, location, packed_state, TestApp, CASDOOR_ENDPOINT, GITHUB_ENDPOINT};
use oidc_auth::models::DeviceStatus;
use oidc_auth::services::{UserField, UserStore};
use oidc_auth::utils::hash_token;

#[tokio::test]
async fn plugin_login_redirects_to_provider_with_packed_state() {
    let app = TestApp::spawn();

    let response = app
        .get("/oidc-auth/api/v1/plugin/login?provider=casdoor&state=s1&machine_code=mac-1&vscode_version=1.90.0")
        .await;

    assert_eq!(response.status(), StatusCode::FOUND);
    let url = location(&response);
    assert!(url.starts_with(&format!("{}/login/oauth/authorize?", CASDOOR_ENDPOINT)));
    assert!(url.contains(&format!(
        "redirect_uri={}",
        urlencoding::encode("https://gateway.test/oidc-auth/api/v1/plugin/login/callback")
    )));

    let carried = app.state.login.carrier().unpack(&packed_state(&url)).unwrap();
    assert_eq!(carried.platform, "plugin");
    assert_eq!(carried.machine_code, "mac-1");
    assert_eq!(carried.state, "s1");
    assert_eq!(response.headers()["referrer-policy"], "no-referrer");
}

#[tokio::test]
async fn web_login_uses_manager_callback_without_device_params() {
    let app = TestApp::spawn();

    let response = app
        .get("/oidc-auth/api/v1/manager/login?provider=github&state=w1")
        .await;

    assert_eq!(response.status(), StatusCode::FOUND);
    let url = location(&response);
    assert!(url.starts_with(GITHUB_ENDPOINT));
    assert!(url.contains(&*urlencoding::encode(
        "https://gateway.test/oidc-auth/api/v1/manager/login/callback"
    )));
}

#[tokio::test]
async fn unknown_provider_is_rejected_before_any_exchange() {
    let app = TestApp::spawn();

    let response = app
        .get("/oidc-auth/api/v1/plugin/login?provider=nope&state=s1&machine_code=mac-1&vscode_version=1.90.0")
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], 400);
    assert_eq!(json["message"], "login method nope is not supported");
    assert_eq!(app.casdoor.exchange_calls.load(Ordering::SeqCst), 0);
    assert_eq!(app.github.exchange_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn plugin_login_requires_device_fingerprint() {
    let app = TestApp::spawn();

    let missing_machine = app
        .get("/oidc-auth/api/v1/plugin/login?provider=casdoor&state=s1&vscode_version=1.90.0")
        .await;
    assert_eq!(missing_machine.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(missing_machine).await["message"],
        "machine_code is required"
    );

    let missing_version = app
        .get("/oidc-auth/api/v1/plugin/login?provider=casdoor&state=s1&machine_code=mac-1")
        .await;
    assert_eq!(missing_version.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn login_without_state_is_bad_request() {
    let app = TestApp::spawn();

    let response = app
        .get("/oidc-auth/api/v1/manager/login?provider=casdoor")
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["message"], "state is required");
}

#[tokio::test]
async fn oversized_login_parameter_fails_validation() {
    let app = TestApp::spawn();
    let state = "s".repeat(600);

    let response = app
        .get(&format!(
            "/oidc-auth/api/v1/manager/login?provider=casdoor&state={}",
            state
        ))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await["message"],
        "Invalid request parameters"
    );
}

#[tokio::test]
async fn callback_without_code_is_bad_request() {
    let app = TestApp::spawn();
    let packed = app.start_plugin_login("casdoor", "mac-1", "s1", "").await;

    let response = app
        .get(&format!(
            "/oidc-auth/api/v1/plugin/login/callback?state={}",
            packed
        ))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn callback_without_state_fails_decryption() {
    let app = TestApp::spawn();

    let response = app
        .get("/oidc-auth/api/v1/plugin/login/callback?code=c1")
        .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(response).await;
    assert_eq!(json["code"], 500);
    assert!(json.get("data").is_none());
}

#[tokio::test]
async fn tampered_state_is_rejected_without_side_effects() {
    let app = TestApp::spawn();
    app.casdoor.add_code("c1", account("alice"));
    let packed = app.start_plugin_login("casdoor", "mac-1", "s1", "").await;

    let mut bytes = packed.into_bytes();
    bytes[20] = if bytes[20] == b'A' { b'B' } else { b'A' };
    let tampered = String::from_utf8(bytes).unwrap();

    let response = app
        .get(&format!(
            "/oidc-auth/api/v1/plugin/login/callback?code=c1&state={}",
            tampered
        ))
        .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(app.casdoor.exchange_calls.load(Ordering::SeqCst), 0);
    let stored = app
        .store
        .find_user_by_field(UserField::ExternalId, "alice")
        .await
        .unwrap();
    assert!(stored.is_none());
}

#[tokio::test]
async fn plugin_callback_creates_device_session() {
    let app = TestApp::spawn();
    app.casdoor.add_code("c1", account("alice"));

    let response = app.plugin_login("casdoor", "mac-1", "s1", "c1", "").await;

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        location(&response),
        format!("{}/login/success", CASDOOR_ENDPOINT)
    );

    let user = app.user_by_external_id("alice").await;
    assert_eq!(user.devices.len(), 1);
    let device = &user.devices[0];
    assert_eq!(device.machine_code, "mac-1");
    assert_eq!(device.vscode_version, "1.90.0");
    assert_eq!(device.uri_scheme, "vscode");
    assert_eq!(device.plugin_version, "1.2.3");
    assert_eq!(device.state, "s1");
    assert_eq!(device.access_token, "at-c1");
    assert_eq!(device.access_token_hash, hash_token("at-c1"));
    assert_eq!(device.refresh_token_hash, hash_token("rt-c1"));
    assert_eq!(device.token_provider, "custom");
}

#[tokio::test]
async fn provider_without_raw_tokens_leaves_device_tokens_empty() {
    let app = TestApp::spawn();
    app.github.add_code("g1", account("bob"));

    let response = app.plugin_login("github", "mac-2", "s2", "g1", "").await;

    assert_eq!(response.status(), StatusCode::FOUND);
    let user = app.user_by_external_id("bob").await;
    let device = &user.devices[0];
    assert!(!device.has_live_tokens());
    assert!(device.token_provider.is_empty());
    assert_eq!(device.provider, "github");
}

#[tokio::test]
async fn second_login_on_same_fingerprint_squeezes_out_the_first() {
    let app = TestApp::spawn();
    app.casdoor.add_code("c1", account("alice"));
    app.casdoor.add_code("c2", account("alice"));

    app.plugin_login("casdoor", "mac-1", "s1", "c1", "").await;
    let response = app.plugin_login("casdoor", "mac-1", "s2", "c2", "").await;
    assert_eq!(response.status(), StatusCode::FOUND);

    let user = app.user_by_external_id("alice").await;
    assert_eq!(user.devices.len(), 2);

    let first = &user.devices[0];
    assert_eq!(first.status, DeviceStatus::LoggedOffline);
    assert!(!first.has_live_tokens());
    assert!(first.state.is_empty());

    let second = &user.devices[1];
    assert_eq!(second.state, "s2");
    assert_eq!(second.access_token, "at-c2");
    assert!(second.has_live_tokens());
}

#[tokio::test]
async fn login_by_another_user_squeezes_out_previous_owner() {
    let app = TestApp::spawn();
    app.casdoor.add_code("c1", account("alice"));
    app.casdoor.add_code("c2", account("carol"));

    app.plugin_login("casdoor", "shared-mac", "s1", "c1", "").await;
    app.clock.advance(chrono::Duration::seconds(5));
    app.plugin_login("casdoor", "shared-mac", "s2", "c2", "").await;

    let alice = app.user_by_external_id("alice").await;
    assert_eq!(alice.devices[0].status, DeviceStatus::LoggedOffline);
    assert!(!alice.devices[0].has_live_tokens());

    let carol = app.user_by_external_id("carol").await;
    assert!(carol.devices[0].has_live_tokens());
}

#[tokio::test]
async fn different_client_version_is_a_separate_device() {
    let app = TestApp::spawn();
    app.casdoor.add_code("c1", account("alice"));
    app.casdoor.add_code("c2", account("alice"));

    app.plugin_login("casdoor", "mac-1", "s1", "c1", "").await;
    let packed = app
        .get("/oidc-auth/api/v1/plugin/login?provider=casdoor&state=s2&machine_code=mac-1&vscode_version=1.91.0")
        .await;
    let packed = packed_state(&location(&packed));
    app.get(&format!(
        "/oidc-auth/api/v1/plugin/login/callback?code=c2&state={}",
        packed
    ))
    .await;

    let user = app.user_by_external_id("alice").await;
    assert!(user.devices.iter().all(|d| d.has_live_tokens()));
}

#[tokio::test]
async fn web_callback_redirects_to_account_binding_without_devices() {
    let app = TestApp::spawn();
    app.github.add_code("g1", account("dave"));

    let response = app
        .get("/oidc-auth/api/v1/manager/login?provider=github&state=w1")
        .await;
    let packed = packed_state(&location(&response));
    let response = app
        .get(&format!(
            "/oidc-auth/api/v1/manager/login/callback?code=g1&state={}",
            packed
        ))
        .await;

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), format!("{}/bind/account", GITHUB_ENDPOINT));
    assert!(app.user_by_external_id("dave").await.devices.is_empty());
}

#[tokio::test]
async fn unknown_authorization_code_is_unauthorized() {
    let app = TestApp::spawn();

    let response = app.plugin_login("casdoor", "mac-1", "s1", "bogus", "").await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn invalid_invite_code_does_not_abort_login() {
    let app = TestApp::spawn();
    app.casdoor.add_code("c1", account("alice"));

    let response = app
        .plugin_login("casdoor", "mac-1", "s1", "c1", "NOPE0000")
        .await;

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        location(&response),
        format!("{}/login/success", CASDOOR_ENDPOINT)
    );
    let user = app.user_by_external_id("alice").await;
    assert!(user.inviter_id.is_none());
    assert_eq!(app.store.usage_count().unwrap(), 0);
}

#[tokio::test]
async fn valid_invite_code_links_the_inviter() {
    let app = TestApp::spawn();
    let inviter = app.seed_user("inviter").await;
    let code = app.state.invites.generate(inviter.id).await.unwrap();
    app.casdoor.add_code("c1", account("alice"));

    let response = app
        .plugin_login("casdoor", "mac-1", "s1", "c1", &code.code)
        .await;

    assert_eq!(response.status(), StatusCode::FOUND);
    let user = app.user_by_external_id("alice").await;
    assert_eq!(user.inviter_id, Some(inviter.id));
    assert_eq!(app.store.usage_count().unwrap(), 1);
}

#[tokio::test]
async fn failed_user_update_aborts_login() {
    let app = TestApp::spawn();
    app.casdoor.add_code("c1", account("alice"));
    app.casdoor.fail_update.store(true, Ordering::SeqCst);

    let response = app.plugin_login("casdoor", "mac-1", "s1", "c1", "").await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.headers().get("location").is_none());
    let stored = app
        .store
        .find_user_by_field(UserField::ExternalId, "alice")
        .await
        .unwrap();
    assert!(stored.is_none());
}

#[tokio::test]
async fn slow_provider_times_out_the_callback() {
    let app = TestApp::spawn_with(&[("LOGIN_TIMEOUT_SECONDS", "1")]);
    app.casdoor.add_code("c1", account("alice"));
    app.casdoor.set_delay(Duration::from_secs(2));

    let response = app.plugin_login("casdoor", "mac-1", "s1", "c1", "").await;

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body_json(response).await["code"], 504);
}

#[tokio::test]
async fn status_reports_completed_login() {
    let app = TestApp::spawn();
    app.casdoor.add_code("c1", account("alice"));
    app.plugin_login("casdoor", "mac-1", "s1", "c1", "").await;

    let response = app
        .get("/oidc-auth/api/v1/plugin/login/status?state=s1&machine_code=mac-1")
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["code"], 200);
    assert_eq!(json["data"]["state"], "s1");
    assert_eq!(json["data"]["token_ready"], true);

    let other_machine = app
        .get("/oidc-auth/api/v1/plugin/login/status?state=s1&machine_code=mac-9")
        .await;
    assert_eq!(other_machine.status(), StatusCode::UNAUTHORIZED);

    let missing = app
        .get("/oidc-auth/api/v1/plugin/login/status?state=s1")
        .await;
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn own_invite_code_is_issued_once() {
    let app = TestApp::spawn();
    app.casdoor.add_code("c1", account("alice"));
    app.plugin_login("casdoor", "mac-1", "s1", "c1", "").await;

    let first = app
        .get_with_bearer("/oidc-auth/api/v1/manager/invite-code", "at-c1")
        .await;
    assert_eq!(first.status(), StatusCode::OK);
    let first = body_json(first).await["data"]["invite_code"]
        .as_str()
        .unwrap()
        .to_string();
    assert_eq!(first.len(), 8);

    let second = app
        .get_with_bearer("/oidc-auth/api/v1/manager/invite-code", "at-c1")
        .await;
    let second = body_json(second).await["data"]["invite_code"]
        .as_str()
        .unwrap()
        .to_string();

    assert_eq!(first, second);
    assert_eq!(app.store.invite_code_count().unwrap(), 1);
    let user = app.user_by_external_id("alice").await;
    assert_eq!(user.invite_code.as_deref(), Some(first.as_str()));
}

#[tokio::test]
async fn own_invite_code_requires_a_known_token() {
    let app = TestApp::spawn();

    let missing = app.get("/oidc-auth/api/v1/manager/invite-code").await;
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    let unknown = app
        .get_with_bearer("/oidc-auth/api/v1/manager/invite-code", "at-unknown")
        .await;
    assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn squeeze_out_reaches_the_live_owner_not_the_latest_updated() {
    let app = TestApp::spawn();
    app.casdoor.add_code("c1", account("alice"));
    app.casdoor.add_code("c2", account("carol"));
    app.casdoor.add_code("c3", account("alice"));
    app.casdoor.add_code("c4", account("dave"));

    app.plugin_login("casdoor", "shared-mac", "s1", "c1", "").await;
    app.clock.advance(chrono::Duration::seconds(5));
    app.plugin_login("casdoor", "shared-mac", "s2", "c2", "").await;
    app.clock.advance(chrono::Duration::seconds(5));
    // Touches alice again, whose shared-mac entry is already dead.
    app.plugin_login("casdoor", "other-mac", "s3", "c3", "").await;
    app.clock.advance(chrono::Duration::seconds(5));
    let response = app.plugin_login("casdoor", "shared-mac", "s4", "c4", "").await;
    assert_eq!(response.status(), StatusCode::FOUND);

    let mut live_on_shared = Vec::new();
    for name in ["alice", "carol", "dave"] {
        let user = app.user_by_external_id(name).await;
        for device in user.devices.iter().filter(|d| d.machine_code == "shared-mac") {
            if device.has_live_tokens() {
                live_on_shared.push(name);
            }
        }
    }
    assert_eq!(live_on_shared, vec!["dave"]);

    let carol = app.user_by_external_id("carol").await;
    assert_eq!(carol.devices[0].status, DeviceStatus::LoggedOffline);
    let alice = app.user_by_external_id("alice").await;
    let other = alice
        .devices
        .iter()
        .find(|d| d.machine_code == "other-mac")
        .unwrap();
    assert!(other.has_live_tokens());
}

#[tokio::test]
async fn failed_persist_keeps_the_invite_redeemable() {
    let app = TestApp::spawn();
    let inviter = app.seed_user("inviter").await;
    let code = app.state.invites.generate(inviter.id).await.unwrap();
    app.casdoor.add_code("c1", account("alice"));
    app.casdoor.add_code("c2", account("alice"));
    app.casdoor.add_code("c3", account("alice"));
    app.plugin_login("casdoor", "mac-1", "s1", "c1", "").await;

    app.casdoor.fail_update.store(true, Ordering::SeqCst);
    let failed = app
        .plugin_login("casdoor", "mac-2", "s2", "c2", &code.code)
        .await;
    assert_eq!(failed.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(app.store.usage_count().unwrap(), 0);

    app.casdoor.fail_update.store(false, Ordering::SeqCst);
    let retry = app
        .plugin_login("casdoor", "mac-2", "s3", "c3", &code.code)
        .await;
    assert_eq!(retry.status(), StatusCode::FOUND);

    let alice = app.user_by_external_id("alice").await;
    assert_eq!(alice.inviter_id, Some(inviter.id));
    assert_eq!(app.store.usage_count().unwrap(), 1);
}

#[tokio::test]
async fn unpersisted_inviter_link_reverts_the_redemption() {
    let app = TestApp::spawn();
    let inviter = app.seed_user("inviter").await;
    let code = app.state.invites.generate(inviter.id).await.unwrap();
    app.casdoor.add_code("c1", account("alice"));
    app.casdoor.add_code("c2", account("alice"));

    // The user itself is stored, the follow-up write of the inviter is not.
    app.casdoor.fail_updates_after(1);
    let response = app
        .plugin_login("casdoor", "mac-1", "s1", "c1", &code.code)
        .await;

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        location(&response),
        format!("{}/login/success", CASDOOR_ENDPOINT)
    );
    assert_eq!(app.casdoor.update_calls.load(Ordering::SeqCst), 2);
    assert!(app.user_by_external_id("alice").await.inviter_id.is_none());
    assert_eq!(app.store.usage_count().unwrap(), 0);
}

#[tokio::test]
async fn token_step_hands_out_provider_tokens() {
    let app = TestApp::spawn();
    app.casdoor.add_code("c1", account("alice"));
    app.plugin_login("casdoor", "mac-1", "s1", "c1", "").await;

    let response = app
        .get("/oidc-auth/api/v1/plugin/login/token?state=s1&machine_code=mac-1")
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["access_token"], "at-c1");
    assert_eq!(json["data"]["refresh_token"], "rt-c1");

    let device = app.user_by_external_id("alice").await.devices[0].clone();
    assert_eq!(device.status, DeviceStatus::LoggedIn);
    assert!(device.state.is_empty());
    assert_eq!(device.token_provider, "custom");

    // The state is single use.
    let again = app
        .get("/oidc-auth/api/v1/plugin/login/token?state=s1&machine_code=mac-1")
        .await;
    assert_eq!(again.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn token_step_mints_tokens_for_identity_only_provider() {
    let app = TestApp::spawn();
    app.github.add_code("g1", account("bob"));
    app.plugin_login("github", "mac-2", "s2", "g1", "").await;

    let status = app
        .get("/oidc-auth/api/v1/plugin/login/status?state=s2&machine_code=mac-2")
        .await;
    assert_eq!(body_json(status).await["data"]["token_ready"], true);

    let response = app
        .get("/oidc-auth/api/v1/plugin/login/token?state=s2&machine_code=mac-2")
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let access_token = json["data"]["access_token"].as_str().unwrap().to_string();
    let refresh_token = json["data"]["refresh_token"].as_str().unwrap().to_string();
    assert!(!access_token.is_empty());
    assert_ne!(access_token, "at-g1");

    let device = app.user_by_external_id("bob").await.devices[0].clone();
    assert_eq!(device.status, DeviceStatus::LoggedIn);
    assert_eq!(device.access_token_hash, hash_token(&access_token));
    assert_eq!(device.refresh_token_hash, hash_token(&refresh_token));
    assert_eq!(device.token_provider, "gateway");

    let invite = app
        .get_with_bearer("/oidc-auth/api/v1/manager/invite-code", &access_token)
        .await;
    assert_eq!(invite.status(), StatusCode::OK);
}

#[tokio::test]
async fn squeezed_login_cannot_fetch_tokens() {
    let app = TestApp::spawn();
    app.casdoor.add_code("c1", account("alice"));
    app.casdoor.add_code("c2", account("carol"));
    app.plugin_login("casdoor", "mac-1", "s1", "c1", "").await;
    app.plugin_login("casdoor", "mac-1", "s2", "c2", "").await;

    let squeezed = app
        .get("/oidc-auth/api/v1/plugin/login/token?state=s1&machine_code=mac-1")
        .await;
    assert_eq!(squeezed.status(), StatusCode::UNAUTHORIZED);

    let wrong_machine = app
        .get("/oidc-auth/api/v1/plugin/login/token?state=s2&machine_code=mac-9")
        .await;
    assert_eq!(wrong_machine.status(), StatusCode::UNAUTHORIZED);

    let current = app
        .get("/oidc-auth/api/v1/plugin/login/token?state=s2&machine_code=mac-1")
        .await;
    assert_eq!(current.status(), StatusCode::OK);
}

#[tokio::test]
async fn logout_ends_the_device_session() {
    let app = TestApp::spawn();
    app.casdoor.add_code("c1", account("alice"));
    app.plugin_login("casdoor", "mac-1", "s1", "c1", "").await;
    app.get("/oidc-auth/api/v1/plugin/login/token?state=s1&machine_code=mac-1")
        .await;

    let response = app
        .get_with_bearer("/oidc-auth/api/v1/plugin/login/logout", "at-c1")
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["message"], "Logged out");
    assert_eq!(json["data"]["status"], "logged_out");

    let device = app.user_by_external_id("alice").await.devices[0].clone();
    assert_eq!(device.status, DeviceStatus::LoggedOut);
    assert!(!device.has_live_tokens());

    let again = app
        .get_with_bearer("/oidc-auth/api/v1/plugin/login/logout", "at-c1")
        .await;
    assert_eq!(again.status(), StatusCode::UNAUTHORIZED);

    let missing = app.get("/oidc-auth/api/v1/plugin/login/logout").await;
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
}
