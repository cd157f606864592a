//! Integration tests for the boot sequence.

mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use axum::http::StatusCode;
use common::{
    body_json, body_text, get, get_with_header, harness, harness_with, HarnessOptions,
    RecordingMigrations, META_URL,
};
use serde_json::json;
use switchyard_api::auth::controller::AUTH_HEADER;
use switchyard_api::auth::jwt::{generate_token, JwtConfig};
use switchyard_api::orchestrator::migrations::run_all;
use switchyard_api::orchestrator::secret::JWT_SECRET_KEY;
use switchyard_api::orchestrator::BootError;
use switchyard_api::telemetry::ErrorReporter;
use switchyard_api::variant::Variant;
use switchyard_api::InitOptions;
use switchyard_core::config::{DbConnection, PlatformConfig};
use switchyard_core::project::{Project, ProjectStatus};
use switchyard_db::meta::record;
use switchyard_db::{MetaScope, MetaStore, MetaTable};
use switchyard_events::bus::names;

// ---------------------------------------------------------------------------
// Test: booting twice returns the same router and runs startup once
// ---------------------------------------------------------------------------

#[tokio::test]
async fn init_is_idempotent() {
    let h = harness(&[Project::new("P1", "CRM", ProjectStatus::Started)]).await;

    let first = h.boot().await;
    let table = h.orchestrator.route_table().unwrap();
    let calls = h.migrations.calls();
    assert_eq!(h.upgrader.runs(), 1);

    let second = h.boot().await;
    assert!(Arc::ptr_eq(&table, &h.orchestrator.route_table().unwrap()));
    assert_eq!(h.migrations.calls(), calls);
    assert_eq!(h.upgrader.runs(), 1);
    assert_eq!(h.orchestrator.registry().len().await, 1);

    // Both handles serve the same frame.
    assert_eq!(get(first, "/health").await.status(), StatusCode::OK);
    assert_eq!(get(second, "/health").await.status(), StatusCode::OK);
}

#[tokio::test]
async fn concurrent_init_boots_once() {
    let h = harness(&[]).await;
    let (a, b) = tokio::join!(
        h.orchestrator.init(InitOptions::default()),
        h.orchestrator.init(InitOptions::default())
    );
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(h.upgrader.runs(), 1);
}

// ---------------------------------------------------------------------------
// Test: root redirects to the dashboard, started projects are reachable
// ---------------------------------------------------------------------------

#[tokio::test]
async fn started_project_is_served_and_root_redirects_to_dashboard() {
    let h = harness(&[Project::new("P1", "CRM", ProjectStatus::Started)]).await;
    let app = h.boot().await;

    let response = get(app.clone(), "/").await;
    assert!(response.status().is_redirection());
    assert_eq!(response.headers()["location"], "/dashboard");

    let response = get(app.clone(), "/nc/P1/api/v1/_info?project_id=P1").await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["id"], "P1");
    assert_eq!(json["status"], "started");

    let response = get(app, "/dashboard").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("_noco"));
}

#[tokio::test]
async fn ids_with_route_syntax_boot_and_are_served() {
    let h = harness(&[
        Project::new("{bad", "", ProjectStatus::Started),
        Project::new("P1", "", ProjectStatus::Started),
    ])
    .await;
    let app = h.boot().await;

    let response = get(app.clone(), "/nc/%7Bbad/api/v1/_info").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["id"], "{bad");
    assert_eq!(get(app, "/nc/P1/api/v1/_health").await.status(), StatusCode::OK);
}

#[tokio::test]
async fn init_runs_on_a_spawned_task() {
    let h = harness(&[Project::new("P1", "", ProjectStatus::Started)]).await;
    let orchestrator = Arc::clone(&h.orchestrator);

    let booted = tokio::spawn(async move { orchestrator.init(InitOptions::default()).await.is_ok() })
        .await
        .unwrap();
    assert!(booted);
    assert!(h.orchestrator.is_booted());
}

// ---------------------------------------------------------------------------
// Test: only started/starting projects are mounted at boot
// ---------------------------------------------------------------------------

#[tokio::test]
async fn non_started_projects_stay_unmounted_until_started() {
    let h = harness(&[
        Project::new("P1", "", ProjectStatus::Starting),
        Project::new("P2", "", ProjectStatus::Stopped),
        Project::new("P3", "", ProjectStatus::Errored),
        Project::new("P4", "", ProjectStatus::Created),
    ])
    .await;
    let app = h.boot().await;

    assert_eq!(
        h.orchestrator.registry().ids().await,
        vec!["P1", "P2", "P3", "P4"]
    );
    assert_eq!(h.orchestrator.project_routes().mounted(), vec!["P1"]);

    let response = get(app.clone(), "/nc/P2/api/v1/_info").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(body_json(response).await["msg"].is_string());

    let started = h
        .orchestrator
        .listener()
        .notify_value(json!({
            "req": {"api": "projectStart", "project_id": "P2"},
            "res": null
        }))
        .await
        .unwrap();
    assert_eq!(started, Some(json!({"status": "started"})));

    let response = get(app, "/nc/P2/api/v1/_info").await;
    assert_eq!(response.status(), StatusCode::OK);
    let stored = h.meta.get_project_by_id("P2").await.unwrap().unwrap();
    assert_eq!(stored.status, ProjectStatus::Started);
}

// ---------------------------------------------------------------------------
// Test: one failing connection does not stop migrations or boot
// ---------------------------------------------------------------------------

fn two_connections(config: &mut PlatformConfig) {
    let env = config.envs.get_mut("_noco").unwrap();
    env.db = vec![
        DbConnection::new("db-alias-A", META_URL),
        DbConnection::new("db-alias-B", META_URL),
    ];
}

#[tokio::test]
async fn failed_migration_for_one_connection_does_not_abort_boot() {
    let h = harness_with(
        &[Project::new("P1", "", ProjectStatus::Started)],
        HarnessOptions {
            migrations: RecordingMigrations::failing(&["db-alias-A"]),
            configure: Box::new(two_connections),
            ..HarnessOptions::default()
        },
    )
    .await;
    let app = h.boot().await;

    let calls = h.migrations.calls();
    assert_eq!(calls[0], "ensure_database:db");
    assert!(calls.contains(&"apply:db-alias-A".to_string()));
    assert!(calls.contains(&"apply:db-alias-B".to_string()));
    assert_eq!(get(app, "/nc/P1/api/v1/_health").await.status(), StatusCode::OK);
}

#[tokio::test]
async fn migration_summary_lists_failed_aliases() {
    let h = harness_with(
        &[],
        HarnessOptions {
            configure: Box::new(two_connections),
            ..HarnessOptions::default()
        },
    )
    .await;
    let engine = RecordingMigrations::failing(&["db-alias-A"]);

    let summary = run_all(
        &engine,
        &h.orchestrator.config(),
        "_noco",
        &ErrorReporter::disabled(),
    )
    .await;
    assert_eq!(summary.failed, vec!["db-alias-A"]);
    assert_eq!(summary.migrated, vec!["db-alias-B"]);
    assert_eq!(
        engine.calls(),
        vec![
            "init:db-alias-A",
            "sync:db-alias-A",
            "apply:db-alias-A",
            "init:db-alias-B",
            "sync:db-alias-B",
            "apply:db-alias-B",
        ]
    );
}

#[tokio::test]
async fn trial_mode_skips_migrations() {
    let h = harness_with(
        &[],
        HarnessOptions {
            configure: Box::new(|config: &mut PlatformConfig| config.trial = true),
            ..HarnessOptions::default()
        },
    )
    .await;
    h.boot().await;
    assert!(h.migrations.calls().is_empty());
    assert_eq!(h.upgrader.runs(), 1);
}

// ---------------------------------------------------------------------------
// Test: signing secret
// ---------------------------------------------------------------------------

#[tokio::test]
async fn persisted_secret_survives_boot() {
    let h = harness(&[]).await;
    h.meta
        .insert_record(
            &MetaScope::global(),
            MetaTable::Store,
            record([("key", json!(JWT_SECRET_KEY)), ("value", json!("S"))]),
        )
        .await
        .unwrap();

    let app = h.boot().await;
    assert_eq!(h.orchestrator.config().jwt_secret(), Some("S"));

    let token = generate_token("ops@example.com", "owner", &JwtConfig::new("S")).unwrap();
    let response = get_with_header(app, "/auth/user/me", AUTH_HEADER, &token).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["sub"], "ops@example.com");
}

#[tokio::test]
async fn generated_secret_is_persisted_once() {
    let h = harness(&[]).await;
    h.boot().await;

    let secret = h.orchestrator.config().jwt_secret().unwrap().to_string();
    let stored = h
        .meta
        .get_record(
            &MetaScope::global(),
            MetaTable::Store,
            &record([("key", json!(JWT_SECRET_KEY))]),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored["value"], json!(secret));

    h.boot().await;
    assert_eq!(h.orchestrator.config().jwt_secret(), Some(secret.as_str()));
}

// ---------------------------------------------------------------------------
// Test: fail-fast steps
// ---------------------------------------------------------------------------

#[tokio::test]
async fn post_migration_hook_runs_before_builders() {
    let h = harness(&[]).await;
    let options = InitOptions::default().with_post_migration(|meta| async move {
        let project = Project::new("P9", "Seeded", ProjectStatus::Started);
        meta.insert_record(
            &MetaScope::global(),
            MetaTable::Projects,
            switchyard_db::meta::project_to_record(&project),
        )
        .await?;
        Ok::<(), anyhow::Error>(())
    });

    let app = h.orchestrator.init(options).await.unwrap();
    assert_eq!(get(app, "/nc/P9/api/v1/_info").await.status(), StatusCode::OK);
}

#[tokio::test]
async fn failing_hook_aborts_boot() {
    let h = harness(&[Project::new("P1", "", ProjectStatus::Started)]).await;
    let options = InitOptions::default()
        .with_post_migration(|_| async { Err(anyhow::anyhow!("seed data missing")) });

    let result = h.orchestrator.init(options).await;
    assert_matches!(result, Err(BootError::Hook(_)));
    assert!(!h.orchestrator.is_booted());
    assert!(h.orchestrator.project_routes().mounted().is_empty());
}

#[tokio::test]
async fn enterprise_requires_a_token_for_project_routes() {
    let h = harness_with(
        &[Project::new("P1", "", ProjectStatus::Started)],
        HarnessOptions {
            variant: Variant::Enterprise,
            ..HarnessOptions::default()
        },
    )
    .await;
    let app = h.boot().await;

    let response = get(app.clone(), "/nc/P1/api/v1/_audit").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let secret = h.orchestrator.config().jwt_secret().unwrap().to_string();
    let token = generate_token("ops@example.com", "owner", &JwtConfig::new(secret)).unwrap();
    let response = get_with_header(app, "/nc/P1/api/v1/_audit", AUTH_HEADER, &token).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn boot_publishes_app_started() {
    let h = harness(&[]).await;
    let mut events = h.orchestrator.bus().subscribe();
    h.boot().await;

    loop {
        let event = events.recv().await.unwrap();
        if event.event_type == names::APP_STARTED {
            assert_eq!(event.payload["env"], "_noco");
            break;
        }
    }
    assert_eq!(h.orchestrator.dashboard_url(), "http://localhost:8080/dashboard");
}
