//! Integration tests for the dd-analyzer HTTP API

mod helpers;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::util::ServiceExt;
use uuid::Uuid;

use dd_analyzer::build_router;
use dd_analyzer::db;
use dd_analyzer::models::AnalysisRun;
use helpers::{build_zip, sample_data_room, test_env, ScriptedLlm, TestEnv, ACCOUNTS, ARTICLES, SUPPLY};

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into_owned()))
    };
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn patch_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("PATCH")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_zip(uri: &str, zip: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/zip")
        .body(Body::from(zip))
        .unwrap()
}

/// POST /dd with the sample data room, returns the DD id
async fn create_sample_dd(app: &Router) -> Uuid {
    let (status, json) = send(
        app,
        post_zip(
            "/dd?name=Project%20Falcon&owner=alice&transaction_type=m_and_a&file_name=falcon.zip",
            sample_data_room(),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", json);
    json["dd"]["id"].as_str().unwrap().parse().unwrap()
}

async fn wait_for_status(env: &TestEnv, run_id: Uuid, wanted: &str) -> AnalysisRun {
    for _ in 0..200 {
        let run = db::runs::load_run(env.db(), run_id).await.unwrap().unwrap();
        if run.status.as_str() == wanted && !env.state.is_run_executing(run_id).await {
            return run;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("run {} never reached {}", run_id, wanted);
}

#[tokio::test]
async fn test_health_reports_missing_llm() {
    let env = test_env(None).await;
    let app = build_router(env.state.clone());

    let (status, json) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["module"], "dd-analyzer");
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["llm_configured"], false);
    assert!(json["blueprints"].as_array().unwrap().iter().any(|b| b == "mining"));
}

#[tokio::test]
async fn test_create_dd_ingests_zip() {
    let env = test_env(None).await;
    let app = build_router(env.state.clone());
    let dd_id = create_sample_dd(&app).await;

    let (status, json) = send(&app, get(&format!("/dd/{}", dd_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["name"], "Project Falcon");
    assert_eq!(json["original_zip_name"], "falcon.zip");
    assert_eq!(json["document_count"], 3);

    let (status, json) = send(&app, get(&format!("/dd/{}/documents", dd_id))).await;
    assert_eq!(status, StatusCode::OK);
    let documents = json.as_array().unwrap();
    assert_eq!(documents.len(), 3);
    assert!(documents.iter().all(|d| d["text_status"] == "extracted"));
    assert!(documents.iter().all(|d| d["version"] == 1));

    let (_, json) = send(&app, get(&format!("/dd/{}/folders", dd_id))).await;
    assert_eq!(json.as_array().unwrap().len(), 3);

    let (_, json) = send(&app, get("/dd")).await;
    assert_eq!(json.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_create_dd_rejects_bad_input() {
    let env = test_env(None).await;
    let app = build_router(env.state.clone());

    let (status, json) = send(
        &app,
        post_zip("/dd?name=X&transaction_type=shipping", sample_data_room()),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "BAD_REQUEST");

    let (status, _) = send(
        &app,
        post_zip("/dd?name=X&transaction_type=m_and_a", b"not a zip".to_vec()),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        post_zip("/dd?name=X&transaction_type=m_and_a", build_zip(&[("../escape.txt", "x")])),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, json) = send(&app, get("/dd")).await;
    assert_eq!(json.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_update_and_delete_dd() {
    let env = test_env(None).await;
    let app = build_router(env.state.clone());
    let dd_id = create_sample_dd(&app).await;

    let (status, json) = send(
        &app,
        patch_json(&format!("/dd/{}", dd_id), json!({"briefing": "Seller is distressed"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["briefing"], "Seller is distressed");

    let (status, _) = send(
        &app,
        patch_json(&format!("/dd/{}", dd_id), json!({"transaction_type": "unknown"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let delete = Request::builder()
        .method("DELETE")
        .uri(format!("/dd/{}", dd_id))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, delete).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, json) = send(&app, get(&format!("/dd/{}", dd_id))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["code"], "NOT_FOUND");
    assert!(!env.dir.path().join("documents").join(dd_id.to_string()).exists());
}

#[tokio::test]
async fn test_reupload_reports_changes() {
    let env = test_env(None).await;
    let app = build_router(env.state.clone());
    let dd_id = create_sample_dd(&app).await;

    let reupload = build_zip(&[
        ARTICLES,
        (SUPPLY.0, "Amended: no termination on change of control."),
        ("Employment/Employee Handbook.txt", "Notice period is three months."),
    ]);
    let (status, json) = send(&app, post_zip(&format!("/dd/{}/documents", dd_id), reupload)).await;
    assert_eq!(status, StatusCode::OK, "{}", json);
    assert_eq!(json["added"], json!(["Employment/Employee Handbook.txt"]));
    assert_eq!(json["removed"], json!([ACCOUNTS.0]));
    assert_eq!(json["modified"], json!([SUPPLY.0]));
    assert_eq!(json["unchanged"], json!([ARTICLES.0]));

    let (_, json) = send(&app, get(&format!("/dd/{}/documents", dd_id))).await;
    let supply = json
        .as_array()
        .unwrap()
        .iter()
        .find(|d| d["original_path"] == SUPPLY.0)
        .unwrap()
        .clone();
    assert_eq!(supply["version"], 2);
    assert_eq!(supply["classification_status"], "pending");

    let (_, versions) = send(
        &app,
        get(&format!("/dd/{}/documents/{}/versions", dd_id, supply["id"].as_str().unwrap())),
    )
    .await;
    assert_eq!(versions.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_manual_reclassification() {
    let env = test_env(None).await;
    let app = build_router(env.state.clone());
    let dd_id = create_sample_dd(&app).await;

    let (_, json) = send(&app, get(&format!("/dd/{}/documents", dd_id))).await;
    let doc_id = json[0]["id"].as_str().unwrap().to_string();

    let (status, json) = send(
        &app,
        patch_json(&format!("/dd/{}/documents/{}", dd_id, doc_id), json!({"folder": "Litigation"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ai_category"], "Litigation");
    assert_eq!(json["ai_confidence"], 1.0);
    assert_eq!(json["classification_status"], "manual");

    let (status, _) = send(
        &app,
        patch_json(&format!("/dd/{}/documents/{}", dd_id, doc_id), json!({"folder": "Tenements"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        patch_json(&format!("/dd/{}/documents/{}", dd_id, Uuid::new_v4()), json!({"folder": "Other"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_perspective_risks_crud() {
    let env = test_env(None).await;
    let app = build_router(env.state.clone());
    let dd_id = create_sample_dd(&app).await;

    let (status, json) = send(
        &app,
        post_json(
            &format!("/dd/{}/risks", dd_id),
            json!({"title": "Customer concentration", "query": "Does one customer exceed 30% of revenue?", "category": "Commercial"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["category"], "commercial");
    let risk_id = json["id"].as_str().unwrap().to_string();

    let (_, json) = send(&app, get(&format!("/dd/{}/risks", dd_id))).await;
    assert_eq!(json.as_array().unwrap().len(), 1);

    let delete = |id: String| {
        Request::builder()
            .method("DELETE")
            .uri(format!("/dd/{}/risks/{}", dd_id, id))
            .body(Body::empty())
            .unwrap()
    };
    let (status, _) = send(&app, delete(risk_id.clone())).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&app, delete(risk_id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_start_analysis_requires_llm() {
    let env = test_env(None).await;
    let app = build_router(env.state.clone());
    let dd_id = create_sample_dd(&app).await;

    let (status, json) = send(&app, post_json(&format!("/dd/{}/analysis", dd_id), json!({}))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["error"]["code"], "SERVICE_UNAVAILABLE");
}

#[tokio::test]
async fn test_start_analysis_conflicts_with_active_run() {
    let env = test_env(Some(Arc::new(ScriptedLlm::new()))).await;
    let app = build_router(env.state.clone());
    let dd_id = create_sample_dd(&app).await;

    let run = AnalysisRun::new(dd_id, 1, "m_and_a".to_string(), false);
    db::runs::insert_run(env.db(), &run).await.unwrap();

    let (status, json) = send(&app, post_json(&format!("/dd/{}/analysis", dd_id), json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"]["code"], "CONFLICT");
}

#[tokio::test]
async fn test_analysis_end_to_end() {
    let llm = Arc::new(ScriptedLlm::new());
    let env = test_env(Some(Arc::clone(&llm))).await;
    let app = build_router(env.state.clone());
    let dd_id = create_sample_dd(&app).await;

    let (status, json) = send(&app, post_json(&format!("/dd/{}/analysis", dd_id), json!({}))).await;
    assert_eq!(status, StatusCode::ACCEPTED, "{}", json);
    assert_eq!(json["run_number"], 1);
    let run_id: Uuid = json["id"].as_str().unwrap().parse().unwrap();

    wait_for_status(&env, run_id, "completed").await;

    let (status, json) = send(&app, get(&format!("/analysis/{}", run_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["percent"], 100.0);
    assert_eq!(json["executing"], false);
    assert_eq!(json["completed_stages"].as_array().unwrap().len(), 14);

    let (_, json) = send(&app, get(&format!("/analysis/{}/findings", run_id))).await;
    let findings = json.as_array().unwrap();
    assert_eq!(findings.len(), 4);

    let (_, json) = send(&app, get(&format!("/analysis/{}/findings?severity=high", run_id))).await;
    assert!(json.as_array().unwrap().iter().all(|f| f["severity"] == "high"));

    let finding_id = findings[0]["id"].as_str().unwrap();
    let (status, json) = send(
        &app,
        patch_json(
            &format!("/findings/{}", finding_id),
            json!({"status": "confirmed", "reviewer_note": "Seen in SPA", "reviewed_by": "alice"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "confirmed");
    assert_eq!(json["reviewed_by"], "alice");

    let (_, json) = send(&app, get(&format!("/analysis/{}/findings?status=confirmed", run_id))).await;
    assert_eq!(json.as_array().unwrap().len(), 1);

    let (status, json) = send(&app, get(&format!("/analysis/{}/report", run_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["dd_name"], "Project Falcon");

    let response = app
        .clone()
        .oneshot(get(&format!("/analysis/{}/report.md", run_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/markdown"));
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let markdown = String::from_utf8(body.to_vec()).unwrap();
    assert!(markdown.starts_with("# Due Diligence Report: Project Falcon"));
    assert!(markdown.contains("Change of control clauses need waivers"));

    let (_, json) = send(&app, get(&format!("/dd/{}/analysis", dd_id))).await;
    assert_eq!(json.as_array().unwrap().len(), 1);

    let (status, _) = send(&app, post_json(&format!("/analysis/{}/resume", run_id), json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_gate_approval_resumes_run() {
    let llm = Arc::new(ScriptedLlm::new());
    let env = test_env(Some(Arc::clone(&llm))).await;
    let app = build_router(env.state.clone());
    let dd_id = create_sample_dd(&app).await;

    let (status, json) = send(
        &app,
        post_json(&format!("/dd/{}/analysis?review_gates=true", dd_id), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let run_id: Uuid = json["id"].as_str().unwrap().parse().unwrap();

    wait_for_status(&env, run_id, "awaiting_review").await;
    let (_, json) = send(&app, get(&format!("/analysis/{}", run_id))).await;
    assert_eq!(json["current_stage"], "checkpoint_a");

    let (status, _) = send(
        &app,
        post_json(&format!("/analysis/{}/gates/pass1_extract/approve", run_id), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // B and C approved ahead of time so one approval of A finishes the run
    for gate in ["checkpoint_c", "checkpoint_b"] {
        let (status, json) = send(
            &app,
            post_json(&format!("/analysis/{}/gates/{}/approve", run_id, gate), json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["resumed"], false);
    }
    let (status, json) = send(
        &app,
        post_json(&format!("/analysis/{}/gates/checkpoint_a/approve", run_id), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["resumed"], true);

    wait_for_status(&env, run_id, "completed").await;
    assert_eq!(llm.calls("pass1_extract"), 3);
}

#[tokio::test]
async fn test_gate_approved_during_execution_is_kept() {
    let llm = Arc::new(ScriptedLlm::new());
    let env = test_env(Some(Arc::clone(&llm))).await;
    let app = build_router(env.state.clone());
    let dd_id = create_sample_dd(&app).await;

    let (_, json) = send(
        &app,
        post_json(&format!("/dd/{}/analysis?review_gates=true", dd_id), json!({})),
    )
    .await;
    let run_id: Uuid = json["id"].as_str().unwrap().parse().unwrap();
    wait_for_status(&env, run_id, "awaiting_review").await;

    let hook_app = app.clone();
    llm.before_answer("pass1_extract", move || {
        let app = hook_app.clone();
        async move {
            let (status, json) = send(
                &app,
                post_json(&format!("/analysis/{}/gates/checkpoint_b/approve", run_id), json!({})),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(json["resumed"], false);
        }
    });

    let (_, json) = send(
        &app,
        post_json(&format!("/analysis/{}/gates/checkpoint_a/approve", run_id), json!({})),
    )
    .await;
    assert_eq!(json["resumed"], true);

    // The run passes B without stopping and waits at C
    wait_for_status(&env, run_id, "awaiting_review").await;
    let (_, json) = send(&app, get(&format!("/analysis/{}", run_id))).await;
    assert_eq!(json["current_stage"], "checkpoint_c");
    assert_eq!(llm.calls("pass2_analyze"), 3);

    let checkpoint = db::checkpoints::load_checkpoint(env.db(), run_id).await.unwrap().unwrap();
    assert_eq!(checkpoint.pass_results.pass1_extractions.len(), 3);
}

#[tokio::test]
async fn test_cancel_idle_run() {
    let env = test_env(Some(Arc::new(ScriptedLlm::new()))).await;
    let app = build_router(env.state.clone());
    let dd_id = create_sample_dd(&app).await;

    let (_, json) = send(
        &app,
        post_json(&format!("/dd/{}/analysis?review_gates=true", dd_id), json!({})),
    )
    .await;
    let run_id: Uuid = json["id"].as_str().unwrap().parse().unwrap();
    wait_for_status(&env, run_id, "awaiting_review").await;

    let (status, json) = send(&app, post_json(&format!("/analysis/{}/cancel", run_id), json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"], "cancelled");

    let (status, _) = send(&app, post_json(&format!("/analysis/{}/cancel", run_id), json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Cancelled runs resume from their checkpoint
    let (status, json) = send(&app, post_json(&format!("/analysis/{}/resume", run_id), json!({}))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["from_stage"], "checkpoint_a");
    wait_for_status(&env, run_id, "awaiting_review").await;
}

#[tokio::test]
async fn test_unknown_run_is_not_found() {
    let env = test_env(None).await;
    let app = build_router(env.state.clone());

    let (status, json) = send(&app, get(&format!("/analysis/{}", Uuid::new_v4()))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_rubric_evaluation() {
    let llm = Arc::new(ScriptedLlm::new());
    let env = test_env(Some(Arc::clone(&llm))).await;
    let app = build_router(env.state.clone());
    let dd_id = create_sample_dd(&app).await;

    let (status, rubric) = send(
        &app,
        post_json(
            "/rubrics",
            json!({
                "name": "Report quality",
                "criteria": [
                    {"name": "Coverage", "weight": 3.0, "max_score": 5.0},
                    {"name": "Accuracy", "weight": 1.0, "max_score": 10.0}
                ]
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let rubric_id = rubric["id"].as_str().unwrap();

    let (status, _) = send(&app, post_json("/rubrics", json!({"name": "Empty", "criteria": []}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, json) = send(&app, post_json(&format!("/dd/{}/analysis", dd_id), json!({}))).await;
    let run_id: Uuid = json["id"].as_str().unwrap().parse().unwrap();
    wait_for_status(&env, run_id, "completed").await;

    let (status, json) = send(
        &app,
        post_json(&format!("/analysis/{}/evaluations", run_id), json!({"rubric_id": rubric_id})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", json);
    // (4/5 * 3 + 9/10 * 1) / 4 * 100
    assert_eq!(json["overall_score"], 82.5);

    let (_, json) = send(&app, get(&format!("/analysis/{}/evaluations", run_id))).await;
    assert_eq!(json.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_set_llm_api_key_enables_analysis() {
    let env = test_env(None).await;
    let app = build_router(env.state.clone());

    let (status, _) = send(&app, post_json("/api/settings/llm_api_key", json!({"api_key": "   "}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, json) = send(
        &app,
        post_json("/api/settings/llm_api_key", json!({"api_key": "sk-test-123"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);

    let stored = db::settings::get_llm_api_key(env.db()).await.unwrap();
    assert_eq!(stored.as_deref(), Some("sk-test-123"));
    let toml = std::fs::read_to_string(env.dir.path().join("dd-analyzer.toml")).unwrap();
    assert!(toml.contains("sk-test-123"));

    let (_, json) = send(&app, get("/health")).await;
    assert_eq!(json["llm_configured"], true);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_concurrent_starts_create_one_run() {
    let env = test_env(Some(Arc::new(ScriptedLlm::new()))).await;
    let app = build_router(env.state.clone());
    let dd_id = create_sample_dd(&app).await;

    // Gated so the winner stays active while the other request lands
    let uri = format!("/dd/{}/analysis?review_gates=true", dd_id);
    let ((first, _), (second, _)) = tokio::join!(
        send(&app, post_json(&uri, json!({}))),
        send(&app, post_json(&uri, json!({}))),
    );

    let mut statuses = vec![first, second];
    statuses.sort();
    assert_eq!(statuses, vec![StatusCode::ACCEPTED, StatusCode::CONFLICT]);

    let runs = db::runs::list_runs(env.db(), dd_id).await.unwrap();
    assert_eq!(runs.len(), 1);
    wait_for_status(&env, runs[0].id, "awaiting_review").await;
}
