use super::*;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request};
use tower::ServiceExt;

async fn test_router(policy: AdjustPolicy) -> Router {
    let db = Db::new("sqlite::memory:").await.expect("open in-memory db");
    app_router(ApiState {
        db,
        adjust_policy: policy,
        token_ttl_hours: 24,
    })
}

async fn send(router: &Router, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, value)
}

async fn signed_in(router: &Router, username: &str) -> String {
    let (status, _) = send(
        router,
        "POST",
        "/api/register",
        None,
        Some(json!({ "username": username, "email": format!("{}@example.com", username), "password": "secret1" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(
        router,
        "POST",
        "/api/login",
        None,
        Some(json!({ "username": username, "password": "secret1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["token"].as_str().unwrap().to_string()
}

async fn stored_plan(router: &Router, token: &str) -> i64 {
    let (status, body) = send(
        router,
        "POST",
        "/api/plans",
        Some(token),
        Some(json!({ "subject": "DSA", "level": "Beginner", "days": 2, "hours": 6 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["id"].as_i64().unwrap()
}

#[tokio::test]
async fn test_home() {
    let router = test_router(AdjustPolicy::Additive).await;
    let (status, body) = send(&router, "GET", "/", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_str().unwrap().contains("running"));
}

#[tokio::test]
async fn test_smart_adjust_example_day() {
    let router = test_router(AdjustPolicy::Additive).await;
    let payload = json!({
        "level": "Beginner",
        "subtopics": [
            { "name": "Arrays", "hours": 1.5, "completed": false },
            { "name": "Loops", "hours": 1.0, "completed": true }
        ]
    });

    let (status, body) = send(&router, "POST", "/api/smart-adjust", None, Some(payload)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["progress"], 50);
    assert_eq!(body["status"], "On Track");
    assert_eq!(body["subtopics"][0]["hours"], 2.0);
    assert_eq!(body["subtopics"][1]["hours"], 1.0);
}

#[tokio::test]
async fn test_smart_adjust_uses_configured_policy() {
    let router = test_router(AdjustPolicy::Taper).await;
    let payload = json!({
        "level": "Advanced",
        "subtopics": [
            { "name": "a", "hours": 1.0, "completed": true },
            { "name": "b", "hours": 1.0, "completed": true },
            { "name": "c", "hours": 1.0, "completed": true },
            { "name": "d", "hours": 1.0, "completed": true },
            { "name": "e", "hours": 2.0, "completed": false }
        ]
    });

    let (_, body) = send(&router, "POST", "/api/smart-adjust", None, Some(payload)).await;
    assert_eq!(body["status"], "Ahead");
    assert_eq!(body["subtopics"][4]["hours"], 1.5);
}

#[tokio::test]
async fn test_smart_adjust_rejects_bad_input() {
    let router = test_router(AdjustPolicy::Additive).await;

    let (status, body) = send(
        &router,
        "POST",
        "/api/smart-adjust",
        None,
        Some(json!({ "level": "Wizard", "subtopics": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("Wizard"));

    let (status, _) = send(
        &router,
        "POST",
        "/api/smart-adjust",
        None,
        Some(json!({ "level": "Beginner", "subtopics": [{ "name": "x", "hours": 1 }] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_generate_plan() {
    let router = test_router(AdjustPolicy::Additive).await;

    let (status, body) = send(
        &router,
        "POST",
        "/api/generate-plan",
        None,
        Some(json!({ "subject": "Python", "level": "Intermediate", "days": 3, "hours": 5 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["plan"].as_array().unwrap().len(), 3);
    assert_eq!(body["plan"][0]["subtopics"][0]["name"], "OOP Concepts");
    assert_eq!(body["plan"][0]["status"], "Behind");
    assert_eq!(body["recommended_hours"], 3.0);

    let (status, body) = send(
        &router,
        "POST",
        "/api/generate-plan",
        None,
        Some(json!({ "subject": "Astrology", "level": "Beginner" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid subject");
}

#[tokio::test]
async fn test_register_and_login_flow() {
    let router = test_router(AdjustPolicy::Additive).await;
    let token = signed_in(&router, "ada").await;
    assert!(!token.is_empty());

    let (status, _) = send(
        &router,
        "POST",
        "/api/register",
        None,
        Some(json!({ "username": "ada", "email": "other@example.com", "password": "secret1" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(
        &router,
        "POST",
        "/api/login",
        None,
        Some(json!({ "username": "ada", "password": "wrong-password" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&router, "POST", "/api/logout", Some(&token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&router, "GET", "/api/plans", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_plans_require_auth() {
    let router = test_router(AdjustPolicy::Additive).await;
    let (status, body) = send(&router, "GET", "/api/plans", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "missing bearer token");

    let (status, _) = send(&router, "GET", "/api/stats", Some("not-a-token"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_plan_lifecycle() {
    let router = test_router(AdjustPolicy::Additive).await;
    let token = signed_in(&router, "ada").await;
    let plan_id = stored_plan(&router, &token).await;

    let (status, body) = send(&router, "GET", "/api/plans", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["subject"], "DSA");

    let (status, body) = send(
        &router,
        "POST",
        &format!("/api/plans/{}/progress", plan_id),
        Some(&token),
        Some(json!({ "day": 1, "topic": "Arrays Basics", "completed": true, "time_spent": 1800 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["progress"], 33);

    let (status, body) = send(&router, "POST", &format!("/api/plans/{}/days/1/adjust", plan_id), Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["progress"], 33);
    assert_eq!(body["subtopics"][0]["hours"], 1.5);
    assert_eq!(body["subtopics"][1]["hours"], 1.5);

    let (_, body) = send(&router, "GET", &format!("/api/plans/{}", plan_id), Some(&token), None).await;
    assert_eq!(body["completion_percentage"], 16.7);
    assert_eq!(body["plan"][0]["subtopics"][1]["hours"], 1.5);
    assert_eq!(body["plan"][1]["subtopics"][1]["hours"], 0.5);

    let (status, _) = send(&router, "POST", &format!("/api/plans/{}/days/7/adjust", plan_id), Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&router, "GET", &format!("/api/plans/{}/progress", plan_id), Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["time_spent"], 1800);

    let (status, _) = send(&router, "DELETE", &format!("/api/plans/{}", plan_id), Some(&token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&router, "GET", &format!("/api/plans/{}", plan_id), Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_other_users_plans_are_hidden() {
    let router = test_router(AdjustPolicy::Additive).await;
    let ada = signed_in(&router, "ada").await;
    let grace = signed_in(&router, "grace").await;
    let plan_id = stored_plan(&router, &ada).await;

    let (status, _) = send(&router, "GET", &format!("/api/plans/{}", plan_id), Some(&grace), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &router,
        "POST",
        &format!("/api/plans/{}/notes", plan_id),
        Some(&grace),
        Some(json!({ "topic": "Graphs", "content": "sneaky" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_notes_sessions_and_stats() {
    let router = test_router(AdjustPolicy::Additive).await;
    let token = signed_in(&router, "ada").await;
    let plan_id = stored_plan(&router, &token).await;

    let (status, note) = send(
        &router,
        "POST",
        &format!("/api/plans/{}/notes", plan_id),
        Some(&token),
        Some(json!({ "topic": "Arrays Basics", "content": "Indexing is O(1)" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = send(
        &router,
        "POST",
        &format!("/api/plans/{}/notes", plan_id),
        Some(&token),
        Some(json!({ "topic": "Arrays Basics", "content": "  " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&router, "GET", &format!("/api/plans/{}/notes", plan_id), Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["content"], "Indexing is O(1)");

    let note_uri = format!("/api/plans/{}/notes/{}", plan_id, note["id"]);
    let (status, _) = send(&router, "DELETE", &note_uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&router, "DELETE", &note_uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &router,
        "POST",
        &format!("/api/plans/{}/sessions", plan_id),
        Some(&token),
        Some(json!({ "topic": "Arrays Basics", "duration": 1500 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = send(
        &router,
        "POST",
        &format!("/api/plans/{}/sessions", plan_id),
        Some(&token),
        Some(json!({ "topic": "Arrays Basics", "duration": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = send(&router, "GET", &format!("/api/plans/{}/sessions", plan_id), Some(&token), None).await;
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, stats) = send(&router, "GET", "/api/stats", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["total_plans"], 1);
    assert_eq!(stats["total_topics"], 6);
    assert_eq!(stats["total_sessions"], 1);
    assert_eq!(stats["total_session_time"], 1500);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_progress_posts_all_land() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("planner.db").display());
    let router = app_router(ApiState {
        db: Db::new(&url).await.unwrap(),
        adjust_policy: AdjustPolicy::Additive,
        token_ttl_hours: 24,
    });
    let token = signed_in(&router, "ada").await;
    let plan_id = stored_plan(&router, &token).await;

    let (_, plan) = send(&router, "GET", &format!("/api/plans/{}", plan_id), Some(&token), None).await;
    let mut targets = Vec::new();
    for day in plan["plan"].as_array().unwrap() {
        for sub in day["subtopics"].as_array().unwrap() {
            targets.push(json!({ "day": day["day"], "topic": sub["name"], "completed": true, "time_spent": 10 }));
        }
    }

    let mut handles = Vec::new();
    for _ in 0..5 {
        for body in &targets {
            let (router, token, body) = (router.clone(), token.clone(), body.clone());
            let uri = format!("/api/plans/{}/progress", plan_id);
            handles.push(tokio::spawn(async move { send(&router, "POST", &uri, Some(&token), Some(body)).await }));
        }
    }
    for handle in handles {
        let (status, body) = handle.await.unwrap();
        assert_eq!(status, StatusCode::OK, "{}", body);
    }

    let (_, body) = send(&router, "GET", &format!("/api/plans/{}", plan_id), Some(&token), None).await;
    assert_eq!(body["completion_percentage"], 100.0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicate_registrations_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("planner.db").display());
    let router = app_router(ApiState {
        db: Db::new(&url).await.unwrap(),
        adjust_policy: AdjustPolicy::Additive,
        token_ttl_hours: 24,
    });

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let router = router.clone();
            tokio::spawn(async move {
                let body = json!({ "username": "ada", "email": "ada@example.com", "password": "secret1" });
                send(&router, "POST", "/api/register", None, Some(body)).await.0
            })
        })
        .collect();

    let mut created = 0;
    for handle in handles {
        match handle.await.unwrap() {
            StatusCode::CREATED => created += 1,
            status => assert_eq!(status, StatusCode::CONFLICT),
        }
    }
    assert_eq!(created, 1);
}
